use std::error::Error as StdError;

use bytes::Buf;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::davhandler::status_response;
use crate::fs::OpenOptions;
use crate::{DavError, DavResult};

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let path = self.path(req)?;
        let _guard = self.confirm_locks(req, Some(&path), None)?;

        let mut file = self
            .fs
            .open(&path, OpenOptions::write())
            .await
            .map_err(|_| DavError::Status(StatusCode::NOT_FOUND))?;

        // Stream the body in. Whatever happens, stat and flush still run:
        // the first failure of copy/stat/flush decides the outcome.
        let mut copy_failed = false;
        {
            pin_utils::pin_mut!(body);
            while let Some(chunk) = body.data().await {
                let mut chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(_) => {
                        copy_failed = true;
                        break;
                    }
                };
                let data = chunk.copy_to_bytes(chunk.remaining());
                if file.write_bytes(data).await.is_err() {
                    copy_failed = true;
                    break;
                }
            }
        }
        let meta = file.metadata().await;
        let flushed = file.flush().await;

        if copy_failed || meta.is_err() || flushed.is_err() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }
        let meta = meta.expect("checked above");

        let mut resp = status_response(StatusCode::CREATED);
        if let Ok(value) = meta.etag().parse() {
            resp.headers_mut().insert(http::header::ETAG, value);
        }
        Ok(resp)
    }
}
