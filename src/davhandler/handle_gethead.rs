use std::io::{self, SeekFrom};

use async_stream::try_stream;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::{eval_conditionals, eval_range, Conditional, RangeResult};
use crate::fs::OpenOptions;
use crate::util::{systemtime_to_httpdate, DavMethod};
use crate::{DavError, DavResult};

pub(crate) const READ_BUF_SIZE: usize = 16384;

impl crate::DavHandler {
    // GET, HEAD and POST are all "read the resource": some clients POST
    // to a file URL and expect file-download semantics.
    pub(crate) async fn handle_gethead(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;

        let mut file = self
            .fs
            .open(&path, OpenOptions::read())
            .await
            .map_err(|_| DavError::Status(StatusCode::NOT_FOUND))?;
        let meta = file
            .metadata()
            .await
            .map_err(|_| DavError::Status(StatusCode::NOT_FOUND))?;
        if meta.is_dir() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }

        let etag = meta.etag();
        let len = meta.len();
        let modified = meta.modified().ok();

        let mut builder = Response::builder()
            .header(http::header::ETAG, etag.as_str())
            .header(http::header::ACCEPT_RANGES, "bytes");
        if let Some(modified) = modified {
            builder = builder.header(http::header::LAST_MODIFIED, systemtime_to_httpdate(modified));
        }

        match eval_conditionals(req, &*meta) {
            Conditional::Ok => {}
            Conditional::NotModified => {
                return Ok(builder
                    .status(StatusCode::NOT_MODIFIED)
                    .body(Body::empty())
                    .expect("valid response"));
            }
            Conditional::PreconditionFailed => {
                return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
            }
        }

        let content_type = mime_guess::from_path(path.as_str())
            .first_raw()
            .unwrap_or("application/octet-stream");
        builder = builder.header(http::header::CONTENT_TYPE, content_type);

        let (start, end) = match eval_range(req, len) {
            RangeResult::Full => (0, len),
            RangeResult::Partial(start, end) => {
                builder = builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(
                        http::header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", start, end - 1, len),
                    );
                (start, end)
            }
            RangeResult::Unsatisfiable => {
                return Ok(Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(http::header::CONTENT_RANGE, format!("bytes */{}", len))
                    .header(http::header::CONTENT_LENGTH, "0")
                    .body(Body::empty())
                    .expect("valid response"));
            }
        };
        builder = builder.header(http::header::CONTENT_LENGTH, (end - start).to_string());

        if method == DavMethod::Head {
            return Ok(builder.body(Body::empty()).expect("valid response"));
        }

        if start > 0 {
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(DavError::FsError)?;
        }

        let body = Body::stream(try_stream! {
            let mut file = file;
            let mut remaining = end - start;
            while remaining > 0 {
                let count = READ_BUF_SIZE.min(remaining as usize);
                let chunk = file
                    .read_bytes(count)
                    .await
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                if chunk.is_empty() {
                    break;
                }
                remaining -= chunk.len() as u64;
                yield chunk;
            }
        });

        Ok(builder.body(body).expect("valid response"))
    }
}
