use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::status_response;
use crate::fs::FsError;
use crate::{DavError, DavResult};

impl crate::DavHandler {
    pub(crate) async fn handle_delete(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let _guard = self.confirm_locks(req, Some(&path), None)?;

        // WebDAV wants a 404 for a missing target, and remove_all is
        // silent about missing paths, so stat first.
        if let Err(err) = self.fs.metadata(&path).await {
            return Err(match err {
                FsError::NotFound => DavError::FsError(err),
                _ => DavError::Status(StatusCode::METHOD_NOT_ALLOWED),
            });
        }

        // TODO: return a MultiStatus body when part of a collection
        // could not be removed.
        if self.fs.remove_all(&path).await.is_err() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }
        Ok(status_response(StatusCode::NO_CONTENT))
    }
}
