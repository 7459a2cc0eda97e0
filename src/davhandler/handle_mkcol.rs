use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::status_response;
use crate::fs::FsError;
use crate::{DavError, DavResult};

impl crate::DavHandler {
    // A MKCOL request body would be a resource description, which nobody
    // defines; the dispatcher already rejected one with 415.
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let _guard = self.confirm_locks(req, Some(&path), None)?;

        match self.fs.create_dir(&path).await {
            Ok(()) => Ok(status_response(StatusCode::CREATED)),
            // The parent collection does not exist.
            Err(FsError::NotFound) => Err(DavError::Status(StatusCode::CONFLICT)),
            Err(_) => Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED)),
        }
    }
}
