use http::{Request, Response};

use crate::body::Body;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req)?;

        // The Allow set depends on whether the target exists, and on
        // whether it is a collection or a regular resource. An unmapped
        // URL only offers the methods that create something there.
        let allow = match self.fs.metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                "OPTIONS, LOCK, DELETE, PROPPATCH, COPY, MOVE, UNLOCK, PROPFIND"
            }
            Ok(_) => {
                "OPTIONS, LOCK, GET, HEAD, POST, DELETE, PROPPATCH, COPY, MOVE, UNLOCK, PROPFIND, PUT"
            }
            Err(_) => "OPTIONS, LOCK, PUT, MKCOL",
        };

        let resp = Response::builder()
            .header("Allow", allow)
            // http://www.webdav.org/specs/rfc4918.html#dav.compliance.classes
            .header("DAV", "1, 2")
            // http://msdn.microsoft.com/en-au/library/cc250217.aspx
            .header("MS-Author-Via", "DAV")
            .header(http::header::CONTENT_LENGTH, "0")
            .body(Body::empty())
            .expect("valid response");
        Ok(resp)
    }
}
