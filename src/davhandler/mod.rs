//
// This module contains the main entry point of the library, DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::buf::Buf;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::status_text;
use crate::fs::{DavFileSystem, LocalFs, MemFs};
use crate::ls::{Confirmation, DavLockSystem, LockDetails, LsError, MemLs};
use crate::util::{dav_method, DavMethod};
use crate::{DavError, DavResult};

mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;

// Upper bound on pre-read (XML) request bodies.
const MAX_BODY_SIZE: usize = 65536;

/// Per-request logging sink: called once per request with the error the
/// request ended in, if any.
pub type RequestLogger = dyn Fn(&Request<()>, Option<&(dyn StdError + 'static)>) + Send + Sync;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling requests.
    prefix: String,
    /// Filesystem backend.
    fs: FileSystem,
    /// Lock store backend.
    ls: Option<LockSystem>,
    /// Per-request logger.
    logger: Option<Arc<RequestLogger>>,
}

/// File system backend.
#[derive(Clone)]
pub enum FileSystem {
    /// Ephemeral in-memory filesystem.
    Mem,
    /// A directory on the local filesystem.
    Local { base: PathBuf },
    /// Bring your own backend.
    Custom(Arc<dyn DavFileSystem>),
}

impl FileSystem {
    /// Serve a local directory.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        FileSystem::Local { base: path.into() }
    }

    fn build(self) -> Arc<dyn DavFileSystem> {
        match self {
            FileSystem::Mem => MemFs::new(),
            FileSystem::Local { base } => LocalFs::new(base),
            FileSystem::Custom(fs) => fs,
        }
    }
}

/// Lock store backend.
#[derive(Clone, Default)]
pub enum LockSystem {
    /// Ephemeral in-memory lock store.
    #[default]
    Mem,
    /// Bring your own store.
    Custom(Arc<dyn DavLockSystem>),
}

impl LockSystem {
    fn build(self) -> Arc<dyn DavLockSystem> {
        match self {
            LockSystem::Mem => MemLs::new(),
            LockSystem::Custom(ls) => ls,
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(fs: FileSystem) -> DavBuilder {
        Self {
            prefix: String::new(),
            fs,
            ls: None,
            logger: None,
        }
    }

    /// Use the configuration that was built to create a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of the
    /// request path to a filesystem path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Set the lock store to use. Without one, every request fails with
    /// a 500: the handler refuses to mutate anything it cannot lock.
    pub fn locksystem(self, ls: LockSystem) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Install a per-request logger. It is called for every request,
    /// with the error the request ended in (or `None`).
    pub fn logger(
        self,
        logger: impl Fn(&Request<()>, Option<&(dyn StdError + 'static)>) + Send + Sync + 'static,
    ) -> Self {
        let mut this = self;
        this.logger = Some(Arc::new(logger));
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` and `build` methods are used to instantiate a handler.
/// The `handle` method does the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) fs: Arc<dyn DavFileSystem>,
    pub(crate) ls: Option<Arc<dyn DavLockSystem>>,
    pub(crate) logger: Option<Arc<RequestLogger>>,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            fs: cfg.fs.build(),
            ls: cfg.ls.map(|ls| ls.build()),
            logger: cfg.logger,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(fs: FileSystem) -> DavBuilder {
        DavBuilder::new(fs)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let (parts, body) = req.into_parts();
        let req = Request::from_parts(parts, ());

        match self.handle2(&req, body).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                if let Some(logger) = &self.logger {
                    logger(&req, None);
                }
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let status = err.statuscode();
                let mut resp = status_response(status);
                if err.must_close() {
                    if let Ok(value) = "close".parse() {
                        resp.headers_mut().insert("connection", value);
                    }
                }
                if let Some(logger) = &self.logger {
                    logger(&req, Some(&err as &(dyn StdError + 'static)));
                }
                resp
            }
        }
    }

    // internal dispatcher.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        // A handler without a lock store cannot enforce write exclusion,
        // so it handles nothing at all.
        if self.ls.is_none() {
            return Err(DavError::NoLockSystem);
        }

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expect no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (None, read_request(body, MAX_BODY_SIZE).await?),
        };

        // Not all methods accept a body.
        match method {
            DavMethod::Put
            | DavMethod::PropFind
            | DavMethod::PropPatch
            | DavMethod::Lock => {}
            _ => {
                if !body_data.is_empty() {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            }
        }

        debug!("== START REQUEST {:?} {}", method, req.uri());

        match method {
            DavMethod::Options => self.handle_options(req).await,
            DavMethod::Get | DavMethod::Head | DavMethod::Post => {
                self.handle_gethead(req, method).await
            }
            DavMethod::Put => self.handle_put(req, body_strm.expect("put body")).await,
            DavMethod::Delete => self.handle_delete(req).await,
            DavMethod::MkCol => self.handle_mkcol(req).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(req, method).await,
            DavMethod::Lock => self.handle_lock(req, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(req).await,
            DavMethod::PropFind => self.handle_propfind(req, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(req, &body_data).await,
        }
    }

    // helper: normalized path of the request URL.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        Ok(DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?)
    }

    // helper: the lock store, or the error that every request gets
    // when none is configured.
    pub(crate) fn ls(&self) -> DavResult<&Arc<dyn DavLockSystem>> {
        self.ls.as_ref().ok_or(DavError::NoLockSystem)
    }

    /// The pivot of lock coordination: make sure this request may touch
    /// `src` and `dst`.
    ///
    /// Without an `If:` header the client has no locks to cite. We still
    /// need the resources to not be locked by anyone else, so each path
    /// gets a temporary zero-depth lock that would conflict with other
    /// clients' locks; the guard drops them when the request is done.
    ///
    /// With an `If:` header, the lists are tried in order; the first one
    /// whose conditions confirm against the lock store wins. If all of
    /// them fail the request fails with 412 Precondition Failed, as
    /// RFC 4918 section 10.4.1 requires (the litmus suite warns here,
    /// expecting 423).
    pub(crate) fn confirm_locks(
        &self,
        req: &Request<()>,
        src: Option<&DavPath>,
        dst: Option<&DavPath>,
    ) -> DavResult<LockGuard> {
        let ls = self.ls()?;
        let now = SystemTime::now();

        let ifheader = req
            .headers()
            .typed_try_get::<davheaders::If>()
            .map_err(|_| DavError::InvalidIfHeader)?;

        let ih = match ifheader {
            None => {
                let mut tokens = Vec::new();
                for path in [src, dst].into_iter().flatten() {
                    let details = LockDetails {
                        root: path.as_str().to_string(),
                        duration: None,
                        owner_xml: None,
                        zero_depth: true,
                    };
                    match ls.create(now, details) {
                        Ok(token) => tokens.push(token),
                        Err(e) => {
                            // Release the lock we already took, in reverse.
                            for token in tokens.iter().rev() {
                                let _ = ls.unlock(now, token);
                            }
                            return Err(match e {
                                LsError::Locked => DavError::Locked,
                                _ => DavError::Status(StatusCode::INTERNAL_SERVER_ERROR),
                            });
                        }
                    }
                }
                return Ok(LockGuard {
                    ls: ls.clone(),
                    tokens,
                    confirmation: None,
                });
            }
            Some(ih) => ih,
        };

        // ih is a disjunction (OR) of lists, so any list will do.
        let host = request_host(req);
        for list in &ih.lists {
            let effective;
            let lsrc = match &list.resource_tag {
                None => src,
                Some(tag) => {
                    let uri: http::Uri = match tag.parse() {
                        Ok(uri) => uri,
                        Err(_) => continue,
                    };
                    let tag_host = uri.authority().map(|a| a.to_string());
                    if tag_host != host {
                        continue;
                    }
                    effective = DavPath::from_str_and_prefix(uri.path(), &self.prefix)?;
                    Some(&effective)
                }
            };
            match ls.confirm(
                now,
                lsrc.map(|p| p.as_str()),
                dst.map(|p| p.as_str()),
                &list.conditions,
            ) {
                Ok(confirmation) => {
                    return Ok(LockGuard {
                        ls: ls.clone(),
                        tokens: Vec::new(),
                        confirmation: Some(confirmation),
                    });
                }
                Err(LsError::ConfirmationFailed) => continue,
                Err(_) => return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR)),
            }
        }
        Err(DavError::PreconditionFailed)
    }
}

/// Scoped result of [`DavHandler::confirm_locks`]. Dropping it releases
/// the temporary locks (destination before source) or the confirmation
/// holds, on every exit path.
pub(crate) struct LockGuard {
    ls: Arc<dyn DavLockSystem>,
    tokens: Vec<String>,
    confirmation: Option<Confirmation>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let now = SystemTime::now();
        for token in self.tokens.drain(..).rev() {
            let _ = self.ls.unlock(now, &token);
        }
        if let Some(confirmation) = self.confirmation.take() {
            self.ls.release(confirmation);
        }
    }
}

// The host the client addressed, for comparing against Destination and
// If-header resource tags.
pub(crate) fn request_host(req: &Request<()>) -> Option<String> {
    req.headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
}

/// A response consisting of just a status line and the reason phrase as
/// its body (no body for 204).
pub(crate) fn status_response(status: StatusCode) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    let body = if status == StatusCode::NO_CONTENT {
        builder = builder.header(http::header::CONTENT_LENGTH, "0");
        Body::empty()
    } else {
        let text = status_text(status);
        builder = builder.header(http::header::CONTENT_LENGTH, text.len().to_string());
        Body::from(text)
    };
    builder.body(body).expect("valid response")
}

// drain the request body, with an upper limit.
async fn read_request<ReqBody, ReqData, ReqError>(
    body: ReqBody,
    max_size: usize,
) -> DavResult<Vec<u8>>
where
    ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    ReqData: Buf + Send + 'static,
    ReqError: StdError + Send + Sync + 'static,
{
    let mut data = Vec::new();
    pin_utils::pin_mut!(body);
    while let Some(res) = body.data().await {
        let mut buf = res.map_err(|_| {
            DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
        })?;
        while buf.has_remaining() {
            if data.len() + buf.remaining() > max_size {
                return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
            }
            let chunk = buf.chunk();
            let len = chunk.len();
            data.extend_from_slice(chunk);
            buf.advance(len);
        }
    }
    Ok(data)
}
