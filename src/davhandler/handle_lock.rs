use std::io;
use std::time::SystemTime;

use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xml::writer::{EmitterConfig, XmlEvent};
use xmltree::{Element, XMLNode};

use crate::body::Body;
use crate::davhandler::status_response;
use crate::davheaders::{DavTimeout, Depth, If, LockToken};
use crate::fs::OpenOptions;
use crate::ls::{LockDetails, LsError};
use crate::util::MemBuffer;
use crate::xmlutil::{
    dav_element, dav_text_element, find_dav_child, is_dav, parse_body, write_element,
};
use crate::{DavError, DavResult};

// The parts of a lockinfo request body we care about. The scope and type
// were already validated: only exclusive write locks get this far.
struct LockInfo {
    owner: Option<Element>,
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let duration = req
            .headers()
            .typed_try_get::<DavTimeout>()
            .map_err(|_| DavError::InvalidTimeout)?
            .map(|t| t.0)
            .unwrap_or(None);

        let ls = self.ls()?.clone();
        let now = SystemTime::now();

        // An empty body means to refresh an existing lock, named by the
        // If header.
        let lockinfo = match read_lock_info(body)? {
            None => {
                let ih = req
                    .headers()
                    .typed_try_get::<If>()
                    .map_err(|_| DavError::InvalidIfHeader)?
                    .ok_or(DavError::InvalidIfHeader)?;
                let token = match &ih.lists[..] {
                    [list] => match &list.conditions[..] {
                        [cond] => cond.token.clone(),
                        _ => None,
                    },
                    _ => None,
                };
                let token = token
                    .filter(|t| !t.is_empty())
                    .ok_or(DavError::InvalidLockToken)?;
                let details = match ls.refresh(now, &token, duration) {
                    Ok(details) => details,
                    Err(LsError::NoSuchLock) => return Err(DavError::PreconditionFailed),
                    Err(_) => return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR)),
                };
                return lock_response(StatusCode::OK, None, &token, &details);
            }
            Some(li) => li,
        };

        // Section 9.10.3: no Depth header acts as "Depth: infinity", and
        // only "0" or "infinity" may be used.
        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(None) => Depth::Infinity,
            Ok(Some(Depth::One)) | Err(_) => return Err(DavError::InvalidDepth),
            Ok(Some(depth)) => depth,
        };
        let path = self.path(req)?;
        let details = LockDetails {
            root: path.as_str().to_string(),
            duration,
            owner_xml: lockinfo.owner,
            zero_depth: depth == Depth::Zero,
        };
        let token = match ls.create(now, details.clone()) {
            Ok(token) => token,
            Err(LsError::Locked) => return Err(DavError::Locked),
            Err(_) => return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR)),
        };

        // Anything that goes wrong from here on must not leave the fresh
        // lock behind, so the whole tail funnels into one rollback point.
        let result = async {
            // Locking an unmapped URL creates an empty resource ("lock-null").
            let mut created = false;
            if self.fs.metadata(&path).await.is_err() {
                let file = self
                    .fs
                    .open(&path, OpenOptions::write())
                    .await
                    .map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
                drop(file);
                created = true;
            }
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            lock_response(status, Some(&token), &token, &details)
        }
        .await;

        if result.is_err() {
            let _ = ls.unlock(now, &token);
        }
        result
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        // The Lock-Token value is a Coded-URL; the typed header has
        // already stripped the angle brackets.
        let token = req
            .headers()
            .typed_try_get::<LockToken>()
            .map_err(|_| DavError::InvalidLockToken)?
            .ok_or(DavError::InvalidLockToken)?;

        let ls = self.ls()?;
        match ls.unlock(SystemTime::now(), &token.0) {
            Ok(()) => Ok(status_response(StatusCode::NO_CONTENT)),
            Err(LsError::Forbidden) => Err(DavError::Status(StatusCode::FORBIDDEN)),
            Err(LsError::Locked) => Err(DavError::Locked),
            Err(LsError::NoSuchLock) => Err(DavError::Status(StatusCode::CONFLICT)),
            Err(_) => Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR)),
        }
    }
}

fn read_lock_info(body: &[u8]) -> DavResult<Option<LockInfo>> {
    if body.is_empty() {
        return Ok(None);
    }
    let el = parse_body(body).map_err(|_| DavError::InvalidLockInfo)?;
    if !is_dav(&el, "lockinfo") {
        return Err(DavError::InvalidLockInfo);
    }
    let scope = find_dav_child(&el, "lockscope");
    let exclusive = scope.and_then(|s| find_dav_child(s, "exclusive")).is_some();
    let shared = scope.and_then(|s| find_dav_child(s, "shared")).is_some();
    let write = find_dav_child(&el, "locktype")
        .and_then(|t| find_dav_child(t, "write"))
        .is_some();
    if shared || !exclusive || !write {
        // Only exclusive write locks are supported.
        return Err(DavError::UnsupportedLockInfo);
    }
    Ok(Some(LockInfo {
        owner: find_dav_child(&el, "owner").cloned(),
    }))
}

/// The `<D:activelock>` element for a lock, shared between LOCK responses
/// and the lockdiscovery live property.
pub(crate) fn activelock_element(token: &str, details: &LockDetails) -> Element {
    let mut locktype = dav_element("locktype");
    locktype.children.push(XMLNode::Element(dav_element("write")));

    let mut lockscope = dav_element("lockscope");
    lockscope
        .children
        .push(XMLNode::Element(dav_element("exclusive")));

    let depth = if details.zero_depth { "0" } else { "infinity" };
    let timeout = match details.duration {
        None => "Infinite".to_string(),
        Some(d) => format!("Second-{}", d.as_secs()),
    };

    let mut locktoken = dav_element("locktoken");
    locktoken
        .children
        .push(XMLNode::Element(dav_text_element("href", token)));

    let mut lockroot = dav_element("lockroot");
    lockroot
        .children
        .push(XMLNode::Element(dav_text_element("href", &details.root)));

    let mut active = dav_element("activelock");
    active.children.push(XMLNode::Element(locktype));
    active.children.push(XMLNode::Element(lockscope));
    active
        .children
        .push(XMLNode::Element(dav_text_element("depth", depth)));
    if let Some(owner) = &details.owner_xml {
        let mut echo = dav_element("owner");
        echo.children = owner.children.clone();
        active.children.push(XMLNode::Element(echo));
    }
    active
        .children
        .push(XMLNode::Element(dav_text_element("timeout", &timeout)));
    active.children.push(XMLNode::Element(locktoken));
    active.children.push(XMLNode::Element(lockroot));
    active
}

// A LOCK response: prop/lockdiscovery/activelock, plus the Lock-Token
// header for newly created locks.
fn lock_response(
    status: StatusCode,
    new_token: Option<&str>,
    token: &str,
    details: &LockDetails,
) -> DavResult<Response<Body>> {
    let mut writer = EmitterConfig::new()
        .write_document_declaration(true)
        .create_writer(MemBuffer::new());
    let werr = |e: xml::writer::Error| {
        DavError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string()))
    };
    writer
        .write(XmlEvent::start_element("D:prop").ns("D", "DAV:"))
        .map_err(werr)?;
    writer
        .write(XmlEvent::start_element("D:lockdiscovery"))
        .map_err(werr)?;
    write_element(&mut writer, &activelock_element(token, details)).map_err(werr)?;
    writer.write(XmlEvent::end_element()).map_err(werr)?;
    writer.write(XmlEvent::end_element()).map_err(werr)?;
    let body: Bytes = writer.inner_mut().take();

    let mut builder = Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .header(http::header::CONTENT_LENGTH, body.len().to_string());
    if let Some(token) = new_token {
        builder = builder.header("Lock-Token", format!("<{}>", token));
    }
    Ok(builder.body(Body::from(body)).expect("valid response"))
}
