//
// The property engine: PROPFIND (with its streaming filesystem walk)
// and PROPPATCH.
//
use std::collections::HashMap;
use std::io;
use std::time::SystemTime;

use async_stream::try_stream;
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::{Element, XMLNode};

use crate::body::Body;
use crate::davhandler::handle_lock::activelock_element;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::fs::{DavDirEntry, DavMetaData, DavProp, FsError, FsStream};
use crate::multistatus::{MultiStatusWriter, Propstat};
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};
use crate::xmlutil::{
    child_elements, dav_element, dav_text_element, find_dav_child, is_dav, parse_body, DAV_NS,
};
use crate::{DavError, DavResult};

// Bound on the directory nesting a single PROPFIND will walk into.
const MAX_WALK_DEPTH: usize = 1000;

struct LiveFlags {
    dir: bool,
    file: bool,
}

lazy_static! {
    // The live properties this server defines, and the resource types
    // they apply to.
    static ref LIVE_PROPS: HashMap<&'static str, LiveFlags> = {
        let mut m = HashMap::new();
        m.insert("displayname", LiveFlags { dir: true, file: true });
        m.insert("creationdate", LiveFlags { dir: true, file: true });
        m.insert("getcontentlength", LiveFlags { dir: false, file: true });
        m.insert("getcontenttype", LiveFlags { dir: false, file: true });
        m.insert("getlastmodified", LiveFlags { dir: true, file: true });
        m.insert("getetag", LiveFlags { dir: true, file: true });
        m.insert("resourcetype", LiveFlags { dir: true, file: true });
        m.insert("lockdiscovery", LiveFlags { dir: true, file: true });
        m.insert("supportedlock", LiveFlags { dir: true, file: true });
        m
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PropName {
    ns: Option<String>,
    name: String,
}

impl PropName {
    fn of(el: &Element) -> PropName {
        PropName {
            ns: el.namespace.clone(),
            name: el.name.clone(),
        }
    }

    fn is_dav(&self) -> bool {
        matches!(self.ns.as_deref(), None | Some(DAV_NS))
    }

    // An empty element carrying just this property's name.
    fn element(&self) -> Element {
        let mut el = Element::new(&self.name);
        match self.ns.as_deref() {
            None | Some(DAV_NS) => {
                el.namespace = Some(DAV_NS.to_string());
                el.prefix = Some("D".to_string());
            }
            Some(ns) => el.namespace = Some(ns.to_string()),
        }
        el
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PropfindMode {
    Propname,
    Allprop,
    Prop,
}

struct PropfindRequest {
    mode: PropfindMode,
    // Requested properties (Prop mode).
    prop: Vec<PropName>,
    // Extras on top of allprop.
    include: Vec<PropName>,
}

fn parse_propfind(body: &[u8]) -> DavResult<PropfindRequest> {
    // An empty PROPFIND request body must be treated as an allprop request.
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(PropfindRequest {
            mode: PropfindMode::Allprop,
            prop: Vec::new(),
            include: Vec::new(),
        });
    }
    let el = parse_body(body).map_err(|_| DavError::InvalidPropfind)?;
    if !is_dav(&el, "propfind") {
        return Err(DavError::InvalidPropfind);
    }
    let allprop = find_dav_child(&el, "allprop").is_some();
    let propname = find_dav_child(&el, "propname").is_some();
    let prop = find_dav_child(&el, "prop");
    let include = find_dav_child(&el, "include");

    if include.is_some() && !allprop {
        return Err(DavError::InvalidPropfind);
    }
    if allprop && (prop.is_some() || propname) {
        return Err(DavError::InvalidPropfind);
    }
    if propname && prop.is_some() {
        return Err(DavError::InvalidPropfind);
    }
    if !allprop && !propname && prop.is_none() {
        return Err(DavError::InvalidPropfind);
    }

    let names = |el: Option<&Element>| -> Vec<PropName> {
        el.map(|el| child_elements(el).map(PropName::of).collect())
            .unwrap_or_default()
    };
    Ok(PropfindRequest {
        mode: if propname {
            PropfindMode::Propname
        } else if allprop {
            PropfindMode::Allprop
        } else {
            PropfindMode::Prop
        },
        prop: names(prop),
        include: names(include),
    })
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let meta = self.fs.metadata(&path).await.map_err(|e| match e {
            FsError::NotFound => DavError::FsError(e),
            _ => DavError::Status(StatusCode::METHOD_NOT_ALLOWED),
        })?;

        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(None) => Depth::Infinity,
            Ok(Some(depth)) => depth,
            Err(_) => return Err(DavError::InvalidDepth),
        };
        let pf = parse_propfind(body)?;

        let this = self.clone();
        let mut root = path.clone();
        if meta.is_dir() {
            root.add_slash();
        }

        // Stream the multistatus body while walking; the 207 status line
        // is already on the wire when the first response goes out.
        let stream = try_stream! {
            let to_io = |e: DavError| io::Error::new(io::ErrorKind::Other, e.to_string());
            let mut ms = MultiStatusWriter::new();

            let is_dir = meta.is_dir();
            this.write_propfind_response(&mut ms, &root, &*meta, &pf)
                .await
                .map_err(to_io)?;
            let chunk = ms.take();
            if !chunk.is_empty() {
                yield chunk;
            }

            let mut stack: Vec<(DavPath, FsStream<Box<dyn DavDirEntry>>)> = Vec::new();
            if is_dir && depth != Depth::Zero {
                let entries = this.fs.read_dir(&path).await.map_err(|e| to_io(e.into()))?;
                stack.push((path.clone(), entries));
            }

            while let Some((dir, mut entries)) = stack.pop() {
                let entry = match entries.next().await {
                    Some(entry) => entry,
                    None => continue,
                };
                let name = entry.name();
                let cmeta = entry.metadata().await.map_err(|e| to_io(e.into()))?;
                stack.push((dir.clone(), entries));

                let mut child = dir.join(&name);
                if cmeta.is_dir() {
                    child.add_slash();
                }
                this.write_propfind_response(&mut ms, &child, &*cmeta, &pf)
                    .await
                    .map_err(to_io)?;
                let chunk = ms.take();
                if !chunk.is_empty() {
                    yield chunk;
                }

                if cmeta.is_dir() && depth == Depth::Infinity {
                    if stack.len() >= MAX_WALK_DEPTH {
                        Err::<(), io::Error>(to_io(DavError::RecursionTooDeep))?;
                    }
                    let entries = this.fs.read_dir(&child).await.map_err(|e| to_io(e.into()))?;
                    stack.push((child, entries));
                }
            }

            yield ms.close().map_err(to_io)?;
        };

        Ok(Response::builder()
            .status(StatusCode::MULTI_STATUS)
            .header(http::header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(Body::stream(stream))
            .expect("valid response"))
    }

    async fn write_propfind_response(
        &self,
        ms: &mut MultiStatusWriter,
        path: &DavPath,
        meta: &dyn DavMetaData,
        pf: &PropfindRequest,
    ) -> DavResult<()> {
        let propstats = match pf.mode {
            PropfindMode::Propname => self.propnames(path, meta).await?,
            PropfindMode::Allprop => self.allprop(path, meta, &pf.include).await?,
            PropfindMode::Prop => self.props(path, meta, &pf.prop).await?,
        };
        ms.write_response(&path.as_url_string(), propstats)
    }

    // Only the names of the defined properties, all with status 200.
    async fn propnames(&self, path: &DavPath, meta: &dyn DavMetaData) -> DavResult<Vec<Propstat>> {
        let mut pstat = Propstat::new(StatusCode::OK);
        for (name, flags) in LIVE_PROPS.iter() {
            if applicable(flags, meta) {
                pstat.props.push(dav_element(name));
            }
        }
        for dead in self.dead_props(path).await {
            pstat.props.push(
                PropName {
                    ns: dead.namespace.clone(),
                    name: dead.name.clone(),
                }
                .element(),
            );
        }
        Ok(vec![pstat])
    }

    // Every defined property with its value, plus any `include` extras
    // that are not already covered.
    async fn allprop(
        &self,
        path: &DavPath,
        meta: &dyn DavMetaData,
        include: &[PropName],
    ) -> DavResult<Vec<Propstat>> {
        let mut found = Propstat::new(StatusCode::OK);
        let mut covered: Vec<PropName> = Vec::new();

        for (name, flags) in LIVE_PROPS.iter() {
            if !applicable(flags, meta) {
                continue;
            }
            if let Some(el) = self.find_live_prop(path, meta, name).await? {
                covered.push(PropName {
                    ns: Some(DAV_NS.to_string()),
                    name: name.to_string(),
                });
                found.props.push(el);
            }
        }
        for dead in self.dead_props(path).await {
            covered.push(PropName {
                ns: dead.namespace.clone(),
                name: dead.name.clone(),
            });
            if let Some(el) = dead.element {
                found.props.push(el);
            }
        }

        let extras: Vec<PropName> = include
            .iter()
            .filter(|name| {
                !covered
                    .iter()
                    .any(|c| c.name == name.name && (c.ns == name.ns || (name.is_dav() && c.ns.as_deref() == Some(DAV_NS))))
            })
            .cloned()
            .collect();
        if extras.is_empty() {
            return Ok(vec![found]);
        }

        let mut propstats = self.props(path, meta, &extras).await?;
        match propstats.iter_mut().find(|p| p.status == StatusCode::OK) {
            Some(ok) => ok.props.extend(found.props),
            None => propstats.insert(0, found),
        }
        Ok(propstats)
    }

    // An explicit property list, bucketed by per-property status.
    async fn props(
        &self,
        path: &DavPath,
        meta: &dyn DavMetaData,
        names: &[PropName],
    ) -> DavResult<Vec<Propstat>> {
        let dead = self.dead_props(path).await;
        let mut found = Propstat::new(StatusCode::OK);
        let mut missing = Propstat::new(StatusCode::NOT_FOUND);

        for name in names {
            if name.is_dav() {
                if let Some(flags) = LIVE_PROPS.get(name.name.as_str()) {
                    if applicable(flags, meta) {
                        if let Some(el) = self.find_live_prop(path, meta, &name.name).await? {
                            found.props.push(el);
                            continue;
                        }
                    }
                    missing.props.push(name.element());
                    continue;
                }
            }
            match dead
                .iter()
                .find(|d| d.name == name.name && d.namespace == name.ns)
            {
                Some(dead) => match &dead.element {
                    Some(el) => found.props.push(el.clone()),
                    None => missing.props.push(name.element()),
                },
                None => missing.props.push(name.element()),
            }
        }

        let mut propstats = Vec::new();
        if !found.props.is_empty() {
            propstats.push(found);
        }
        if !missing.props.is_empty() {
            propstats.push(missing);
        }
        if propstats.is_empty() {
            propstats.push(Propstat::new(StatusCode::OK));
        }
        Ok(propstats)
    }

    async fn dead_props(&self, path: &DavPath) -> Vec<DavProp> {
        match self.fs.get_props(path).await {
            Ok(props) => props,
            Err(_) => Vec::new(),
        }
    }

    async fn find_live_prop(
        &self,
        path: &DavPath,
        meta: &dyn DavMetaData,
        name: &str,
    ) -> DavResult<Option<Element>> {
        let el = match name {
            "displayname" => {
                let base = if path.as_str() == "/" { "" } else { path.file_name() };
                Some(dav_text_element("displayname", base))
            }
            "creationdate" => meta
                .created()
                .ok()
                .map(|t| dav_text_element("creationdate", &systemtime_to_rfc3339(t))),
            "getcontentlength" => Some(dav_text_element(
                "getcontentlength",
                &meta.len().to_string(),
            )),
            "getcontenttype" => {
                let mime = mime_guess::from_path(path.as_str())
                    .first_raw()
                    .unwrap_or("application/octet-stream");
                Some(dav_text_element("getcontenttype", mime))
            }
            "getlastmodified" => meta
                .modified()
                .ok()
                .map(|t| dav_text_element("getlastmodified", &systemtime_to_httpdate(t))),
            "getetag" => Some(dav_text_element("getetag", &meta.etag())),
            "resourcetype" => {
                let mut el = dav_element("resourcetype");
                if meta.is_dir() {
                    el.children.push(XMLNode::Element(dav_element("collection")));
                }
                Some(el)
            }
            "lockdiscovery" => {
                let ls = self.ls()?;
                let mut el = dav_element("lockdiscovery");
                for (token, details) in ls.discover(SystemTime::now(), path.as_str()) {
                    el.children
                        .push(XMLNode::Element(activelock_element(&token, &details)));
                }
                Some(el)
            }
            "supportedlock" => {
                let mut scope = dav_element("lockscope");
                scope
                    .children
                    .push(XMLNode::Element(dav_element("exclusive")));
                let mut locktype = dav_element("locktype");
                locktype.children.push(XMLNode::Element(dav_element("write")));
                let mut entry = dav_element("lockentry");
                entry.children.push(XMLNode::Element(scope));
                entry.children.push(XMLNode::Element(locktype));
                let mut el = dav_element("supportedlock");
                el.children.push(XMLNode::Element(entry));
                Some(el)
            }
            _ => None,
        };
        Ok(el)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req)?;
        let _guard = self.confirm_locks(req, Some(&path), None)?;

        if let Err(err) = self.fs.metadata(&path).await {
            return Err(match err {
                FsError::NotFound => DavError::FsError(err),
                _ => DavError::Status(StatusCode::METHOD_NOT_ALLOWED),
            });
        }

        let patches = parse_proppatch(body)?;
        let propstats = self.patch(&path, patches).await?;

        let mut ms = MultiStatusWriter::new();
        ms.write_response(&path.as_url_string(), propstats)?;
        let mut body = ms.take().to_vec();
        body.extend_from_slice(&ms.close()?);

        Ok(Response::builder()
            .status(StatusCode::MULTI_STATUS)
            .header(http::header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .header(http::header::CONTENT_LENGTH, body.len().to_string())
            .body(Body::from(bytes::Bytes::from(body)))
            .expect("valid response"))
    }

    // Apply a property update as one transaction: if anything in it is
    // unacceptable, nothing is written and every property reports why.
    async fn patch(
        &self,
        path: &DavPath,
        patches: Vec<(bool, DavProp)>,
    ) -> DavResult<Vec<Propstat>> {
        let is_live = |prop: &DavProp| {
            matches!(prop.namespace.as_deref(), None | Some(DAV_NS))
                && LIVE_PROPS.contains_key(prop.name.as_str())
        };

        if patches.iter().any(|(_, prop)| is_live(prop)) {
            // Live properties are protected. The offenders get 403, and
            // everything else fails along with them.
            let mut forbidden = Propstat::new(StatusCode::FORBIDDEN);
            forbidden.error = Some(dav_element("cannot-modify-protected-property"));
            let mut failed = Propstat::new(StatusCode::FAILED_DEPENDENCY);
            for (_, prop) in &patches {
                let el = PropName {
                    ns: prop.namespace.clone(),
                    name: prop.name.clone(),
                }
                .element();
                if is_live(prop) {
                    forbidden.props.push(el);
                } else {
                    failed.props.push(el);
                }
            }
            let mut propstats = vec![forbidden];
            if !failed.props.is_empty() {
                propstats.push(failed);
            }
            return Ok(propstats);
        }

        match self.fs.patch_props(path, patches.clone()).await {
            Ok(results) => {
                let mut by_status: Vec<Propstat> = Vec::new();
                for (status, prop) in results {
                    let el = PropName {
                        ns: prop.namespace.clone(),
                        name: prop.name.clone(),
                    }
                    .element();
                    match by_status.iter_mut().find(|p| p.status == status) {
                        Some(pstat) => pstat.props.push(el),
                        None => {
                            let mut pstat = Propstat::new(status);
                            pstat.props.push(el);
                            by_status.push(pstat);
                        }
                    }
                }
                Ok(by_status)
            }
            Err(FsError::NotImplemented) => {
                // No dead-property support in this backend.
                let mut pstat = Propstat::new(StatusCode::FORBIDDEN);
                for (_, prop) in &patches {
                    pstat.props.push(
                        PropName {
                            ns: prop.namespace.clone(),
                            name: prop.name.clone(),
                        }
                        .element(),
                    );
                }
                Ok(vec![pstat])
            }
            Err(_) => Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR)),
        }
    }
}

fn applicable(flags: &LiveFlags, meta: &dyn DavMetaData) -> bool {
    if meta.is_dir() {
        flags.dir
    } else {
        flags.file
    }
}

fn parse_proppatch(body: &[u8]) -> DavResult<Vec<(bool, DavProp)>> {
    let el = parse_body(body).map_err(|_| DavError::InvalidProppatch)?;
    if !is_dav(&el, "propertyupdate") {
        return Err(DavError::InvalidProppatch);
    }
    let mut patches = Vec::new();
    for op in child_elements(&el) {
        let set = if is_dav(op, "set") {
            true
        } else if is_dav(op, "remove") {
            false
        } else {
            continue;
        };
        let prop = find_dav_child(op, "prop").ok_or(DavError::InvalidProppatch)?;
        for p in child_elements(prop) {
            patches.push((
                set,
                DavProp {
                    name: p.name.clone(),
                    namespace: p.namespace.clone(),
                    element: if set { Some(p.clone()) } else { None },
                },
            ));
        }
    }
    if patches.is_empty() {
        return Err(DavError::InvalidProppatch);
    }
    Ok(patches)
}
