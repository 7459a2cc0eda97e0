//! Ephemeral in-memory filesystem, with dead-property support.
//!
//! All state lives in one node arena behind a mutex. Nothing here does
//! real I/O, so every operation takes the lock, does its thing, and
//! returns a ready future. Mainly useful for tests and as the reference
//! implementation of the filesystem interface.

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::{self, FutureExt};
use futures_util::stream;
use http::StatusCode;
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::fs::*;

/// Ephemeral in-memory filesystem.
pub struct MemFs {
    tree: Arc<Mutex<Tree>>,
}

struct Tree {
    nodes: Vec<Option<Node>>,
}

struct Node {
    kind: NodeKind,
    mtime: SystemTime,
    crtime: SystemTime,
    props: HashMap<(Option<String>, String), DavProp>,
}

enum NodeKind {
    Dir(BTreeMap<String, usize>),
    File(Vec<u8>),
}

const ROOT_ID: usize = 0;

impl MemFs {
    pub fn new() -> Arc<MemFs> {
        let now = SystemTime::now();
        let root = Node {
            kind: NodeKind::Dir(BTreeMap::new()),
            mtime: now,
            crtime: now,
            props: HashMap::new(),
        };
        Arc::new(MemFs {
            tree: Arc::new(Mutex::new(Tree {
                nodes: vec![Some(root)],
            })),
        })
    }
}

impl Tree {
    fn node(&self, id: usize) -> FsResult<&Node> {
        self.nodes
            .get(id)
            .and_then(|n| n.as_ref())
            .ok_or(FsError::NotFound)
    }

    fn node_mut(&mut self, id: usize) -> FsResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .and_then(|n| n.as_mut())
            .ok_or(FsError::NotFound)
    }

    fn lookup(&self, path: &DavPath) -> FsResult<usize> {
        let mut id = ROOT_ID;
        for segment in path.as_str().split('/').filter(|s| !s.is_empty()) {
            let node = self.node(id)?;
            match &node.kind {
                NodeKind::Dir(children) => {
                    id = *children.get(segment).ok_or(FsError::NotFound)?;
                }
                NodeKind::File(_) => return Err(FsError::NotFound),
            }
        }
        Ok(id)
    }

    // The directory that would contain `path`, and the final name.
    fn lookup_parent(&self, path: &DavPath) -> FsResult<(usize, String)> {
        let name = path.file_name();
        if name.is_empty() {
            return Err(FsError::Forbidden);
        }
        let parent = self.lookup(&path.parent())?;
        match self.node(parent)?.kind {
            NodeKind::Dir(_) => Ok((parent, name.to_string())),
            NodeKind::File(_) => Err(FsError::NotFound),
        }
    }

    fn insert(&mut self, parent: usize, name: String, node: Node) -> FsResult<usize> {
        let id = self.nodes.len();
        self.nodes.push(Some(node));
        match &mut self.node_mut(parent)?.kind {
            NodeKind::Dir(children) => {
                children.insert(name, id);
            }
            NodeKind::File(_) => return Err(FsError::NotFound),
        }
        Ok(id)
    }

    fn drop_subtree(&mut self, id: usize) {
        if let Some(Some(node)) = self.nodes.get(id) {
            let children: Vec<usize> = match &node.kind {
                NodeKind::Dir(children) => children.values().copied().collect(),
                NodeKind::File(_) => Vec::new(),
            };
            for child in children {
                self.drop_subtree(child);
            }
            self.nodes[id] = None;
        }
    }

    fn meta(&self, id: usize) -> FsResult<MemMeta> {
        let node = self.node(id)?;
        Ok(MemMeta {
            len: match &node.kind {
                NodeKind::Dir(_) => 0,
                NodeKind::File(data) => data.len() as u64,
            },
            mtime: node.mtime,
            crtime: node.crtime,
            dir: matches!(node.kind, NodeKind::Dir(_)),
        })
    }
}

#[derive(Debug, Clone)]
struct MemMeta {
    len: u64,
    mtime: SystemTime,
    crtime: SystemTime,
    dir: bool,
}

impl DavMetaData for MemMeta {
    fn len(&self) -> u64 {
        self.len
    }
    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.mtime)
    }
    fn created(&self) -> FsResult<SystemTime> {
        Ok(self.crtime)
    }
    fn is_dir(&self) -> bool {
        self.dir
    }
}

struct MemDirEntry {
    name: String,
    meta: MemMeta,
}

impl DavDirEntry for MemDirEntry {
    fn name(&self) -> String {
        self.name.clone()
    }
    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        future::ok(Box::new(self.meta.clone()) as Box<dyn DavMetaData>).boxed()
    }
}

struct MemFile {
    tree: Arc<Mutex<Tree>>,
    id: usize,
    pos: usize,
    append: bool,
}

impl DavFile for MemFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.tree.lock().meta(self.id);
        future::ready(meta.map(|m| Box::new(m) as Box<dyn DavMetaData>)).boxed()
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        let result = {
            let tree = self.tree.lock();
            match tree.node(self.id) {
                Ok(node) => match &node.kind {
                    NodeKind::File(data) => {
                        let start = self.pos.min(data.len());
                        let end = (self.pos + count).min(data.len());
                        Ok(Bytes::copy_from_slice(&data[start..end]))
                    }
                    NodeKind::Dir(_) => Err(FsError::Forbidden),
                },
                Err(e) => Err(e),
            }
        };
        if let Ok(b) = &result {
            self.pos += b.len();
        }
        future::ready(result).boxed()
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        let result = {
            let mut tree = self.tree.lock();
            match tree.node_mut(self.id) {
                Ok(node) => {
                    node.mtime = SystemTime::now();
                    match &mut node.kind {
                        NodeKind::File(data) => {
                            if self.append {
                                self.pos = data.len();
                            }
                            if self.pos + buf.len() > data.len() {
                                data.resize(self.pos + buf.len(), 0);
                            }
                            data[self.pos..self.pos + buf.len()].copy_from_slice(&buf);
                            self.pos += buf.len();
                            Ok(())
                        }
                        NodeKind::Dir(_) => Err(FsError::Forbidden),
                    }
                }
                Err(e) => Err(e),
            }
        };
        future::ready(result).boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        let len = {
            let tree = self.tree.lock();
            match tree.node(self.id) {
                Ok(node) => match &node.kind {
                    NodeKind::File(data) => data.len() as i64,
                    NodeKind::Dir(_) => 0,
                },
                Err(e) => return future::err(e).boxed(),
            }
        };
        let newpos = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if newpos < 0 {
            return future::err(FsError::GeneralFailure).boxed();
        }
        self.pos = newpos as usize;
        future::ok(newpos as u64).boxed()
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        future::ok(()).boxed()
    }
}

impl DavFileSystem for MemFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        let result = {
            let tree = self.tree.lock();
            tree.lookup(path).and_then(|id| tree.meta(id))
        };
        future::ready(result.map(|m| Box::new(m) as Box<dyn DavMetaData>)).boxed()
    }

    fn open<'a>(
        &'a self,
        path: &'a DavPath,
        options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        let result = {
            let mut tree = self.tree.lock();
            match tree.lookup(path) {
                Ok(id) => {
                    if options.create_new {
                        Err(FsError::Exists)
                    } else {
                        if options.truncate {
                            if let Ok(node) = tree.node_mut(id) {
                                if let NodeKind::File(data) = &mut node.kind {
                                    data.clear();
                                    node.mtime = SystemTime::now();
                                }
                            }
                        }
                        Ok(id)
                    }
                }
                Err(FsError::NotFound) if options.create || options.create_new => {
                    let (parent, name) = match tree.lookup_parent(path) {
                        Ok(p) => p,
                        Err(e) => return future::err(e).boxed(),
                    };
                    let now = SystemTime::now();
                    tree.insert(
                        parent,
                        name,
                        Node {
                            kind: NodeKind::File(Vec::new()),
                            mtime: now,
                            crtime: now,
                            props: HashMap::new(),
                        },
                    )
                }
                Err(e) => Err(e),
            }
        };
        let tree = self.tree.clone();
        future::ready(result.map(move |id| {
            Box::new(MemFile {
                tree,
                id,
                pos: 0,
                append: options.append,
            }) as Box<dyn DavFile>
        }))
        .boxed()
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        let result = {
            let tree = self.tree.lock();
            tree.lookup(path).and_then(|id| {
                let node = tree.node(id)?;
                match &node.kind {
                    NodeKind::Dir(children) => {
                        let mut entries = Vec::new();
                        for (name, child_id) in children {
                            entries.push(MemDirEntry {
                                name: name.clone(),
                                meta: tree.meta(*child_id)?,
                            });
                        }
                        Ok(entries)
                    }
                    NodeKind::File(_) => Err(FsError::NotFound),
                }
            })
        };
        future::ready(result.map(|entries| {
            let iter = entries
                .into_iter()
                .map(|e| Box::new(e) as Box<dyn DavDirEntry>);
            let entries: FsStream<Box<dyn DavDirEntry>> = Box::pin(stream::iter(iter));
            entries
        }))
        .boxed()
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        let result = {
            let mut tree = self.tree.lock();
            if tree.lookup(path).is_ok() {
                Err(FsError::Exists)
            } else {
                match tree.lookup_parent(path) {
                    Ok((parent, name)) => {
                        let now = SystemTime::now();
                        tree.insert(
                            parent,
                            name,
                            Node {
                                kind: NodeKind::Dir(BTreeMap::new()),
                                mtime: now,
                                crtime: now,
                                props: HashMap::new(),
                            },
                        )
                        .map(|_| ())
                    }
                    Err(e) => Err(e),
                }
            }
        };
        future::ready(result).boxed()
    }

    fn remove_all<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        let result = {
            let mut tree = self.tree.lock();
            match tree.lookup(path) {
                Ok(id) if id == ROOT_ID => Err(FsError::Forbidden),
                Ok(id) => match tree.lookup_parent(path) {
                    Ok((parent, name)) => {
                        if let Ok(node) = tree.node_mut(parent) {
                            if let NodeKind::Dir(children) = &mut node.kind {
                                children.remove(&name);
                            }
                            node.mtime = SystemTime::now();
                        }
                        tree.drop_subtree(id);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        };
        future::ready(result).boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        // Renaming a directory into its own subtree would orphan it.
        if from.is_ancestor_of(to) {
            return future::err(FsError::Forbidden).boxed();
        }
        let result = {
            let mut tree = self.tree.lock();
            match (tree.lookup(from), tree.lookup_parent(to)) {
                (Ok(id), Ok((to_parent, to_name))) => {
                    if let Ok((from_parent, from_name)) = tree.lookup_parent(from) {
                        if let Ok(node) = tree.node_mut(from_parent) {
                            if let NodeKind::Dir(children) = &mut node.kind {
                                children.remove(&from_name);
                            }
                            node.mtime = SystemTime::now();
                        }
                    }
                    let now = SystemTime::now();
                    let displaced = match tree.node_mut(to_parent) {
                        Ok(node) => {
                            node.mtime = now;
                            match &mut node.kind {
                                NodeKind::Dir(children) => Ok(children.insert(to_name, id)),
                                NodeKind::File(_) => Err(FsError::NotFound),
                            }
                        }
                        Err(e) => Err(e),
                    };
                    match displaced {
                        Ok(Some(old)) => {
                            tree.drop_subtree(old);
                            Ok(())
                        }
                        Ok(None) => Ok(()),
                        Err(e) => Err(e),
                    }
                }
                (Err(e), _) => Err(e),
                (_, Err(e)) => Err(e),
            }
        };
        future::ready(result).boxed()
    }

    fn get_props<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavProp>> {
        let result = {
            let tree = self.tree.lock();
            tree.lookup(path)
                .and_then(|id| tree.node(id).map(|n| n.props.values().cloned().collect()))
        };
        future::ready(result).boxed()
    }

    fn patch_props<'a>(
        &'a self,
        path: &'a DavPath,
        patch: Vec<(bool, DavProp)>,
    ) -> FsFuture<'a, Vec<(StatusCode, DavProp)>> {
        let result = {
            let mut tree = self.tree.lock();
            match tree.lookup(path).and_then(|id| tree.node_mut(id)) {
                Ok(node) => {
                    // Nothing here can fail halfway: the whole patch is
                    // applied under the one lock, or not at all.
                    let mut ret = Vec::with_capacity(patch.len());
                    for (set, prop) in patch {
                        let key = (prop.namespace.clone(), prop.name.clone());
                        if set {
                            node.props.insert(key, prop.clone());
                        } else {
                            node.props.remove(&key);
                        }
                        ret.push((
                            StatusCode::OK,
                            DavProp {
                                element: None,
                                ..prop
                            },
                        ));
                    }
                    Ok(ret)
                }
                Err(e) => Err(e),
            }
        };
        future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn path(s: &str) -> DavPath {
        DavPath::from_str_and_prefix(s, "").unwrap()
    }

    #[tokio::test]
    async fn create_write_read() {
        let fs = MemFs::new();
        let p = path("/file.txt");
        let mut f = fs.open(&p, OpenOptions::write()).await.unwrap();
        f.write_bytes(Bytes::from_static(b"hello")).await.unwrap();
        f.flush().await.unwrap();
        drop(f);

        let meta = fs.metadata(&p).await.unwrap();
        assert_eq!(meta.len(), 5);
        assert!(meta.is_file());

        let mut f = fs.open(&p, OpenOptions::read()).await.unwrap();
        let data = f.read_bytes(100).await.unwrap();
        assert_eq!(&data[..], b"hello");
        assert!(f.read_bytes(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_missing_parent_fails() {
        let fs = MemFs::new();
        let err = fs
            .open(&path("/no/file.txt"), OpenOptions::write())
            .await
            .err()
            .unwrap();
        assert_eq!(err, FsError::NotFound);
    }

    #[tokio::test]
    async fn mkdir_and_readdir() {
        let fs = MemFs::new();
        fs.create_dir(&path("/d")).await.unwrap();
        fs.open(&path("/d/a"), OpenOptions::write()).await.unwrap();
        fs.open(&path("/d/b"), OpenOptions::write()).await.unwrap();

        assert_eq!(
            fs.create_dir(&path("/d")).await.unwrap_err(),
            FsError::Exists
        );
        assert_eq!(
            fs.create_dir(&path("/x/y")).await.unwrap_err(),
            FsError::NotFound
        );

        let mut names = Vec::new();
        let mut entries = fs.read_dir(&path("/d")).await.unwrap();
        while let Some(entry) = entries.next().await {
            names.push(entry.name());
        }
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn remove_and_rename() {
        let fs = MemFs::new();
        fs.create_dir(&path("/d")).await.unwrap();
        fs.open(&path("/d/a"), OpenOptions::write()).await.unwrap();

        fs.rename(&path("/d"), &path("/e")).await.unwrap();
        assert!(fs.metadata(&path("/d")).await.is_err());
        assert!(fs.metadata(&path("/e/a")).await.is_ok());

        assert_eq!(
            fs.rename(&path("/e"), &path("/e/sub")).await.unwrap_err(),
            FsError::Forbidden
        );

        fs.remove_all(&path("/e")).await.unwrap();
        assert_eq!(
            fs.metadata(&path("/e")).await.err().unwrap(),
            FsError::NotFound
        );
    }

    #[tokio::test]
    async fn dead_props_round_trip() {
        let fs = MemFs::new();
        fs.open(&path("/f"), OpenOptions::write()).await.unwrap();

        let prop = DavProp {
            name: "color".to_string(),
            namespace: Some("http://x.example/ns".to_string()),
            element: Some(xmltree::Element::new("color")),
        };
        let ret = fs
            .patch_props(&path("/f"), vec![(true, prop.clone())])
            .await
            .unwrap();
        assert_eq!(ret[0].0, StatusCode::OK);

        let props = fs.get_props(&path("/f")).await.unwrap();
        assert_eq!(props.len(), 1);
        assert!(props[0].is_same(&prop));

        let ret = fs
            .patch_props(&path("/f"), vec![(false, prop.clone())])
            .await
            .unwrap();
        assert_eq!(ret[0].0, StatusCode::OK);
        assert!(fs.get_props(&path("/f")).await.unwrap().is_empty());
    }
}
