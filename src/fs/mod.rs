//! Filesystem backend interface.
//!
//! The handler talks to storage exclusively through [`DavFileSystem`].
//! Two implementations are included: [`LocalFs`] which serves a directory
//! on the local filesystem, and [`MemFs`], an ephemeral in-memory
//! filesystem that also supports dead properties.

use std::error::Error;
use std::fmt;
use std::io;
use std::io::SeekFrom;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::Stream;
use http::StatusCode;
use xmltree::Element;

use crate::davpath::DavPath;

mod localfs;
mod memfs;

pub use localfs::LocalFs;
pub use memfs::MemFs;

/// Errors from the filesystem backend. `NotFound` must be distinguishable
/// from the other failures; the handlers map it to 404 where WebDAV
/// requires that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    Exists,
    Forbidden,
    NotImplemented,
    InsufficientStorage,
    LoopDetected,
    GeneralFailure,
}

pub type FsResult<T> = Result<T, FsError>;
pub type FsFuture<'a, T> = BoxFuture<'a, FsResult<T>>;
pub type FsStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsError::NotFound => "not found",
            FsError::Exists => "already exists",
            FsError::Forbidden => "forbidden",
            FsError::NotImplemented => "not implemented",
            FsError::InsufficientStorage => "insufficient storage",
            FsError::LoopDetected => "loop detected",
            FsError::GeneralFailure => "general failure",
        };
        write!(f, "{}", s)
    }
}

impl Error for FsError {}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::AlreadyExists => FsError::Exists,
            io::ErrorKind::PermissionDenied => FsError::Forbidden,
            _ => FsError::GeneralFailure,
        }
    }
}

/// How to open a file. Roughly `std::fs::OpenOptions` plus the unix mode
/// for newly created files.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    pub create_new: bool,
    /// permission bits for files this open may create.
    pub mode: u32,
}

impl OpenOptions {
    /// Read-only.
    pub fn read() -> OpenOptions {
        OpenOptions {
            read: true,
            write: false,
            append: false,
            truncate: false,
            create: false,
            create_new: false,
            mode: 0o644,
        }
    }

    /// Read-write, create if absent, truncate if present.
    pub fn write() -> OpenOptions {
        OpenOptions {
            read: true,
            write: true,
            append: false,
            truncate: true,
            create: true,
            create_new: false,
            mode: 0o644,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> OpenOptions {
        self.mode = mode;
        self
    }
}

/// A dead property: an XML element stored verbatim on behalf of a client.
#[derive(Debug, Clone)]
pub struct DavProp {
    /// Local name of the property element.
    pub name: String,
    /// XML namespace the property element lives in.
    pub namespace: Option<String>,
    /// The parsed element, including its value. `None` in remove
    /// operations and property name listings.
    pub element: Option<Element>,
}

impl DavProp {
    /// Do two props refer to the same property (namespace + local name)?
    pub fn is_same(&self, other: &DavProp) -> bool {
        self.name == other.name && self.namespace == other.namespace
    }
}

/// The filesystem interface the handler is generic over.
///
/// All operations take a [`DavPath`] and return boxed futures so the trait
/// stays object safe. The property operations have default implementations
/// that report `NotImplemented`; the property engine then treats the
/// backend as having no dead-property support.
pub trait DavFileSystem: Send + Sync + 'static {
    /// Stat a resource.
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>>;

    /// Open a file.
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions)
        -> FsFuture<'a, Box<dyn DavFile>>;

    /// Stream the entries of a directory.
    fn read_dir<'a>(&'a self, path: &'a DavPath)
        -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>>;

    /// Create a directory. The parent must exist.
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Remove a file, or a directory and everything under it.
    fn remove_all<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()>;

    /// Atomically rename a file or directory.
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()>;

    /// All dead properties of a resource.
    fn get_props<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, Vec<DavProp>> {
        future::err(FsError::NotImplemented).boxed()
    }

    /// Apply a set of dead-property patches. `true` means set, `false`
    /// means remove. The whole patch is applied atomically: either every
    /// entry comes back with a success status and is persisted, or nothing
    /// is changed at all.
    fn patch_props<'a>(
        &'a self,
        _path: &'a DavPath,
        _patch: Vec<(bool, DavProp)>,
    ) -> FsFuture<'a, Vec<(StatusCode, DavProp)>> {
        future::err(FsError::NotImplemented).boxed()
    }
}

/// One entry from a directory stream.
pub trait DavDirEntry: Send + Sync {
    fn name(&self) -> String;
    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>>;
}

/// An open file.
pub trait DavFile: Send {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>>;
    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes>;
    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()>;
    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64>;
    fn flush(&mut self) -> FsFuture<'_, ()>;
}

/// File or directory metadata.
pub trait DavMetaData: Send + Sync {
    fn len(&self) -> u64;
    fn modified(&self) -> FsResult<SystemTime>;
    fn is_dir(&self) -> bool;

    /// Creation time, if the backend records one.
    fn created(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }

    /// Unix permission bits, if the backend records them.
    fn mode(&self) -> Option<u32> {
        None
    }

    fn is_file(&self) -> bool {
        !self.is_dir()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The ETag: a quoted hex string derived from the modification time
    /// (nanosecond resolution) and the size, so it is stable across reads
    /// and changes on every modification.
    fn etag(&self) -> String {
        let nanos = self
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("\"{:x}{:x}\"", nanos, self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FakeMeta;
    impl DavMetaData for FakeMeta {
        fn len(&self) -> u64 {
            5
        }
        fn modified(&self) -> FsResult<SystemTime> {
            Ok(UNIX_EPOCH + Duration::from_secs(1))
        }
        fn is_dir(&self) -> bool {
            false
        }
    }

    #[test]
    fn etag_is_quoted_hex_of_mtime_and_len() {
        // 1s = 0x3b9aca00 ns, len 5.
        assert_eq!(FakeMeta.etag(), "\"3b9aca005\"");
    }
}
