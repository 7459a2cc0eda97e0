//! Logical resource paths.
//!
//! A [`DavPath`] is the percent-decoded, normalized, absolute path of a
//! resource with the configured URL prefix already stripped off. It is what
//! every component below the dispatcher works with: the filesystem, the
//! lock store, and the property engine.

use std::error::Error;
use std::fmt;
use std::path::Path;

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, CONTROLS};

// Everything we escape when turning a logical path back into an URL path.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'%');

/// Error turning a request URL path into a [`DavPath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The path could not be decoded, is not absolute, or escapes the
    /// root with `..` segments.
    InvalidPath,
    /// The path does not start with the configured prefix.
    PrefixMismatch,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidPath => write!(f, "invalid path"),
            ParseError::PrefixMismatch => write!(f, "prefix mismatch"),
        }
    }
}

impl Error for ParseError {}

/// A normalized WebDAV resource path.
#[derive(Clone, Debug)]
pub struct DavPath {
    // clean absolute path: "/" or "/a/b", never a trailing slash.
    path: String,
    // the request URL ended in a slash (or we learned it's a directory).
    collection: bool,
    // stripped URL prefix, kept around for href generation.
    prefix: String,
}

impl DavPath {
    /// Parse a raw URL path, strip `prefix`, and normalize.
    ///
    /// Fails with a 404-mapped error when the path does not start with the
    /// prefix, and a 400-mapped error when it cannot be decoded or tries to
    /// escape the root with `..` segments.
    pub fn from_str_and_prefix(urlpath: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let decoded = percent_decode_str(urlpath)
            .decode_utf8()
            .map_err(|_| ParseError::InvalidPath)?;
        let decoded = decoded.as_ref();
        if !decoded.starts_with('/') || decoded.contains('\0') {
            return Err(ParseError::InvalidPath);
        }

        let stripped = if prefix.is_empty() {
            decoded
        } else {
            match decoded.strip_prefix(prefix) {
                Some(rest) if rest.len() < decoded.len() => rest,
                _ => return Err(ParseError::PrefixMismatch),
            }
        };

        let collection = stripped.ends_with('/') || stripped.is_empty();
        let mut segments = Vec::new();
        for segment in stripped.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(ParseError::InvalidPath),
                s => segments.push(s),
            }
        }
        let path = if segments.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", segments.join("/"))
        };
        Ok(DavPath {
            path,
            collection: collection || segments.is_empty(),
            prefix: prefix.to_string(),
        })
    }

    /// Like [`from_str_and_prefix`](Self::from_str_and_prefix), from a request URI.
    pub fn from_uri_and_prefix(uri: &http::Uri, prefix: &str) -> Result<DavPath, ParseError> {
        DavPath::from_str_and_prefix(uri.path(), prefix)
    }

    /// The clean logical path, e.g. `/dir/file.txt`. Never has a trailing
    /// slash (the root is `/`).
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The path relative to the filesystem root, for backends that map
    /// resources onto an OS directory tree.
    pub fn as_rel_ospath(&self) -> &Path {
        Path::new(self.path.trim_start_matches('/'))
    }

    /// The percent-encoded URL path including the prefix, with a trailing
    /// slash if this is a collection. This is what goes into `<D:href>`.
    pub fn as_url_string(&self) -> String {
        let mut p = format!(
            "{}{}",
            self.prefix,
            percent_encode(self.path.as_bytes(), PATH_ENCODE_SET)
        );
        if self.collection && !p.ends_with('/') {
            p.push('/');
        }
        p
    }

    /// Is this known to be a collection (URL with trailing slash)?
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// Mark this path as a collection.
    pub fn add_slash(&mut self) {
        self.collection = true;
    }

    /// Last path segment; empty for the root.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// The parent collection. The root is its own parent.
    pub fn parent(&self) -> DavPath {
        let parent = match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => self.path[..idx].to_string(),
        };
        DavPath {
            path: parent,
            collection: true,
            prefix: self.prefix.clone(),
        }
    }

    /// Child of this path.
    pub fn join(&self, name: &str) -> DavPath {
        let path = if self.path == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.path, name)
        };
        DavPath {
            path,
            collection: false,
            prefix: self.prefix.clone(),
        }
    }

    /// Is `self` equal to `other` or an ancestor of it?
    pub(crate) fn is_ancestor_of(&self, other: &DavPath) -> bool {
        self.path == other.path
            || self.path == "/"
            || other
                .path
                .strip_prefix(&self.path)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }
}

// Two DavPaths are the same resource regardless of a trailing slash
// in the original URL.
impl PartialEq for DavPath {
    fn eq(&self, other: &DavPath) -> bool {
        self.path == other.path
    }
}
impl Eq for DavPath {}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_prefix() {
        let p = DavPath::from_str_and_prefix("/dav/a/b", "/dav").unwrap();
        assert_eq!(p.as_str(), "/a/b");
        assert!(!p.is_collection());

        let p = DavPath::from_str_and_prefix("/dav/", "/dav").unwrap();
        assert_eq!(p.as_str(), "/");
        assert!(p.is_collection());

        assert!(matches!(
            DavPath::from_str_and_prefix("/other/a", "/dav"),
            Err(ParseError::PrefixMismatch)
        ));
    }

    #[test]
    fn empty_prefix() {
        let p = DavPath::from_str_and_prefix("/a/b/", "").unwrap();
        assert_eq!(p.as_str(), "/a/b");
        assert!(p.is_collection());
    }

    #[test]
    fn normalize() {
        let p = DavPath::from_str_and_prefix("/a//b/./c", "").unwrap();
        assert_eq!(p.as_str(), "/a/b/c");
        assert!(DavPath::from_str_and_prefix("/a/../b", "").is_err());
        assert!(DavPath::from_str_and_prefix("a/b", "").is_err());
    }

    #[test]
    fn decode_and_encode() {
        let p = DavPath::from_str_and_prefix("/dav/a%20b", "/dav").unwrap();
        assert_eq!(p.as_str(), "/a b");
        assert_eq!(p.as_url_string(), "/dav/a%20b");
    }

    #[test]
    fn parents_and_children() {
        let p = DavPath::from_str_and_prefix("/a/b", "").unwrap();
        assert_eq!(p.parent().as_str(), "/a");
        assert_eq!(p.parent().parent().as_str(), "/");
        assert_eq!(p.join("c").as_str(), "/a/b/c");
        assert_eq!(p.file_name(), "b");
    }

    #[test]
    fn ancestors() {
        let a = DavPath::from_str_and_prefix("/a", "").unwrap();
        let ab = DavPath::from_str_and_prefix("/a/b", "").unwrap();
        let ax = DavPath::from_str_and_prefix("/ax", "").unwrap();
        assert!(a.is_ancestor_of(&ab));
        assert!(!a.is_ancestor_of(&ax));
        assert!(!ab.is_ancestor_of(&a));
    }
}
