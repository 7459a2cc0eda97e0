//
// Error type used by the handler internally. Every error maps onto
// one HTTP status code, which is what ultimately goes over the wire.
//
use std::error::Error;
use std::fmt;
use std::io;

use http::StatusCode;

use crate::fs::FsError;

pub(crate) type DavResult<T> = Result<T, DavError>;

#[derive(Debug)]
pub(crate) enum DavError {
    UnknownDavMethod,
    NoLockSystem,
    PrefixMismatch,
    InvalidPath,
    InvalidDepth,
    InvalidDestination,
    DestinationHostMismatch,
    DestinationEqualsSource,
    InvalidIfHeader,
    InvalidLockToken,
    InvalidLockInfo,
    UnsupportedLockInfo,
    InvalidTimeout,
    InvalidPropfind,
    InvalidProppatch,
    RecursionTooDeep,
    Locked,
    PreconditionFailed,
    Status(StatusCode),
    FsError(FsError),
    IoError(io::Error),
    XmlParseError,
}

impl DavError {
    /// Map onto the HTTP status code that gets sent to the client.
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::UnknownDavMethod => StatusCode::BAD_REQUEST,
            DavError::NoLockSystem => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::PrefixMismatch => StatusCode::NOT_FOUND,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::InvalidDepth => StatusCode::BAD_REQUEST,
            DavError::InvalidDestination => StatusCode::BAD_REQUEST,
            DavError::DestinationHostMismatch => StatusCode::BAD_GATEWAY,
            DavError::DestinationEqualsSource => StatusCode::FORBIDDEN,
            DavError::InvalidIfHeader => StatusCode::BAD_REQUEST,
            DavError::InvalidLockToken => StatusCode::BAD_REQUEST,
            DavError::InvalidLockInfo => StatusCode::BAD_REQUEST,
            DavError::UnsupportedLockInfo => StatusCode::NOT_IMPLEMENTED,
            DavError::InvalidTimeout => StatusCode::BAD_REQUEST,
            DavError::InvalidPropfind => StatusCode::BAD_REQUEST,
            DavError::InvalidProppatch => StatusCode::BAD_REQUEST,
            DavError::RecursionTooDeep => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Locked => StatusCode::LOCKED,
            DavError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            DavError::Status(status) => *status,
            DavError::FsError(err) => fs_to_status(err),
            DavError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
        }
    }

    /// An error on a request whose body we did not consume leaves the
    /// connection in an undefined state. Signal "Connection: close".
    pub(crate) fn must_close(&self) -> bool {
        matches!(self, DavError::IoError(_))
    }
}

fn fs_to_status(err: &FsError) -> StatusCode {
    match err {
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        FsError::LoopDetected => StatusCode::LOOP_DETECTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DavError::UnknownDavMethod => write!(f, "unsupported method"),
            DavError::NoLockSystem => write!(f, "no lock system"),
            DavError::PrefixMismatch => write!(f, "prefix mismatch"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::InvalidDepth => write!(f, "invalid depth"),
            DavError::InvalidDestination => write!(f, "invalid destination"),
            DavError::DestinationHostMismatch => write!(f, "destination host mismatch"),
            DavError::DestinationEqualsSource => write!(f, "destination equals source"),
            DavError::InvalidIfHeader => write!(f, "invalid If header"),
            DavError::InvalidLockToken => write!(f, "invalid lock token"),
            DavError::InvalidLockInfo => write!(f, "invalid lock info"),
            DavError::UnsupportedLockInfo => write!(f, "unsupported lock info"),
            DavError::InvalidTimeout => write!(f, "invalid timeout"),
            DavError::InvalidPropfind => write!(f, "invalid propfind"),
            DavError::InvalidProppatch => write!(f, "invalid proppatch"),
            DavError::RecursionTooDeep => write!(f, "recursion too deep"),
            DavError::Locked => write!(f, "locked"),
            DavError::PreconditionFailed => write!(f, "precondition failed"),
            DavError::Status(status) => write!(f, "http status {}", status),
            DavError::FsError(err) => write!(f, "filesystem error: {}", err),
            DavError::IoError(err) => write!(f, "i/o error: {}", err),
            DavError::XmlParseError => write!(f, "invalid xml"),
        }
    }
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::FsError(err) => Some(err),
            DavError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StatusCode> for DavError {
    fn from(status: StatusCode) -> Self {
        DavError::Status(status)
    }
}

impl From<FsError> for DavError {
    fn from(err: FsError) -> Self {
        DavError::FsError(err)
    }
}

impl From<io::Error> for DavError {
    fn from(err: io::Error) -> Self {
        DavError::IoError(err)
    }
}

impl From<crate::davpath::ParseError> for DavError {
    fn from(err: crate::davpath::ParseError) -> Self {
        match err {
            crate::davpath::ParseError::InvalidPath => DavError::InvalidPath,
            crate::davpath::ParseError::PrefixMismatch => DavError::PrefixMismatch,
        }
    }
}

/// Reason phrase, including the WebDAV status code extensions that
/// `http::StatusCode` has no canonical text for.
pub(crate) fn status_text(status: StatusCode) -> &'static str {
    match status.as_u16() {
        207 => "Multi-Status",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        507 => "Insufficient Storage",
        _ => status.canonical_reason().unwrap_or(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_status_text() {
        assert_eq!(status_text(StatusCode::MULTI_STATUS), "Multi-Status");
        assert_eq!(status_text(StatusCode::LOCKED), "Locked");
        assert_eq!(status_text(StatusCode::FAILED_DEPENDENCY), "Failed Dependency");
        assert_eq!(status_text(StatusCode::NOT_FOUND), "Not Found");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(DavError::PrefixMismatch.statuscode(), StatusCode::NOT_FOUND);
        assert_eq!(DavError::Locked.statuscode(), StatusCode::LOCKED);
        assert_eq!(
            DavError::PreconditionFailed.statuscode(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            DavError::DestinationHostMismatch.statuscode(),
            StatusCode::BAD_GATEWAY
        );
    }
}
