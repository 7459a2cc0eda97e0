//! HTTP conditional-request evaluation for GET/HEAD.

use std::ops::Bound;
use std::str::FromStr;

use headers::HeaderMapExt;
use http::Request;

use crate::fs::DavMetaData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Conditional {
    Ok,
    NotModified,
    PreconditionFailed,
}

/// Evaluate If-Match / If-Unmodified-Since / If-None-Match /
/// If-Modified-Since against the resource's ETag and modification time,
/// in the order RFC 7232 prescribes. Malformed values are ignored.
pub(crate) fn eval_conditionals(req: &Request<()>, meta: &dyn DavMetaData) -> Conditional {
    let headers = req.headers();
    let etag = headers::ETag::from_str(&meta.etag()).ok();
    let modified = meta.modified().ok();

    if let Some(if_match) = headers.typed_get::<headers::IfMatch>() {
        match &etag {
            Some(etag) if if_match.precondition_passes(etag) => {}
            _ => return Conditional::PreconditionFailed,
        }
    } else if let (Some(ius), Some(modified)) =
        (headers.typed_get::<headers::IfUnmodifiedSince>(), modified)
    {
        if !ius.precondition_passes(modified) {
            return Conditional::PreconditionFailed;
        }
    }

    if let Some(inm) = headers.typed_get::<headers::IfNoneMatch>() {
        match &etag {
            Some(etag) if inm.precondition_passes(etag) => {}
            _ => return Conditional::NotModified,
        }
    } else if let (Some(ims), Some(modified)) =
        (headers.typed_get::<headers::IfModifiedSince>(), modified)
    {
        if !ims.is_modified(modified) {
            return Conditional::NotModified;
        }
    }

    Conditional::Ok
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeResult {
    /// No (usable) Range header; serve the whole file.
    Full,
    /// Serve `[start, end)`.
    Partial(u64, u64),
    /// Requested range cannot be satisfied: 416.
    Unsatisfiable,
}

/// Work out which part of a `len`-byte file to serve. Only single ranges
/// are honored; multipart range requests fall back to the full file.
pub(crate) fn eval_range(req: &Request<()>, len: u64) -> RangeResult {
    let range = match req.headers().typed_get::<headers::Range>() {
        Some(range) => range,
        None => return RangeResult::Full,
    };
    let mut ranges = range.iter();
    let first = match ranges.next() {
        Some(r) => r,
        None => return RangeResult::Unsatisfiable,
    };
    if ranges.next().is_some() {
        return RangeResult::Full;
    }
    // A suffix range ("bytes=-N") is encoded as an unbounded start with an
    // inclusive end holding the suffix length N, meaning "the last N bytes".
    if let (Bound::Unbounded, Bound::Included(suffix_len)) = first {
        let start = len.saturating_sub(suffix_len);
        if start >= len {
            return RangeResult::Unsatisfiable;
        }
        return RangeResult::Partial(start, len);
    }
    let start = match first.0 {
        Bound::Included(n) => n,
        Bound::Excluded(n) => n + 1,
        Bound::Unbounded => 0,
    };
    let end = match first.1 {
        Bound::Included(n) => n + 1,
        Bound::Excluded(n) => n,
        Bound::Unbounded => len,
    };
    if start >= end || end > len {
        return RangeResult::Unsatisfiable;
    }
    RangeResult::Partial(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsResult;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    struct Meta;
    impl DavMetaData for Meta {
        fn len(&self) -> u64 {
            100
        }
        fn modified(&self) -> FsResult<SystemTime> {
            Ok(UNIX_EPOCH + Duration::from_secs(1_600_000_000))
        }
        fn is_dir(&self) -> bool {
            false
        }
    }

    fn request(headers: &[(&str, String)]) -> Request<()> {
        let mut b = Request::builder().uri("/f");
        for (k, v) in headers {
            b = b.header(*k, v);
        }
        b.body(()).unwrap()
    }

    #[test]
    fn none_match_hits_and_misses() {
        let etag = Meta.etag();
        let req = request(&[("If-None-Match", etag)]);
        assert_eq!(eval_conditionals(&req, &Meta), Conditional::NotModified);

        let req = request(&[("If-None-Match", "\"other\"".to_string())]);
        assert_eq!(eval_conditionals(&req, &Meta), Conditional::Ok);
    }

    #[test]
    fn if_match_enforced() {
        let req = request(&[("If-Match", "\"other\"".to_string())]);
        assert_eq!(
            eval_conditionals(&req, &Meta),
            Conditional::PreconditionFailed
        );
        let req = request(&[("If-Match", Meta.etag())]);
        assert_eq!(eval_conditionals(&req, &Meta), Conditional::Ok);
    }

    #[test]
    fn ranges() {
        let req = request(&[("Range", "bytes=0-9".to_string())]);
        assert_eq!(eval_range(&req, 100), RangeResult::Partial(0, 10));

        let req = request(&[("Range", "bytes=-10".to_string())]);
        assert_eq!(eval_range(&req, 100), RangeResult::Partial(90, 100));

        let req = request(&[("Range", "bytes=200-300".to_string())]);
        assert_eq!(eval_range(&req, 100), RangeResult::Unsatisfiable);

        let req = request(&[]);
        assert_eq!(eval_range(&req, 100), RangeResult::Full);
    }
}
