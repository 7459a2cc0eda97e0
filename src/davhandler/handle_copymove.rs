use futures_util::future::{BoxFuture, FutureExt};
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use std::sync::Arc;

use crate::body::Body;
use crate::davhandler::{request_host, status_response};
use crate::davheaders::{Depth, Destination, Overwrite};
use crate::davpath::DavPath;
use crate::fs::{DavFileSystem, FsError, OpenOptions};
use crate::util::DavMethod;
use crate::{DavError, DavResult};

use super::handle_gethead::READ_BUF_SIZE;

// Bound on nested collections a single COPY will descend into.
const MAX_COPY_RECURSION: u32 = 1000;

impl crate::DavHandler {
    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let dest = req
            .headers()
            .typed_try_get::<Destination>()
            .map_err(|_| DavError::InvalidDestination)?
            .ok_or(DavError::InvalidDestination)?;

        if dest.0.authority().map(|a| a.to_string()) != request_host(req) {
            return Err(DavError::DestinationHostMismatch);
        }

        let src = self.path(req)?;
        let dst = DavPath::from_str_and_prefix(dest.0.path(), &self.prefix)?;
        if dst == src {
            return Err(DavError::DestinationEqualsSource);
        }

        let overwrite = req
            .headers()
            .typed_get::<Overwrite>()
            .unwrap_or(Overwrite(true))
            .0;

        if method == DavMethod::Copy {
            // Section 7.5.1 says that a COPY only needs to lock the
            // destination, not both destination and source. Strictly
            // speaking this is racy if a concurrent operation modifies
            // the source, but the litmus test explicitly checks that
            // COPYing a locked-by-another source is OK.
            let _guard = self.confirm_locks(req, None, Some(&dst))?;

            // Section 9.8.3: a COPY without a Depth header acts as
            // "Depth: infinity", and only "0" or "infinity" are valid.
            let depth = match req.headers().typed_try_get::<Depth>() {
                Ok(None) => Depth::Infinity,
                Ok(Some(Depth::One)) | Err(_) => return Err(DavError::InvalidDepth),
                Ok(Some(depth)) => depth,
            };
            let status = copy_files(&self.fs, src, dst, overwrite, depth, 0).await?;
            return Ok(status_response(status));
        }

        let _guard = self.confirm_locks(req, Some(&src), Some(&dst))?;

        // Section 9.9.2: a MOVE on a collection acts as "Depth: infinity",
        // and a client must not submit any other value.
        match req.headers().typed_try_get::<Depth>() {
            Ok(None) | Ok(Some(Depth::Infinity)) => {}
            _ => return Err(DavError::InvalidDepth),
        }
        let status = move_files(&self.fs, &src, &dst, overwrite).await?;
        Ok(status_response(status))
    }
}

// Recursive copy. Depth semantics are sticky: "infinity" stays in force
// for every nested collection.
fn copy_files<'a>(
    fs: &'a Arc<dyn DavFileSystem>,
    src: DavPath,
    dst: DavPath,
    overwrite: bool,
    depth: Depth,
    recursion: u32,
) -> BoxFuture<'a, DavResult<StatusCode>> {
    async move {
        if recursion == MAX_COPY_RECURSION {
            return Err(DavError::RecursionTooDeep);
        }
        let recursion = recursion + 1;

        let src_meta = fs.metadata(&src).await.map_err(|e| match e {
            FsError::NotFound => DavError::FsError(e),
            _ => DavError::Status(StatusCode::INTERNAL_SERVER_ERROR),
        })?;

        let created = match fs.metadata(&dst).await {
            Err(FsError::NotFound) => true,
            Err(_) => return Err(DavError::Status(StatusCode::FORBIDDEN)),
            Ok(_) => {
                if !overwrite {
                    return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
                }
                match fs.remove_all(&dst).await {
                    Ok(()) | Err(FsError::NotFound) => {}
                    Err(_) => return Err(DavError::Status(StatusCode::FORBIDDEN)),
                }
                false
            }
        };

        if src_meta.is_dir() {
            match fs.create_dir(&dst).await {
                Ok(()) => {}
                // The destination's parent collection does not exist.
                Err(FsError::NotFound) => return Err(DavError::Status(StatusCode::CONFLICT)),
                Err(_) => return Err(DavError::Status(StatusCode::FORBIDDEN)),
            }
            if depth == Depth::Infinity {
                let mut entries = fs
                    .read_dir(&src)
                    .await
                    .map_err(|_| DavError::Status(StatusCode::FORBIDDEN))?;
                while let Some(entry) = entries.next().await {
                    let name = entry.name();
                    copy_files(fs, src.join(&name), dst.join(&name), overwrite, depth, recursion)
                        .await?;
                }
            }
        } else {
            let mode = src_meta.mode().unwrap_or(0o644);
            let mut src_file = fs.open(&src, OpenOptions::read()).await.map_err(|e| match e {
                FsError::NotFound => DavError::FsError(e),
                _ => DavError::Status(StatusCode::INTERNAL_SERVER_ERROR),
            })?;
            let mut dst_file = match fs.open(&dst, OpenOptions::write().with_mode(mode)).await {
                Ok(file) => file,
                Err(FsError::NotFound) => return Err(DavError::Status(StatusCode::CONFLICT)),
                Err(_) => return Err(DavError::Status(StatusCode::FORBIDDEN)),
            };
            loop {
                let chunk = src_file
                    .read_bytes(READ_BUF_SIZE)
                    .await
                    .map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
                if chunk.is_empty() {
                    break;
                }
                dst_file
                    .write_bytes(chunk)
                    .await
                    .map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
            }
            dst_file
                .flush()
                .await
                .map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
        }

        Ok(if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        })
    }
    .boxed()
}

async fn move_files(
    fs: &Arc<dyn DavFileSystem>,
    src: &DavPath,
    dst: &DavPath,
    overwrite: bool,
) -> DavResult<StatusCode> {
    let created = match fs.metadata(dst).await {
        Err(FsError::NotFound) => true,
        Err(_) => return Err(DavError::Status(StatusCode::FORBIDDEN)),
        Ok(_) => {
            if !overwrite {
                return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
            }
            fs.remove_all(dst)
                .await
                .map_err(|_| DavError::Status(StatusCode::FORBIDDEN))?;
            false
        }
    };
    match fs.rename(src, dst).await {
        Ok(()) => Ok(if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        }),
        // Typically the destination's parent collection is missing.
        Err(FsError::NotFound) => Err(DavError::Status(StatusCode::CONFLICT)),
        Err(_) => Err(DavError::Status(StatusCode::FORBIDDEN)),
    }
}
