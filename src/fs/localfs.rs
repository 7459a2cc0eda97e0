//! Local filesystem access.
//!
//! This implementation is stateless, apart from the base directory all
//! resource paths are resolved under.

use std::io::SeekFrom;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use async_stream::stream;
use bytes::Bytes;
use futures_util::FutureExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::davpath::DavPath;
use crate::fs::*;

/// Local filesystem implementation, serving a base directory.
pub struct LocalFs {
    basedir: PathBuf,
}

#[derive(Debug, Clone)]
struct LocalFsMetaData(std::fs::Metadata);

struct LocalFsFile(tokio::fs::File);

struct LocalFsDirEntry {
    entry: tokio::fs::DirEntry,
}

impl LocalFs {
    /// Create a new LocalFs serving `base`.
    pub fn new(base: impl Into<PathBuf>) -> Arc<LocalFs> {
        Arc::new(LocalFs {
            basedir: base.into(),
        })
    }

    fn abs_path(&self, path: &DavPath) -> PathBuf {
        let mut pathbuf = self.basedir.clone();
        pathbuf.push(path.as_rel_ospath());
        pathbuf
    }
}

impl DavFileSystem for LocalFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        async move {
            let path = self.abs_path(path);
            let meta = tokio::fs::metadata(path).await?;
            Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn open<'a>(
        &'a self,
        path: &'a DavPath,
        options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        async move {
            let path = self.abs_path(path);
            let mut opts = tokio::fs::OpenOptions::new();
            opts.read(options.read)
                .write(options.write)
                .append(options.append)
                .truncate(options.truncate)
                .create(options.create)
                .create_new(options.create_new);
            #[cfg(unix)]
            opts.mode(options.mode);
            let file = opts.open(path).await?;
            Ok(Box::new(LocalFsFile(file)) as Box<dyn DavFile>)
        }
        .boxed()
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        async move {
            trace!("FS: read_dir {:?}", path.as_str());
            let path = self.abs_path(path);
            let mut read_dir = tokio::fs::read_dir(&path).await?;
            let entries: FsStream<Box<dyn DavDirEntry>> = Box::pin(stream! {
                loop {
                    match read_dir.next_entry().await {
                        Ok(Some(entry)) => {
                            yield Box::new(LocalFsDirEntry { entry }) as Box<dyn DavDirEntry>;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!("read_dir failed {}", e);
                            break;
                        }
                    }
                }
            });
            Ok(entries)
        }
        .boxed()
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let path = self.abs_path(path);
            tokio::fs::create_dir(path).await?;
            Ok(())
        }
        .boxed()
    }

    fn remove_all<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let path = self.abs_path(path);
            let meta = tokio::fs::metadata(&path).await?;
            if meta.is_dir() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                tokio::fs::remove_file(path).await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let from = self.abs_path(from);
            let to = self.abs_path(to);
            tokio::fs::rename(from, to).await?;
            Ok(())
        }
        .boxed()
    }
}

impl DavMetaData for LocalFsMetaData {
    fn len(&self) -> u64 {
        self.0.len()
    }

    fn modified(&self) -> FsResult<SystemTime> {
        self.0.modified().map_err(|e| e.into())
    }

    fn created(&self) -> FsResult<SystemTime> {
        self.0.created().map_err(|e| e.into())
    }

    fn is_dir(&self) -> bool {
        self.0.is_dir()
    }

    #[cfg(unix)]
    fn mode(&self) -> Option<u32> {
        Some(self.0.permissions().mode() & 0o777)
    }
}

impl DavDirEntry for LocalFsDirEntry {
    fn name(&self) -> String {
        self.entry.file_name().to_string_lossy().into_owned()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        async move {
            let meta = self.entry.metadata().await?;
            Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>)
        }
        .boxed()
    }
}

impl DavFile for LocalFsFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        async move {
            let meta = self.0.metadata().await?;
            Ok(Box::new(LocalFsMetaData(meta)) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        async move {
            let mut buf = vec![0u8; count];
            let n = self.0.read(&mut buf).await?;
            buf.truncate(n);
            Ok(Bytes::from(buf))
        }
        .boxed()
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        async move {
            self.0.write_all(&buf).await?;
            Ok(())
        }
        .boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        async move { Ok(self.0.seek(pos).await?) }.boxed()
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        async move {
            self.0.flush().await?;
            self.0.sync_all().await?;
            Ok(())
        }
        .boxed()
    }
}
