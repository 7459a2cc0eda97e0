//! ## Generic async WebDAV handler
//!
//! [Webdav](http://www.webdav.org/specs/rfc4918.html) (RFC 4918) is defined
//! as HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods
//! (PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK, UNLOCK). These extension
//! methods are used to manage collections (like unix directories), get
//! information on resources, rename and copy items, and lock/unlock them.
//!
//! A `handler` is a piece of code that takes a `http::Request`, processes it
//! in some way, and then generates a `http::Response`. This library is a
//! `handler` that maps the HTTP/Webdav protocol to a filesystem. Or
//! actually, "a" filesystem: you supply an implementation of the
//! [`DavFileSystem`][fs::DavFileSystem] trait for backend storage. Included
//! are an adapter for the local filesystem ([`LocalFs`][fs::LocalFs]) and an
//! ephemeral in-memory filesystem ([`MemFs`][fs::MemFs]).
//!
//! Write exclusion is coordinated through a [lock store][ls::DavLockSystem].
//! Every mutating method takes out locks on the resources it touches, so two
//! clients cannot concurrently modify the same subtree even when neither of
//! them uses LOCK explicitly. An in-memory store ([`MemLs`][ls::MemLs]) is
//! included.
//!
//! The handler works with the standard http types from the `http` and
//! `http_body` crates, so it can be used directly with http libraries and
//! frameworks that also work with those types, like hyper.
//!
//! ## Example.
//!
//! Serve `/tmp` over plain http on port 4918:
//!
//! ```no_run
//! use std::convert::Infallible;
//! use davserve::{DavHandler, FileSystem, LockSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let dav_server = DavHandler::builder(FileSystem::local("/tmp"))
//!         .locksystem(LockSystem::Mem)
//!         .build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod multistatus;
mod util;
mod xmlutil;

pub mod body;
pub mod davpath;
pub mod fs;
pub mod ls;

use crate::errors::{DavError, DavResult};

pub use crate::davhandler::{DavBuilder, DavHandler, FileSystem, LockSystem, RequestLogger};
pub use crate::util::DavMethod;
