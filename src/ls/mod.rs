//! Lock store interface.
//!
//! WebDAV locks live in a store shared by all requests. The handler uses
//! the store for explicit LOCK/UNLOCK handling, for the temporary locks it
//! wraps every mutation in, and for evaluating `If:` preconditions.
//! [`MemLs`] is the in-memory implementation.

use std::error::Error;
use std::fmt;
use std::time::{Duration, SystemTime};

use xmltree::Element;

mod memls;

pub use memls::MemLs;

/// The immutable descriptor of a single lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LockDetails {
    /// The resource path the lock protects.
    pub root: String,
    /// Validity window from creation or last refresh. `None` is infinite.
    pub duration: Option<Duration>,
    /// The `<D:owner>` element from the client's LOCK body, echoed back
    /// verbatim in lock discovery.
    pub owner_xml: Option<Element>,
    /// `true`: the lock protects only `root`. `false`: it protects `root`
    /// and every descendant.
    pub zero_depth: bool,
}

/// A single condition from an `If:` header list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    pub not: bool,
    pub token: Option<String>,
    pub etag: Option<String>,
}

/// Errors from the lock store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LsError {
    /// A conflicting lock exists.
    Locked,
    /// The caller may not release this lock.
    Forbidden,
    /// No lock with that token exists (or it expired).
    NoSuchLock,
    /// None of the presented conditions match the locks covering the
    /// resource.
    ConfirmationFailed,
}

impl fmt::Display for LsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LsError::Locked => "locked",
            LsError::Forbidden => "forbidden",
            LsError::NoSuchLock => "no such lock",
            LsError::ConfirmationFailed => "confirmation failed",
        };
        write!(f, "{}", s)
    }
}

impl Error for LsError {}

/// Proof of a successful [`DavLockSystem::confirm`]. The locks it names are
/// held: nobody else can unlock, refresh or re-confirm them until the
/// confirmation is passed back to [`DavLockSystem::release`].
#[derive(Debug)]
pub struct Confirmation {
    /// Roots of the locks held by this confirmation.
    pub held_roots: Vec<String>,
}

/// The lock store interface.
///
/// All operations are atomic with respect to each other, and all of them
/// treat a lock whose validity window has passed as gone.
pub trait DavLockSystem: Send + Sync + 'static {
    /// Create a lock. Fails with [`LsError::Locked`] when the new lock
    /// would conflict with an existing one: a lock on a path conflicts
    /// with any lock covering that path, and an infinite-depth lock
    /// conflicts with any lock below it.
    fn create(&self, now: SystemTime, details: LockDetails) -> Result<String, LsError>;

    /// Extend the validity window of an existing lock.
    fn refresh(
        &self,
        now: SystemTime,
        token: &str,
        duration: Option<Duration>,
    ) -> Result<LockDetails, LsError>;

    /// Release a lock.
    fn unlock(&self, now: SystemTime, token: &str) -> Result<(), LsError>;

    /// Verify that `conditions` satisfy every lock currently covering
    /// `src` and `dst`. On success the matched locks are held until the
    /// returned confirmation is released.
    fn confirm(
        &self,
        now: SystemTime,
        src: Option<&str>,
        dst: Option<&str>,
        conditions: &[Condition],
    ) -> Result<Confirmation, LsError>;

    /// Relinquish the holds placed by [`confirm`](Self::confirm).
    fn release(&self, confirmation: Confirmation);

    /// The active locks covering `path`, for lock discovery.
    fn discover(&self, now: SystemTime, path: &str) -> Vec<(String, LockDetails)>;
}
