//! In-memory lock store.
//!
//! Locks are kept in a map keyed by resource path. Every ancestor of a
//! lock root is present in the map as well, carrying a reference count of
//! the locks at or below it. That makes the conflict check O(depth): a new
//! lock is refused when a node on its path to the root holds an
//! infinite-depth lock, or (for an infinite-depth lock) when its own node
//! still has live locks underneath.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use uuid::Uuid;

use super::{Condition, Confirmation, DavLockSystem, LockDetails, LsError};

/// Ephemeral in-memory lock store.
pub struct MemLs(Mutex<Inner>);

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, Node>,
    // token -> lock root.
    by_token: HashMap<String, String>,
}

#[derive(Default)]
struct Node {
    // Set when an actual lock is rooted at this node.
    token: Option<String>,
    details: Option<LockDetails>,
    expiry: Option<SystemTime>,
    held: bool,
    // Number of locks rooted at this node or below it.
    ref_count: usize,
}

impl MemLs {
    pub fn new() -> Arc<MemLs> {
        Arc::new(MemLs(Mutex::new(Inner::default())))
    }
}

// "/" or "/a/b", no trailing slash.
fn slash_clean(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

// Visit `name` and each of its ancestors up to and including "/".
// The callback returns false to abort the walk.
fn walk_to_root(name: &str, mut f: impl FnMut(&str, bool) -> bool) -> bool {
    let mut name = name;
    let mut first = true;
    loop {
        if !f(name, first) {
            return false;
        }
        if name == "/" {
            return true;
        }
        name = match name.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &name[..idx],
        };
        first = false;
    }
}

impl Inner {
    fn collect_expired(&mut self, now: SystemTime) {
        let expired: Vec<String> = self
            .by_token
            .iter()
            .filter(|(_, root)| {
                self.by_name
                    .get(*root)
                    .and_then(|n| n.expiry)
                    .map(|e| now >= e)
                    .unwrap_or(false)
            })
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            self.remove(&token);
        }
    }

    fn can_create(&self, name: &str, zero_depth: bool) -> bool {
        walk_to_root(name, |name0, first| {
            let node = match self.by_name.get(name0) {
                Some(n) => n,
                None => return true,
            };
            if first {
                if node.token.is_some() {
                    // The target node is already locked.
                    return false;
                }
                if !zero_depth && node.ref_count > 0 {
                    // An infinite-depth lock may not shadow live locks below it.
                    return false;
                }
            } else if node.token.is_some()
                && !node.details.as_ref().map(|d| d.zero_depth).unwrap_or(true)
            {
                // An ancestor holds an infinite-depth lock.
                return false;
            }
            true
        })
    }

    fn create_node(&mut self, name: &str) {
        walk_to_root(name, |name0, _| {
            let node = self.by_name.entry(name0.to_string()).or_default();
            node.ref_count += 1;
            true
        });
    }

    fn remove(&mut self, token: &str) {
        let root = match self.by_token.remove(token) {
            Some(root) => root,
            None => return,
        };
        if let Some(node) = self.by_name.get_mut(&root) {
            node.token = None;
            node.details = None;
            node.expiry = None;
            node.held = false;
        }
        walk_to_root(&root, |name0, _| {
            if let Some(node) = self.by_name.get_mut(name0) {
                node.ref_count -= 1;
                let gone = node.ref_count == 0;
                if gone {
                    self.by_name.remove(name0);
                }
            }
            true
        });
    }

    // The root of the lock that covers `name` and is named by one of the
    // conditions, provided nobody else holds it. Token conditions only:
    // a Not or ETag condition never names a lock, so it can never satisfy
    // one either.
    fn lookup(&self, name: &str, conditions: &[Condition]) -> Option<String> {
        for c in conditions {
            let token = match &c.token {
                Some(t) if !c.not => t,
                _ => continue,
            };
            let root = match self.by_token.get(token) {
                Some(r) => r,
                None => continue,
            };
            let node = match self.by_name.get(root) {
                Some(n) => n,
                None => continue,
            };
            if node.held {
                continue;
            }
            if name == root {
                return Some(root.clone());
            }
            let details = match node.details.as_ref() {
                Some(d) => d,
                None => continue,
            };
            if details.zero_depth {
                continue;
            }
            if root == "/" || name.starts_with(&format!("{}/", root)) {
                return Some(root.clone());
            }
        }
        None
    }
}

impl DavLockSystem for MemLs {
    fn create(&self, now: SystemTime, details: LockDetails) -> Result<String, LsError> {
        let mut inner = self.0.lock();
        inner.collect_expired(now);
        let root = slash_clean(&details.root);
        if !inner.can_create(&root, details.zero_depth) {
            return Err(LsError::Locked);
        }
        inner.create_node(&root);
        let token = format!("opaquelocktoken:{}", Uuid::new_v4());
        let expiry = details.duration.map(|d| now + d);
        let node = inner
            .by_name
            .get_mut(&root)
            .expect("node created a moment ago");
        node.token = Some(token.clone());
        node.details = Some(LockDetails {
            root: root.clone(),
            ..details
        });
        node.expiry = expiry;
        inner.by_token.insert(token.clone(), root);
        Ok(token)
    }

    fn refresh(
        &self,
        now: SystemTime,
        token: &str,
        duration: Option<Duration>,
    ) -> Result<LockDetails, LsError> {
        let mut inner = self.0.lock();
        inner.collect_expired(now);
        let root = inner
            .by_token
            .get(token)
            .cloned()
            .ok_or(LsError::NoSuchLock)?;
        let node = inner.by_name.get_mut(&root).ok_or(LsError::NoSuchLock)?;
        if node.held {
            return Err(LsError::Locked);
        }
        if let Some(details) = node.details.as_mut() {
            details.duration = duration;
        }
        node.expiry = duration.map(|d| now + d);
        node.details.clone().ok_or(LsError::NoSuchLock)
    }

    fn unlock(&self, now: SystemTime, token: &str) -> Result<(), LsError> {
        let mut inner = self.0.lock();
        inner.collect_expired(now);
        let root = inner.by_token.get(token).ok_or(LsError::NoSuchLock)?;
        let node = inner.by_name.get(root).ok_or(LsError::NoSuchLock)?;
        if node.held {
            return Err(LsError::Locked);
        }
        inner.remove(token);
        Ok(())
    }

    fn confirm(
        &self,
        now: SystemTime,
        src: Option<&str>,
        dst: Option<&str>,
        conditions: &[Condition],
    ) -> Result<Confirmation, LsError> {
        let mut inner = self.0.lock();
        inner.collect_expired(now);

        let mut held_roots = Vec::new();
        if let Some(src) = src {
            match inner.lookup(&slash_clean(src), conditions) {
                Some(root) => held_roots.push(root),
                None => return Err(LsError::ConfirmationFailed),
            }
        }
        if let Some(dst) = dst {
            match inner.lookup(&slash_clean(dst), conditions) {
                Some(root) => {
                    // Don't hold the same lock twice.
                    if !held_roots.contains(&root) {
                        held_roots.push(root);
                    }
                }
                None => return Err(LsError::ConfirmationFailed),
            }
        }
        for root in &held_roots {
            if let Some(node) = inner.by_name.get_mut(root) {
                node.held = true;
            }
        }
        Ok(Confirmation { held_roots })
    }

    fn release(&self, confirmation: Confirmation) {
        let mut inner = self.0.lock();
        for root in confirmation.held_roots {
            if let Some(node) = inner.by_name.get_mut(&root) {
                node.held = false;
            }
        }
    }

    fn discover(&self, now: SystemTime, path: &str) -> Vec<(String, LockDetails)> {
        let mut inner = self.0.lock();
        inner.collect_expired(now);
        let path = slash_clean(path);
        let mut found = Vec::new();
        walk_to_root(&path, |name0, first| {
            if let Some(node) = inner.by_name.get(name0) {
                if let (Some(token), Some(details)) = (&node.token, &node.details) {
                    if first || !details.zero_depth {
                        found.push((token.clone(), details.clone()));
                    }
                }
            }
            true
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(root: &str, zero_depth: bool) -> LockDetails {
        LockDetails {
            root: root.to_string(),
            duration: None,
            owner_xml: None,
            zero_depth,
        }
    }

    fn token_cond(token: &str) -> Condition {
        Condition {
            token: Some(token.to_string()),
            ..Condition::default()
        }
    }

    #[test]
    fn create_then_unlock_restores_state() {
        let ls = MemLs::new();
        let now = SystemTime::now();
        let token = ls.create(now, details("/a/b", false)).unwrap();
        ls.unlock(now, &token).unwrap();
        assert!(ls.0.lock().by_name.is_empty());
        assert_eq!(ls.unlock(now, &token), Err(LsError::NoSuchLock));
    }

    #[test]
    fn infinite_depth_conflicts_with_descendants() {
        let ls = MemLs::new();
        let now = SystemTime::now();
        ls.create(now, details("/a", false)).unwrap();
        assert_eq!(
            ls.create(now, details("/a/b/c", false)).unwrap_err(),
            LsError::Locked
        );
        assert_eq!(
            ls.create(now, details("/a", true)).unwrap_err(),
            LsError::Locked
        );
        // A sibling is fine.
        ls.create(now, details("/ax", false)).unwrap();
    }

    #[test]
    fn descendant_conflicts_with_new_ancestor_lock() {
        let ls = MemLs::new();
        let now = SystemTime::now();
        ls.create(now, details("/a/b", false)).unwrap();
        assert_eq!(
            ls.create(now, details("/a", false)).unwrap_err(),
            LsError::Locked
        );
        // Zero-depth on the ancestor does not cover /a/b, so it's allowed.
        ls.create(now, details("/a", true)).unwrap();
    }

    #[test]
    fn confirm_requires_matching_token() {
        let ls = MemLs::new();
        let now = SystemTime::now();
        let token = ls.create(now, details("/a", false)).unwrap();

        assert_eq!(
            ls.confirm(now, Some("/a/x"), None, &[token_cond("wrong")])
                .unwrap_err(),
            LsError::ConfirmationFailed
        );

        let conf = ls
            .confirm(now, Some("/a/x"), None, &[token_cond(&token)])
            .unwrap();
        // While held, the lock can't be unlocked or re-confirmed.
        assert_eq!(ls.unlock(now, &token), Err(LsError::Locked));
        assert_eq!(
            ls.confirm(now, Some("/a/x"), None, &[token_cond(&token)])
                .unwrap_err(),
            LsError::ConfirmationFailed
        );
        ls.release(conf);
        ls.unlock(now, &token).unwrap();
    }

    #[test]
    fn confirm_two_paths_one_lock() {
        let ls = MemLs::new();
        let now = SystemTime::now();
        let token = ls.create(now, details("/a", false)).unwrap();
        let conf = ls
            .confirm(now, Some("/a/x"), Some("/a/y"), &[token_cond(&token)])
            .unwrap();
        assert_eq!(conf.held_roots, vec!["/a".to_string()]);
        ls.release(conf);
    }

    #[test]
    fn zero_depth_lock_does_not_cover_children() {
        let ls = MemLs::new();
        let now = SystemTime::now();
        let token = ls.create(now, details("/a", true)).unwrap();
        assert_eq!(
            ls.confirm(now, Some("/a/x"), None, &[token_cond(&token)])
                .unwrap_err(),
            LsError::ConfirmationFailed
        );
    }

    #[test]
    fn expired_locks_are_collected() {
        let ls = MemLs::new();
        let now = SystemTime::now();
        let mut d = details("/a", false);
        d.duration = Some(Duration::from_secs(10));
        let token = ls.create(now, d).unwrap();

        let later = now + Duration::from_secs(11);
        assert_eq!(ls.refresh(later, &token, None), Err(LsError::NoSuchLock));
        // The path is lockable again.
        ls.create(later, details("/a/b", false)).unwrap();
    }

    #[test]
    fn refresh_extends_window() {
        let ls = MemLs::new();
        let now = SystemTime::now();
        let mut d = details("/a", false);
        d.duration = Some(Duration::from_secs(10));
        let token = ls.create(now, d).unwrap();

        let almost = now + Duration::from_secs(9);
        let refreshed = ls
            .refresh(almost, &token, Some(Duration::from_secs(100)))
            .unwrap();
        assert_eq!(refreshed.duration, Some(Duration::from_secs(100)));

        let later = now + Duration::from_secs(50);
        ls.refresh(later, &token, Some(Duration::from_secs(100)))
            .unwrap();
    }

    #[test]
    fn discover_includes_covering_ancestors() {
        let ls = MemLs::new();
        let now = SystemTime::now();
        let deep = ls.create(now, details("/a/b", false)).unwrap();
        let shallow = ls.create(now, details("/x", true)).unwrap();

        let found = ls.discover(now, "/a/b/c");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, deep);

        // Zero-depth locks only show up on their own path.
        assert!(ls.discover(now, "/x/y").is_empty());
        assert_eq!(ls.discover(now, "/x").len(), 1);
        assert_eq!(ls.discover(now, "/x")[0].0, shallow);
    }
}
