//! Path locks with SVN semantics.
//!
//! Locks are token-based: locking issues an opaque unique token, unlocking
//! requires presenting it (unless broken by an administrator), and a
//! `force` lock steals an existing lock by issuing a fresh token. The
//! manager owns its table outright; a single mutex guards it, since every
//! operation is constant-time per path.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::LockError;
use crate::models::User;
use crate::paths;
use crate::revcache::RevisionStore;
use crate::tree::NodeKind;

/// One held lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDesc {
    pub path: String,
    pub token: String,
    pub owner: String,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    /// The revision the client locked against.
    pub revision: i64,
}

/// One path to lock, with the revision the client believes is current.
#[derive(Debug, Clone)]
pub struct LockTarget {
    pub path: String,
    pub revision: i64,
}

impl LockTarget {
    pub fn new(path: &str, revision: i64) -> Self {
        Self {
            path: paths::normalize(path),
            revision,
        }
    }
}

fn fresh_token() -> String {
    format!("opaquelocktoken:{}", Uuid::new_v4())
}

/// The lock table for one bridged repository.
#[derive(Default)]
pub struct LockManager {
    table: Mutex<BTreeMap<String, LockDesc>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock each target path for `user`.
    ///
    /// Results are returned per path, in input order. A path locks
    /// successfully when it is a file that exists at the latest revision,
    /// the client's revision is not older than the path's last change, and
    /// no other lock is held (or `force` steals it).
    pub fn lock(
        &self,
        store: &RevisionStore,
        targets: &[LockTarget],
        comment: Option<&str>,
        force: bool,
        user: &User,
    ) -> Result<Vec<(String, Result<LockDesc, LockError>)>, LockError> {
        let latest = store.latest();
        let tree = store.tree(latest.id())?;
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            let outcome = self.lock_one(store, &tree, latest.id(), target, comment, force, user);
            results.push((target.path.clone(), outcome));
        }
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    fn lock_one(
        &self,
        store: &RevisionStore,
        tree: &crate::tree::RevisionTree<'_>,
        latest: i64,
        target: &LockTarget,
        comment: Option<&str>,
        force: bool,
        user: &User,
    ) -> Result<LockDesc, LockError> {
        let path = &target.path;
        let node = tree
            .node_at(path)?
            .ok_or_else(|| LockError::OutOfDate { path: path.clone() })?;
        if node.kind() == NodeKind::Dir {
            return Err(LockError::NotFile { path: path.clone() });
        }
        let last_change = store
            .last_change(path, latest)
            .ok_or_else(|| LockError::OutOfDate { path: path.clone() })?;
        if target.revision < last_change {
            return Err(LockError::OutOfDate { path: path.clone() });
        }

        let mut table = self.table.lock().expect("lock table poisoned");
        if let Some(existing) = table.get(path) {
            if !force {
                return Err(LockError::AlreadyLocked {
                    path: path.clone(),
                    owner: existing.owner.clone(),
                });
            }
            debug!(path, owner = %existing.owner, new_owner = %user.username, "stealing lock");
        }
        let desc = LockDesc {
            path: path.clone(),
            token: fresh_token(),
            owner: user.username.clone(),
            comment: comment.map(str::to_string),
            created_at: Utc::now(),
            revision: target.revision,
        };
        table.insert(path.clone(), desc.clone());
        info!(path, owner = %user.username, "locked");
        Ok(desc)
    }

    /// Unlock each `(path, token)` pair. With `break_lock` the token is
    /// ignored and any lock on the path is removed.
    pub fn unlock(
        &self,
        targets: &[(String, Option<String>)],
        break_lock: bool,
        user: &User,
    ) -> Vec<(String, Result<(), LockError>)> {
        let mut table = self.table.lock().expect("lock table poisoned");
        targets
            .iter()
            .map(|(raw_path, token)| {
                let path = paths::normalize(raw_path);
                let matches = match table.get(&path) {
                    None => false,
                    Some(_) if break_lock => true,
                    Some(desc) => token.as_deref() == Some(desc.token.as_str()),
                };
                let outcome = if matches {
                    table.remove(&path);
                    info!(path, user = %user.username, break_lock, "unlocked");
                    Ok(())
                } else {
                    Err(LockError::NoSuchLock { path: path.clone() })
                };
                (path, outcome)
            })
            .collect()
    }

    /// The lock on `path`, if any.
    pub fn get_lock(&self, path: &str) -> Option<LockDesc> {
        self.table
            .lock()
            .expect("lock table poisoned")
            .get(&paths::normalize(path))
            .cloned()
    }

    /// All locks at or below `prefix`, ordered by path.
    pub fn get_locks(&self, prefix: &str) -> Vec<LockDesc> {
        let prefix = paths::normalize(prefix);
        self.table
            .lock()
            .expect("lock table poisoned")
            .values()
            .filter(|desc| paths::is_self_or_ancestor(&prefix, &desc.path))
            .cloned()
            .collect()
    }

    /// Validate a commit against held locks.
    ///
    /// Every edited path that is locked, and every locked path that a
    /// directory delete would sweep away, must have its token in
    /// `tokens`. Returns the paths whose locks the commit consumes; pass
    /// them to [`LockManager::release`] after the commit lands (unless the
    /// client asked to keep its locks).
    pub fn validate_for_commit(
        &self,
        edited: &BTreeSet<String>,
        deleted_dirs: &[String],
        tokens: &HashMap<String, String>,
    ) -> Result<Vec<String>, LockError> {
        let table = self.table.lock().expect("lock table poisoned");
        let mut consumed = Vec::new();
        for (path, desc) in table.iter() {
            let touched = edited.contains(path)
                || deleted_dirs
                    .iter()
                    .any(|dir| paths::is_self_or_ancestor(dir, path));
            if !touched {
                continue;
            }
            if tokens.get(path).map(String::as_str) != Some(desc.token.as_str()) {
                return Err(LockError::BadToken { path: path.clone() });
            }
            consumed.push(path.clone());
        }
        Ok(consumed)
    }

    /// Drop the given locks (post-commit cleanup).
    pub fn release(&self, consumed: &[String]) {
        let mut table = self.table.lock().expect("lock table poisoned");
        for path in consumed {
            table.remove(path);
        }
    }
}
