//! The editor-driven commit builder.
//!
//! SVN drives commits depth-first: open/add directories, save files,
//! delete entries, close directories. The builder mirrors that drive with
//! an explicit stack of [`DirFrame`]s, buffering tree updates per
//! directory. `commit` then assembles the root tree, synthesizes the
//! commit object, replays deferred property checks against the tree view
//! of the prospective commit, validates locks, and performs the push under
//! the process-wide push mutex.
//!
//! A non-fast-forward push is not an error: `commit` returns `Ok(None)`
//! and the protocol driver restarts the edit against the new latest
//! revision.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::process::Command;
use std::sync::Arc;

use git2::Oid;
use tracing::{debug, info, instrument, warn};

use crate::config::PushMode;
use crate::errors::{CommitError, GitError};
use crate::git::{FileMode, TreeEntryData};
use crate::locks::LockManager;
use crate::models::User;
use crate::paths;
use crate::props::{self, PropertyMap, SVN_EXECUTABLE, SVN_SPECIAL};
use crate::revcache::{Revision, RevisionStore};
use crate::tree::caches::LINK_PREFIX;

/// One open directory in the editor drive.
struct DirFrame {
    name: String,
    path: String,
    entries: BTreeMap<String, TreeEntryData>,
}

/// A deferred property assertion, replayed after tree assembly.
struct PropCheck {
    path: String,
    expected: PropertyMap,
}

/// Builds one commit from an SVN editor drive.
pub struct CommitBuilder<'a> {
    store: &'a RevisionStore,
    locks: &'a LockManager,
    base: Arc<Revision>,
    stack: Vec<DirFrame>,
    checks: Vec<PropCheck>,
    edited: BTreeSet<String>,
    deleted_dirs: Vec<String>,
    tokens: HashMap<String, String>,
    keep_locks: bool,
}

impl<'a> CommitBuilder<'a> {
    /// Start an edit against the current latest revision.
    ///
    /// `tokens` maps locked paths to the tokens the client presented;
    /// `keep_locks` preserves consumed locks after a successful commit.
    pub fn new(
        store: &'a RevisionStore,
        locks: &'a LockManager,
        tokens: HashMap<String, String>,
        keep_locks: bool,
    ) -> Result<Self, CommitError> {
        let base = store.latest();
        let entries = match base.tree_oid() {
            Some(tree) => store.repo().tree_entries(tree)?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            store,
            locks,
            base,
            stack: vec![DirFrame {
                name: String::new(),
                path: "/".to_string(),
                entries,
            }],
            checks: Vec::new(),
            edited: BTreeSet::new(),
            deleted_dirs: Vec::new(),
            tokens,
            keep_locks,
        })
    }

    /// The revision this edit is based on.
    pub fn base(&self) -> &Arc<Revision> {
        &self.base
    }

    fn current(&mut self) -> &mut DirFrame {
        self.stack.last_mut().expect("editor stack never empty")
    }

    fn current_path(&self) -> &str {
        &self.stack.last().expect("editor stack never empty").path
    }

    // -----------------------------------------------------------------------
    // Editor operations
    // -----------------------------------------------------------------------

    /// Verify that `path` exists and has not changed after `rev`.
    pub fn check_up_to_date(&self, path: &str, rev: i64) -> Result<(), CommitError> {
        let path = paths::normalize(path);
        let latest = self.store.latest().id();
        let last_change = self
            .store
            .last_change(&path, latest)
            .ok_or_else(|| CommitError::EntryNotFound { path: path.clone() })?;
        if last_change > rev {
            return Err(CommitError::NotUpToDate {
                path,
                rev,
                last_change,
            });
        }
        Ok(())
    }

    /// Add a directory under the current one and descend into it. With
    /// `source_tree` the new directory is seeded from that Git tree (copy
    /// semantics).
    pub fn add_dir(&mut self, name: &str, source_tree: Option<Oid>) -> Result<(), CommitError> {
        let path = paths::join(self.current_path(), name);
        if self.current().entries.contains_key(name) {
            return Err(CommitError::AlreadyExists { path });
        }
        let entries = match source_tree {
            Some(tree) => self.store.repo().tree_entries(tree)?,
            None => BTreeMap::new(),
        };
        self.edited.insert(path.clone());
        self.stack.push(DirFrame {
            name: name.to_string(),
            path,
            entries,
        });
        Ok(())
    }

    /// Descend into an existing child directory.
    pub fn open_dir(&mut self, name: &str) -> Result<(), CommitError> {
        let path = paths::join(self.current_path(), name);
        let entry = match self.current().entries.get(name) {
            Some(entry) if entry.mode == FileMode::Dir => *entry,
            _ => return Err(CommitError::EntryNotFound { path }),
        };
        self.current().entries.remove(name);
        let entries = self.store.repo().tree_entries(entry.oid)?;
        self.stack.push(DirFrame {
            name: name.to_string(),
            path,
            entries,
        });
        Ok(())
    }

    /// Record a deferred assertion that the current directory's derived
    /// properties equal `props` after the commit.
    pub fn check_dir_properties(&mut self, props: PropertyMap) {
        let path = self.current_path().to_string();
        self.checks.push(PropCheck {
            path,
            expected: props,
        });
    }

    /// Close the current directory: serialize its tree and hand the entry
    /// to the parent. Empty directories cannot be committed.
    pub fn close_dir(&mut self) -> Result<(), CommitError> {
        if self.stack.len() == 1 {
            return Err(CommitError::InvalidDrive(
                "close_dir on the root directory".into(),
            ));
        }
        let frame = self.stack.pop().expect("checked depth above");
        if frame.entries.is_empty() {
            return Err(CommitError::EmptyDirectory { path: frame.path });
        }
        let tree = self.store.repo().write_tree(&frame.entries)?;
        self.current().entries.insert(
            frame.name,
            TreeEntryData {
                oid: tree,
                mode: FileMode::Dir,
            },
        );
        Ok(())
    }

    /// Record a file entry in the current directory.
    ///
    /// `content` is the full client bytes (for `svn:special` files they
    /// carry the `link ` prefix, which is stripped before the blob is
    /// written); `None` keeps the existing blob, which only a modification
    /// may do. `props` is the file's full target property map and is
    /// validated after tree assembly.
    pub fn save_file(
        &mut self,
        name: &str,
        content: Option<&[u8]>,
        props: PropertyMap,
        modify: bool,
    ) -> Result<(), CommitError> {
        let path = paths::join(self.current_path(), name);
        let existing = self.current().entries.get(name).copied();

        let file_entry = existing.filter(|e| !e.mode.is_dir());
        if modify && file_entry.is_none() {
            let latest = self.store.latest().id();
            return Err(CommitError::NotUpToDate {
                path: path.clone(),
                rev: self.base.id(),
                last_change: self.store.last_change(&path, latest).unwrap_or(latest),
            });
        }
        if !modify && existing.is_some() {
            let latest = self.store.latest().id();
            return Err(CommitError::NotUpToDate {
                path: path.clone(),
                rev: self.base.id(),
                last_change: self.store.last_change(&path, latest).unwrap_or(latest),
            });
        }

        let mode = if props.contains_key(SVN_SPECIAL) {
            FileMode::Symlink
        } else if props.contains_key(SVN_EXECUTABLE) {
            FileMode::Executable
        } else {
            FileMode::File
        };

        let blob = match content {
            Some(data) => {
                let data = if mode == FileMode::Symlink {
                    data.strip_prefix(LINK_PREFIX).unwrap_or(data)
                } else {
                    data
                };
                self.store.repo().write_blob(data)?
            }
            None => file_entry
                .ok_or_else(|| CommitError::IncompleteData { path: path.clone() })?
                .oid,
        };

        self.current()
            .entries
            .insert(name.to_string(), TreeEntryData { oid: blob, mode });
        self.edited.insert(path.clone());
        self.checks.push(PropCheck {
            path,
            expected: props,
        });
        Ok(())
    }

    /// Delete an entry of the current directory.
    pub fn delete(&mut self, name: &str) -> Result<(), CommitError> {
        let path = paths::join(self.current_path(), name);
        let removed = self
            .current()
            .entries
            .remove(name)
            .ok_or_else(|| CommitError::EntryNotFound { path: path.clone() })?;
        if removed.mode.is_dir() {
            self.deleted_dirs.push(path.clone());
        }
        self.edited.insert(path);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Assemble and push the commit.
    ///
    /// Returns the new revision, or `None` when the push lost the race
    /// (non-fast-forward) and the drive must restart from the new latest.
    #[instrument(skip(self, user, message), fields(user = %user, base = self.base.id()))]
    pub fn commit(
        &mut self,
        user: &User,
        message: &str,
    ) -> Result<Option<Arc<Revision>>, CommitError> {
        if self.stack.len() != 1 {
            return Err(CommitError::InvalidDrive(format!(
                "{} directories left open",
                self.stack.len() - 1
            )));
        }

        let consumed = self
            .locks
            .validate_for_commit(&self.edited, &self.deleted_dirs, &self.tokens)?;

        let repo = self.store.repo();
        let name = if user.real_name.is_empty() {
            &user.username
        } else {
            &user.real_name
        };

        // Build tree, insert commit, validate properties, and update the
        // ref under the push mutex, so concurrent committers serialize.
        let pushed = {
            let _push_guard = self.store.push_lock().lock().expect("push lock poisoned");

            let tree = repo.write_tree(&self.stack[0].entries)?;
            let parents: Vec<Oid> = self.base.git_commit().into_iter().collect();
            let commit = repo.write_commit(name, &user.email, None, message, tree, &parents)?;

            self.validate_properties(tree)?;

            let accepted = match self.store.push_mode() {
                PushMode::Simple => repo.cas_ref(
                    &format!("refs/heads/{}", self.store.branch()),
                    commit,
                    self.base.git_commit(),
                    "commit via svn bridge",
                )?,
                PushMode::Native => self.native_push(commit)?,
            };
            accepted.then_some(commit)
        };

        let Some(commit) = pushed else {
            warn!("push rejected, edit must restart");
            return Ok(None);
        };

        self.store.update()?;
        let revision = self.store.by_git_commit(commit)?;
        if !self.keep_locks {
            self.locks.release(&consumed);
        }
        info!(rev = revision.id(), commit = %commit, "committed");
        Ok(Some(revision))
    }

    /// Replay deferred property checks against the prospective tree.
    fn validate_properties(&self, root: Oid) -> Result<(), CommitError> {
        let view = self.store.tree_for(self.base.id() + 1, Some(root));
        for check in &self.checks {
            let Some(node) = view.node_at(&check.path)? else {
                // The checked node was deleted later in the drive.
                continue;
            };
            let derived = node.properties(false)?;
            if derived != check.expected {
                debug!(path = %check.path, "property validation failed");
                return Err(CommitError::PropertyMismatch(props::format_mismatch(
                    &check.path,
                    &check.expected,
                    &derived,
                )));
            }
        }
        Ok(())
    }

    /// Push by shelling out to `git push`, so server-side hooks run.
    fn native_push(&self, commit: Oid) -> Result<bool, GitError> {
        let refspec = format!("{}:refs/heads/{}", commit, self.store.branch());
        let output = Command::new("git")
            .current_dir(self.store.repo().path())
            .args(["push", "--porcelain", ".", &refspec])
            .output()
            .map_err(GitError::IoError)?;
        if output.status.success() {
            return Ok(true);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let rejected = stdout.lines().any(|line| line.starts_with('!'));
        if rejected && !stdout.contains("hook declined") {
            debug!(%stdout, "native push rejected");
            return Ok(false);
        }
        Err(GitError::PushFailed(format!("{stdout}{stderr}")))
    }
}
