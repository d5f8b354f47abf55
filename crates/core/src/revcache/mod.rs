//! The persistent revision mapping cache.
//!
//! SVN revisions are a dense sequence `0..=latest`, each anchored to a Git
//! commit. The mapping is persisted inside the repository itself: a side
//! branch whose commit chain parallels the exported branch, one cache
//! commit per revision, with the revision's change set serialized into its
//! tree (see [`serialized`]). Revision 0 is synthetic: no user commit, an
//! empty tree.
//!
//! [`RevisionStore::update`] brings the cache up to date in two phases:
//! *extension* walks unmapped user commits first-parent-only and writes one
//! cache commit each (flushing the side ref periodically so partial
//! progress survives crashes), and *load* parses new cache commits into
//! in-memory revisions and indexes. Readers take a shared lock and copy
//! out `Arc<Revision>` handles; new revisions become visible atomically.

pub mod last_change;
pub mod serialized;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

use git2::Oid;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::{BridgeConfig, PushMode};
use crate::diff::{self, ChangePair};
use crate::errors::{GitError, RevisionError};
use crate::git::{CommitData, FileMode, GitRepo, TreeEntryData};
use crate::paths;
use crate::tree::caches::ObjectCaches;
use crate::tree::RevisionTree;
use last_change::LastChangeIndex;
use serialized::{CacheRevision, ENTRY_CHANGE_JSON, ENTRY_COMMIT_REF, ENTRY_UUID};

/// Fixed authoring identity for cache commits.
const CACHE_AUTHOR: &str = "gitsvnbridge";
const CACHE_EMAIL: &str = "gitsvnbridge@localhost";

// ---------------------------------------------------------------------------
// Revision
// ---------------------------------------------------------------------------

/// One immutable revision handle.
#[derive(Debug)]
pub struct Revision {
    id: i64,
    cache_commit: Oid,
    git_commit: Option<Oid>,
    /// The user commit's root tree; `None` for the synthetic revision 0.
    tree: Option<Oid>,
    time_ms: i64,
    author: String,
    log: String,
    renames: BTreeMap<String, String>,
    changes: BTreeMap<String, ChangePair>,
}

impl Revision {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn cache_commit(&self) -> Oid {
        self.cache_commit
    }

    pub fn git_commit(&self) -> Option<Oid> {
        self.git_commit
    }

    pub fn tree_oid(&self) -> Option<Oid> {
        self.tree
    }

    /// Commit time in milliseconds since the epoch.
    pub fn date_ms(&self) -> i64 {
        self.time_ms
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    /// Paths changed in this revision.
    pub fn changes(&self) -> &BTreeMap<String, ChangePair> {
        &self.changes
    }

    /// Rename map `newPath → oldPath` for this revision.
    pub fn renames(&self) -> &BTreeMap<String, String> {
        &self.renames
    }

    /// Answer an SVN copy-from query: where did `path` live before this
    /// revision, if it was renamed into place here?
    pub fn copy_from(&self, path: &str) -> Option<(i64, &str)> {
        self.renames.get(path).map(|old| (self.id - 1, old.as_str()))
    }
}

// ---------------------------------------------------------------------------
// RevisionStore
// ---------------------------------------------------------------------------

struct StoreState {
    revisions: Vec<Arc<Revision>>,
    /// Monotone `(time_ms, rev)` pairs; out-of-order revisions are absent.
    date_index: Vec<(i64, i64)>,
    commit_index: HashMap<Oid, i64>,
    loaded_tip: Option<Oid>,
}

/// The revision mapping cache for one exported branch.
pub struct RevisionStore {
    repo: Arc<GitRepo>,
    linked: Vec<Arc<GitRepo>>,
    branch: String,
    cache_ref: String,
    rename_detection: bool,
    rename_threshold: u16,
    flush_interval: Duration,
    push_mode: PushMode,
    uuid: OnceLock<String>,
    caches: ObjectCaches,
    state: RwLock<StoreState>,
    last_change: LastChangeIndex,
    /// Single-flight guard for `update`.
    update_lock: Mutex<()>,
    /// Process-wide push serialization (see the commit builder).
    push_lock: Mutex<()>,
}

impl RevisionStore {
    /// Open a bridged repository: open the Git repositories, create the
    /// synthetic revision 0 if the cache ref does not exist yet, and bring
    /// the cache up to date.
    pub fn open(config: &BridgeConfig) -> Result<Self, RevisionError> {
        let repo = GitRepo::open(&config.repository.path)?;
        let linked = config
            .linked
            .iter()
            .map(|l| GitRepo::open(&l.path))
            .collect::<Result<Vec<_>, _>>()?;

        let store = Self {
            repo,
            linked,
            branch: config.repository.branch.clone(),
            cache_ref: config.cache.cache_ref(&config.repository.branch),
            rename_detection: config.cache.rename_detection,
            rename_threshold: config.cache.rename_threshold,
            flush_interval: Duration::from_millis(config.cache.flush_interval_ms),
            push_mode: config.push.mode.clone(),
            uuid: OnceLock::new(),
            caches: ObjectCaches::new(),
            state: RwLock::new(StoreState {
                revisions: Vec::new(),
                date_index: Vec::new(),
                commit_index: HashMap::new(),
                loaded_tip: None,
            }),
            last_change: LastChangeIndex::new(),
            update_lock: Mutex::new(()),
            push_lock: Mutex::new(()),
        };
        store.bootstrap()?;
        store.update()?;
        Ok(store)
    }

    pub fn repo(&self) -> &Arc<GitRepo> {
        &self.repo
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn cache_ref(&self) -> &str {
        &self.cache_ref
    }

    pub fn push_mode(&self) -> &PushMode {
        &self.push_mode
    }

    pub(crate) fn push_lock(&self) -> &Mutex<()> {
        &self.push_lock
    }

    pub(crate) fn caches(&self) -> &ObjectCaches {
        &self.caches
    }

    /// The stable repository id written at revision 0.
    pub fn uuid(&self) -> &str {
        self.uuid.get().map(String::as_str).unwrap_or("")
    }

    /// Repositories consulted for submodule commits: the exported
    /// repository first, then the linked ones in configuration order.
    pub(crate) fn submodule_repos(&self) -> impl Iterator<Item = &Arc<GitRepo>> {
        std::iter::once(&self.repo).chain(self.linked.iter())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The newest revision. Never fails: revision 0 always exists.
    pub fn latest(&self) -> Arc<Revision> {
        let state = self.state.read().expect("revision store poisoned");
        state
            .revisions
            .last()
            .expect("revision 0 exists after open")
            .clone()
    }

    /// Look a revision up by number.
    pub fn by_id(&self, rev: i64) -> Result<Arc<Revision>, RevisionError> {
        let state = self.state.read().expect("revision store poisoned");
        usize::try_from(rev)
            .ok()
            .and_then(|idx| state.revisions.get(idx))
            .cloned()
            .ok_or(RevisionError::NoSuchRevision(rev))
    }

    /// The largest revision whose date is `≤ time_ms`, falling back to
    /// revision 0.
    pub fn by_date(&self, time_ms: i64) -> Arc<Revision> {
        let state = self.state.read().expect("revision store poisoned");
        let idx = state.date_index.partition_point(|(t, _)| *t <= time_ms);
        let rev = if idx == 0 {
            0
        } else {
            state.date_index[idx - 1].1
        };
        state.revisions[rev as usize].clone()
    }

    /// The revision anchored to the given user commit.
    pub fn by_git_commit(&self, oid: Oid) -> Result<Arc<Revision>, RevisionError> {
        let state = self.state.read().expect("revision store poisoned");
        state
            .commit_index
            .get(&oid)
            .map(|rev| state.revisions[*rev as usize].clone())
            .ok_or_else(|| RevisionError::NoSuchCommit(oid.to_string()))
    }

    /// The largest revision `≤ before` in which `path` changed, or `None`
    /// when the path is absent there.
    pub fn last_change(&self, path: &str, before: i64) -> Option<i64> {
        self.last_change.last_change(&paths::normalize(path), before)
    }

    /// The tree view of a revision.
    pub fn tree(&self, rev: i64) -> Result<RevisionTree<'_>, RevisionError> {
        let revision = self.by_id(rev)?;
        Ok(RevisionTree::new(self, rev, revision.tree_oid()))
    }

    /// A tree view over a not-yet-committed root tree, used by commit
    /// property validation.
    pub(crate) fn tree_for(&self, rev: i64, root: Option<Oid>) -> RevisionTree<'_> {
        RevisionTree::new(self, rev, root)
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    /// Create the cache ref with the synthetic revision 0 if it is absent.
    fn bootstrap(&self) -> Result<(), RevisionError> {
        if self.repo.ref_tip(&self.cache_ref)?.is_some() {
            return Ok(());
        }
        let uuid = Uuid::new_v4().to_string();
        info!(uuid, cache_ref = %self.cache_ref, "initializing revision cache");

        let record = CacheRevision::new(0, None, BTreeMap::new(), &BTreeMap::new());
        let json = record
            .to_json()
            .map_err(|e| RevisionError::CorruptCache {
                oid: "-".into(),
                detail: e.to_string(),
            })?;

        let mut entries = BTreeMap::new();
        entries.insert(
            ENTRY_COMMIT_REF.to_string(),
            TreeEntryData {
                oid: self.repo.write_blob(b"")?,
                mode: FileMode::File,
            },
        );
        entries.insert(
            ENTRY_CHANGE_JSON.to_string(),
            TreeEntryData {
                oid: self.repo.write_blob(&json)?,
                mode: FileMode::File,
            },
        );
        entries.insert(
            ENTRY_UUID.to_string(),
            TreeEntryData {
                oid: self.repo.write_blob(uuid.as_bytes())?,
                mode: FileMode::File,
            },
        );
        let tree = self.repo.write_tree(&entries)?;
        let commit = self
            .repo
            .write_commit(CACHE_AUTHOR, CACHE_EMAIL, Some(0), "r0", tree, &[])?;
        self.repo
            .set_ref(&self.cache_ref, commit, "revision cache bootstrap")?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    /// Bring the store up to date with the exported branch and the cache
    /// ref. Safe to call concurrently; extensions are single-flight.
    #[instrument(skip(self), fields(branch = %self.branch))]
    pub fn update(&self) -> Result<(), RevisionError> {
        let _guard = self.update_lock.lock().expect("update lock poisoned");
        // Load first so a crashed extension's surviving cache commits are
        // indexed before we decide what is still unmapped.
        self.load()?;
        self.extend()?;
        self.load()
    }

    /// Write cache commits for user commits that have none yet.
    fn extend(&self) -> Result<(), RevisionError> {
        let Some(branch_tip) = self.repo.branch_tip(&self.branch)? else {
            return Ok(());
        };

        // Walk first-parent-only until we hit a mapped commit or a root.
        let mut pending: Vec<CommitData> = Vec::new();
        let mut cursor = Some(branch_tip);
        while let Some(oid) = cursor {
            let mapped = {
                let state = self.state.read().expect("revision store poisoned");
                state.commit_index.contains_key(&oid)
            };
            if mapped {
                break;
            }
            let commit = self.repo.commit_info(oid)?;
            cursor = commit.first_parent;
            pending.push(commit);
        }
        if pending.is_empty() {
            return Ok(());
        }
        pending.reverse();
        info!(count = pending.len(), "extending revision cache");

        let mut prev_cache = self
            .repo
            .ref_tip(&self.cache_ref)?
            .ok_or_else(|| GitError::RefNotFound(self.cache_ref.clone()))?;
        let mut next_id = {
            let state = self.state.read().expect("revision store poisoned");
            state.revisions.len() as i64
        };
        let mut last_flush = Instant::now();

        for commit in pending {
            let old_tree = match commit.first_parent {
                Some(parent) => Some(self.repo.commit_info(parent)?.tree),
                None => None,
            };
            let changes = diff::collect_changes(&self.repo, old_tree, Some(commit.tree))?;
            let renames = if self.rename_detection {
                diff::renames::detect_renames(
                    &self.repo,
                    old_tree,
                    commit.tree,
                    self.rename_threshold,
                )?
            } else {
                BTreeMap::new()
            };

            let record = CacheRevision::new(next_id, Some(commit.oid), renames, &changes);
            let json = record.to_json().map_err(|e| RevisionError::CorruptCache {
                oid: commit.oid.to_string(),
                detail: e.to_string(),
            })?;

            let mut entries = BTreeMap::new();
            entries.insert(
                ENTRY_COMMIT_REF.to_string(),
                TreeEntryData {
                    oid: self.repo.write_blob(format!("{}\n", commit.oid).as_bytes())?,
                    mode: FileMode::File,
                },
            );
            entries.insert(
                ENTRY_CHANGE_JSON.to_string(),
                TreeEntryData {
                    oid: self.repo.write_blob(&json)?,
                    mode: FileMode::File,
                },
            );
            let tree = self.repo.write_tree(&entries)?;
            prev_cache = self.repo.write_commit(
                CACHE_AUTHOR,
                CACHE_EMAIL,
                Some(commit.time_ms),
                &format!("r{next_id}"),
                tree,
                &[prev_cache],
            )?;
            debug!(rev = next_id, commit = %commit.oid, "cached revision");
            next_id += 1;

            if last_flush.elapsed() >= self.flush_interval {
                self.repo
                    .set_ref(&self.cache_ref, prev_cache, "revision cache flush")?;
                last_flush = Instant::now();
            }
        }
        self.repo
            .set_ref(&self.cache_ref, prev_cache, "revision cache extension")?;
        Ok(())
    }

    /// Parse cache commits newer than the loaded tip and publish them.
    fn load(&self) -> Result<(), RevisionError> {
        let tip = self
            .repo
            .ref_tip(&self.cache_ref)?
            .ok_or_else(|| GitError::RefNotFound(self.cache_ref.clone()))?;
        let loaded_tip = {
            let state = self.state.read().expect("revision store poisoned");
            state.loaded_tip
        };
        if loaded_tip == Some(tip) {
            return Ok(());
        }

        let mut chain = Vec::new();
        let mut cursor = Some(tip);
        while let Some(oid) = cursor {
            if loaded_tip == Some(oid) {
                break;
            }
            chain.push(oid);
            cursor = self.repo.commit_info(oid)?.first_parent;
        }
        chain.reverse();

        let mut parsed = Vec::with_capacity(chain.len());
        for oid in chain {
            parsed.push(self.parse_cache_commit(oid)?);
        }

        let mut state = self.state.write().expect("revision store poisoned");
        for revision in parsed {
            if revision.id != state.revisions.len() as i64 {
                return Err(RevisionError::CorruptCache {
                    oid: revision.cache_commit.to_string(),
                    detail: format!(
                        "revision {} at chain depth {}",
                        revision.id,
                        state.revisions.len()
                    ),
                });
            }
            if let Some(oid) = revision.git_commit {
                state.commit_index.insert(oid, revision.id);
            }
            let monotone = state
                .date_index
                .last()
                .map_or(true, |(t, _)| *t <= revision.time_ms);
            if monotone {
                state.date_index.push((revision.time_ms, revision.id));
            } else {
                debug!(rev = revision.id, "out-of-order commit time, date index skips it");
            }
            if revision.id == 0 {
                self.last_change.append("/", 0, false);
            }
            for (path, pair) in &revision.changes {
                self.last_change.append(path, revision.id, pair.is_delete());
            }
            state.loaded_tip = Some(revision.cache_commit);
            state.revisions.push(Arc::new(revision));
        }
        Ok(())
    }

    /// Decode one cache commit into a [`Revision`].
    fn parse_cache_commit(&self, oid: Oid) -> Result<Revision, RevisionError> {
        let corrupt = |detail: String| RevisionError::CorruptCache {
            oid: oid.to_string(),
            detail,
        };

        let cache_info = self.repo.commit_info(oid)?;
        let entries = self.repo.tree_entries(cache_info.tree)?;
        let change_entry = entries
            .get(ENTRY_CHANGE_JSON)
            .ok_or_else(|| corrupt(format!("missing {ENTRY_CHANGE_JSON}")))?;
        let record = CacheRevision::from_json(&self.repo.blob_bytes(change_entry.oid)?)
            .map_err(|e| corrupt(e.to_string()))?;
        let changes = record.decoded_changes().map_err(|e| corrupt(e))?;

        let git_commit = record
            .git_commit
            .as_deref()
            .map(Oid::from_str)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;

        let (tree, time_ms, author, log) = match git_commit {
            Some(user_oid) => {
                let user = self.repo.commit_info(user_oid)?;
                (
                    Some(user.tree),
                    user.time_ms,
                    user.author_name,
                    user.message,
                )
            }
            None => {
                // Revision 0 carries the repository id.
                if let Some(uuid_entry) = entries.get(ENTRY_UUID) {
                    let uuid = String::from_utf8_lossy(&self.repo.blob_bytes(uuid_entry.oid)?)
                        .trim()
                        .to_string();
                    let _ = self.uuid.set(uuid);
                }
                (None, 0, String::new(), String::new())
            }
        };

        Ok(Revision {
            id: record.revision,
            cache_commit: oid,
            git_commit,
            tree,
            time_ms,
            author,
            log,
            renames: record.renames,
            changes,
        })
    }
}
