//! Thread-safe access to the Git object database via `git2`.
//!
//! `git2::Repository` is not `Sync`, so [`GitRepo`] guards one open handle
//! with a mutex and copies data out of every call. All higher layers (tree
//! view, revision cache, commit builder) go through this wrapper; the lock
//! is held only for the duration of a single object read or write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::{ErrorCode, ObjectType, Oid, Repository, Signature, Time};
use tracing::{debug, info};

use crate::errors::GitError;

// ---------------------------------------------------------------------------
// File modes
// ---------------------------------------------------------------------------

/// The Git file modes this bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// `100644` — regular file.
    File,
    /// `100755` — executable file.
    Executable,
    /// `120000` — symbolic link.
    Symlink,
    /// `040000` — directory.
    Dir,
    /// `160000` — submodule (gitlink).
    Submodule,
}

impl FileMode {
    /// Decode a raw tree-entry mode.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0o100644 | 0o100664 => Some(Self::File),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            0o040000 => Some(Self::Dir),
            0o160000 => Some(Self::Submodule),
            _ => None,
        }
    }

    /// The raw mode written into tree objects.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::File => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Dir => 0o040000,
            Self::Submodule => 0o160000,
        }
    }

    /// `true` for modes presented to SVN as directories.
    pub fn is_dir(self) -> bool {
        matches!(self, Self::Dir | Self::Submodule)
    }
}

/// One tree entry: object id plus decoded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEntryData {
    pub oid: Oid,
    pub mode: FileMode,
}

/// Decoded commit header fields.
#[derive(Debug, Clone)]
pub struct CommitData {
    pub oid: Oid,
    pub tree: Oid,
    pub first_parent: Option<Oid>,
    /// Committer time in milliseconds since the epoch.
    pub time_ms: i64,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// GitRepo
// ---------------------------------------------------------------------------

/// A shared, mutex-guarded Git repository handle.
pub struct GitRepo {
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo").field("path", &self.path).finish()
    }
}

impl GitRepo {
    /// Open an existing repository (bare or non-bare) at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, GitError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Arc::new(Self {
            repo: Mutex::new(repo),
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` with the repository handle. The lock scope is one call.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&Repository) -> Result<R, GitError>,
    ) -> Result<R, GitError> {
        let repo = self.repo.lock().expect("git repository mutex poisoned");
        f(&repo)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Resolve a fully-qualified ref to its target, or `None` if absent.
    pub fn ref_tip(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        self.with(|repo| match repo.find_reference(refname) {
            Ok(r) => Ok(r.target()),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        })
    }

    /// Resolve `refs/heads/<branch>`, or `None` if the branch is unborn.
    pub fn branch_tip(&self, branch: &str) -> Result<Option<Oid>, GitError> {
        self.ref_tip(&format!("refs/heads/{branch}"))
    }

    /// Decode the header fields of a commit.
    pub fn commit_info(&self, oid: Oid) -> Result<CommitData, GitError> {
        self.with(|repo| {
            let commit = repo.find_commit(oid)?;
            let author_name = commit.author().name().unwrap_or("").to_string();
            let author_email = commit.author().email().unwrap_or("").to_string();
            let data = CommitData {
                oid,
                tree: commit.tree_id(),
                first_parent: commit.parent_id(0).ok(),
                time_ms: commit.time().seconds() * 1000,
                author_name,
                author_email,
                message: commit.message().unwrap_or("").to_string(),
            };
            Ok(data)
        })
    }

    /// `true` if the object database contains `oid` as a commit.
    pub fn contains_commit(&self, oid: Oid) -> Result<bool, GitError> {
        self.with(|repo| match repo.find_commit(oid) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
    }

    /// List a tree's entries. Entries with modes the bridge does not
    /// understand are skipped.
    pub fn tree_entries(&self, tree: Oid) -> Result<BTreeMap<String, TreeEntryData>, GitError> {
        self.with(|repo| {
            let tree = repo.find_tree(tree)?;
            let mut entries = BTreeMap::new();
            for entry in tree.iter() {
                let Some(mode) = FileMode::from_raw(entry.filemode()) else {
                    continue;
                };
                let Some(name) = entry.name() else {
                    continue;
                };
                entries.insert(
                    name.to_string(),
                    TreeEntryData {
                        oid: entry.id(),
                        mode,
                    },
                );
            }
            Ok(entries)
        })
    }

    /// Read a blob's full content.
    pub fn blob_bytes(&self, oid: Oid) -> Result<Vec<u8>, GitError> {
        self.with(|repo| {
            let blob = repo.find_blob(oid)?;
            Ok(blob.content().to_vec())
        })
    }

    /// A blob's size without materializing its content.
    pub fn blob_size(&self, oid: Oid) -> Result<u64, GitError> {
        self.with(|repo| {
            let (size, kind) = repo.odb()?.read_header(oid)?;
            if kind != ObjectType::Blob {
                return Err(GitError::MalformedObject {
                    oid: oid.to_string(),
                    detail: format!("expected blob, found {kind}"),
                });
            }
            Ok(size as u64)
        })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert a blob into the object database.
    pub fn write_blob(&self, data: &[u8]) -> Result<Oid, GitError> {
        self.with(|repo| Ok(repo.blob(data)?))
    }

    /// Serialize a tree from an entry map.
    pub fn write_tree(&self, entries: &BTreeMap<String, TreeEntryData>) -> Result<Oid, GitError> {
        self.with(|repo| {
            let mut builder = repo.treebuilder(None)?;
            for (name, entry) in entries {
                builder.insert(name, entry.oid, entry.mode.to_raw())?;
            }
            Ok(builder.write()?)
        })
    }

    /// Create a commit object without touching any ref.
    ///
    /// When `time` is given it pins both author and committer timestamps;
    /// otherwise the current time is used.
    pub fn write_commit(
        &self,
        name: &str,
        email: &str,
        time: Option<i64>,
        message: &str,
        tree: Oid,
        parents: &[Oid],
    ) -> Result<Oid, GitError> {
        self.with(|repo| {
            let sig = match time {
                Some(ms) => Signature::new(name, email, &Time::new(ms / 1000, 0))?,
                None => Signature::now(name, email)?,
            };
            let tree = repo.find_tree(tree)?;
            let parent_commits = parents
                .iter()
                .map(|oid| repo.find_commit(*oid))
                .collect::<Result<Vec<_>, _>>()?;
            let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
            let oid = repo.commit(None, &sig, &sig, message, &tree, &parent_refs)?;
            debug!(sha = %oid, "created commit object");
            Ok(oid)
        })
    }

    /// Force-set a ref to `oid`, creating it if absent.
    pub fn set_ref(&self, refname: &str, oid: Oid, log_message: &str) -> Result<(), GitError> {
        self.with(|repo| {
            repo.reference(refname, oid, true, log_message)?;
            Ok(())
        })
    }

    /// Compare-and-swap a ref.
    ///
    /// With `expected = Some(old)`, the ref must currently point at `old`;
    /// with `expected = None`, the ref must not exist. Returns `false` when
    /// the precondition no longer holds (somebody else advanced the ref).
    pub fn cas_ref(
        &self,
        refname: &str,
        oid: Oid,
        expected: Option<Oid>,
        log_message: &str,
    ) -> Result<bool, GitError> {
        self.with(|repo| {
            let result = match expected {
                Some(old) => repo
                    .reference_matching(refname, oid, true, old, log_message)
                    .map(|_| ()),
                None => repo.reference(refname, oid, false, log_message).map(|_| ()),
            };
            match result {
                Ok(()) => Ok(true),
                Err(e) if matches!(e.code(), ErrorCode::Modified | ErrorCode::Exists) => {
                    debug!(refname, "ref update rejected: ref has moved");
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo() -> (tempfile::TempDir, Arc<GitRepo>) {
        let dir = tempfile::tempdir().unwrap();
        Repository::init_bare(dir.path()).unwrap();
        let repo = GitRepo::open(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_open_missing() {
        assert!(matches!(
            GitRepo::open("/nonexistent"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_blob_tree_commit_roundtrip() {
        let (_dir, repo) = init_repo();

        let blob = repo.write_blob(b"hello").unwrap();
        assert_eq!(repo.blob_bytes(blob).unwrap(), b"hello");
        assert_eq!(repo.blob_size(blob).unwrap(), 5);

        let mut entries = BTreeMap::new();
        entries.insert(
            "hello.txt".to_string(),
            TreeEntryData {
                oid: blob,
                mode: FileMode::File,
            },
        );
        let tree = repo.write_tree(&entries).unwrap();
        let read_back = repo.tree_entries(tree).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back["hello.txt"].oid, blob);
        assert_eq!(read_back["hello.txt"].mode, FileMode::File);

        let commit = repo
            .write_commit("Test", "test@test.com", Some(1_000_000), "init", tree, &[])
            .unwrap();
        let info = repo.commit_info(commit).unwrap();
        assert_eq!(info.tree, tree);
        assert_eq!(info.first_parent, None);
        assert_eq!(info.time_ms, 1_000_000);
        assert!(repo.contains_commit(commit).unwrap());
    }

    #[test]
    fn test_cas_ref() {
        let (_dir, repo) = init_repo();
        let tree = repo.write_tree(&BTreeMap::new()).unwrap();
        let c1 = repo
            .write_commit("T", "t@t", Some(0), "c1", tree, &[])
            .unwrap();
        let c2 = repo
            .write_commit("T", "t@t", Some(1000), "c2", tree, &[c1])
            .unwrap();

        // Create-if-absent succeeds once, then is rejected.
        assert!(repo.cas_ref("refs/heads/b", c1, None, "create").unwrap());
        assert!(!repo.cas_ref("refs/heads/b", c2, None, "create").unwrap());

        // CAS with the right expectation advances; with a stale one it fails.
        assert!(repo.cas_ref("refs/heads/b", c2, Some(c1), "ff").unwrap());
        assert!(!repo.cas_ref("refs/heads/b", c1, Some(c1), "ff").unwrap());
        assert_eq!(repo.branch_tip("b").unwrap(), Some(c2));
    }

    #[test]
    fn test_mode_decode() {
        assert_eq!(FileMode::from_raw(0o100644), Some(FileMode::File));
        assert_eq!(FileMode::from_raw(0o100755), Some(FileMode::Executable));
        assert_eq!(FileMode::from_raw(0o120000), Some(FileMode::Symlink));
        assert_eq!(FileMode::from_raw(0o040000), Some(FileMode::Dir));
        assert_eq!(FileMode::from_raw(0o160000), Some(FileMode::Submodule));
        assert_eq!(FileMode::from_raw(0), None);
        assert!(FileMode::Submodule.is_dir());
    }
}
