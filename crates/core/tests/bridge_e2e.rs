//! End-to-end tests for the Git-backed SVN bridge.
//!
//! These tests exercise the real `RevisionStore`, tree view, lock manager,
//! and commit builder against bare Git repositories created on disk with
//! `tempfile`. No network I/O and no external binaries are involved.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::Arc;

use git2::Oid;
use tempfile::TempDir;

use gitsvnbridge_core::commit::CommitBuilder;
use gitsvnbridge_core::config::{BridgeConfig, LinkedRepositoryConfig};
use gitsvnbridge_core::errors::{CommitError, LockError, SvnErrorCode};
use gitsvnbridge_core::git::{FileMode, GitRepo, TreeEntryData};
use gitsvnbridge_core::locks::{LockManager, LockTarget};
use gitsvnbridge_core::models::User;
use gitsvnbridge_core::props::PropertyMap;
use gitsvnbridge_core::revcache::RevisionStore;
use gitsvnbridge_core::tree::NodeKind;

// ===========================================================================
// Helpers
// ===========================================================================

fn init_repo() -> (TempDir, Arc<GitRepo>) {
    let dir = tempfile::tempdir().unwrap();
    git2::Repository::init_bare(dir.path()).unwrap();
    let repo = GitRepo::open(dir.path()).unwrap();
    (dir, repo)
}

fn alice() -> User {
    User::new("alice", "Alice", Some("alice@example.com"))
}

/// Build a (possibly nested) tree from `(path, content)` pairs.
fn tree_from(repo: &GitRepo, files: &[(&str, &str)]) -> Oid {
    #[derive(Default)]
    struct DirNode {
        files: BTreeMap<String, Oid>,
        dirs: BTreeMap<String, DirNode>,
    }

    fn insert(node: &mut DirNode, path: &str, blob: Oid) {
        match path.split_once('/') {
            Some((dir, rest)) => insert(node.dirs.entry(dir.to_string()).or_default(), rest, blob),
            None => {
                node.files.insert(path.to_string(), blob);
            }
        }
    }

    fn write(repo: &GitRepo, node: &DirNode) -> Oid {
        let mut entries = BTreeMap::new();
        for (name, blob) in &node.files {
            entries.insert(
                name.clone(),
                TreeEntryData {
                    oid: *blob,
                    mode: FileMode::File,
                },
            );
        }
        for (name, child) in &node.dirs {
            entries.insert(
                name.clone(),
                TreeEntryData {
                    oid: write(repo, child),
                    mode: FileMode::Dir,
                },
            );
        }
        repo.write_tree(&entries).unwrap()
    }

    let mut root = DirNode::default();
    for (path, content) in files {
        let blob = repo.write_blob(content.as_bytes()).unwrap();
        insert(&mut root, path, blob);
    }
    write(repo, &root)
}

/// Commit `files` as the new state of `branch` and return the commit oid.
fn commit_files(repo: &GitRepo, branch: &str, files: &[(&str, &str)], time_secs: i64) -> Oid {
    let tree = tree_from(repo, files);
    let parent = repo.branch_tip(branch).unwrap();
    let parents: Vec<Oid> = parent.into_iter().collect();
    let commit = repo
        .write_commit(
            "Alice",
            "alice@example.com",
            Some(time_secs * 1000),
            &format!("commit at {time_secs}"),
            tree,
            &parents,
        )
        .unwrap();
    repo.set_ref(&format!("refs/heads/{branch}"), commit, "test commit")
        .unwrap();
    commit
}

fn open_store(dir: &TempDir) -> RevisionStore {
    RevisionStore::open(&BridgeConfig::for_repository(dir.path(), "master")).unwrap()
}

// ===========================================================================
// Revision mapping
// ===========================================================================

#[test]
fn test_revision_sequence_matches_commits() {
    let (dir, repo) = init_repo();
    let c1 = commit_files(&repo, "master", &[("a.txt", "a1")], 100);
    let c2 = commit_files(&repo, "master", &[("a.txt", "a2")], 200);
    let c3 = commit_files(&repo, "master", &[("a.txt", "a2"), ("b.txt", "b1")], 300);

    let store = open_store(&dir);
    assert_eq!(store.latest().id(), 3);
    assert_eq!(store.by_id(0).unwrap().git_commit(), None);
    for (rev, commit) in [(1, c1), (2, c2), (3, c3)] {
        assert_eq!(store.by_id(rev).unwrap().git_commit(), Some(commit));
        assert_eq!(store.by_git_commit(commit).unwrap().id(), rev);
    }
    assert!(store.by_id(4).is_err());
    assert!(store.by_id(-1).is_err());
    assert_eq!(
        store.by_id(99).unwrap_err().svn_code(),
        SvnErrorCode::FsNoSuchRevision
    );

    // Incremental extension after the store is already open.
    let c4 = commit_files(&repo, "master", &[("a.txt", "a4")], 400);
    store.update().unwrap();
    assert_eq!(store.latest().id(), 4);
    assert_eq!(store.by_id(4).unwrap().git_commit(), Some(c4));
}

#[test]
fn test_by_date_is_monotone() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a1")], 1_000);
    // Out-of-order committer time: appended to the sequence but invisible
    // to date lookups.
    commit_files(&repo, "master", &[("a.txt", "a2")], 500);
    commit_files(&repo, "master", &[("a.txt", "a3")], 2_000);

    let store = open_store(&dir);
    assert_eq!(store.latest().id(), 3);
    assert_eq!(store.by_date(0).id(), 0);
    assert_eq!(store.by_date(1_000 * 1000).id(), 1);
    // r2's timestamp is older than r1's; byDate must never return a later
    // revision than requested, so the window still resolves to r1.
    assert_eq!(store.by_date(1_500 * 1000).id(), 1);
    assert_eq!(store.by_date(2_000 * 1000).id(), 3);
    assert_eq!(store.by_date(i64::MAX).id(), 3);
}

#[test]
fn test_last_change_and_deletion() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a1"), ("b.txt", "b")], 100);
    commit_files(&repo, "master", &[("a.txt", "a2"), ("b.txt", "b")], 200);
    commit_files(&repo, "master", &[("b.txt", "b")], 300); // deletes a.txt

    let store = open_store(&dir);
    assert_eq!(store.last_change("/a.txt", 1), Some(1));
    assert_eq!(store.last_change("/a.txt", 2), Some(2));
    assert_eq!(store.last_change("/a.txt", 3), None);
    assert_eq!(store.last_change("/b.txt", 3), Some(1));
    assert_eq!(store.last_change("/nope", 3), None);
    assert_eq!(store.last_change("/", 3), Some(0));

    // Monotone in the revision bound while the path exists.
    let lc1 = store.last_change("/a.txt", 1).unwrap();
    let lc2 = store.last_change("/a.txt", 2).unwrap();
    assert!(lc2 >= lc1);
}

#[test]
fn test_cache_survives_reopen() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a1")], 100);
    let store = open_store(&dir);
    let uuid = store.uuid().to_string();
    assert!(!uuid.is_empty());
    drop(store);

    commit_files(&repo, "master", &[("a.txt", "a2")], 200);
    let store = open_store(&dir);
    assert_eq!(store.uuid(), uuid);
    assert_eq!(store.latest().id(), 2);
    assert_eq!(store.by_id(1).unwrap().author(), "Alice");
    assert_eq!(store.by_id(2).unwrap().log(), "commit at 200");
}

#[test]
fn test_rename_detection_feeds_copy_from() {
    let (dir, repo) = init_repo();
    let body = "enough content to register as the same file\nline two\nline three\n";
    commit_files(&repo, "master", &[("old.txt", body)], 100);
    commit_files(&repo, "master", &[("renamed.txt", body)], 200);

    let store = open_store(&dir);
    let rev = store.by_id(2).unwrap();
    assert_eq!(rev.renames().get("/renamed.txt").unwrap(), "/old.txt");
    assert_eq!(rev.copy_from("/renamed.txt"), Some((1, "/old.txt")));
    assert_eq!(rev.copy_from("/other"), None);
}

// ===========================================================================
// Tree view
// ===========================================================================

#[test]
fn test_node_kinds_content_and_checksums() {
    let (dir, repo) = init_repo();
    // One regular file, one executable, one symlink.
    let blob = repo.write_blob(b"#!/bin/sh\n").unwrap();
    let target = repo.write_blob(b"a.txt").unwrap();
    let plain = repo.write_blob(b"hello\n").unwrap();
    let mut entries = BTreeMap::new();
    entries.insert(
        "a.txt".to_string(),
        TreeEntryData {
            oid: plain,
            mode: FileMode::File,
        },
    );
    entries.insert(
        "run.sh".to_string(),
        TreeEntryData {
            oid: blob,
            mode: FileMode::Executable,
        },
    );
    entries.insert(
        "link".to_string(),
        TreeEntryData {
            oid: target,
            mode: FileMode::Symlink,
        },
    );
    let tree = repo.write_tree(&entries).unwrap();
    let commit = repo
        .write_commit("A", "a@a", Some(100_000), "init", tree, &[])
        .unwrap();
    repo.set_ref("refs/heads/master", commit, "init").unwrap();

    let store = open_store(&dir);
    let view = store.tree(1).unwrap();

    let root = view.node_at("/").unwrap().unwrap();
    assert_eq!(root.kind(), NodeKind::Dir);
    assert_eq!(root.entries().unwrap().len(), 3);

    let file = view.node_at("/a.txt").unwrap().unwrap();
    assert_eq!(file.kind(), NodeKind::File);
    assert_eq!(file.size().unwrap(), 6);
    let mut content = String::new();
    file.open().unwrap().unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "hello\n");
    assert!(file.md5().unwrap().is_some());

    let exe = view.node_at("/run.sh").unwrap().unwrap();
    let props = exe.properties(false).unwrap();
    assert_eq!(props.get("svn:executable").map(String::as_str), Some("*"));

    let link = view.node_at("/link").unwrap().unwrap();
    assert_eq!(link.kind(), NodeKind::Symlink);
    assert_eq!(link.size().unwrap(), 5 + 5); // "link " + "a.txt"
    let mut content = Vec::new();
    link.open().unwrap().unwrap().read_to_end(&mut content).unwrap();
    assert_eq!(content, b"link a.txt");
    let props = link.properties(false).unwrap();
    assert_eq!(props.get("svn:special").map(String::as_str), Some("*"));

    assert!(view.node_at("/missing").unwrap().is_none());
}

#[test]
fn test_properties_derive_from_config_files() {
    let (dir, repo) = init_repo();
    commit_files(
        &repo,
        "master",
        &[
            (".gitignore", "*.log\n/build\n"),
            (".gitattributes", "*.txt text\n*.bin binary\n"),
            ("src/a.txt", "text file"),
            ("src/data.bin", "\u{1}\u{2}"),
            ("src/.gitignore", "*.tmp\n"),
        ],
        100,
    );

    let store = open_store(&dir);
    let view = store.tree(1).unwrap();

    let root = view.node_at("/").unwrap().unwrap();
    let props = root.properties(false).unwrap();
    assert_eq!(props["svn:ignore"], "build\n*.log\n");

    // Unanchored root patterns inherit into subdirectories; local ones do
    // not. The subdirectory's own .gitignore appends.
    let src = view.node_at("/src").unwrap().unwrap();
    let props = src.properties(false).unwrap();
    assert_eq!(props["svn:ignore"], "*.log\n*.tmp\n");

    let txt = view.node_at("/src/a.txt").unwrap().unwrap();
    let props = txt.properties(false).unwrap();
    assert_eq!(props["svn:eol-style"], "native");
    assert!(!props.contains_key("svn:mime-type"));

    let bin = view.node_at("/src/data.bin").unwrap().unwrap();
    let props = bin.properties(false).unwrap();
    assert_eq!(props["svn:mime-type"], "application/octet-stream");
}

#[test]
fn test_entry_properties() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a1")], 100);
    commit_files(&repo, "master", &[("a.txt", "a1"), ("b.txt", "b1")], 200);

    let store = open_store(&dir);
    let view = store.tree(2).unwrap();
    let node = view.node_at("/a.txt").unwrap().unwrap();
    let props = node.properties(true).unwrap();
    assert_eq!(props["svn:entry:uuid"], store.uuid());
    assert_eq!(props["svn:entry:committed-rev"], "1");
    assert_eq!(props["svn:entry:last-author"], "Alice");
    assert_eq!(props["svn:entry:committed-date"], "1970-01-01T00:01:40.000000Z");
}

#[test]
fn test_submodule_resolves_through_linked_repo() {
    let (lib_dir, lib_repo) = init_repo();
    let lib_commit = commit_files(&lib_repo, "master", &[("lib.rs", "pub fn f() {}")], 50);

    let (dir, repo) = init_repo();
    let readme = repo.write_blob(b"top").unwrap();
    let mut entries = BTreeMap::new();
    entries.insert(
        "README".to_string(),
        TreeEntryData {
            oid: readme,
            mode: FileMode::File,
        },
    );
    entries.insert(
        "vendor".to_string(),
        TreeEntryData {
            oid: lib_commit,
            mode: FileMode::Submodule,
        },
    );
    let tree = repo.write_tree(&entries).unwrap();
    let commit = repo
        .write_commit("A", "a@a", Some(100_000), "init", tree, &[])
        .unwrap();
    repo.set_ref("refs/heads/master", commit, "init").unwrap();

    let mut config = BridgeConfig::for_repository(dir.path(), "master");
    config.linked.push(LinkedRepositoryConfig {
        path: lib_dir.path().to_path_buf(),
    });
    let store = RevisionStore::open(&config).unwrap();
    let view = store.tree(1).unwrap();

    let vendor = view.node_at("/vendor").unwrap().unwrap();
    assert_eq!(vendor.kind(), NodeKind::Dir);
    assert!(vendor.entries().unwrap().contains_key("lib.rs"));

    let inner = view.node_at("/vendor/lib.rs").unwrap().unwrap();
    let mut content = String::new();
    inner.open().unwrap().unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "pub fn f() {}");
}

// ===========================================================================
// Locks
// ===========================================================================

#[test]
fn test_lock_nonexistent_path_is_out_of_date() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();

    let results = locks
        .lock(&store, &[LockTarget::new("/b.txt", 1)], None, false, &alice())
        .unwrap();
    let err = results[0].1.as_ref().unwrap_err();
    assert_eq!(err.svn_code(), SvnErrorCode::FsOutOfDate);
}

#[test]
fn test_lock_stale_revision_is_out_of_date() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    commit_files(&repo, "master", &[("a.txt", "x")], 200);
    let store = open_store(&dir);
    let locks = LockManager::new();

    let results = locks
        .lock(&store, &[LockTarget::new("/a.txt", 1)], None, false, &alice())
        .unwrap();
    assert_eq!(
        results[0].1.as_ref().unwrap_err().svn_code(),
        SvnErrorCode::FsOutOfDate
    );

    // With the current revision the lock succeeds.
    let results = locks
        .lock(&store, &[LockTarget::new("/a.txt", 2)], None, false, &alice())
        .unwrap();
    assert!(results[0].1.is_ok());
}

#[test]
fn test_lock_directory_is_not_file() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("d/a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();

    let results = locks
        .lock(&store, &[LockTarget::new("/d", 1)], None, false, &alice())
        .unwrap();
    assert_eq!(
        results[0].1.as_ref().unwrap_err().svn_code(),
        SvnErrorCode::FsNotFile
    );
}

#[test]
fn test_force_lock_steals_with_new_token() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();
    let target = [LockTarget::new("/a.txt", 1)];

    let t1 = locks.lock(&store, &target, None, false, &alice()).unwrap()[0]
        .1
        .as_ref()
        .unwrap()
        .token
        .clone();

    // Second plain lock fails.
    let results = locks.lock(&store, &target, None, false, &alice()).unwrap();
    assert!(matches!(
        results[0].1.as_ref().unwrap_err(),
        LockError::AlreadyLocked { .. }
    ));

    // Force lock issues a different token and replaces the old one.
    let t2 = locks.lock(&store, &target, None, true, &alice()).unwrap()[0]
        .1
        .as_ref()
        .unwrap()
        .token
        .clone();
    assert_ne!(t1, t2);
    assert_eq!(locks.get_lock("/a.txt").unwrap().token, t2);
}

#[test]
fn test_unlock_exclusivity_and_break() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();

    let token = locks
        .lock(&store, &[LockTarget::new("/a.txt", 1)], None, false, &alice())
        .unwrap()[0]
        .1
        .as_ref()
        .unwrap()
        .token
        .clone();

    // Wrong token fails; right token succeeds; second unlock finds nothing.
    let bad = locks.unlock(&[("/a.txt".into(), Some("bogus".into()))], false, &alice());
    assert!(matches!(bad[0].1, Err(LockError::NoSuchLock { .. })));
    let ok = locks.unlock(&[("/a.txt".into(), Some(token.clone()))], false, &alice());
    assert!(ok[0].1.is_ok());
    let again = locks.unlock(&[("/a.txt".into(), Some(token))], false, &alice());
    assert!(matches!(again[0].1, Err(LockError::NoSuchLock { .. })));

    // Break-unlock needs no token.
    locks
        .lock(&store, &[LockTarget::new("/a.txt", 1)], None, false, &alice())
        .unwrap();
    let broken = locks.unlock(&[("/a.txt".into(), None)], true, &alice());
    assert!(broken[0].1.is_ok());
    assert!(locks.get_lock("/a.txt").is_none());
}

#[test]
fn test_get_locks_by_prefix() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("d/a.txt", "a"), ("d/b.txt", "b"), ("c.txt", "c")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();
    locks
        .lock(
            &store,
            &[
                LockTarget::new("/d/a.txt", 1),
                LockTarget::new("/d/b.txt", 1),
                LockTarget::new("/c.txt", 1),
            ],
            Some("batch"),
            false,
            &alice(),
        )
        .unwrap();

    assert_eq!(locks.get_locks("/d").len(), 2);
    assert_eq!(locks.get_locks("/").len(), 3);
    assert_eq!(locks.get_locks("/c.txt").len(), 1);
}

// ===========================================================================
// Commit builder
// ===========================================================================

#[test]
fn test_commit_creates_next_revision() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();

    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    builder
        .save_file("b.txt", Some(b"new file"), PropertyMap::new(), false)
        .unwrap();
    let rev = builder.commit(&alice(), "add b.txt").unwrap().unwrap();

    assert_eq!(rev.id(), 2);
    assert_eq!(store.latest().id(), 2);
    assert_eq!(rev.author(), "Alice");
    assert_eq!(rev.log(), "add b.txt");
    assert_eq!(rev.changes()["/b.txt"].action(), "A");

    // Round-trip: the new revision's tree serves the committed content.
    let view = store.tree(2).unwrap();
    let node = view.node_at("/b.txt").unwrap().unwrap();
    let mut content = String::new();
    node.open().unwrap().unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "new file");
    assert_eq!(node.properties(false).unwrap(), PropertyMap::new());
}

#[test]
fn test_check_up_to_date() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    commit_files(&repo, "master", &[("a.txt", "x")], 200);
    let store = open_store(&dir);
    let locks = LockManager::new();
    let builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();

    assert!(builder.check_up_to_date("/a.txt", 2).is_ok());
    assert!(matches!(
        builder.check_up_to_date("/a.txt", 1),
        Err(CommitError::NotUpToDate { .. })
    ));
    assert!(matches!(
        builder.check_up_to_date("/missing.txt", 2),
        Err(CommitError::EntryNotFound { .. })
    ));
}

#[test]
fn test_save_file_modify_and_add_preconditions() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();

    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    // Adding over an existing entry is stale.
    assert!(matches!(
        builder.save_file("a.txt", Some(b"x"), PropertyMap::new(), false),
        Err(CommitError::NotUpToDate { .. })
    ));
    // Modifying a missing entry is stale.
    assert!(matches!(
        builder.save_file("b.txt", Some(b"x"), PropertyMap::new(), true),
        Err(CommitError::NotUpToDate { .. })
    ));
}

#[test]
fn test_commit_with_kept_and_consumed_locks() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();
    let user = alice();

    let token = locks
        .lock(&store, &[LockTarget::new("/a.txt", 1)], None, false, &user)
        .unwrap()[0]
        .1
        .as_ref()
        .unwrap()
        .token
        .clone();

    // Without the token the commit is refused.
    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    builder
        .save_file("a.txt", Some(b"v2"), PropertyMap::new(), true)
        .unwrap();
    let err = builder.commit(&user, "update").unwrap_err();
    assert!(matches!(err, CommitError::Lock(LockError::BadToken { .. })));

    // keep_locks = true leaves the lock in place.
    let tokens: HashMap<String, String> = [("/a.txt".to_string(), token.clone())].into();
    let mut builder = CommitBuilder::new(&store, &locks, tokens.clone(), true).unwrap();
    builder
        .save_file("a.txt", Some(b"v2"), PropertyMap::new(), true)
        .unwrap();
    builder.commit(&user, "update").unwrap().unwrap();
    assert_eq!(locks.get_lock("/a.txt").unwrap().token, token);

    // keep_locks = false consumes it.
    let mut builder = CommitBuilder::new(&store, &locks, tokens, false).unwrap();
    builder
        .save_file("a.txt", Some(b"v3"), PropertyMap::new(), true)
        .unwrap();
    builder.commit(&user, "update again").unwrap().unwrap();
    assert!(locks.get_lock("/a.txt").is_none());
}

#[test]
fn test_delete_of_directory_requires_descendant_tokens() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("d/a.txt", "a"), ("keep.txt", "k")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();
    let user = alice();

    let token = locks
        .lock(&store, &[LockTarget::new("/d/a.txt", 1)], None, false, &user)
        .unwrap()[0]
        .1
        .as_ref()
        .unwrap()
        .token
        .clone();

    // Deleting /d sweeps the locked /d/a.txt: refused without its token.
    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    builder.delete("d").unwrap();
    let err = builder.commit(&user, "rm dir").unwrap_err();
    assert!(matches!(err, CommitError::Lock(LockError::BadToken { .. })));

    // With the descendant's token the same commit lands.
    let tokens: HashMap<String, String> = [("/d/a.txt".to_string(), token)].into();
    let mut builder = CommitBuilder::new(&store, &locks, tokens, false).unwrap();
    builder.delete("d").unwrap();
    let rev = builder.commit(&user, "rm dir").unwrap().unwrap();
    assert_eq!(rev.id(), 2);
    assert!(store.tree(2).unwrap().node_at("/d").unwrap().is_none());
    assert!(store.last_change("/d/a.txt", 2).is_none());
}

#[test]
fn test_property_mismatch_is_rejected() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("d/.gitignore", "*.log\n"), ("d/a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();
    let user = alice();

    // The client claims /d has no properties, but .gitignore derives
    // svn:ignore.
    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    builder.open_dir("d").unwrap();
    builder.check_dir_properties(PropertyMap::new());
    builder
        .save_file("a.txt", Some(b"edited"), PropertyMap::new(), true)
        .unwrap();
    builder.close_dir().unwrap();
    let err = builder.commit(&user, "bad props").unwrap_err();
    let CommitError::PropertyMismatch(message) = &err else {
        panic!("expected property mismatch, got {err:?}");
    };
    assert!(message.contains("svn:ignore"));
    assert!(message.contains(".gitignore"));
    assert_eq!(err.svn_code(), Some(SvnErrorCode::ReposHookFailure));

    // The matching property map passes validation and commits.
    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    builder.open_dir("d").unwrap();
    let expected: PropertyMap = [("svn:ignore".to_string(), "*.log\n".to_string())].into();
    builder.check_dir_properties(expected.clone());
    builder
        .save_file("a.txt", Some(b"edited"), PropertyMap::new(), true)
        .unwrap();
    builder.close_dir().unwrap();
    let rev = builder.commit(&user, "good props").unwrap().unwrap();

    // Round-trip: the committed tree derives exactly what was checked.
    let view = store.tree(rev.id()).unwrap();
    let node = view.node_at("/d").unwrap().unwrap();
    assert_eq!(node.properties(false).unwrap(), expected);
}

#[test]
fn test_concurrent_commit_is_rejected_not_failed() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();
    let user = alice();

    // Two edits race from the same base; the second push must return None.
    let mut first = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    first
        .save_file("b.txt", Some(b"b"), PropertyMap::new(), false)
        .unwrap();
    let mut second = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    second
        .save_file("c.txt", Some(b"c"), PropertyMap::new(), false)
        .unwrap();

    assert!(first.commit(&user, "first").unwrap().is_some());
    assert!(second.commit(&user, "second").unwrap().is_none());

    // After restarting from the new latest the edit lands.
    let mut retry = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    retry
        .save_file("c.txt", Some(b"c"), PropertyMap::new(), false)
        .unwrap();
    assert_eq!(retry.commit(&user, "second retry").unwrap().unwrap().id(), 3);
}

#[test]
fn test_add_dir_with_copy_source() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("d/a.txt", "a"), ("d/b.txt", "b")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();
    let user = alice();

    // Seed the copy from /d's current git tree.
    let source_tree = store.by_id(1).unwrap().changes()["/d"].new.unwrap().oid;

    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    builder.add_dir("copied", Some(source_tree)).unwrap();
    builder.close_dir().unwrap();
    let rev = builder.commit(&user, "copy dir").unwrap().unwrap();

    let view = store.tree(rev.id()).unwrap();
    let node = view.node_at("/copied/b.txt").unwrap().unwrap();
    let mut content = String::new();
    node.open().unwrap().unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "b");

    // Adding it again collides.
    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    let err = builder.add_dir("copied", None).unwrap_err();
    assert!(matches!(err, CommitError::AlreadyExists { .. }));
}

#[test]
fn test_commit_symlink_and_executable() {
    let (dir, repo) = init_repo();
    commit_files(&repo, "master", &[("a.txt", "a")], 100);
    let store = open_store(&dir);
    let locks = LockManager::new();
    let user = alice();

    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    let link_props: PropertyMap = [("svn:special".to_string(), "*".to_string())].into();
    builder
        .save_file("link", Some(b"link a.txt"), link_props.clone(), false)
        .unwrap();
    let exe_props: PropertyMap = [("svn:executable".to_string(), "*".to_string())].into();
    builder
        .save_file("run.sh", Some(b"#!/bin/sh\n"), exe_props.clone(), false)
        .unwrap();
    let rev = builder.commit(&user, "special files").unwrap().unwrap();

    let view = store.tree(rev.id()).unwrap();
    let link = view.node_at("/link").unwrap().unwrap();
    assert_eq!(link.kind(), NodeKind::Symlink);
    assert_eq!(link.properties(false).unwrap(), link_props);
    // The stored blob is the bare target; the view re-adds the prefix.
    let mut content = Vec::new();
    link.open().unwrap().unwrap().read_to_end(&mut content).unwrap();
    assert_eq!(content, b"link a.txt");

    let exe = view.node_at("/run.sh").unwrap().unwrap();
    assert_eq!(exe.properties(false).unwrap(), exe_props);
}

#[test]
fn test_first_commit_onto_unborn_branch() {
    let (dir, _repo) = init_repo();
    let store = open_store(&dir);
    assert_eq!(store.latest().id(), 0);

    let locks = LockManager::new();
    let mut builder = CommitBuilder::new(&store, &locks, HashMap::new(), false).unwrap();
    builder
        .save_file("first.txt", Some(b"hello"), PropertyMap::new(), false)
        .unwrap();
    let rev = builder.commit(&alice(), "first ever").unwrap().unwrap();
    assert_eq!(rev.id(), 1);
    assert!(store
        .tree(1)
        .unwrap()
        .node_at("/first.txt")
        .unwrap()
        .is_some());
}
