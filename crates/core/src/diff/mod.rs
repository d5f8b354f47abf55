//! Recursive change collection between two trees.
//!
//! Produces an ordered map `path → (old entry?, new entry?)`. Added and
//! deleted directories expand through their whole subtree. A directory that
//! merely contains changed children is not emitted itself, with one
//! exception: when a property-bearing config file among its immediate
//! children changed, the directory's derived SVN properties changed too, so
//! the directory is emitted as modified.

pub mod renames;

use std::collections::BTreeMap;

use git2::Oid;

use crate::errors::GitError;
use crate::git::{FileMode, GitRepo, TreeEntryData};
use crate::paths;
use crate::props::factories;

/// One changed path: the entry before and after. `None` on either side
/// means the path was absent on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangePair {
    pub old: Option<TreeEntryData>,
    pub new: Option<TreeEntryData>,
}

impl ChangePair {
    /// `true` when the path does not exist after this change.
    pub fn is_delete(&self) -> bool {
        self.new.is_none()
    }

    /// Short action label for log listings.
    pub fn action(&self) -> &'static str {
        match (self.old, self.new) {
            (None, Some(_)) => "A",
            (Some(_), None) => "D",
            _ => "M",
        }
    }
}

/// Collect the change set between two root trees (`None` = empty tree).
pub fn collect_changes(
    repo: &GitRepo,
    old_tree: Option<Oid>,
    new_tree: Option<Oid>,
) -> Result<BTreeMap<String, ChangePair>, GitError> {
    let mut changes = BTreeMap::new();
    let dir_changed = diff_dir(repo, "/", old_tree, new_tree, &mut changes)?;
    if dir_changed {
        changes.insert(
            "/".to_string(),
            ChangePair {
                old: old_tree.map(|oid| TreeEntryData {
                    oid,
                    mode: FileMode::Dir,
                }),
                new: new_tree.map(|oid| TreeEntryData {
                    oid,
                    mode: FileMode::Dir,
                }),
            },
        );
    }
    Ok(changes)
}

/// Diff one directory level. Returns `true` when the directory's own
/// derived properties changed (a config file among its children changed).
fn diff_dir(
    repo: &GitRepo,
    dir: &str,
    old_tree: Option<Oid>,
    new_tree: Option<Oid>,
    out: &mut BTreeMap<String, ChangePair>,
) -> Result<bool, GitError> {
    let old_entries = match old_tree {
        Some(oid) => repo.tree_entries(oid)?,
        None => BTreeMap::new(),
    };
    let new_entries = match new_tree {
        Some(oid) => repo.tree_entries(oid)?,
        None => BTreeMap::new(),
    };

    let mut prop_change = false;
    let names: std::collections::BTreeSet<&String> =
        old_entries.keys().chain(new_entries.keys()).collect();

    for name in names {
        let old = old_entries.get(name).copied();
        let new = new_entries.get(name).copied();
        if old == new {
            continue;
        }
        let path = paths::join(dir, name);

        match (old, new) {
            (Some(o), Some(n)) if o.mode == FileMode::Dir && n.mode == FileMode::Dir => {
                let sub_prop_change = diff_dir(repo, &path, Some(o.oid), Some(n.oid), out)?;
                if sub_prop_change {
                    out.insert(path, ChangePair { old, new });
                }
            }
            (Some(o), Some(n)) if !o.mode.is_dir() && !n.mode.is_dir() => {
                out.insert(path, ChangePair { old, new });
            }
            (Some(o), Some(n)) if o.mode == FileMode::Submodule && n.mode == FileMode::Submodule => {
                out.insert(path, ChangePair { old, new });
            }
            (old, new) => {
                // Kind change or one-sided add/delete: expand each side.
                if let Some(o) = old {
                    emit_side(repo, &path, o, false, out)?;
                }
                if let Some(n) = new {
                    emit_side(repo, &path, n, true, out)?;
                }
            }
        }

        if factories::is_config_file(name) && changed_config_file(old, new) {
            prop_change = true;
        }
    }
    Ok(prop_change)
}

/// `true` if a registered config-file entry was added, removed, or had its
/// blob content change.
fn changed_config_file(old: Option<TreeEntryData>, new: Option<TreeEntryData>) -> bool {
    let blob = |e: Option<TreeEntryData>| e.filter(|e| !e.mode.is_dir()).map(|e| e.oid);
    blob(old) != blob(new)
}

/// Emit a one-sided add or delete, expanding directories through their
/// subtree. Submodules are emitted as leaves.
fn emit_side(
    repo: &GitRepo,
    path: &str,
    entry: TreeEntryData,
    added: bool,
    out: &mut BTreeMap<String, ChangePair>,
) -> Result<(), GitError> {
    let pair = if added {
        ChangePair {
            old: None,
            new: Some(entry),
        }
    } else {
        ChangePair {
            old: Some(entry),
            new: None,
        }
    };
    match out.entry(path.to_string()) {
        std::collections::btree_map::Entry::Vacant(slot) => {
            slot.insert(pair);
        }
        std::collections::btree_map::Entry::Occupied(mut slot) => {
            // A replace emits delete then add on the same path.
            let merged = ChangePair {
                old: slot.get().old.or(pair.old),
                new: slot.get().new.or(pair.new),
            };
            slot.insert(merged);
        }
    }
    if entry.mode == FileMode::Dir {
        for (name, child) in repo.tree_entries(entry.oid)? {
            emit_side(repo, &paths::join(path, &name), child, added, out)?;
        }
    }
    Ok(())
}
