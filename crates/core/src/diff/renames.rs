//! Similarity-based rename detection between two trees.
//!
//! Wraps git2's rename machinery: a flat tree diff is rescored with
//! `find_similar`, and every delta that crosses the similarity threshold
//! contributes a `newPath → oldPath` mapping. The result feeds the
//! revision cache's rename map and answers SVN copy-from queries.

use std::collections::BTreeMap;

use git2::{Delta, DiffFindOptions, Oid};
use tracing::debug;

use crate::errors::GitError;
use crate::git::GitRepo;

/// Detect renames between two root trees.
///
/// `threshold` is the similarity percentage a pair must reach to count as
/// a rename. With no old tree there is nothing to rename from.
pub fn detect_renames(
    repo: &GitRepo,
    old_tree: Option<Oid>,
    new_tree: Oid,
    threshold: u16,
) -> Result<BTreeMap<String, String>, GitError> {
    let Some(old_tree) = old_tree else {
        return Ok(BTreeMap::new());
    };

    repo.with(|r| {
        let old = r.find_tree(old_tree)?;
        let new = r.find_tree(new_tree)?;
        let mut diff = r.diff_tree_to_tree(Some(&old), Some(&new), None)?;

        let mut opts = DiffFindOptions::new();
        opts.renames(true).rename_threshold(threshold);
        diff.find_similar(Some(&mut opts))?;

        let mut renames = BTreeMap::new();
        for delta in diff.deltas() {
            if delta.status() != Delta::Renamed {
                continue;
            }
            let (Some(new_path), Some(old_path)) = (
                delta.new_file().path().and_then(|p| p.to_str()),
                delta.old_file().path().and_then(|p| p.to_str()),
            ) else {
                continue;
            };
            renames.insert(format!("/{new_path}"), format!("/{old_path}"));
        }
        debug!(count = renames.len(), "rename detection completed");
        Ok(renames)
    })
}
