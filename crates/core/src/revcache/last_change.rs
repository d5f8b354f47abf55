//! The last-change index: per path, the ordered revisions that touched it.
//!
//! Deletions are recorded as the negated revision id, which doubles as the
//! "absent" sentinel: a lookup that lands on a negative entry means the
//! path did not exist at that revision. Appends replace the per-path list
//! wholesale (copy-on-write), so a concurrent reader sees either the old or
//! the new list, never a torn one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Maps each path to the revisions that changed it, ascending by absolute
/// value.
#[derive(Default)]
pub struct LastChangeIndex {
    map: RwLock<HashMap<String, Arc<Vec<i64>>>>,
}

impl LastChangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` changed in `rev`; `deleted` marks the change as a
    /// removal.
    pub fn append(&self, path: &str, rev: i64, deleted: bool) {
        let value = if deleted { -rev } else { rev };
        let mut map = self.map.write().expect("last-change index poisoned");
        let list = map.entry(path.to_string()).or_default();
        let mut next = Vec::with_capacity(list.len() + 1);
        next.extend_from_slice(list);
        next.push(value);
        *list = Arc::new(next);
    }

    /// The largest revision `≤ before` in which `path` changed, or `None`
    /// when the path is absent at `before` (never seen, or last event at or
    /// before `before` was a deletion).
    pub fn last_change(&self, path: &str, before: i64) -> Option<i64> {
        let list = self
            .map
            .read()
            .expect("last-change index poisoned")
            .get(path)
            .cloned()?;
        let idx = list.partition_point(|v| v.abs() <= before);
        match idx.checked_sub(1).map(|i| list[i]) {
            Some(v) if v >= 0 => Some(v),
            _ => None,
        }
    }

    /// Number of indexed paths.
    pub fn len(&self) -> usize {
        self.map.read().expect("last-change index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
