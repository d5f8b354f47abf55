//! The persisted cache-revision record (`change.json`).
//!
//! The on-disk layout is a compatibility surface: field order is pinned,
//! map keys are ordered, and serialization is compact canonical JSON, so
//! identical content always produces byte-identical blobs and Git
//! deduplicates unchanged parts of the layout.

use std::collections::BTreeMap;

use git2::Oid;
use serde::{Deserialize, Serialize};

use crate::diff::ChangePair;
use crate::git::{FileMode, TreeEntryData};

/// Pinned entry names inside every cache commit's tree.
pub const ENTRY_COMMIT_REF: &str = "commit.ref";
pub const ENTRY_CHANGE_JSON: &str = "change.json";
pub const ENTRY_UUID: &str = "uuid";

/// One persisted revision record. Field order matches the wire layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRevision {
    pub revision: i64,
    #[serde(rename = "gitCommit")]
    pub git_commit: Option<String>,
    pub renames: BTreeMap<String, String>,
    #[serde(rename = "fileChange")]
    pub file_change: BTreeMap<String, CacheChange>,
    /// Reserved for multi-branch layouts; always empty here.
    pub branches: BTreeMap<String, String>,
}

/// One changed path inside a [`CacheRevision`]. Modes are octal strings
/// (`"100644"`), blobs are hex oids; absent sides are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheChange {
    #[serde(rename = "oldMode", skip_serializing_if = "Option::is_none", default)]
    pub old_mode: Option<String>,
    #[serde(rename = "oldBlob", skip_serializing_if = "Option::is_none", default)]
    pub old_blob: Option<String>,
    #[serde(rename = "newMode", skip_serializing_if = "Option::is_none", default)]
    pub new_mode: Option<String>,
    #[serde(rename = "newBlob", skip_serializing_if = "Option::is_none", default)]
    pub new_blob: Option<String>,
}

impl CacheRevision {
    /// Build the record for a freshly-computed revision.
    pub fn new(
        revision: i64,
        git_commit: Option<Oid>,
        renames: BTreeMap<String, String>,
        changes: &BTreeMap<String, ChangePair>,
    ) -> Self {
        let file_change = changes
            .iter()
            .map(|(path, pair)| {
                (
                    path.clone(),
                    CacheChange {
                        old_mode: pair.old.map(|e| format!("{:06o}", e.mode.to_raw())),
                        old_blob: pair.old.map(|e| e.oid.to_string()),
                        new_mode: pair.new.map(|e| format!("{:06o}", e.mode.to_raw())),
                        new_blob: pair.new.map(|e| e.oid.to_string()),
                    },
                )
            })
            .collect();
        Self {
            revision,
            git_commit: git_commit.map(|oid| oid.to_string()),
            renames,
            file_change,
            branches: BTreeMap::new(),
        }
    }

    /// Canonical serialized bytes.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Decode `file_change` back into typed change pairs.
    pub fn decoded_changes(&self) -> Result<BTreeMap<String, ChangePair>, String> {
        let side = |mode: &Option<String>,
                    blob: &Option<String>|
         -> Result<Option<TreeEntryData>, String> {
            match (mode, blob) {
                (Some(mode), Some(blob)) => {
                    let raw = i32::from_str_radix(mode, 8)
                        .map_err(|_| format!("bad mode '{mode}'"))?;
                    let mode = FileMode::from_raw(raw)
                        .ok_or_else(|| format!("unknown mode '{mode}'"))?;
                    let oid =
                        Oid::from_str(blob).map_err(|_| format!("bad oid '{blob}'"))?;
                    Ok(Some(TreeEntryData { oid, mode }))
                }
                (None, None) => Ok(None),
                _ => Err("half-specified change side".to_string()),
            }
        };
        self.file_change
            .iter()
            .map(|(path, change)| {
                Ok((
                    path.clone(),
                    ChangePair {
                        old: side(&change.old_mode, &change.old_blob)?,
                        new: side(&change.new_mode, &change.new_blob)?,
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_is_stable_and_ordered() {
        let blob = Oid::from_str("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let mut changes = BTreeMap::new();
        changes.insert(
            "/b.txt".to_string(),
            ChangePair {
                old: None,
                new: Some(TreeEntryData {
                    oid: blob,
                    mode: FileMode::File,
                }),
            },
        );
        changes.insert(
            "/a.txt".to_string(),
            ChangePair {
                old: Some(TreeEntryData {
                    oid: blob,
                    mode: FileMode::Executable,
                }),
                new: None,
            },
        );
        let record = CacheRevision::new(3, Some(blob), BTreeMap::new(), &changes);
        let json = String::from_utf8(record.to_json().unwrap()).unwrap();

        // Field order is pinned and map keys are sorted.
        assert!(json.starts_with("{\"revision\":3,\"gitCommit\":\"aaaa"));
        assert!(json.find("/a.txt").unwrap() < json.find("/b.txt").unwrap());
        assert!(json.contains("\"oldMode\":\"100755\""));
        assert!(json.contains("\"newMode\":\"100644\""));
        assert!(json.ends_with("\"branches\":{}}"));

        // Identical content serializes identically.
        let again = CacheRevision::new(3, Some(blob), BTreeMap::new(), &changes);
        assert_eq!(record.to_json().unwrap(), again.to_json().unwrap());
    }

    #[test]
    fn test_decode_round_trip() {
        let blob = Oid::from_str("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        let mut changes = BTreeMap::new();
        changes.insert(
            "/link".to_string(),
            ChangePair {
                old: None,
                new: Some(TreeEntryData {
                    oid: blob,
                    mode: FileMode::Symlink,
                }),
            },
        );
        let record = CacheRevision::new(1, None, BTreeMap::new(), &changes);
        let parsed = CacheRevision::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.decoded_changes().unwrap(), changes);
    }

    #[test]
    fn test_revision_zero_record() {
        let record = CacheRevision::new(0, None, BTreeMap::new(), &BTreeMap::new());
        let json = String::from_utf8(record.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            "{\"revision\":0,\"gitCommit\":null,\"renames\":{},\"fileChange\":{},\"branches\":{}}"
        );
    }
}
