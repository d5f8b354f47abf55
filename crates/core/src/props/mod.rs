//! SVN property model.
//!
//! A node's effective property set is assembled from layered *fragments*:
//! each property-bearing config file (`.gitignore`, `.gitattributes`,
//! `.tgitconfig`) in an ancestor directory parses into one
//! [`PropertyFragment`], and a node folds all fragments along its path in
//! root-to-leaf order into an initially-empty map. Mode-derived properties
//! (`svn:executable`, `svn:special`) and the `svn:entry:*` pseudo-properties
//! are layered on top by the tree view.

pub mod factories;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::paths;

/// An ordered SVN property map (name → value).
pub type PropertyMap = BTreeMap<String, String>;

// Well-known property names.
pub const SVN_IGNORE: &str = "svn:ignore";
pub const SVN_EOL_STYLE: &str = "svn:eol-style";
pub const SVN_MIME_TYPE: &str = "svn:mime-type";
pub const SVN_NEEDS_LOCK: &str = "svn:needs-lock";
pub const SVN_EXECUTABLE: &str = "svn:executable";
pub const SVN_SPECIAL: &str = "svn:special";
pub const SVN_ENTRY_UUID: &str = "svn:entry:uuid";
pub const SVN_ENTRY_COMMITTED_REV: &str = "svn:entry:committed-rev";
pub const SVN_ENTRY_COMMITTED_DATE: &str = "svn:entry:committed-date";
pub const SVN_ENTRY_LAST_AUTHOR: &str = "svn:entry:last-author";

pub const MIME_BINARY: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// Fragments
// ---------------------------------------------------------------------------

/// One `.gitattributes` rule: a pattern and the SVN properties it implies
/// for matching files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRule {
    /// The raw gitattributes pattern. Patterns containing `/` are matched
    /// against the path relative to the defining directory; others against
    /// the basename.
    pub pattern: String,
    pub props: PropertyMap,
}

/// A parsed property fragment, anchored at the directory that contains its
/// source config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyFragment {
    /// From `.gitignore`: `local` patterns apply to the defining directory
    /// only; `global` patterns apply to it and every descendant directory.
    Ignore {
        dir: String,
        local: Vec<String>,
        global: Vec<String>,
    },
    /// From `.gitattributes`: per-file property rules for the defining
    /// directory's whole subtree.
    AutoProps { dir: String, rules: Vec<AttributeRule> },
    /// From `.tgitconfig`: literal properties on the defining directory.
    DirConfig {
        dir: String,
        entries: BTreeMap<String, String>,
    },
}

impl PropertyFragment {
    /// Apply this fragment to the node at `path` (`is_dir` tells file from
    /// directory), merging into `map`.
    pub fn apply(&self, path: &str, is_dir: bool, map: &mut PropertyMap) {
        match self {
            Self::Ignore { dir, local, global } => {
                if !is_dir {
                    return;
                }
                if path == dir {
                    append_ignore_lines(map, local.iter().chain(global));
                } else if paths::is_self_or_ancestor(dir, path) {
                    append_ignore_lines(map, global.iter());
                }
            }
            Self::AutoProps { dir, rules } => {
                if is_dir || !paths::is_self_or_ancestor(dir, path) {
                    return;
                }
                let rel = relative_to(dir, path);
                let name = paths::base_name(path);
                for rule in rules {
                    let matched = if rule.pattern.contains('/') {
                        glob_match::glob_match(rule.pattern.trim_start_matches('/'), rel)
                    } else {
                        glob_match::glob_match(&rule.pattern, name)
                    };
                    if matched {
                        for (k, v) in &rule.props {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            Self::DirConfig { dir, entries } => {
                if is_dir && path == dir {
                    for (k, v) in entries {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
    }

    /// The directory this fragment is anchored at.
    pub fn dir(&self) -> &str {
        match self {
            Self::Ignore { dir, .. } | Self::AutoProps { dir, .. } | Self::DirConfig { dir, .. } => {
                dir
            }
        }
    }
}

fn append_ignore_lines<'a>(map: &mut PropertyMap, lines: impl Iterator<Item = &'a String>) {
    let value = map.entry(SVN_IGNORE.to_string()).or_default();
    for line in lines {
        value.push_str(line);
        value.push('\n');
    }
    if value.is_empty() {
        map.remove(SVN_IGNORE);
    }
}

fn relative_to<'a>(dir: &str, path: &'a str) -> &'a str {
    if dir == "/" {
        &path[1..]
    } else {
        &path[dir.len() + 1..]
    }
}

/// Fold a root-to-leaf fragment stack into the node's effective map.
pub fn fold_fragments<'a>(
    fragments: impl Iterator<Item = &'a PropertyFragment>,
    path: &str,
    is_dir: bool,
) -> PropertyMap {
    let mut map = PropertyMap::new();
    for fragment in fragments {
        fragment.apply(path, is_dir, &mut map);
    }
    map
}

/// Render a property map difference for a validation failure message.
pub fn format_mismatch(path: &str, expected: &PropertyMap, actual: &PropertyMap) -> String {
    let mut msg = format!(
        "properties on '{path}' do not match the repository configuration \
         (derived from {} files)",
        factories::CONFIG_FILES.join(", ")
    );
    for (name, value) in actual {
        match expected.get(name) {
            Some(v) if v == value => {}
            Some(v) => {
                msg.push_str(&format!(
                    "\n  {name}: expected {value:?}, client sent {v:?}"
                ));
            }
            None => msg.push_str(&format!("\n  {name}: expected {value:?}, client sent nothing")),
        }
    }
    for (name, value) in expected {
        if !actual.contains_key(name) {
            msg.push_str(&format!(
                "\n  {name}: client sent {value:?}, nothing expected"
            ));
        }
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ignore_fragment() -> PropertyFragment {
        PropertyFragment::Ignore {
            dir: "/".into(),
            local: vec!["build".into()],
            global: vec!["*.log".into()],
        }
    }

    #[test]
    fn test_ignore_applies_to_own_dir_and_descendants() {
        let frag = ignore_fragment();

        let mut map = PropertyMap::new();
        frag.apply("/", true, &mut map);
        assert_eq!(map[SVN_IGNORE], "build\n*.log\n");

        let mut map = PropertyMap::new();
        frag.apply("/sub", true, &mut map);
        assert_eq!(map[SVN_IGNORE], "*.log\n");

        // Files never carry svn:ignore.
        let mut map = PropertyMap::new();
        frag.apply("/a.txt", false, &mut map);
        assert!(map.is_empty());
    }

    #[test]
    fn test_autoprops_matches_basename_and_anchored() {
        let frag = PropertyFragment::AutoProps {
            dir: "/src".into(),
            rules: vec![
                AttributeRule {
                    pattern: "*.txt".into(),
                    props: [(SVN_EOL_STYLE.to_string(), "native".to_string())].into(),
                },
                AttributeRule {
                    pattern: "gen/*.bin".into(),
                    props: [(SVN_MIME_TYPE.to_string(), MIME_BINARY.to_string())].into(),
                },
            ],
        };

        let mut map = PropertyMap::new();
        frag.apply("/src/deep/a.txt", false, &mut map);
        assert_eq!(map[SVN_EOL_STYLE], "native");

        let mut map = PropertyMap::new();
        frag.apply("/src/gen/x.bin", false, &mut map);
        assert_eq!(map[SVN_MIME_TYPE], MIME_BINARY);

        // Outside the defining subtree the fragment is inert.
        let mut map = PropertyMap::new();
        frag.apply("/other/a.txt", false, &mut map);
        assert!(map.is_empty());
    }

    #[test]
    fn test_fold_concatenates_ignores_root_to_leaf() {
        let root = ignore_fragment();
        let sub = PropertyFragment::Ignore {
            dir: "/sub".into(),
            local: vec![],
            global: vec!["*.tmp".into()],
        };
        let map = fold_fragments([root, sub].iter(), "/sub", true);
        assert_eq!(map[SVN_IGNORE], "*.log\n*.tmp\n");
    }

    #[test]
    fn test_dir_config_applies_to_own_dir_only() {
        let frag = PropertyFragment::DirConfig {
            dir: "/".into(),
            entries: [("bugtraq:url".to_string(), "https://x/%BUGID%".to_string())].into(),
        };
        let mut map = PropertyMap::new();
        frag.apply("/", true, &mut map);
        assert_eq!(map["bugtraq:url"], "https://x/%BUGID%");

        let mut map = PropertyMap::new();
        frag.apply("/sub", true, &mut map);
        assert!(map.is_empty());
    }

    #[test]
    fn test_format_mismatch_names_properties_and_sources() {
        let expected = PropertyMap::new();
        let actual: PropertyMap = [(SVN_IGNORE.to_string(), "*.log\n".to_string())].into();
        let msg = format_mismatch("/d", &expected, &actual);
        assert!(msg.contains("svn:ignore"));
        assert!(msg.contains(".gitignore"));
        assert!(msg.contains("/d"));
    }
}
