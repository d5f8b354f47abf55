//! Parsers turning in-tree config files into property fragments.
//!
//! Matching is by basename within the containing directory. Parsed
//! fragments are memoized by blob oid in the tree view's object caches, so
//! each distinct config blob is parsed once per process.

use std::collections::BTreeMap;

use tracing::debug;

use super::{
    AttributeRule, PropertyFragment, PropertyMap, MIME_BINARY, SVN_EOL_STYLE, SVN_MIME_TYPE,
    SVN_NEEDS_LOCK,
};

/// Config file basenames the bridge derives properties from.
pub const CONFIG_FILES: &[&str] = &[".gitignore", ".gitattributes", ".tgitconfig"];

/// `true` if `name` is a registered property-bearing config file.
pub fn is_config_file(name: &str) -> bool {
    CONFIG_FILES.contains(&name)
}

/// Parse a config blob found as `dir`'s immediate child `name`.
///
/// Returns `None` for unregistered names and for files that yield no
/// usable fragment.
pub fn parse_fragment(name: &str, dir: &str, content: &[u8]) -> Option<PropertyFragment> {
    let text = String::from_utf8_lossy(content);
    match name {
        ".gitignore" => Some(parse_gitignore(dir, &text)),
        ".gitattributes" => Some(parse_gitattributes(dir, &text)),
        ".tgitconfig" => Some(parse_tgitconfig(dir, &text)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// .gitignore
// ---------------------------------------------------------------------------

/// Translate `.gitignore` lines into an [`PropertyFragment::Ignore`].
///
/// Unanchored patterns apply to the defining directory and everything below
/// it, matching git. Anchored single-component patterns (`/build`) apply to
/// the defining directory only. Anchored multi-component patterns cannot be
/// expressed in per-directory `svn:ignore` and are skipped.
fn parse_gitignore(dir: &str, text: &str) -> PropertyFragment {
    let mut local = Vec::new();
    let mut global = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(pattern) = line.strip_prefix('!') {
            debug!(dir, pattern, "negated ignore pattern has no svn:ignore equivalent");
            continue;
        }
        let line = line.trim_end_matches('/');
        if let Some(rest) = line.strip_prefix('/') {
            if rest.contains('/') {
                debug!(dir, pattern = line, "skipping multi-component ignore pattern");
            } else if !rest.is_empty() {
                local.push(rest.to_string());
            }
        } else if line.contains('/') {
            debug!(dir, pattern = line, "skipping multi-component ignore pattern");
        } else if !line.is_empty() {
            global.push(line.to_string());
        }
    }
    PropertyFragment::Ignore {
        dir: dir.to_string(),
        local,
        global,
    }
}

// ---------------------------------------------------------------------------
// .gitattributes
// ---------------------------------------------------------------------------

/// Translate `.gitattributes` lines into per-file SVN property rules.
///
/// Recognized attributes: `eol=lf`/`eol=crlf` and bare `text` map to
/// `svn:eol-style`; `-text` and the `binary` macro map to a binary
/// `svn:mime-type`; `lockable` maps to `svn:needs-lock`.
fn parse_gitattributes(dir: &str, text: &str) -> PropertyFragment {
    let mut rules = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(pattern) = parts.next() else {
            continue;
        };
        let mut props = PropertyMap::new();
        let mut eol: Option<&str> = None;
        let mut text_set = false;
        for attr in parts {
            match attr {
                "text" | "text=auto" => text_set = true,
                "-text" | "binary" => {
                    props.insert(SVN_MIME_TYPE.to_string(), MIME_BINARY.to_string());
                }
                "lockable" => {
                    props.insert(SVN_NEEDS_LOCK.to_string(), "*".to_string());
                }
                _ => {
                    if let Some(value) = attr.strip_prefix("eol=") {
                        eol = Some(value);
                    }
                }
            }
        }
        match eol {
            Some("lf") => {
                props.insert(SVN_EOL_STYLE.to_string(), "LF".to_string());
            }
            Some("crlf") => {
                props.insert(SVN_EOL_STYLE.to_string(), "CRLF".to_string());
            }
            _ if text_set => {
                props.insert(SVN_EOL_STYLE.to_string(), "native".to_string());
            }
            _ => {}
        }
        if !props.is_empty() {
            rules.push(AttributeRule {
                pattern: pattern.to_string(),
                props,
            });
        }
    }
    PropertyFragment::AutoProps {
        dir: dir.to_string(),
        rules,
    }
}

// ---------------------------------------------------------------------------
// .tgitconfig
// ---------------------------------------------------------------------------

/// Translate a TortoiseGit `.tgitconfig` file into directory properties.
///
/// `[section] key = value` becomes the property `section:key` on the
/// defining directory, which is how issue-tracker integration properties
/// (`bugtraq:*`) reach SVN clients.
fn parse_tgitconfig(dir: &str, text: &str) -> PropertyFragment {
    let mut entries = BTreeMap::new();
    let mut section = String::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.trim().to_string();
            continue;
        }
        if section.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            entries.insert(
                format!("{}:{}", section, key.trim()),
                value.trim().to_string(),
            );
        }
    }
    PropertyFragment::DirConfig {
        dir: dir.to_string(),
        entries,
    }
}
