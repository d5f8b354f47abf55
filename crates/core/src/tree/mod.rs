//! Read-only projection of a Git tree as SVN nodes.
//!
//! A [`RevisionTree`] roots the view at one revision's commit tree;
//! [`Node`] lazily materializes entries, property stacks, content, and
//! checksums on first use. Submodule entries appear as directories whose
//! contents come from the first linked repository containing the referenced
//! commit; an unresolvable submodule is an empty directory.

pub mod caches;

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{Arc, OnceLock};

use chrono::{TimeZone, Utc};
use git2::Oid;

use crate::errors::RevisionError;
use crate::git::{FileMode, GitRepo, TreeEntryData};
use crate::paths;
use crate::props::{
    self, factories, PropertyFragment, PropertyMap, SVN_ENTRY_COMMITTED_DATE,
    SVN_ENTRY_COMMITTED_REV, SVN_ENTRY_LAST_AUTHOR, SVN_ENTRY_UUID, SVN_EXECUTABLE, SVN_SPECIAL,
};
use crate::revcache::RevisionStore;
use caches::LINK_PREFIX;

/// SVN node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Symlink,
    Dir,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Symlink => write!(f, "symlink"),
            Self::Dir => write!(f, "dir"),
        }
    }
}

/// Format a timestamp the way SVN writes `svn:entry:committed-date`.
pub fn format_svn_date(time_ms: i64) -> String {
    match Utc.timestamp_millis_opt(time_ms).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// RevisionTree
// ---------------------------------------------------------------------------

/// A revision's tree, viewed as SVN nodes.
pub struct RevisionTree<'a> {
    store: &'a RevisionStore,
    rev: i64,
    /// The commit's root tree; `None` means the empty tree of revision 0.
    root: Option<Oid>,
}

impl<'a> RevisionTree<'a> {
    pub(crate) fn new(store: &'a RevisionStore, rev: i64, root: Option<Oid>) -> Self {
        Self { store, rev, root }
    }

    pub fn rev(&self) -> i64 {
        self.rev
    }

    /// The root directory node.
    pub fn root_node(&self) -> Node<'_> {
        Node {
            view: self,
            repo: self.store.repo().clone(),
            path: "/".to_string(),
            source: NodeSource::Dir { tree: self.root },
            fragments: Vec::new(),
            entries: OnceLock::new(),
            own_fragments: OnceLock::new(),
        }
    }

    /// Resolve a canonical path to a node, or `None` if absent.
    pub fn node_at(&self, path: &str) -> Result<Option<Node<'_>>, RevisionError> {
        let path = paths::normalize(path);
        let mut node = self.root_node();
        for name in paths::components(&path) {
            match node.child(name)? {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

enum NodeSource {
    File { blob: Oid, executable: bool },
    Symlink { blob: Oid },
    Dir { tree: Option<Oid> },
}

/// One SVN node (file, symlink, or directory) at a revision.
pub struct Node<'a> {
    view: &'a RevisionTree<'a>,
    /// The repository holding this node's objects; differs from the main
    /// repository inside submodules.
    repo: Arc<GitRepo>,
    path: String,
    source: NodeSource,
    /// Property fragments inherited from ancestor directories, root first.
    fragments: Vec<Arc<PropertyFragment>>,
    entries: OnceLock<BTreeMap<String, TreeEntryData>>,
    own_fragments: OnceLock<Vec<Arc<PropertyFragment>>>,
}

impl<'a> Node<'a> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> NodeKind {
        match self.source {
            NodeSource::File { .. } => NodeKind::File,
            NodeSource::Symlink { .. } => NodeKind::Symlink,
            NodeSource::Dir { .. } => NodeKind::Dir,
        }
    }

    /// Directory entries (empty for files and for unresolvable submodules).
    pub fn entries(&self) -> Result<&BTreeMap<String, TreeEntryData>, RevisionError> {
        if let Some(entries) = self.entries.get() {
            return Ok(entries);
        }
        let computed = match self.source {
            NodeSource::Dir { tree: Some(tree) } => self.repo.tree_entries(tree)?,
            _ => BTreeMap::new(),
        };
        Ok(self.entries.get_or_init(|| computed))
    }

    /// Resolve an immediate child by name.
    pub fn child(&self, name: &str) -> Result<Option<Node<'a>>, RevisionError> {
        let Some(entry) = self.entries()?.get(name).copied() else {
            return Ok(None);
        };
        let path = paths::join(&self.path, name);
        let mut fragments = self.fragments.clone();
        fragments.extend(self.dir_fragments()?.iter().cloned());

        let (repo, source) = match entry.mode {
            FileMode::File => (
                self.repo.clone(),
                NodeSource::File {
                    blob: entry.oid,
                    executable: false,
                },
            ),
            FileMode::Executable => (
                self.repo.clone(),
                NodeSource::File {
                    blob: entry.oid,
                    executable: true,
                },
            ),
            FileMode::Symlink => (self.repo.clone(), NodeSource::Symlink { blob: entry.oid }),
            FileMode::Dir => (
                self.repo.clone(),
                NodeSource::Dir {
                    tree: Some(entry.oid),
                },
            ),
            FileMode::Submodule => match self.resolve_submodule(entry.oid)? {
                Some((repo, tree)) => (repo, NodeSource::Dir { tree: Some(tree) }),
                None => (self.repo.clone(), NodeSource::Dir { tree: None }),
            },
        };

        Ok(Some(Node {
            view: self.view,
            repo,
            path,
            source,
            fragments,
            entries: OnceLock::new(),
            own_fragments: OnceLock::new(),
        }))
    }

    /// Find the referenced submodule commit in the registered repositories
    /// (the exported repository first, then the linked ones, in order).
    fn resolve_submodule(&self, commit: Oid) -> Result<Option<(Arc<GitRepo>, Oid)>, RevisionError> {
        for repo in self.view.store.submodule_repos() {
            if repo.contains_commit(commit)? {
                let tree = repo.commit_info(commit)?.tree;
                return Ok(Some((repo.clone(), tree)));
            }
        }
        Ok(None)
    }

    /// Property fragments defined by config files directly in this
    /// directory. Empty for files.
    fn dir_fragments(&self) -> Result<&Vec<Arc<PropertyFragment>>, RevisionError> {
        if let Some(own) = self.own_fragments.get() {
            return Ok(own);
        }
        let mut computed = Vec::new();
        if matches!(self.source, NodeSource::Dir { .. }) {
            for (name, entry) in self.entries()? {
                if !factories::is_config_file(name) || entry.mode.is_dir() {
                    continue;
                }
                if let Some(fragment) =
                    self.view
                        .store
                        .caches()
                        .fragment(&self.repo, &self.path, name, entry.oid)?
                {
                    computed.push(fragment);
                }
            }
        }
        Ok(self.own_fragments.get_or_init(|| computed))
    }

    /// The node's effective SVN property map.
    ///
    /// With `include_internal` the `svn:entry:*` pseudo-properties derived
    /// from the node's last-change revision are added.
    pub fn properties(&self, include_internal: bool) -> Result<PropertyMap, RevisionError> {
        let is_dir = matches!(self.source, NodeSource::Dir { .. });
        let mut stack: Vec<&PropertyFragment> = self.fragments.iter().map(|f| &**f).collect();
        if is_dir {
            for fragment in self.dir_fragments()? {
                stack.push(&**fragment);
            }
        }
        let mut map = props::fold_fragments(stack.into_iter(), &self.path, is_dir);

        match self.source {
            NodeSource::File { executable: true, .. } => {
                map.insert(SVN_EXECUTABLE.to_string(), "*".to_string());
            }
            NodeSource::Symlink { .. } => {
                map.insert(SVN_SPECIAL.to_string(), "*".to_string());
            }
            _ => {}
        }

        if include_internal {
            let store = self.view.store;
            map.insert(SVN_ENTRY_UUID.to_string(), store.uuid().to_string());
            let committed = store.last_change(&self.path, self.view.rev).unwrap_or(0);
            map.insert(SVN_ENTRY_COMMITTED_REV.to_string(), committed.to_string());
            let rev = store.by_id(committed)?;
            map.insert(
                SVN_ENTRY_COMMITTED_DATE.to_string(),
                format_svn_date(rev.date_ms()),
            );
            if !rev.author().is_empty() {
                map.insert(SVN_ENTRY_LAST_AUTHOR.to_string(), rev.author().to_string());
            }
        }
        Ok(map)
    }

    /// Content length as SVN reports it (symlinks include the `link `
    /// prefix; directories have no length).
    pub fn size(&self) -> Result<u64, RevisionError> {
        match self.source {
            NodeSource::File { blob, .. } => Ok(self.repo.blob_size(blob)?),
            NodeSource::Symlink { blob } => {
                Ok(self.repo.blob_size(blob)? + LINK_PREFIX.len() as u64)
            }
            NodeSource::Dir { .. } => Ok(0),
        }
    }

    /// MD5 of the node's content, or `None` for directories.
    pub fn md5(&self) -> Result<Option<Arc<String>>, RevisionError> {
        let caches = self.view.store.caches();
        match self.source {
            NodeSource::File { blob, .. } => Ok(Some(caches.md5(&self.repo, blob, false)?)),
            NodeSource::Symlink { blob } => Ok(Some(caches.md5(&self.repo, blob, true)?)),
            NodeSource::Dir { .. } => Ok(None),
        }
    }

    /// Open the node's content, or `None` for directories.
    pub fn open(&self) -> Result<Option<NodeContent>, RevisionError> {
        let bytes = match self.source {
            NodeSource::File { blob, .. } => self.repo.blob_bytes(blob)?,
            NodeSource::Symlink { blob } => {
                let target = self.repo.blob_bytes(blob)?;
                let mut bytes = Vec::with_capacity(LINK_PREFIX.len() + target.len());
                bytes.extend_from_slice(LINK_PREFIX);
                bytes.extend_from_slice(&target);
                bytes
            }
            NodeSource::Dir { .. } => return Ok(None),
        };
        Ok(Some(NodeContent {
            cursor: std::io::Cursor::new(bytes),
        }))
    }
}

// ---------------------------------------------------------------------------
// NodeContent
// ---------------------------------------------------------------------------

/// Streamed node content: a cursor plus a known length.
pub struct NodeContent {
    cursor: std::io::Cursor<Vec<u8>>,
}

impl NodeContent {
    pub fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for NodeContent {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}
