//! Process-local memoization of expensive per-object derivations.
//!
//! Both caches are keyed by object id (content-addressed), so a racing
//! compute-if-absent produces the same value and the last writer wins
//! harmlessly.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use git2::Oid;
use md5::{Digest, Md5};

use crate::errors::GitError;
use crate::git::GitRepo;
use crate::props::{factories, PropertyFragment};

/// The `"link "` prefix SVN prepends to symlink content.
pub const LINK_PREFIX: &[u8] = b"link ";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FragmentKey {
    oid: Oid,
    name: String,
    dir: String,
}

/// Shared MD5 and property-fragment caches for one bridged repository.
#[derive(Default)]
pub struct ObjectCaches {
    md5: RwLock<HashMap<(Oid, bool), Arc<String>>>,
    fragments: RwLock<HashMap<FragmentKey, Option<Arc<PropertyFragment>>>>,
}

impl ObjectCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// MD5 of a blob's content, hex-encoded. With `link = true` the digest
    /// covers the `"link "`-prefixed synthetic bytes SVN sees.
    pub fn md5(&self, repo: &GitRepo, oid: Oid, link: bool) -> Result<Arc<String>, GitError> {
        if let Some(hit) = self.md5.read().expect("md5 cache poisoned").get(&(oid, link)) {
            return Ok(hit.clone());
        }
        let mut hasher = Md5::new();
        if link {
            hasher.update(LINK_PREFIX);
        }
        hasher.update(repo.blob_bytes(oid)?);
        let digest = Arc::new(hex::encode(hasher.finalize()));
        self.md5
            .write()
            .expect("md5 cache poisoned")
            .insert((oid, link), digest.clone());
        Ok(digest)
    }

    /// Parse (once) the config blob `oid` found as `dir`'s child `name`.
    pub fn fragment(
        &self,
        repo: &GitRepo,
        dir: &str,
        name: &str,
        oid: Oid,
    ) -> Result<Option<Arc<PropertyFragment>>, GitError> {
        let key = FragmentKey {
            oid,
            name: name.to_string(),
            dir: dir.to_string(),
        };
        if let Some(hit) = self
            .fragments
            .read()
            .expect("fragment cache poisoned")
            .get(&key)
        {
            return Ok(hit.clone());
        }
        let content = repo.blob_bytes(oid)?;
        let parsed = factories::parse_fragment(name, dir, &content).map(Arc::new);
        self.fragments
            .write()
            .expect("fragment cache poisoned")
            .insert(key, parsed.clone());
        Ok(parsed)
    }
}
