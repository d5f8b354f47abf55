//! GitSvnBridge core library.
//!
//! Presents one branch of a Git repository to Subversion clients: a dense
//! sequence of integer revisions persisted on a side branch inside the Git
//! object database, a read-only SVN node view with derived properties, a
//! token-based path lock manager, and an editor-driven commit builder with
//! property validation and serialized pushes.
//!
//! The SVN wire protocol, network sessions, and authentication live in
//! outer layers; this crate exposes only the repository model they drive.

pub mod commit;
pub mod config;
pub mod diff;
pub mod errors;
pub mod git;
pub mod locks;
pub mod models;
pub mod paths;
pub mod props;
pub mod revcache;
pub mod tree;

// Re-exports for convenience.
pub use commit::CommitBuilder;
pub use config::BridgeConfig;
pub use errors::{CoreError, SvnErrorCode};
pub use locks::{LockManager, LockTarget};
pub use models::User;
pub use revcache::{Revision, RevisionStore};
pub use tree::{Node, NodeKind, RevisionTree};
