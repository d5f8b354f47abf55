//! Error types for the GitSvnBridge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all. Client-visible failures
//! additionally map to a symbolic SVN error code via [`SvnErrorCode`] so the
//! protocol layer can report them with the wire codes Subversion clients
//! expect.

use thiserror::Error;

// ---------------------------------------------------------------------------
// SVN error codes
// ---------------------------------------------------------------------------

/// Symbolic SVN error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvnErrorCode {
    FsOutOfDate,
    FsNotFile,
    FsPathAlreadyLocked,
    FsBadLockToken,
    FsNoSuchLock,
    FsNoSuchRevision,
    EntryNotFound,
    FsAlreadyExists,
    WcNotUpToDate,
    IncompleteData,
    ReposHookFailure,
    Cancelled,
}

impl SvnErrorCode {
    /// The symbolic name of the code, as the protocol layer reports it.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FsOutOfDate => "FS_OUT_OF_DATE",
            Self::FsNotFile => "FS_NOT_FILE",
            Self::FsPathAlreadyLocked => "FS_PATH_ALREADY_LOCKED",
            Self::FsBadLockToken => "FS_BAD_LOCK_TOKEN",
            Self::FsNoSuchLock => "FS_NO_SUCH_LOCK",
            Self::FsNoSuchRevision => "FS_NO_SUCH_REVISION",
            Self::EntryNotFound => "ENTRY_NOT_FOUND",
            Self::FsAlreadyExists => "FS_ALREADY_EXISTS",
            Self::WcNotUpToDate => "WC_NOT_UP_TO_DATE",
            Self::IncompleteData => "INCOMPLETE_DATA",
            Self::ReposHookFailure => "REPOS_HOOK_FAILURE",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for SvnErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Revision(#[from] RevisionError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// The SVN error code for this failure, if it is client-visible.
    pub fn svn_code(&self) -> Option<SvnErrorCode> {
        match self {
            Self::Git(_) | Self::Config(_) => None,
            Self::Revision(e) => Some(e.svn_code()),
            Self::Lock(e) => Some(e.svn_code()),
            Self::Commit(e) => e.svn_code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) object-database operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// An object had an unexpected kind or shape.
    #[error("unexpected git object {oid}: {detail}")]
    MalformedObject { oid: String, detail: String },

    /// The native `git push` child process failed outright.
    #[error("git push failed: {0}")]
    PushFailed(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Revision store errors
// ---------------------------------------------------------------------------

/// Errors from the revision mapping cache.
#[derive(Debug, Error)]
pub enum RevisionError {
    /// The requested revision number is outside `[0, latest]`.
    #[error("no such revision {0}")]
    NoSuchRevision(i64),

    /// The given Git commit is not mapped to any revision.
    #[error("no revision maps to git commit {0}")]
    NoSuchCommit(String),

    /// A persisted cache record could not be decoded.
    #[error("corrupt revision cache record in commit {oid}: {detail}")]
    CorruptCache { oid: String, detail: String },

    /// Underlying Git error.
    #[error(transparent)]
    Git(#[from] GitError),
}

impl RevisionError {
    pub fn svn_code(&self) -> SvnErrorCode {
        SvnErrorCode::FsNoSuchRevision
    }
}

// ---------------------------------------------------------------------------
// Lock errors
// ---------------------------------------------------------------------------

/// Per-path errors from the lock manager.
#[derive(Debug, Error)]
pub enum LockError {
    /// The path does not exist at the latest revision, or the caller's
    /// revision is older than the path's last change.
    #[error("cannot lock '{path}': path is out of date or does not exist")]
    OutOfDate { path: String },

    /// The path resolves to a directory.
    #[error("cannot lock '{path}': not a file")]
    NotFile { path: String },

    /// The path is already locked and `force` was not given.
    #[error("path '{path}' is already locked by '{owner}'")]
    AlreadyLocked { path: String, owner: String },

    /// A commit touched a locked path without presenting its token.
    #[error("missing or wrong lock token for '{path}'")]
    BadToken { path: String },

    /// Unlock was asked for a lock that does not exist or whose token does
    /// not match.
    #[error("no such lock on '{path}'")]
    NoSuchLock { path: String },

    /// Underlying revision store failure while checking preconditions.
    #[error(transparent)]
    Revision(#[from] RevisionError),
}

impl LockError {
    pub fn svn_code(&self) -> SvnErrorCode {
        match self {
            Self::OutOfDate { .. } => SvnErrorCode::FsOutOfDate,
            Self::NotFile { .. } => SvnErrorCode::FsNotFile,
            Self::AlreadyLocked { .. } => SvnErrorCode::FsPathAlreadyLocked,
            Self::BadToken { .. } => SvnErrorCode::FsBadLockToken,
            Self::NoSuchLock { .. } => SvnErrorCode::FsNoSuchLock,
            Self::Revision(e) => e.svn_code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Commit builder errors
// ---------------------------------------------------------------------------

/// Errors from the editor-driven commit builder.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The named entry does not exist where the edit expects it.
    #[error("entry not found: '{path}'")]
    EntryNotFound { path: String },

    /// An add collided with an existing entry.
    #[error("entry already exists: '{path}'")]
    AlreadyExists { path: String },

    /// The caller's base revision is older than the path's last change.
    #[error("'{path}' is out of date: last changed in r{last_change}, caller has r{rev}")]
    NotUpToDate {
        path: String,
        rev: i64,
        last_change: i64,
    },

    /// An added file was closed without any content.
    #[error("incomplete data: no content supplied for '{path}'")]
    IncompleteData { path: String },

    /// Property validation failed after tree assembly.
    #[error("{0}")]
    PropertyMismatch(String),

    /// A directory would be committed empty, which Git cannot represent.
    #[error("cannot commit empty directory '{path}'")]
    EmptyDirectory { path: String },

    /// The editor drive itself was malformed (unbalanced open/close).
    #[error("malformed editor drive: {0}")]
    InvalidDrive(String),

    /// Lock precondition failure.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Underlying revision store failure.
    #[error(transparent)]
    Revision(#[from] RevisionError),

    /// Underlying Git failure.
    #[error(transparent)]
    Git(#[from] GitError),
}

impl CommitError {
    pub fn svn_code(&self) -> Option<SvnErrorCode> {
        match self {
            Self::EntryNotFound { .. } => Some(SvnErrorCode::EntryNotFound),
            Self::AlreadyExists { .. } => Some(SvnErrorCode::FsAlreadyExists),
            Self::NotUpToDate { .. } => Some(SvnErrorCode::WcNotUpToDate),
            Self::IncompleteData { .. } => Some(SvnErrorCode::IncompleteData),
            Self::PropertyMismatch(_) => Some(SvnErrorCode::ReposHookFailure),
            Self::EmptyDirectory { .. } => Some(SvnErrorCode::Cancelled),
            Self::InvalidDrive(_) => None,
            Self::Lock(e) => Some(e.svn_code()),
            Self::Revision(e) => Some(e.svn_code()),
            Self::Git(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
