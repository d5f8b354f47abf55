//! Shared domain types.

use serde::{Deserialize, Serialize};

/// The authenticated principal driving a commit or holding locks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Login name, used for lock ownership.
    pub username: String,
    /// Display name, used as the Git author/committer name.
    pub real_name: String,
    /// Email, used as the Git author/committer email. May be empty.
    pub email: String,
}

impl User {
    pub fn new(username: &str, real_name: &str, email: Option<&str>) -> Self {
        Self {
            username: username.to_string(),
            real_name: real_name.to_string(),
            email: email.unwrap_or("").to_string(),
        }
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.username)
    }
}
