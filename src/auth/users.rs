//! In-memory credential store for basic authentication

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::UserConfig;

/// Hex SHA-256 digest of a password (the format stored in `auth.users`).
#[must_use]
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[derive(Debug, Clone)]
struct StoredUser {
    username: String,
    password_digest: String,
}

/// Immutable list of users and their password digests
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: Vec<StoredUser>,
}

impl CredentialStore {
    /// Build from configured users; digests are compared case-insensitively.
    #[must_use]
    pub fn from_config(users: &[UserConfig]) -> Self {
        Self {
            users: users
                .iter()
                .map(|u| StoredUser {
                    username: u.username.clone(),
                    password_digest: u.password.trim().to_ascii_lowercase(),
                })
                .collect(),
        }
    }

    /// Whether `username` exists with exactly this password digest
    #[must_use]
    pub fn matches(&self, username: &str, password_digest: &str) -> bool {
        self.users.iter().any(|u| {
            u.username == username
                && bool::from(u.password_digest.as_bytes().ct_eq(password_digest.as_bytes()))
        })
    }

    /// Number of configured users
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
