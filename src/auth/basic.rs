//! Basic authentication against the in-memory credential store

use axum::http::HeaderMap;
use tracing::debug;

use super::users::{CredentialStore, hash_password};
use super::{AuthError, basic_credentials};

/// Validates `Authorization: Basic` credentials against configured users
#[derive(Debug, Clone)]
pub struct BasicAuthenticator {
    users: CredentialStore,
}

impl BasicAuthenticator {
    /// Create from a credential store
    #[must_use]
    pub fn new(users: CredentialStore) -> Self {
        Self { users }
    }

    /// Authenticate a request.
    ///
    /// On success the token is the password's SHA-256 hex digest, never the
    /// password itself.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let (username, password) = basic_credentials(headers)?;
        let digest = hash_password(&password);

        if self.users.matches(&username, &digest) {
            debug!(user = %username, "Basic authentication succeeded");
            Ok(digest)
        } else {
            debug!(user = %username, "Basic authentication rejected");
            Err(AuthError::InvalidCredentials)
        }
    }
}
