//! OpenID Connect provider client
//!
//! [`OidcCore`] is built once per process: discovery runs at startup and the
//! result (endpoints, verifier, OAuth client, ID token cache) is shared by both
//! grant variants.

pub mod client;
pub mod discovery;
pub mod verifier;

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::cache::TtlLruCache;

pub use client::{OAuthClient, TokenSet};
pub use discovery::ProviderMetadata;
pub use verifier::{IdTokenClaims, IdTokenVerifier};

/// Scopes requested for both grants
pub const SCOPES: [&str; 3] = ["openid", "profile", "email"];

/// Timeout for every provider request
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// OIDC provider failure
#[derive(Debug, Error)]
pub enum OidcError {
    /// Discovery document could not be fetched or parsed
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// Discovery document names a different issuer
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer in the discovery document
        actual: String,
    },

    /// A discovered endpoint is not a valid URL
    #[error("Invalid provider endpoint: {0}")]
    InvalidEndpoint(String),

    /// Network or HTTP error talking to the provider
    #[error("OIDC provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Token endpoint answered with an error status
    #[error("Token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// JWT decode or verification failed
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The JWT header has no `kid`
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` is not in the provider's JWKS
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),
}

/// Static OIDC client settings
#[derive(Debug, Clone)]
pub struct OidcSettings {
    /// Issuer URL
    pub issuer: String,
    /// Client ID
    pub client_id: String,
    /// Client secret (empty for public clients)
    pub client_secret: String,
    /// Redirect URI registered with the provider (`<base-url>/callback`)
    pub redirect_url: String,
}

/// Provider state shared by the code and password grant authenticators
pub struct OidcCore {
    settings: OidcSettings,
    metadata: ProviderMetadata,
    verifier: IdTokenVerifier,
    oauth: OAuthClient,
    cache: TtlLruCache<String>,
}

impl OidcCore {
    /// Discover the provider and build the verifier, OAuth client and cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be discovered. The caller must
    /// treat this as a startup failure.
    pub async fn discover(
        settings: OidcSettings,
        cache_size: usize,
        cache_ttl: Duration,
    ) -> Result<Self, OidcError> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let metadata = ProviderMetadata::discover(&http, &settings.issuer).await?;
        Self::from_metadata(http, settings, metadata, cache_size, cache_ttl)
    }

    /// Build from already discovered metadata
    pub fn from_metadata(
        http: Client,
        settings: OidcSettings,
        metadata: ProviderMetadata,
        cache_size: usize,
        cache_ttl: Duration,
    ) -> Result<Self, OidcError> {
        let verifier = IdTokenVerifier::new(
            http.clone(),
            metadata.issuer.clone(),
            settings.client_id.clone(),
            metadata.jwks_uri.clone(),
        );
        let oauth = OAuthClient::new(http, &settings, &metadata)?;

        info!(
            issuer = %metadata.issuer,
            client_id = %settings.client_id,
            redirect_url = %settings.redirect_url,
            cache_size,
            "OIDC provider ready"
        );

        Ok(Self {
            settings,
            metadata,
            verifier,
            oauth,
            cache: TtlLruCache::new(cache_size, cache_ttl),
        })
    }

    /// Client settings
    pub fn settings(&self) -> &OidcSettings {
        &self.settings
    }

    /// Discovered provider metadata
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// ID token verifier bound to the issuer, client and JWKS
    pub fn verifier(&self) -> &IdTokenVerifier {
        &self.verifier
    }

    /// OAuth client for the discovered endpoints
    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    /// Cache of previously obtained ID tokens
    pub fn cache(&self) -> &TtlLruCache<String> {
        &self.cache
    }
}

/// Cache key for a username/password pair.
///
/// The password appears only as its base64 SHA-256 digest.
#[must_use]
pub fn cache_key(username: &str, password: &str) -> String {
    format!(
        "{username}:{}",
        STANDARD.encode(Sha256::digest(password.as_bytes()))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_hides_password() {
        let key = cache_key("user", "pass");
        assert!(key.starts_with("user:"));
        assert!(!key.contains("pass"));
        assert_eq!(key, cache_key("user", "pass"));
        assert_ne!(key, cache_key("user", "pass2"));
        assert_ne!(key, cache_key("user2", "pass"));
    }

    #[test]
    fn test_cache_key_uses_standard_base64() {
        // base64(sha256("pass"))
        assert_eq!(
            cache_key("user", "pass"),
            "user:10/w7o2juYBrGMh32/KbveULW9jk2tejpyUAD+uC6PE="
        );
    }

    #[tokio::test]
    async fn test_discover_unreachable_provider() {
        let settings = OidcSettings {
            issuer: "http://127.0.0.1:1".to_string(),
            client_id: "registry".to_string(),
            client_secret: String::new(),
            redirect_url: "http://localhost/callback".to_string(),
        };
        let result = OidcCore::discover(settings, 10, Duration::from_secs(60)).await;
        assert!(matches!(result, Err(OidcError::Discovery(_))));
    }
}
