//! OpenID Connect discovery
//!
//! Fetches `{issuer}/.well-known/openid-configuration` once at startup.

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::OidcError;

/// Provider metadata (OpenID Connect Discovery 1.0, section 3)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier; must equal the configured issuer
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// JWKS document URL
    pub jwks_uri: String,

    /// Userinfo endpoint (optional)
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,

    /// Supported scopes (may be string or array)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,

    /// Supported grant types
    #[serde(default)]
    pub grant_types_supported: Vec<String>,

    /// Supported ID token signing algorithms
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// Deserialize scopes that may be either a space-separated string or an array
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

impl ProviderMetadata {
    /// Fetch the discovery document for `issuer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched or parsed, or if its
    /// `issuer` does not match the requested one.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self, OidcError> {
        let url = discovery_url(issuer);
        debug!(url = %url, "Discovering OpenID provider metadata");

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| OidcError::Discovery(format!("failed to fetch {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::Discovery(format!(
                "{url} returned HTTP {}",
                response.status()
            )));
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| OidcError::Discovery(format!("invalid discovery document: {e}")))?;

        if !same_issuer(&metadata.issuer, issuer) {
            return Err(OidcError::IssuerMismatch {
                expected: issuer.to_string(),
                actual: metadata.issuer,
            });
        }

        debug!(
            issuer = %metadata.issuer,
            token_endpoint = %metadata.token_endpoint,
            "Discovered OpenID provider"
        );
        Ok(metadata)
    }
}

fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

/// Issuers are compared exactly, ignoring a trailing slash
fn same_issuer(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_url() {
        assert_eq!(
            discovery_url("https://idp.example.com/realms/spm/"),
            "https://idp.example.com/realms/spm/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_same_issuer() {
        assert!(same_issuer("https://idp.example.com/", "https://idp.example.com"));
        assert!(!same_issuer("https://idp.example.com", "https://evil.example.com"));
    }

    #[test]
    fn test_parse_metadata_with_string_scopes() {
        let json = r#"{
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/auth",
            "token_endpoint": "https://idp.example.com/token",
            "jwks_uri": "https://idp.example.com/jwks",
            "scopes_supported": "openid profile email"
        }"#;

        let metadata: ProviderMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.scopes_supported, vec!["openid", "profile", "email"]);
        assert!(metadata.userinfo_endpoint.is_none());
    }

    #[test]
    fn test_parse_metadata_requires_jwks_uri() {
        let json = r#"{
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/auth",
            "token_endpoint": "https://idp.example.com/token"
        }"#;

        assert!(serde_json::from_str::<ProviderMetadata>(json).is_err());
    }
}
