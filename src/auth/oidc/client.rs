//! OAuth 2.0 client for the discovered provider endpoints
//!
//! Covers the two grants the registry uses: authorization code (RFC 6749
//! section 4.1) and resource owner password credentials (section 4.3).
//! Requests are sent once; failures are returned to the caller as-is.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::discovery::ProviderMetadata;
use super::{OidcError, OidcSettings, SCOPES};

/// Successful token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    /// OAuth access token
    #[serde(default)]
    pub access_token: Option<String>,
    /// Token type, normally `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// OpenID Connect ID token
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Client for one provider, bound to the registry's redirect URI
pub struct OAuthClient {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    authorization_endpoint: Url,
    token_endpoint: String,
}

impl OAuthClient {
    /// Create from settings and discovered endpoints
    ///
    /// # Errors
    ///
    /// Returns an error if the authorization endpoint is not a valid URL.
    pub fn new(
        http: Client,
        settings: &OidcSettings,
        metadata: &ProviderMetadata,
    ) -> Result<Self, OidcError> {
        let authorization_endpoint = Url::parse(&metadata.authorization_endpoint)
            .map_err(|e| OidcError::InvalidEndpoint(format!("authorization endpoint: {e}")))?;

        Ok(Self {
            http,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            redirect_url: settings.redirect_url.clone(),
            authorization_endpoint,
            token_endpoint: metadata.token_endpoint.clone(),
        })
    }

    /// Authorization URL carrying `state` and an extra `nonce` parameter.
    ///
    /// Deterministic for the same inputs.
    #[must_use]
    pub fn auth_code_url(&self, state: &str, nonce: &str) -> String {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        url.into()
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, OidcError> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_url),
        ])
        .await
    }

    /// Resource owner password credentials grant
    pub async fn password_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenSet, OidcError> {
        let scope = SCOPES.join(" ");
        self.request_token(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", &scope),
        ])
        .await
    }

    /// POST to the token endpoint; the client authenticates with HTTP Basic
    /// when it has a secret and as a public client otherwise.
    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenSet, OidcError> {
        let grant = params
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map_or("", |(_, v)| *v);
        debug!(grant = %grant, endpoint = %self.token_endpoint, "Requesting token");

        let mut form: Vec<(&str, &str)> = params.to_vec();
        let mut request = self.http.post(&self.token_endpoint);
        if self.client_secret.is_empty() {
            form.push(("client_id", &self.client_id));
        } else {
            request = request.basic_auth(&self.client_id, Some(&self.client_secret));
        }

        let response = request.form(&form).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OidcError::TokenEndpoint { status, body });
        }

        Ok(response.json().await?)
    }
}
