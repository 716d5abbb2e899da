//! OIDC resource-owner password grant
//!
//! The login page embeds a stateless CSRF token. Requests then carry Basic
//! credentials plus `x-csrf-token`; the credentials are exchanged for an ID
//! token at the provider and the result is cached per username/password.

use askama::Template;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use tracing::{debug, error};

use super::csrf::{CSRF_HEADER, CsrfCodec, CsrfError};
use super::oidc::{OidcCore, cache_key};
use super::{AuthError, already_authenticated, basic_credentials, unauthorized};

/// Login page with the CSRF token as a hidden field
#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate<'a> {
    registry_name: &'a str,
    csrf_token: &'a str,
    csrf_header: &'a str,
    action_url: &'a str,
}

/// Authenticator for the password grant
pub struct OidcPasswordAuthenticator {
    core: OidcCore,
    csrf: CsrfCodec,
}

impl OidcPasswordAuthenticator {
    /// Wrap a discovered provider with freshly generated CSRF keys
    pub fn new(core: OidcCore) -> Result<Self, CsrfError> {
        Ok(Self::with_codec(core, CsrfCodec::generate()?))
    }

    /// Wrap a discovered provider with an explicit CSRF codec
    #[must_use]
    pub fn with_codec(core: OidcCore, csrf: CsrfCodec) -> Self {
        Self { core, csrf }
    }

    /// Shared provider state
    pub fn core(&self) -> &OidcCore {
        &self.core
    }

    /// Value bound into every CSRF token
    fn csrf_value(&self) -> &str {
        &self.core.settings().client_id
    }

    /// Mint a CSRF token for the login form
    pub fn encrypt_token(&self) -> Result<String, CsrfError> {
        self.csrf.encrypt_token(self.csrf_value())
    }

    /// Check a CSRF token presented with a login request
    pub fn verify_token(&self, token: &str) -> Result<(), CsrfError> {
        self.csrf.verify_token(token, self.csrf_value())
    }

    /// Render the login page.
    pub fn login(&self, headers: &HeaderMap) -> Response {
        if let Some(response) = already_authenticated(headers) {
            return response;
        }

        let token = match self.encrypt_token() {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Failed to mint CSRF token");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Error encrypting token").into_response();
            }
        };

        let template = LoginTemplate {
            registry_name: "Swift Package Registry",
            csrf_token: &token,
            csrf_header: CSRF_HEADER,
            action_url: "/login",
        };
        match template.render() {
            Ok(html) => Html(html).into_response(),
            Err(e) => {
                error!(error = %e, "Template render error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }

    /// Authenticate Basic credentials guarded by a CSRF token.
    ///
    /// The CSRF token is checked before the credentials are looked at. Only
    /// verified ID tokens are cached, and a cached token is re-verified
    /// against the provider on every hit.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let csrf_token = headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingCsrfToken)?;
        self.verify_token(csrf_token)?;

        let (username, password) = basic_credentials(headers)?;
        let key = cache_key(&username, &password);

        if let Some(id_token) = self.core.cache().get(&key) {
            debug!(user = %username, "ID token cache hit");
            if let Err(e) = self.core.verifier().verify(&id_token).await {
                debug!(user = %username, error = %e, "Cached ID token no longer valid");
                self.core.cache().remove(&key);
                return Err(e.into());
            }
            return Ok(id_token);
        }

        debug!(user = %username, "ID token cache miss");
        let id_token = self.request_token(&username, &password).await?;
        self.core.verifier().verify(&id_token).await?;
        self.core.cache().add(key, id_token.clone());
        Ok(id_token)
    }

    /// Password grant exchange at the token endpoint
    async fn request_token(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let tokens = self.core.oauth().password_grant(username, password).await?;
        tokens.id_token.ok_or(AuthError::MissingIdToken)
    }

    /// This grant has no redirect phase
    pub fn callback(&self) -> Response {
        unauthorized(&AuthError::CallbackNotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_template_embeds_token() {
        let html = LoginTemplate {
            registry_name: "Registry",
            csrf_token: "tok.en",
            csrf_header: CSRF_HEADER,
            action_url: "/login",
        }
        .render()
        .unwrap();

        assert!(html.contains(r#"name="csrf_token" value="tok.en""#));
        assert!(html.contains("x-csrf-token"));
    }

    #[test]
    fn test_login_template_escapes_values() {
        let html = LoginTemplate {
            registry_name: "<script>",
            csrf_token: "\"><x",
            csrf_header: CSRF_HEADER,
            action_url: "/login",
        }
        .render()
        .unwrap();

        assert!(!html.contains("Sign in to <script>"));
        assert!(!html.contains(r#"value=""><x""#));
    }
}
