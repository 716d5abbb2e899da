//! OIDC authorization-code grant
//!
//! `GET /login` sets random `state` and `nonce` cookies and redirects to the
//! provider. `GET /callback` checks `state` against its cookie, exchanges the
//! code and returns the ID token. Subsequent requests authenticate with
//! `Authorization: Bearer <id_token>`.

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::oidc::OidcCore;
use super::{AuthError, already_authenticated, bearer_token, random_string, unauthorized};

/// Cookie holding the anti-forgery `state`
pub const STATE_COOKIE: &str = "state";
/// Cookie holding the ID token `nonce`
pub const NONCE_COOKIE: &str = "nonce";

/// Bytes of entropy in `state` and `nonce`
const RANDOM_LEN: usize = 16;

/// Query parameters of `GET /callback`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Echoed `state`
    pub state: Option<String>,
    /// Provider error code
    pub error: Option<String>,
    /// Provider error description
    pub error_description: Option<String>,
}

/// Authenticator for the authorization-code grant
pub struct OidcCodeAuthenticator {
    core: OidcCore,
}

impl OidcCodeAuthenticator {
    /// Wrap a discovered provider
    #[must_use]
    pub fn new(core: OidcCore) -> Self {
        Self { core }
    }

    /// Shared provider state
    pub fn core(&self) -> &OidcCore {
        &self.core
    }

    /// Authorization URL for this login attempt
    #[must_use]
    pub fn auth_code_url(&self, state: &str, nonce: &str) -> String {
        self.core.oauth().auth_code_url(state, nonce)
    }

    /// Start a login: set `state`/`nonce` cookies and redirect (302) to the
    /// provider. `secure` marks the cookies `Secure`.
    pub fn login(&self, headers: &HeaderMap, secure: bool) -> Response {
        if let Some(response) = already_authenticated(headers) {
            return response;
        }

        let (state, nonce) = match (random_string(RANDOM_LEN), random_string(RANDOM_LEN)) {
            (Ok(state), Ok(nonce)) => (state, nonce),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Could not start OIDC login");
                return unauthorized(&e);
            }
        };

        let location = self.auth_code_url(&state, &nonce);
        let jar = CookieJar::new()
            .add(flow_cookie(STATE_COOKIE, state, secure))
            .add(flow_cookie(NONCE_COOKIE, nonce, secure));

        debug!("Redirecting to OIDC provider");
        (StatusCode::FOUND, jar, [(header::LOCATION, location)]).into_response()
    }

    /// Finish a login: validate `state`, exchange the code and return the ID
    /// token as the response body. The flow cookies are cleared on success.
    pub async fn callback(&self, jar: &CookieJar, params: CallbackParams) -> Response {
        match self.exchange(jar, params).await {
            Ok(id_token) => {
                let jar = jar
                    .clone()
                    .remove(Cookie::build(STATE_COOKIE).path("/"))
                    .remove(Cookie::build(NONCE_COOKIE).path("/"));
                (StatusCode::OK, jar, id_token).into_response()
            }
            Err(e) => {
                debug!(error = %e, "OIDC callback rejected");
                unauthorized(&e)
            }
        }
    }

    async fn exchange(&self, jar: &CookieJar, params: CallbackParams) -> Result<String, AuthError> {
        let expected_state = jar.get(STATE_COOKIE).ok_or(AuthError::StateNotFound)?;
        let state = params.state.unwrap_or_default();
        if !bool::from(state.as_bytes().ct_eq(expected_state.value().as_bytes())) {
            return Err(AuthError::StateMismatch);
        }

        if let Some(error) = &params.error {
            warn!(
                error = %error,
                description = params.error_description.as_deref().unwrap_or(""),
                "OIDC provider returned an error"
            );
        }
        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::CodeNotFound)?;

        let tokens = self.core.oauth().exchange_code(&code).await.map_err(|e| {
            warn!(error = %e, "Authorization code exchange failed");
            AuthError::CodeExchange
        })?;
        let id_token = tokens.id_token.ok_or(AuthError::IdTokenNotFound)?;

        let claims = self.core.verifier().verify(&id_token).await?;
        if let (Some(expected), Some(actual)) = (jar.get(NONCE_COOKIE), claims.nonce.as_deref()) {
            if !bool::from(actual.as_bytes().ct_eq(expected.value().as_bytes())) {
                return Err(AuthError::NonceMismatch);
            }
        }

        debug!(sub = %claims.sub, "OIDC login completed");
        Ok(id_token)
    }

    /// Authenticate a request carrying `Authorization: Bearer <id_token>`.
    ///
    /// The raw token is the established identity.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let token = bearer_token(headers)?;
        self.authenticate_token(token).await?;
        Ok(token.to_string())
    }

    /// Verify signature, issuer, audience and expiry of an ID token.
    pub async fn authenticate_token(&self, token: &str) -> Result<(), AuthError> {
        self.core.verifier().verify(token).await?;
        Ok(())
    }
}

fn flow_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .max_age(time::Duration::hours(1))
        .build()
}
