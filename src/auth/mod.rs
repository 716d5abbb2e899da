//! Authentication core
//!
//! One [`Authenticator`] is selected at startup from [`AuthConfig`]:
//!
//! - [`NoOpAuthenticator`]: authentication disabled, every request passes
//! - [`BasicAuthenticator`]: static username / SHA-256 password list
//! - [`OidcCodeAuthenticator`]: OIDC authorization-code grant (browser redirect)
//! - [`OidcPasswordAuthenticator`]: OIDC resource-owner password grant with
//!   stateless CSRF tokens and an ID token cache
//!
//! Every variant supports [`Authenticator::authenticate`]. The `/login` and
//! `/callback` handlers match on the variant and only call the operations that
//! variant actually has.

pub mod basic;
pub mod code;
pub mod csrf;
pub mod noop;
pub mod oidc;
pub mod password;
pub mod users;

use aes_gcm::aead::{OsRng, rand_core::RngCore};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::{Engine as _, engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AuthConfig, AuthType, GrantType};
use crate::{Error, Result};

pub use basic::BasicAuthenticator;
pub use code::{CallbackParams, OidcCodeAuthenticator};
pub use csrf::{CSRF_HEADER, CsrfCodec, CsrfError};
pub use noop::NoOpAuthenticator;
pub use oidc::{OidcCore, OidcError, OidcSettings};
pub use password::OidcPasswordAuthenticator;
pub use users::{CredentialStore, hash_password};

/// Per-request authentication failure.
///
/// The display strings are stable; clients and tests match on them.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization` header on the request
    #[error("authorization header not found")]
    HeaderNotFound,

    /// `Authorization` header is not well-formed Basic credentials
    #[error("missing credentials")]
    MissingCredentials,

    /// No configured user matches
    #[error("invalid username or password")]
    InvalidCredentials,

    /// `Authorization` header uses the wrong scheme or is not valid text
    #[error("invalid authorization header")]
    InvalidAuthorizationHeader,

    /// Password grant request without `x-csrf-token`
    #[error("missing CSRF token")]
    MissingCsrfToken,

    /// CSRF token rejected
    #[error("{0}")]
    Csrf(#[from] CsrfError),

    /// Token endpoint response without an `id_token`
    #[error("missing id token")]
    MissingIdToken,

    /// Provider call or ID token verification failed
    #[error("{0}")]
    Oidc(#[from] OidcError),

    /// OS random source failed
    #[error("failed to generate random value: {0}")]
    Random(String),

    /// Callback without a `state` cookie
    #[error("state not found")]
    StateNotFound,

    /// Callback `state` parameter differs from the cookie
    #[error("state did not match")]
    StateMismatch,

    /// Callback without a `code` parameter
    #[error("code not found")]
    CodeNotFound,

    /// Authorization code exchange failed
    #[error("Failed to exchange code for token")]
    CodeExchange,

    /// Code exchange response without an `id_token`
    #[error("Failed to get id token")]
    IdTokenNotFound,

    /// ID token `nonce` differs from the `nonce` cookie
    #[error("nonce did not match")]
    NonceMismatch,

    /// Strategy has no redirect phase
    #[error("callback not supported")]
    CallbackNotSupported,
}

/// Identity established by the auth middleware, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    /// Opaque token returned by the authenticator (empty for [`NoOpAuthenticator`])
    pub token: String,
}

/// The configured authentication strategy.
pub enum Authenticator {
    /// Authentication disabled
    NoOp(NoOpAuthenticator),
    /// Static credentials
    Basic(BasicAuthenticator),
    /// OIDC authorization-code grant
    OidcCode(OidcCodeAuthenticator),
    /// OIDC resource-owner password grant
    OidcPassword(OidcPasswordAuthenticator),
}

impl Authenticator {
    /// Build the authenticator described by `config`.
    ///
    /// `base_url` is the externally visible registry URL; the OIDC redirect URI
    /// is `<base_url>/callback`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Oidc`] if provider discovery fails and [`Error::Csrf`]
    /// if the CSRF keys cannot be generated. Neither is recoverable; the
    /// caller should refuse to start.
    pub async fn from_config(config: &AuthConfig, base_url: &str) -> Result<Self> {
        if !config.enabled {
            warn!("AUTHENTICATION disabled - registry is open to all requests");
            return Ok(Self::NoOp(NoOpAuthenticator));
        }

        match config.auth_type {
            AuthType::Basic => {
                info!(users = config.users.len(), "Using basic authentication");
                Ok(Self::Basic(BasicAuthenticator::new(CredentialStore::from_config(
                    &config.users,
                ))))
            }
            AuthType::Oidc => {
                let settings = OidcSettings {
                    issuer: config.issuer.clone(),
                    client_id: config.client_id.clone(),
                    client_secret: config.resolve_client_secret(),
                    redirect_url: format!("{}/callback", base_url.trim_end_matches('/')),
                };
                let core = OidcCore::discover(
                    settings,
                    config.jwt_cache_size,
                    config.jwt_cache_ttl(),
                )
                .await?;

                match config.grant_type {
                    GrantType::Code => {
                        info!(issuer = %config.issuer, "Using OIDC authentication (code grant)");
                        Ok(Self::OidcCode(OidcCodeAuthenticator::new(core)))
                    }
                    GrantType::Password => {
                        info!(issuer = %config.issuer, "Using OIDC authentication (password grant)");
                        let authenticator = OidcPasswordAuthenticator::new(core)
                            .map_err(|e| Error::Csrf(e.to_string()))?;
                        Ok(Self::OidcPassword(authenticator))
                    }
                }
            }
        }
    }

    /// Authenticate a request from its headers, returning the opaque token.
    pub async fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<String, AuthError> {
        match self {
            Self::NoOp(a) => a.authenticate(headers),
            Self::Basic(a) => a.authenticate(headers),
            Self::OidcCode(a) => a.authenticate(headers).await,
            Self::OidcPassword(a) => a.authenticate(headers).await,
        }
    }

    /// Short variant name for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoOp(_) => "none",
            Self::Basic(_) => "basic",
            Self::OidcCode(_) => "oidc-code",
            Self::OidcPassword(_) => "oidc-password",
        }
    }
}

/// Raw `Authorization` header value.
pub(crate) fn authorization_header(headers: &HeaderMap) -> std::result::Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::HeaderNotFound)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthorizationHeader)
}

/// Username and password from an `Authorization: Basic` header.
pub(crate) fn basic_credentials(
    headers: &HeaderMap,
) -> std::result::Result<(String, String), AuthError> {
    let value = authorization_header(headers).map_err(|e| match e {
        AuthError::HeaderNotFound => e,
        _ => AuthError::MissingCredentials,
    })?;

    let encoded = strip_scheme(value, "Basic").ok_or(AuthError::MissingCredentials)?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::MissingCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MissingCredentials)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthError::MissingCredentials)?;

    Ok((username.to_string(), password.to_string()))
}

/// Token from an `Authorization: Bearer` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> std::result::Result<&str, AuthError> {
    let value = authorization_header(headers)?;
    let token = strip_scheme(value, "Bearer").ok_or(AuthError::InvalidAuthorizationHeader)?;
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidAuthorizationHeader);
    }
    Ok(token)
}

/// Strip an auth scheme prefix (case-insensitive) followed by a space.
fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (prefix, rest) = value.split_at_checked(scheme.len())?;
    if !prefix.eq_ignore_ascii_case(scheme) {
        return None;
    }
    rest.strip_prefix(' ')
}

/// Random URL-safe string of `len` bytes of OS entropy.
pub(crate) fn random_string(len: usize) -> std::result::Result<String, AuthError> {
    let mut bytes = vec![0_u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Random(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// 401 response carrying the plain error message (login/callback handlers).
pub(crate) fn unauthorized(err: &AuthError) -> Response {
    (StatusCode::UNAUTHORIZED, err.to_string()).into_response()
}

/// 200 response echoing an existing `Authorization` header (already logged in).
pub(crate) fn already_authenticated(headers: &HeaderMap) -> Option<Response> {
    let value = headers.get(header::AUTHORIZATION)?;
    Some((StatusCode::OK, value.as_bytes().to_vec()).into_response())
}
