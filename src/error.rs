//! Error types for the registry server

use std::io;

use thiserror::Error;

use crate::auth::oidc::OidcError;

/// Result type alias for the registry server
pub type Result<T> = std::result::Result<T, Error>;

/// Process-level registry errors.
///
/// Per-request authentication failures are [`crate::auth::AuthError`]; this
/// type covers startup and serving failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// OIDC provider could not be set up (discovery, HTTP client)
    #[error("OIDC provider error: {0}")]
    Oidc(#[from] OidcError),

    /// CSRF codec could not be initialised
    #[error("CSRF setup error: {0}")]
    Csrf(String),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
