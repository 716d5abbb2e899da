//! Swift Package Registry server
//!
//! Implements the package registry protocol (list, release metadata, archive
//! download, manifest, publish) behind a pluggable authentication layer:
//!
//! - **Disabled**: every request passes
//! - **Basic**: static users with SHA-256 password digests
//! - **OIDC code grant**: browser redirect login with `state`/`nonce` cookies
//! - **OIDC password grant**: credential exchange guarded by stateless CSRF
//!   tokens, with a TTL-bounded LRU cache of ID tokens

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::Internal(format!("failed to install tracing subscriber: {e}")))
}
