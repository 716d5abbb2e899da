//! Package registry protocol
//!
//! Storage is behind the [`Repository`] trait; [`fs::FsRepository`] keeps
//! archives on the local filesystem. [`handlers`] maps the registry HTTP
//! endpoints onto a repository.

pub mod fs;
pub mod handlers;

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub use fs::FsRepository;

/// Value of the `Content-Version` header on every response
pub const CONTENT_VERSION: &str = "1";

/// Media type for error bodies
pub const PROBLEM_JSON: &str = "application/problem+json";

/// Registry request failure, rendered as problem JSON
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Scope, name or version contains characters outside `[A-Za-z0-9-_.]`
    #[error("invalid {field}: {value}")]
    InvalidIdentifier {
        /// Which path segment
        field: &'static str,
        /// Offending value
        value: String,
    },

    /// Unknown package or release
    #[error("{0} not found")]
    NotFound(String),

    /// Release already published
    #[error("release {0} already exists")]
    AlreadyExists(String),

    /// Publish request without a body
    #[error("source archive is empty")]
    EmptyArchive,

    /// Storage failure
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidIdentifier { .. } | Self::EmptyArchive => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if let Self::Io(e) = &self {
            error!(error = %e, "Repository storage error");
            "internal storage error".to_string()
        } else {
            self.to_string()
        };

        let mut response = (status, axum::Json(json!({ "detail": detail }))).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        response
    }
}

/// A package within a scope, e.g. `mona.LinkedList`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    scope: String,
    name: String,
}

impl PackageId {
    /// Validate and build a package identifier
    pub fn new(scope: &str, name: &str) -> Result<Self, RegistryError> {
        validate_identifier("scope", scope)?;
        validate_identifier("name", name)?;
        Ok(Self {
            scope: scope.to_string(),
            name: name.to_string(),
        })
    }

    /// Package scope
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.scope, self.name)
    }
}

/// Reject anything that could escape the storage root.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), RegistryError> {
    let valid = !value.is_empty()
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidIdentifier {
            field,
            value: value.to_string(),
        })
    }
}

/// A downloadable release resource
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Resource {
    /// Resource name (`source-archive`)
    pub name: String,
    /// Media type
    #[serde(rename = "type")]
    pub media_type: String,
    /// Hex SHA-256 of the resource
    pub checksum: String,
}

/// Release metadata returned by `GET /{scope}/{name}/{version}`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// `scope.name`
    pub id: String,
    /// Release version
    pub version: String,
    /// Release resources
    pub resources: Vec<Resource>,
    /// Free-form metadata
    pub metadata: serde_json::Value,
}

/// Package storage
#[async_trait]
pub trait Repository: Send + Sync {
    /// Versions published for `package`, sorted
    async fn list_releases(&self, package: &PackageId) -> Result<Vec<String>, RegistryError>;

    /// Source archive of a release
    async fn fetch_archive(&self, package: &PackageId, version: &str)
    -> Result<Bytes, RegistryError>;

    /// Hex SHA-256 of a release's source archive
    async fn checksum(&self, package: &PackageId, version: &str) -> Result<String, RegistryError>;

    /// `Package.swift` of a release
    async fn fetch_manifest(
        &self,
        package: &PackageId,
        version: &str,
    ) -> Result<Bytes, RegistryError>;

    /// Store a new release; fails if the version already exists
    async fn publish(
        &self,
        package: &PackageId,
        version: &str,
        archive: Bytes,
    ) -> Result<(), RegistryError>;
}
