//! Registry endpoint handlers

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{PackageId, RegistryError, ReleaseInfo, Resource, validate_identifier};
use crate::server::AppState;

fn release_url(state: &AppState, package: &PackageId, version: &str) -> String {
    format!(
        "{}/{}/{}/{version}",
        state.base_url,
        package.scope(),
        package.name()
    )
}

/// `GET /{scope}/{name}`
pub async fn list_releases(
    State(state): State<Arc<AppState>>,
    Path((scope, name)): Path<(String, String)>,
) -> Result<Json<Value>, RegistryError> {
    let package = PackageId::new(&scope, &name)?;
    let versions = state.repository.list_releases(&package).await?;

    let releases: Map<String, Value> = versions
        .into_iter()
        .map(|version| {
            let url = release_url(&state, &package, &version);
            (version, json!({ "url": url }))
        })
        .collect();

    Ok(Json(json!({ "releases": releases })))
}

/// `GET /{scope}/{name}/{version}`: release metadata, or the source
/// archive when `version` ends in `.zip`
pub async fn get_release(
    State(state): State<Arc<AppState>>,
    Path((scope, name, version)): Path<(String, String, String)>,
) -> Result<Response, RegistryError> {
    let package = PackageId::new(&scope, &name)?;

    if let Some(version) = version.strip_suffix(".zip") {
        validate_identifier("version", version)?;
        let archive = state.repository.fetch_archive(&package, version).await?;
        debug!(package = %package, version = %version, bytes = archive.len(), "Serving source archive");
        return Ok((
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}-{version}.zip\"", package.name()),
                ),
            ],
            archive,
        )
            .into_response());
    }

    validate_identifier("version", &version)?;
    let checksum = state.repository.checksum(&package, &version).await?;
    let info = ReleaseInfo {
        id: package.to_string(),
        version,
        resources: vec![Resource {
            name: "source-archive".to_string(),
            media_type: "application/zip".to_string(),
            checksum,
        }],
        metadata: json!({}),
    };
    Ok(Json(info).into_response())
}

/// `GET /{scope}/{name}/{version}/Package.swift`
pub async fn get_manifest(
    State(state): State<Arc<AppState>>,
    Path((scope, name, version)): Path<(String, String, String)>,
) -> Result<Response, RegistryError> {
    let package = PackageId::new(&scope, &name)?;
    let manifest = state.repository.fetch_manifest(&package, &version).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/x-swift"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"Package.swift\""),
        ],
        manifest,
    )
        .into_response())
}

/// `PUT /{scope}/{name}/{version}` with the zip archive as body
pub async fn publish_release(
    State(state): State<Arc<AppState>>,
    Path((scope, name, version)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, RegistryError> {
    let package = PackageId::new(&scope, &name)?;
    state.repository.publish(&package, &version, body).await?;

    let location = release_url(&state, &package, &version);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)]).into_response())
}
