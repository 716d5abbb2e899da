//! Filesystem repository
//!
//! Layout: `<root>/<scope>/<name>/<version>/source-archive.zip`, with an
//! optional `Package.swift` next to the archive.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{PackageId, RegistryError, Repository, validate_identifier};

const ARCHIVE_FILE: &str = "source-archive.zip";
const MANIFEST_FILE: &str = "Package.swift";

/// Repository rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsRepository {
    root: PathBuf,
}

impl FsRepository {
    /// Create a repository at `root` (created on first publish)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, package: &PackageId) -> PathBuf {
        self.root.join(package.scope()).join(package.name())
    }

    fn release_dir(&self, package: &PackageId, version: &str) -> Result<PathBuf, RegistryError> {
        validate_identifier("version", version)?;
        Ok(self.package_dir(package).join(version))
    }

    async fn read_release_file(
        &self,
        package: &PackageId,
        version: &str,
        file: &str,
    ) -> Result<Bytes, RegistryError> {
        let path = self.release_dir(package, version)?.join(file);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RegistryError::NotFound(format!(
                "{package} {version} {file}"
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Repository for FsRepository {
    async fn list_releases(&self, package: &PackageId) -> Result<Vec<String>, RegistryError> {
        let dir = self.package_dir(package);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(package.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(version) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if fs::try_exists(entry.path().join(ARCHIVE_FILE)).await? {
                versions.push(version);
            }
        }

        if versions.is_empty() {
            return Err(RegistryError::NotFound(package.to_string()));
        }
        versions.sort();
        Ok(versions)
    }

    async fn fetch_archive(
        &self,
        package: &PackageId,
        version: &str,
    ) -> Result<Bytes, RegistryError> {
        self.read_release_file(package, version, ARCHIVE_FILE).await
    }

    async fn checksum(&self, package: &PackageId, version: &str) -> Result<String, RegistryError> {
        let archive = self.fetch_archive(package, version).await?;
        Ok(hex::encode(Sha256::digest(&archive)))
    }

    async fn fetch_manifest(
        &self,
        package: &PackageId,
        version: &str,
    ) -> Result<Bytes, RegistryError> {
        self.read_release_file(package, version, MANIFEST_FILE).await
    }

    async fn publish(
        &self,
        package: &PackageId,
        version: &str,
        archive: Bytes,
    ) -> Result<(), RegistryError> {
        if archive.is_empty() {
            return Err(RegistryError::EmptyArchive);
        }

        let dir = self.release_dir(package, version)?;
        fs::create_dir_all(&dir).await?;

        let target = dir.join(ARCHIVE_FILE);
        let staging = dir.join(format!(".{ARCHIVE_FILE}.upload"));

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .await
        {
            Ok(file) => file,
            // Another upload of the same version is in flight
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RegistryError::AlreadyExists(format!("{package} {version}")));
            }
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(&archive).await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        // hard_link never replaces an existing release
        let linked = match written {
            Ok(()) => fs::hard_link(&staging, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = fs::remove_file(&staging).await {
            debug!(path = %staging.display(), error = %e, "Failed to remove staging file");
        }

        match linked {
            Ok(()) => {
                info!(package = %package, version = %version, bytes = archive.len(), "Release published");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(RegistryError::AlreadyExists(format!("{package} {version}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
