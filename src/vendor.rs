//! Resolve and install vendor packages into a design directory.
//!
//! A package manifest is fetched fresh per install from the repository base
//! URL, its `tags.latest` version selected, declared dependencies installed
//! first, then the version's tarball unpacked under `vendor/{name}`. An
//! explicit visited set threads through the recursion so cyclic or duplicate
//! dependency graphs terminate; the on-disk presence check only prevents
//! re-downloading what a previous run already installed.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, error, info};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::archive::{self, ArchiveError};

pub const DEFAULT_REPOSITORY: &str = "http://kan.so/repository";

/// Manifest JSON served by the package repository.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub tags: Option<ManifestTags>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestTags {
    pub latest: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionEntry {
    /// Dependency name → version constraint. Only the names matter here;
    /// constraints are not interpreted.
    #[serde(default)]
    pub dependencies: BTreeMap<String, serde_json::Value>,
}

impl PackageManifest {
    /// Names of the dependencies declared by `version`.
    fn dependencies_of(&self, version: &str) -> Vec<String> {
        self.versions
            .get(version)
            .map(|entry| entry.dependencies.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("could not retrieve package info for {package}: no tags in manifest")]
    MissingTags { package: String },

    #[error("failed to fetch manifest for {package} from {url}: {source}")]
    Manifest {
        package: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Repository surface the installer needs; mocked in tests.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PackageRepository: Send + Sync {
    /// Fetch the manifest JSON for a package.
    async fn manifest(&self, package: &str) -> Result<PackageManifest, VendorError>;

    /// Fetch `{package}-{version}.tar.gz` and install it under `dest`.
    async fn install_archive(
        &self,
        package: &str,
        version: &str,
        dest: &Path,
    ) -> Result<(), VendorError>;
}

/// HTTP package repository rooted at a base URL.
pub struct HttpRepository {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRepository {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn package_url(&self, package: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), package)
    }
}

#[async_trait]
impl PackageRepository for HttpRepository {
    async fn manifest(&self, package: &str) -> Result<PackageManifest, VendorError> {
        let url = self.package_url(package);
        debug!(url = %url, "fetching package manifest");
        let manifest_err = |source| VendorError::Manifest {
            package: package.to_string(),
            url: url.clone(),
            source,
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(manifest_err)?;
        response.json().await.map_err(manifest_err)
    }

    async fn install_archive(
        &self,
        package: &str,
        version: &str,
        dest: &Path,
    ) -> Result<(), VendorError> {
        let url = format!(
            "{}/{package}-{version}.tar.gz",
            self.package_url(package)
        );
        archive::fetch_and_extract(&self.client, &url, dest, None).await?;
        Ok(())
    }
}

/// Install each requested package with its transitive dependencies.
///
/// A package whose manifest lacks `tags` is reported and skipped; the
/// remaining requested packages still install. Archive failures propagate:
/// nothing sensible can continue once a download is not a readable archive.
pub async fn install_packages<R: PackageRepository>(
    repo: &R,
    packages: &[String],
    design_dir: &Path,
) -> Result<(), VendorError> {
    let mut visited = HashSet::new();
    for package in packages {
        match install_one(repo, package, design_dir, &mut visited).await {
            Ok(()) => {}
            Err(VendorError::MissingTags { ref package }) => {
                error!(package = %package, "could not retrieve package info, skipping");
            }
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

fn install_one<'a, R: PackageRepository>(
    repo: &'a R,
    package: &'a str,
    design_dir: &'a Path,
    visited: &'a mut HashSet<String>,
) -> BoxFuture<'a, Result<(), VendorError>> {
    // Recursive async functions need an explicitly boxed future.
    Box::pin(async move {
        if !visited.insert(package.to_string()) {
            debug!(package, "already visited in this run, skipping");
            return Ok(());
        }

        let vendor_dir = design_dir.join("vendor");
        let manifest = repo.manifest(package).await?;
        let Some(tags) = manifest.tags.as_ref() else {
            return Err(VendorError::MissingTags {
                package: package.to_string(),
            });
        };
        let latest = tags.latest.clone();

        let dependencies = manifest.dependencies_of(&latest);
        if !dependencies.is_empty() {
            info!(package, count = dependencies.len(), "fetching dependencies");
            for dependency in &dependencies {
                if vendor_dir.join(dependency).exists() {
                    debug!(package = %dependency, "already installed on disk, skipping");
                    visited.insert(dependency.clone());
                    continue;
                }
                install_one(repo, dependency, design_dir, visited).await?;
            }
        }

        let dest = vendor_dir.join(package);
        repo.install_archive(package, &latest, &dest).await?;
        info!(package, version = %latest, dest = %dest.display(), "installed package");
        Ok(())
    })
}
