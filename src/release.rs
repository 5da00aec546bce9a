//! Release index queries and asset selection.
//!
//! The index returns assets in upstream order. [`filter_archives`] keeps
//! only installable archives without reordering, and [`first_match`] picks
//! the first asset whose name contains the platform key. An empty result
//! is a normal outcome; the orchestrator turns it into
//! [`ProvisionError::NoAssetResolved`].

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::ReleasesConfig;
use crate::error::ProvisionError;
use crate::models::ReleaseAsset;

/// Source of release metadata for `owner/project`.
pub trait ReleaseIndex: Send + Sync {
    /// Lists the assets of the latest release, or of `version` when given.
    fn assets(
        &self,
        owner: &str,
        project: &str,
        version: Option<&str>,
    ) -> Result<Vec<ReleaseAsset>, ProvisionError>;
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

/// GitHub-compatible releases API.
pub struct GitHubReleases {
    client: reqwest::blocking::Client,
    api_base: String,
}

impl GitHubReleases {
    pub fn new(config: &ReleasesConfig) -> Result<Self, ProvisionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("rag-harness/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::ReleaseIndex(e.to_string()))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn release_url(&self, owner: &str, project: &str, version: Option<&str>) -> String {
        match version {
            Some(tag) => format!(
                "{}/repos/{}/{}/releases/tags/{}",
                self.api_base, owner, project, tag
            ),
            None => format!("{}/repos/{}/{}/releases/latest", self.api_base, owner, project),
        }
    }
}

impl ReleaseIndex for GitHubReleases {
    fn assets(
        &self,
        owner: &str,
        project: &str,
        version: Option<&str>,
    ) -> Result<Vec<ReleaseAsset>, ProvisionError> {
        let url = self.release_url(owner, project, version);
        debug!(%url, "querying release index");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .map_err(|e| ProvisionError::ReleaseIndex(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProvisionError::ReleaseIndex(format!(
                "{} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }

        let release: ReleaseResponse = response
            .json()
            .map_err(|e| ProvisionError::ReleaseIndex(format!("{}: {}", url, e)))?;
        Ok(release.assets)
    }
}

/// Keeps assets whose name ends with an allow-listed suffix, in input order.
pub fn filter_archives(assets: Vec<ReleaseAsset>, allow: &[String]) -> Vec<ReleaseAsset> {
    assets
        .into_iter()
        .filter(|asset| allow.iter().any(|suffix| asset.name.ends_with(suffix.as_str())))
        .collect()
}

/// First asset whose name contains `key`.
pub fn first_match<'a>(key: &str, assets: &'a [ReleaseAsset]) -> Option<&'a ReleaseAsset> {
    assets.iter().find(|asset| asset.name.contains(key))
}

/// Queries the index and applies the archive allow-list.
pub fn resolve(
    index: &dyn ReleaseIndex,
    owner: &str,
    project: &str,
    version: Option<&str>,
    allow: &[String],
) -> Result<Vec<ReleaseAsset>, ProvisionError> {
    let assets = index.assets(owner, project, version)?;
    let total = assets.len();
    let filtered = filter_archives(assets, allow);
    debug!(
        project,
        total,
        kept = filtered.len(),
        "filtered release assets"
    );
    Ok(filtered)
}
