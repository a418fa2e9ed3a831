//! HashiCorp release registry client
//!
//! Reads the public JSON indexes served at `releases.hashicorp.com`:
//!
//! ```text
//! <base>/<product>/index.json                      all versions
//! <base>/<product>/<version>/index.json            builds of one version
//! <base>/<product>/<version>/<product>_<version>_SHA256SUMS
//! ```

use crate::error::ToolchainError;
use crate::{Result, VersionSource};
use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Default registry location.
pub const DEFAULT_RELEASES_URL: &str = "https://releases.hashicorp.com";

/// Operating system / architecture pair, spelled the way the registry does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    /// Platform of the running process.
    pub fn host() -> Self {
        Self::from_rust(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Translate Rust target names (`macos`, `x86_64`) to registry names
    /// (`darwin`, `amd64`). Unknown names pass through unchanged.
    pub fn from_rust(os: &str, arch: &str) -> Self {
        let os = match os {
            "macos" => "darwin",
            other => other,
        };
        let arch = match arch {
            "x86_64" => "amd64",
            "x86" => "386",
            "aarch64" => "arm64",
            other => other,
        };
        Platform {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// `<product>/index.json`
#[derive(Debug, Clone, Deserialize)]
pub struct ProductIndex {
    pub name: String,
    /// Keyed by version string; only the keys are used here.
    pub versions: BTreeMap<String, serde_json::Value>,
}

/// `<product>/<version>/index.json`
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub name: String,
    pub version: String,
    /// File name of the SHA256SUMS listing for this release.
    pub shasums: String,
    #[serde(default)]
    pub builds: Vec<Build>,
}

/// One downloadable archive of a release.
#[derive(Debug, Clone, Deserialize)]
pub struct Build {
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub url: String,
}

impl Release {
    /// Find the build for `platform`.
    pub fn build_for(&self, platform: &Platform) -> Option<&Build> {
        self.builds
            .iter()
            .find(|b| b.os == platform.os && b.arch == platform.arch)
    }
}

/// Parse the version keys of a product index. Keys that are not valid
/// semantic versions are skipped.
pub fn parse_index_versions(index: &ProductIndex) -> Vec<Version> {
    index
        .versions
        .keys()
        .filter_map(|raw| match Version::parse(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(product = %index.name, version = %raw, "Skipping unparseable version: {}", e);
                None
            }
        })
        .collect()
}

/// Look up `filename` in a `SHA256SUMS` listing (`<hex>  <file>` per line).
pub fn find_checksum(listing: &str, filename: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let sum = parts.next()?;
        let file = parts.next()?;
        (file == filename).then(|| sum.to_ascii_lowercase())
    })
}

/// HTTP client for the release registry.
#[derive(Debug, Clone)]
pub struct ReleasesClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl ReleasesClient {
    /// Create a client for the registry at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tfcheck/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(ReleasesClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Registry base URL, without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the product index.
    pub async fn product_index(&self, product: &str) -> Result<ProductIndex> {
        let url = format!("{}/{}/index.json", self.base_url, product);
        debug!(%url, "Fetching product index");
        let index = self
            .http_client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<ProductIndex>()
            .await?;
        Ok(index)
    }

    /// Fetch the metadata of a single release.
    pub async fn release(&self, product: &str, version: &Version) -> Result<Release> {
        let url = format!("{}/{}/{}/index.json", self.base_url, product, version);
        debug!(%url, "Fetching release metadata");
        let release = self
            .http_client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Release>()
            .await?;
        Ok(release)
    }

    /// Fetch the SHA256SUMS listing of a release.
    pub async fn shasums(&self, release: &Release) -> Result<String> {
        let url = format!(
            "{}/{}/{}/{}",
            self.base_url, release.name, release.version, release.shasums
        );
        let body = self
            .http_client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    /// Download a build archive into memory.
    pub async fn download(&self, build: &Build) -> Result<Vec<u8>> {
        debug!(url = %build.url, "Downloading build");
        let bytes = self
            .http_client
            .get(&build.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl VersionSource for ReleasesClient {
    async fn list_versions(&self, product: &str) -> Result<Vec<Version>> {
        let index = self.product_index(product).await?;
        if index.name != product {
            return Err(ToolchainError::Registry(format!(
                "asked for {} but index describes {}",
                product, index.name
            )));
        }
        Ok(parse_index_versions(&index))
    }
}
