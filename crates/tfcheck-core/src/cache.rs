//! Per-run toolchain cache.
//!
//! Maps a resolved version to an installed executable. Each version is
//! installed at most once per run: the first caller performs the install,
//! concurrent callers for the same version wait on it, and everyone observes
//! the same path or the same error. Different versions install in parallel.
//!
//! Layout under the run's install root:
//!
//! ```text
//! <root>/
//!   1.5.7/terraform
//!   1.9.2/terraform
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use semver::Version;
use tfcheck_toolchain::{Installer, ToolchainError};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::error::InstallError;

type InstallSlot = Arc<OnceCell<Result<PathBuf, InstallError>>>;

/// Version-keyed, single-flight installation cache.
pub struct ToolchainCache {
    installer: Arc<dyn Installer>,
    product: String,
    root: PathBuf,
    slots: Mutex<HashMap<Version, InstallSlot>>,
}

impl ToolchainCache {
    /// Cache installing `product` below `root`. The caller owns `root` and is
    /// responsible for removing it.
    pub fn new(installer: Arc<dyn Installer>, product: &str, root: &Path) -> Self {
        ToolchainCache {
            installer,
            product: product.to_string(),
            root: root.to_path_buf(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the executable for `version`, installing it on first use.
    ///
    /// Failed installs are remembered; later calls for the same version fail
    /// immediately with the original error. An installer that panics counts
    /// as a failed install.
    pub async fn ensure(&self, version: &Version) -> Result<PathBuf, InstallError> {
        let slot = self.slot(version);

        slot.get_or_init(|| self.install(version))
            .await
            .clone()
    }

    fn slot(&self, version: &Version) -> InstallSlot {
        // Held only for the lookup; the install itself runs outside it.
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(version.clone()).or_default())
    }

    async fn install(&self, version: &Version) -> Result<PathBuf, InstallError> {
        let dir = self.root.join(version.to_string());
        debug!(%version, dir = %dir.display(), "Installing new terraform version");

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| InstallError {
                version: version.clone(),
                source: Arc::new(ToolchainError::from(e)),
            })?;

        // Run on its own task so a panicking installer still settles the slot.
        let installer = Arc::clone(&self.installer);
        let product = self.product.clone();
        let task_version = version.clone();
        let joined = tokio::spawn(async move {
            installer.install(&product, &task_version, &dir).await
        })
        .await;

        let installed = joined.unwrap_or_else(|e| {
            error!(%version, "Install task did not complete: {}", e);
            Err(ToolchainError::InstallAborted {
                product: self.product.clone(),
                version: version.to_string(),
                reason: e.to_string(),
            })
        });

        match installed {
            Ok(path) => {
                info!(%version, path = %path.display(), "Toolchain ready");
                Ok(path)
            }
            Err(e) => Err(InstallError {
                version: version.clone(),
                source: Arc::new(e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tfcheck_toolchain::fakes::CountingInstaller;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_install_once_sequential() {
        let root = tempfile::tempdir().unwrap();
        let installer = Arc::new(CountingInstaller::new());
        let cache = ToolchainCache::new(installer.clone(), "terraform", root.path());

        let first = cache.ensure(&v("1.5.7")).await.unwrap();
        let second = cache.ensure(&v("1.5.7")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, root.path().join("1.5.7").join("terraform"));
        assert_eq!(installer.install_count("1.5.7"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensure_installs_once() {
        let root = tempfile::tempdir().unwrap();
        let installer =
            Arc::new(CountingInstaller::new().with_delay(Duration::from_millis(50)));
        let cache = Arc::new(ToolchainCache::new(
            installer.clone(),
            "terraform",
            root.path(),
        ));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move { cache.ensure(&v("1.5.7")).await }));
        }

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap().unwrap());
        }

        assert_eq!(installer.install_count("1.5.7"), 1);
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_versions_each_install_once() {
        let root = tempfile::tempdir().unwrap();
        let installer =
            Arc::new(CountingInstaller::new().with_delay(Duration::from_millis(20)));
        let cache = Arc::new(ToolchainCache::new(
            installer.clone(),
            "terraform",
            root.path(),
        ));

        let mut tasks = Vec::new();
        for i in 0..12 {
            let cache = Arc::clone(&cache);
            let version = if i % 2 == 0 { "1.5.7" } else { "1.9.2" };
            tasks.push(tokio::spawn(async move { cache.ensure(&v(version)).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(installer.install_count("1.5.7"), 1);
        assert_eq!(installer.install_count("1.9.2"), 1);
        assert_eq!(installer.total_installs(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_install_is_cached() {
        let root = tempfile::tempdir().unwrap();
        let installer = Arc::new(
            CountingInstaller::new()
                .failing_on("0.9.0")
                .with_delay(Duration::from_millis(20)),
        );
        let cache = Arc::new(ToolchainCache::new(
            installer.clone(),
            "terraform",
            root.path(),
        ));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move { cache.ensure(&v("0.9.0")).await }));
        }

        let mut errors = Vec::new();
        for task in tasks {
            errors.push(task.await.unwrap().unwrap_err());
        }
        let later = cache.ensure(&v("0.9.0")).await.unwrap_err();

        assert_eq!(installer.install_count("0.9.0"), 1);
        assert!(errors
            .iter()
            .all(|e| Arc::ptr_eq(&e.source, &later.source)));
        assert_eq!(later.version, v("0.9.0"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_install_is_cached_as_failure() {
        let root = tempfile::tempdir().unwrap();
        let installer = Arc::new(
            CountingInstaller::new()
                .panicking_on("1.5.7")
                .with_delay(Duration::from_millis(20)),
        );
        let cache = Arc::new(ToolchainCache::new(
            installer.clone(),
            "terraform",
            root.path(),
        ));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move { cache.ensure(&v("1.5.7")).await }));
        }

        let mut errors = Vec::new();
        for task in tasks {
            errors.push(task.await.unwrap().unwrap_err());
        }
        let later = cache.ensure(&v("1.5.7")).await.unwrap_err();

        assert_eq!(installer.install_count("1.5.7"), 1);
        assert!(errors
            .iter()
            .all(|e| Arc::ptr_eq(&e.source, &later.source)));
        assert!(matches!(
            *later.source,
            ToolchainError::InstallAborted { .. }
        ));
    }
}
