//! Run orchestration: one concurrent task per changed module.
//!
//! Every module goes through constraint → version → toolchain → pipeline in
//! its own task. Failures are counted, never propagated to sibling tasks.
//! After all tasks have joined, the run's install root is removed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use semver::Version;
use serde::Serialize;
use tempfile::TempDir;
use tfcheck_toolchain::{Installer, ToolchainExecutor, VersionSource, TERRAFORM};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::ToolchainCache;
use crate::constraint::{Constraint, ConstraintReader, DEFAULT_CONSTRAINT};
use crate::error::CheckError;
use crate::pipeline::{ValidationOutcome, ValidationPipeline};
use crate::version::VersionResolver;

/// Highest exit status a process can portably report.
const MAX_EXIT_CODE: usize = 255;

/// Process-scoped directory holding every toolchain installed during a run.
///
/// Removed by [`InstallRoot::close`] after the run, or on drop if the run is
/// abandoned early.
#[derive(Debug)]
pub struct InstallRoot {
    dir: TempDir,
}

impl InstallRoot {
    /// Create a fresh root below `parent`, or below the system temp dir.
    pub fn create(parent: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tfcheck-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(InstallRoot { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the root and everything installed in it.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Settings shared by every module task.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Registry product to resolve and install.
    pub product: String,

    /// Constraint for modules that do not declare one.
    pub default_constraint: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            product: TERRAFORM.to_string(),
            default_constraint: DEFAULT_CONSTRAINT.to_string(),
        }
    }
}

/// What happened to one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub module: PathBuf,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ValidationOutcome>,

    /// Error that ended the module's check early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub failed: bool,
}

impl ModuleReport {
    fn new(module: &Path) -> Self {
        ModuleReport {
            module: module.to_path_buf(),
            constraint: None,
            version: None,
            outcome: None,
            error: None,
            failed: false,
        }
    }
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Number of modules that failed.
    pub failed: usize,

    /// Per-module reports, in input order.
    pub modules: Vec<ModuleReport>,
}

impl RunResult {
    /// Whether every module passed.
    pub fn passed(&self) -> bool {
        self.failed == 0
    }

    /// Process exit status: the failure count, saturated at 255.
    pub fn exit_code(&self) -> i32 {
        self.failed.min(MAX_EXIT_CODE) as i32
    }
}

/// Checks a single module end to end.
pub struct ModuleChecker {
    reader: ConstraintReader,
    resolver: VersionResolver,
    cache: ToolchainCache,
    pipeline: ValidationPipeline,
}

impl ModuleChecker {
    pub fn new(
        reader: ConstraintReader,
        resolver: VersionResolver,
        cache: ToolchainCache,
        pipeline: ValidationPipeline,
    ) -> Self {
        ModuleChecker {
            reader,
            resolver,
            cache,
            pipeline,
        }
    }

    /// Check `module`, never returning early with an error: failures are
    /// logged and reflected in the report.
    pub async fn check(&self, module: &Path) -> ModuleReport {
        let mut report = ModuleReport::new(module);

        if let Err(e) = self.try_check(module, &mut report).await {
            error!(module = %module.display(), "{}", e);
            report.error = Some(e.to_string());
            report.failed = true;
        }

        report
    }

    async fn try_check(&self, module: &Path, report: &mut ModuleReport) -> Result<(), CheckError> {
        let constraint = self.reader.read(module).await?;
        report.constraint = Some(constraint.clone());

        let version = self.resolver.resolve(&constraint.expr).await?;
        report.version = Some(version.clone());
        debug!(module = %module.display(), %constraint, %version, "Using terraform version");

        let exec = self.cache.ensure(&version).await?;

        let outcome = self.pipeline.run(module, &exec).await?;
        report.failed = outcome.failed;
        report.outcome = Some(outcome);
        Ok(())
    }
}

/// Fans out module checks and owns the run's install root.
pub struct RunOrchestrator {
    root: InstallRoot,
    checker: Arc<ModuleChecker>,
}

impl RunOrchestrator {
    pub fn new(
        root: InstallRoot,
        config: OrchestratorConfig,
        source: Arc<dyn VersionSource>,
        installer: Arc<dyn Installer>,
        executor: Arc<dyn ToolchainExecutor>,
    ) -> Self {
        let checker = ModuleChecker::new(
            ConstraintReader::new(&config.default_constraint),
            VersionResolver::new(source, &config.product),
            ToolchainCache::new(installer, &config.product, root.path()),
            ValidationPipeline::new(executor),
        );
        RunOrchestrator {
            root,
            checker: Arc::new(checker),
        }
    }

    /// Validate every module concurrently and remove the install root.
    pub async fn run(self, modules: Vec<PathBuf>) -> RunResult {
        info!(
            "Modules to check: {}",
            modules
                .iter()
                .map(|m| m.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let failures = Arc::new(AtomicUsize::new(0));
        let mut join_set = JoinSet::new();

        for (idx, module) in modules.iter().cloned().enumerate() {
            let checker = Arc::clone(&self.checker);
            let failures = Arc::clone(&failures);
            join_set.spawn(async move {
                let report = checker.check(&module).await;
                if report.failed {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
                (idx, report)
            });
        }

        let mut slots: Vec<Option<ModuleReport>> = vec![None; modules.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, report)) => slots[idx] = Some(report),
                Err(e) => {
                    error!("Module task did not complete: {}", e);
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        // Slots left empty belong to tasks that panicked; they were counted above.
        let reports = modules
            .iter()
            .zip(slots)
            .map(|(module, slot)| {
                slot.unwrap_or_else(|| {
                    let mut report = ModuleReport::new(module);
                    report.error = Some("module task panicked".to_string());
                    report.failed = true;
                    report
                })
            })
            .collect();

        let failed = failures.load(Ordering::SeqCst);
        debug!("Total errors: {}", failed);

        let root = self.root.path().to_path_buf();
        debug!(root = %root.display(), "Delete binaries temporary folder");
        if let Err(e) = self.root.close() {
            warn!(root = %root.display(), "Failed to remove install root: {}", e);
        }

        RunResult {
            failed,
            modules: reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_saturates() {
        let result = RunResult {
            failed: 3,
            modules: Vec::new(),
        };
        assert_eq!(result.exit_code(), 3);
        assert!(!result.passed());

        let result = RunResult {
            failed: 300,
            modules: Vec::new(),
        };
        assert_eq!(result.exit_code(), 255);
    }

    #[test]
    fn test_install_root_close_removes_directory() {
        let parent = tempfile::tempdir().unwrap();
        let root = InstallRoot::create(Some(parent.path())).unwrap();
        let path = root.path().to_path_buf();
        std::fs::create_dir_all(path.join("1.5.7")).unwrap();
        std::fs::write(path.join("1.5.7").join("terraform"), b"bin").unwrap();

        assert!(path.starts_with(parent.path()));
        root.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_install_root_removed_on_drop() {
        let path = {
            let root = InstallRoot::create(None).unwrap();
            root.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.product, "terraform");
        assert_eq!(config.default_constraint, ">1.0.0");
    }
}
