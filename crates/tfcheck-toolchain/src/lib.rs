//! tfcheck-toolchain: Terraform releases, installs and CLI invocations
//!
//! This crate is the external-facing layer of tfcheck. It knows how to list
//! published Terraform versions, install one of them into a directory, and
//! run `init` / `validate` / `fmt` against a module with a given executable.
//!
//! Each concern sits behind an async trait so the orchestration layer can be
//! exercised with the in-memory doubles in [`fakes`].

pub mod error;
pub mod fakes;
pub mod install;
pub mod registry;
pub mod terraform;

use async_trait::async_trait;
use semver::Version;
use std::path::{Path, PathBuf};

pub use error::ToolchainError;
pub use install::ReleaseInstaller;
pub use registry::{Platform, ReleasesClient, DEFAULT_RELEASES_URL};
pub use terraform::{Diagnostic, FormatReport, Severity, TerraformCli, ValidateReport};

/// Result type for toolchain operations
pub type Result<T> = std::result::Result<T, ToolchainError>;

/// Product identifier of the Terraform CLI in the release registry.
pub const TERRAFORM: &str = "terraform";

/// Source of published release versions for a product.
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// List every known version of `product`. No ordering is guaranteed.
    async fn list_versions(&self, product: &str) -> Result<Vec<Version>>;
}

/// Installs a concrete toolchain version into a directory.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install `product` at `version` into `dir` and return the executable path.
    async fn install(&self, product: &str, version: &Version, dir: &Path) -> Result<PathBuf>;
}

/// Runs toolchain subcommands against a module directory.
#[async_trait]
pub trait ToolchainExecutor: Send + Sync {
    /// Initialise the module without configuring a state backend.
    async fn init(&self, module: &Path, exec: &Path) -> Result<()>;

    /// Validate the module. An invalid module is a successful call with
    /// `valid == false`; `Err` means the validator could not be invoked.
    async fn validate(&self, module: &Path, exec: &Path) -> Result<ValidateReport>;

    /// Check formatting of the module's files.
    async fn format_check(&self, module: &Path, exec: &Path) -> Result<FormatReport>;
}
