//! tfcheck core - concurrent validation of changed Terraform modules
//!
//! For every changed module:
//! - Reads the declared `required_version` (or a default)
//! - Resolves it to the highest matching published release
//! - Installs that release once per run, shared by all modules needing it
//! - Runs `init`, `validate` and `fmt -check`, collecting diagnostics
//!
//! The number of failed modules becomes the process exit status.

pub mod cache;
pub mod changes;
pub mod constraint;
pub mod error;
pub mod git;
pub mod orchestrator;
pub mod pipeline;
pub mod stage;
pub mod telemetry;
pub mod version;

// Re-export key types
pub use cache::ToolchainCache;
pub use changes::{find_changed_modules, modules_from_diff};
pub use constraint::{Constraint, ConstraintReader, ConstraintSource, DEFAULT_CONSTRAINT};
pub use error::{CheckError, ConstraintError, GitError, InstallError, ResolveError};
pub use orchestrator::{
    InstallRoot, ModuleChecker, ModuleReport, OrchestratorConfig, RunOrchestrator, RunResult,
};
pub use pipeline::{ValidationOutcome, ValidationPipeline};
pub use stage::{Stage, StageRecord};
pub use telemetry::init_tracing;
pub use version::{VersionConstraints, VersionResolver};
