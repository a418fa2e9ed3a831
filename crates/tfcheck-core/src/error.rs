//! Error taxonomy for tfcheck.
//!
//! Every variant here is fatal to one module only; the orchestrator counts it
//! and moves on. Invalid configuration and unformatted files are not errors,
//! they are flags on [`crate::ValidationOutcome`].

use std::path::PathBuf;
use std::sync::Arc;

use semver::Version;
use tfcheck_toolchain::ToolchainError;

/// Failure to read a module's declared constraint.
#[derive(Debug, thiserror::Error)]
pub enum ConstraintError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("required_version in {} must be a string literal", path.display())]
    NotAString { path: PathBuf },
}

/// Failure to turn a constraint into a concrete version.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid version constraint {expr:?}: {reason}")]
    InvalidConstraint { expr: String, reason: String },

    #[error("no matching versions for constraint: {constraint}")]
    NoMatchingVersion { constraint: String },

    #[error("version registry query failed: {0}")]
    Registry(#[source] ToolchainError),
}

/// Installation failure, shared by every caller waiting on the same version.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to install terraform {version}: {source}")]
pub struct InstallError {
    pub version: Version,
    #[source]
    pub source: Arc<ToolchainError>,
}

/// Any error that ends a module's validation early.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("terraform invocation failed: {0}")]
    Pipeline(#[source] ToolchainError),
}

/// Failure of a git invocation during change discovery or setup.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git {args} failed: {stderr}")]
    Failed { args: String, stderr: String },
}

/// Result type for module checks.
pub type Result<T> = std::result::Result<T, CheckError>;
