//! Error types for tfcheck-toolchain

use thiserror::Error;

/// Errors that can occur while talking to the release registry, installing a
/// toolchain, or invoking it against a module.
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// Release registry returned something unusable
    #[error("Release registry error: {0}")]
    Registry(String),

    /// No build published for this host
    #[error("No {product} {version} build for {os}/{arch}")]
    UnsupportedPlatform {
        product: String,
        version: String,
        os: String,
        arch: String,
    },

    /// Downloaded archive does not match the published SHA-256
    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// Published checksum list has no entry for the archive
    #[error("No published checksum for {0}")]
    ChecksumMissing(String),

    /// Executable missing after extraction
    #[error("Executable not found after install: {0}")]
    ExecutableMissing(String),

    /// External command could not be spawned
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Required helper program is not installed on the host
    #[error("{tool} not found on PATH; install it to unpack {product} releases")]
    ToolMissing { tool: String, product: String },

    /// Install task ended without producing a result
    #[error("Install of {product} {version} aborted: {reason}")]
    InstallAborted {
        product: String,
        version: String,
        reason: String,
    },

    /// External command ran but failed
    #[error("{command} failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Tool output could not be interpreted
    #[error("Unexpected output from {command}: {detail}")]
    UnexpectedOutput { command: String, detail: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for ToolchainError {
    fn from(err: reqwest::Error) -> Self {
        ToolchainError::Http(err.to_string())
    }
}
