//! Terraform CLI invocations.
//!
//! Runs `init`, `validate -json` and `fmt -check` with a specific executable
//! inside a module directory and translates their output into reports.

use crate::error::ToolchainError;
use crate::{Result, ToolchainExecutor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Exit status `terraform fmt -check` uses for "files need formatting".
const FMT_UNFORMATTED_EXIT: i32 = 3;

/// Diagnostic severity as reported by `terraform validate -json`.
///
/// Only `error` carries meaning for tfcheck; anything else is advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    #[serde(other)]
    Other,
}

/// Source position inside a diagnostic range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub line: u64,
    #[serde(default)]
    pub column: u64,
}

/// File range a diagnostic points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub filename: String,
    pub start: Pos,
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub range: Option<Range>,
}

impl Diagnostic {
    /// File the diagnostic refers to, or empty when it has no range.
    pub fn filename(&self) -> &str {
        self.range.as_ref().map(|r| r.filename.as_str()).unwrap_or("")
    }

    /// Start line, or 0 when it has no range.
    pub fn line(&self) -> u64 {
        self.range.as_ref().map(|r| r.start.line).unwrap_or(0)
    }
}

/// Output of `terraform validate -json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateReport {
    pub valid: bool,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Outcome of `terraform fmt -check`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatReport {
    pub formatted: bool,
    /// Files that would be rewritten.
    pub files: Vec<String>,
}

/// Captured output of one CLI call.
#[derive(Debug, Clone)]
struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Interpret `fmt -check -list=true` output.
pub fn parse_format_output(exit_code: i32, stdout: &str, stderr: &str) -> Result<FormatReport> {
    match exit_code {
        0 => Ok(FormatReport {
            formatted: true,
            files: Vec::new(),
        }),
        FMT_UNFORMATTED_EXIT => Ok(FormatReport {
            formatted: false,
            files: stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        }),
        code => Err(ToolchainError::CommandFailed {
            command: "terraform fmt".to_string(),
            code,
            stderr: stderr.trim().to_string(),
        }),
    }
}

/// Interpret `validate -json` output. Terraform exits non-zero for invalid
/// modules but still prints the JSON report, so the exit code only matters
/// when stdout is not a report.
pub fn parse_validate_output(exit_code: i32, stdout: &str, stderr: &str) -> Result<ValidateReport> {
    match serde_json::from_str::<ValidateReport>(stdout) {
        Ok(report) => Ok(report),
        Err(_) if exit_code != 0 => Err(ToolchainError::CommandFailed {
            command: "terraform validate".to_string(),
            code: exit_code,
            stderr: stderr.trim().to_string(),
        }),
        Err(e) => Err(ToolchainError::UnexpectedOutput {
            command: "terraform validate".to_string(),
            detail: e.to_string(),
        }),
    }
}

/// [`ToolchainExecutor`] that shells out to the Terraform CLI.
#[derive(Debug, Clone, Default)]
pub struct TerraformCli;

impl TerraformCli {
    pub fn new() -> Self {
        TerraformCli
    }

    async fn run(&self, exec: &Path, module: &Path, args: &[&str]) -> Result<CommandOutput> {
        debug!(exec = %exec.display(), module = %module.display(), ?args, "Running terraform");

        let output = Command::new(exec)
            .args(args)
            .current_dir(module)
            .env("TF_IN_AUTOMATION", "1")
            .env("CHECKPOINT_DISABLE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ToolchainError::Spawn {
                command: format!("{} {}", exec.display(), args.join(" ")),
                source,
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl ToolchainExecutor for TerraformCli {
    async fn init(&self, module: &Path, exec: &Path) -> Result<()> {
        let out = self
            .run(exec, module, &["init", "-backend=false", "-input=false", "-no-color"])
            .await?;
        if out.exit_code == 0 {
            Ok(())
        } else {
            Err(ToolchainError::CommandFailed {
                command: "terraform init".to_string(),
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            })
        }
    }

    async fn validate(&self, module: &Path, exec: &Path) -> Result<ValidateReport> {
        let out = self
            .run(exec, module, &["validate", "-json", "-no-color"])
            .await?;
        parse_validate_output(out.exit_code, &out.stdout, &out.stderr)
    }

    async fn format_check(&self, module: &Path, exec: &Path) -> Result<FormatReport> {
        let out = self
            .run(exec, module, &["fmt", "-check", "-list=true", "-no-color"])
            .await?;
        parse_format_output(out.exit_code, &out.stdout, &out.stderr)
    }
}
