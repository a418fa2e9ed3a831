//! Per-module validation pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tfcheck_toolchain::{Diagnostic, Severity, ToolchainError, ToolchainExecutor};
use tracing::{error, info, warn};

use crate::error::CheckError;
use crate::stage::{InvocationPolicy, Stage, StageRecord};

/// Result of validating one module.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationOutcome {
    /// Diagnostics reported by `validate`.
    pub diagnostics: Vec<Diagnostic>,

    /// Files `fmt` would rewrite.
    pub unformatted_files: Vec<String>,

    /// Whether the module failed.
    pub failed: bool,

    /// Stages that ran, in order.
    pub stages: Vec<StageRecord>,
}

impl ValidationOutcome {
    /// Number of error-severity diagnostics.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Number of diagnostics of any other severity.
    pub fn warning_count(&self) -> usize {
        self.diagnostics.len() - self.error_count()
    }

    fn record(&mut self, stage: Stage, started: Instant, passed: bool, error: Option<String>) {
        self.stages.push(StageRecord {
            stage,
            passed,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        });
    }
}

/// Runs init, validate and fmt-check for a module, strictly in that order.
#[derive(Clone)]
pub struct ValidationPipeline {
    executor: Arc<dyn ToolchainExecutor>,
}

impl ValidationPipeline {
    pub fn new(executor: Arc<dyn ToolchainExecutor>) -> Self {
        ValidationPipeline { executor }
    }

    /// Validate `module` with the executable at `exec`.
    ///
    /// Returns `Err` only when `validate` cannot be invoked. Invalid
    /// configuration and unformatted files are reported through
    /// [`ValidationOutcome::failed`].
    pub async fn run(&self, module: &Path, exec: &Path) -> Result<ValidationOutcome, CheckError> {
        let module_name = module.display().to_string();
        let mut outcome = ValidationOutcome::default();

        // 1. init
        let started = Instant::now();
        match self.executor.init(module, exec).await {
            Ok(()) => outcome.record(Stage::Init, started, true, None),
            Err(e) => {
                invocation_failed(Stage::Init, &module_name, &e);
                outcome.record(Stage::Init, started, false, Some(e.to_string()));
            }
        }

        // 2. validate
        let started = Instant::now();
        let report = match self.executor.validate(module, exec).await {
            Ok(report) => report,
            Err(e) => {
                invocation_failed(Stage::Validate, &module_name, &e);
                return Err(CheckError::Pipeline(e));
            }
        };
        if !report.valid {
            outcome.failed = true;
        }
        outcome.record(Stage::Validate, started, report.valid, None);

        // 3. diagnostics
        for d in &report.diagnostics {
            log_diagnostic(&module_name, d);
        }
        outcome.diagnostics = report.diagnostics;

        // 4. fmt check
        let started = Instant::now();
        match self.executor.format_check(module, exec).await {
            Ok(fmt) if fmt.formatted => outcome.record(Stage::FormatCheck, started, true, None),
            Ok(fmt) => {
                error!(module = %module_name, "Unformatted files: {}", fmt.files.join(", "));
                outcome.failed = true;
                outcome.unformatted_files = fmt.files;
                outcome.record(Stage::FormatCheck, started, false, None);
            }
            Err(e) => {
                invocation_failed(Stage::FormatCheck, &module_name, &e);
                outcome.record(Stage::FormatCheck, started, false, Some(e.to_string()));
            }
        }

        Ok(outcome)
    }
}

fn invocation_failed(stage: Stage, module: &str, err: &ToolchainError) {
    match stage.invocation_policy() {
        InvocationPolicy::Warn => warn!(%module, %stage, "Terraform {} error: {}", stage, err),
        InvocationPolicy::Abort => error!(%module, %stage, "{}", err),
        InvocationPolicy::Advisory => info!(%module, %stage, "Could not run {}: {}", stage, err),
    }
}

fn log_diagnostic(module: &str, d: &Diagnostic) {
    let filename = d.filename();
    let line = d.line();
    match d.severity {
        Severity::Error => {
            let message = if d.detail.is_empty() { &d.summary } else { &d.detail };
            error!(%module, %filename, line, "{}", message);
        }
        _ => warn!(%module, %filename, line, "{}", d.summary),
    }
}
