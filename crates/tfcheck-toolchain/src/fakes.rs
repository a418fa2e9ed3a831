//! In-memory fakes for the toolchain traits (testing only)
//!
//! Provides `StaticVersionSource`, `CountingInstaller`, and `ScriptedExecutor`
//! that satisfy the trait contracts without network access or a Terraform
//! binary.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;

use crate::error::ToolchainError;
use crate::terraform::{Diagnostic, FormatReport, ValidateReport};
use crate::{Installer, Result, ToolchainExecutor, VersionSource};

fn scripted_failure(command: &str, message: &str) -> ToolchainError {
    ToolchainError::CommandFailed {
        command: command.to_string(),
        code: 1,
        stderr: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// StaticVersionSource
// ---------------------------------------------------------------------------

/// Version source returning a fixed snapshot.
#[derive(Debug, Default)]
pub struct StaticVersionSource {
    versions: Vec<Version>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StaticVersionSource {
    /// Snapshot of the given versions, in the given order.
    pub fn new(versions: &[&str]) -> Self {
        StaticVersionSource {
            versions: versions.iter().map(|v| Version::parse(v).unwrap()).collect(),
            ..Default::default()
        }
    }

    /// Source whose every query fails with `message`.
    pub fn failing(message: &str) -> Self {
        StaticVersionSource {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Number of `list_versions` calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionSource for StaticVersionSource {
    async fn list_versions(&self, _product: &str) -> Result<Vec<Version>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(msg) => Err(ToolchainError::Registry(msg.clone())),
            None => Ok(self.versions.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// CountingInstaller
// ---------------------------------------------------------------------------

/// Installer that writes a placeholder executable and records every call.
#[derive(Debug, Default)]
pub struct CountingInstaller {
    installs: Mutex<Vec<Version>>,
    failing: HashSet<Version>,
    panicking: HashSet<Version>,
    delay: Duration,
}

impl CountingInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside each install, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make installs of `version` fail.
    pub fn failing_on(mut self, version: &str) -> Self {
        self.failing.insert(Version::parse(version).unwrap());
        self
    }

    /// Make installs of `version` panic.
    pub fn panicking_on(mut self, version: &str) -> Self {
        self.panicking.insert(Version::parse(version).unwrap());
        self
    }

    /// How many times `version` was installed.
    pub fn install_count(&self, version: &str) -> usize {
        let version = Version::parse(version).unwrap();
        self.installs
            .lock()
            .unwrap()
            .iter()
            .filter(|v| **v == version)
            .count()
    }

    /// Total number of installs across versions.
    pub fn total_installs(&self) -> usize {
        self.installs.lock().unwrap().len()
    }
}

#[async_trait]
impl Installer for CountingInstaller {
    async fn install(&self, product: &str, version: &Version, dir: &Path) -> Result<PathBuf> {
        self.installs.lock().unwrap().push(version.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.panicking.contains(version) {
            panic!("installer crashed on {product} {version}");
        }

        if self.failing.contains(version) {
            return Err(ToolchainError::Http(format!(
                "download of {product} {version} failed"
            )));
        }

        tokio::fs::create_dir_all(dir).await?;
        let exec = dir.join(product);
        tokio::fs::write(&exec, b"#!/bin/sh\n").await?;
        Ok(exec)
    }
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// Behaviour of one module under [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub struct ModuleScript {
    pub init_error: Option<String>,
    pub validate_error: Option<String>,
    pub panic_on_validate: bool,
    pub valid: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub format_error: Option<String>,
    pub unformatted: Vec<String>,
}

impl Default for ModuleScript {
    fn default() -> Self {
        ModuleScript {
            init_error: None,
            validate_error: None,
            panic_on_validate: false,
            valid: true,
            diagnostics: Vec::new(),
            format_error: None,
            unformatted: Vec::new(),
        }
    }
}

impl ModuleScript {
    /// A valid, formatted module.
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn init_fails(mut self, message: &str) -> Self {
        self.init_error = Some(message.to_string());
        self
    }

    pub fn validate_fails(mut self, message: &str) -> Self {
        self.validate_error = Some(message.to_string());
        self
    }

    /// Panic inside `validate`, as a crashing executor would.
    pub fn validate_panics(mut self) -> Self {
        self.panic_on_validate = true;
        self
    }

    pub fn invalid(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.valid = false;
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn format_fails(mut self, message: &str) -> Self {
        self.format_error = Some(message.to_string());
        self
    }

    pub fn unformatted(mut self, files: &[&str]) -> Self {
        self.unformatted = files.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// Executor replaying per-module scripts and recording the call sequence.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<PathBuf, ModuleScript>,
    calls: Mutex<Vec<(PathBuf, &'static str)>>,
}

impl ScriptedExecutor {
    /// Every module behaves like [`ModuleScript::clean`] unless scripted.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: impl Into<PathBuf>, script: ModuleScript) -> Self {
        self.scripts.insert(module.into(), script);
        self
    }

    /// Subcommands invoked against `module`, in order.
    pub fn calls_for(&self, module: &Path) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == module)
            .map(|(_, c)| *c)
            .collect()
    }

    fn script(&self, module: &Path, call: &'static str) -> ModuleScript {
        self.calls
            .lock()
            .unwrap()
            .push((module.to_path_buf(), call));
        self.scripts.get(module).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ToolchainExecutor for ScriptedExecutor {
    async fn init(&self, module: &Path, _exec: &Path) -> Result<()> {
        match self.script(module, "init").init_error {
            Some(msg) => Err(scripted_failure("terraform init", &msg)),
            None => Ok(()),
        }
    }

    async fn validate(&self, module: &Path, _exec: &Path) -> Result<ValidateReport> {
        let script = self.script(module, "validate");
        if script.panic_on_validate {
            panic!("scripted executor crashed validating {}", module.display());
        }
        match script.validate_error {
            Some(msg) => Err(scripted_failure("terraform validate", &msg)),
            None => Ok(ValidateReport {
                valid: script.valid,
                diagnostics: script.diagnostics,
            }),
        }
    }

    async fn format_check(&self, module: &Path, _exec: &Path) -> Result<FormatReport> {
        let script = self.script(module, "fmt");
        match script.format_error {
            Some(msg) => Err(scripted_failure("terraform fmt", &msg)),
            None => Ok(FormatReport {
                formatted: script.unformatted.is_empty(),
                files: script.unformatted,
            }),
        }
    }
}
