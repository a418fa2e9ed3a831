//! Integration tests for the run orchestrator with in-memory toolchain fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tfcheck_core::{InstallRoot, OrchestratorConfig, RunOrchestrator};
use tfcheck_toolchain::fakes::{CountingInstaller, ModuleScript, ScriptedExecutor, StaticVersionSource};
use tfcheck_toolchain::{Diagnostic, Severity};

const REGISTRY: &[&str] = &["0.9.0", "1.0.0", "1.2.0", "1.5.7", "2.0.0"];

/// Create a module directory, optionally with a `versions.tf`.
fn module(workspace: &Path, name: &str, versions_tf: Option<&str>) -> PathBuf {
    let dir = workspace.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("main.tf"), "resource \"null_resource\" \"x\" {}\n").unwrap();
    if let Some(contents) = versions_tf {
        std::fs::write(dir.join("versions.tf"), contents).unwrap();
    }
    dir
}

fn requiring(expr: &str) -> String {
    format!("terraform {{\n  required_version = \"{expr}\"\n}}\n")
}

fn orchestrator(
    installer: Arc<CountingInstaller>,
    executor: Arc<ScriptedExecutor>,
    source: Arc<StaticVersionSource>,
) -> (RunOrchestrator, PathBuf) {
    let root = InstallRoot::create(None).unwrap();
    let root_path = root.path().to_path_buf();
    let orchestrator = RunOrchestrator::new(
        root,
        OrchestratorConfig::default(),
        source,
        installer,
        executor,
    );
    (orchestrator, root_path)
}

/// Test: two modules with the same constraint share one install
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_constraint_installs_once() {
    let workspace = tempfile::tempdir().unwrap();
    let a = module(workspace.path(), "a", Some(&requiring(">1.0.0")));
    let b = module(workspace.path(), "b", Some(&requiring(">1.0.0")));

    let installer = Arc::new(CountingInstaller::new().with_delay(Duration::from_millis(30)));
    let (orchestrator, root) = orchestrator(
        installer.clone(),
        Arc::new(ScriptedExecutor::new()),
        Arc::new(StaticVersionSource::new(REGISTRY)),
    );

    let result = orchestrator.run(vec![a, b]).await;

    assert!(result.passed(), "both modules should pass");
    assert_eq!(result.exit_code(), 0);
    assert_eq!(installer.install_count("2.0.0"), 1);
    assert_eq!(installer.total_installs(), 1);
    for report in &result.modules {
        assert_eq!(report.version.as_ref().map(|v| v.to_string()).as_deref(), Some("2.0.0"));
    }
    assert!(!root.exists(), "install root should be removed after the run");
}

/// Test: failure count equals the number of modules with any failing condition
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_count_matches_failing_modules() {
    let ws = workspace_with_mixed_modules();
    let installer = Arc::new(CountingInstaller::new().failing_on("0.9.0"));

    let executor = ScriptedExecutor::new()
        .with_module(ws.path().join("init_fails"), ModuleScript::clean().init_fails("no creds"))
        .with_module(
            ws.path().join("unformatted"),
            ModuleScript::clean().unformatted(&["main.tf"]),
        )
        .with_module(
            ws.path().join("invalid"),
            ModuleScript::clean().invalid(vec![Diagnostic {
                severity: Severity::Error,
                summary: "Unsupported argument".to_string(),
                detail: "An argument named \"foo\" is not expected here.".to_string(),
                range: None,
            }]),
        )
        .with_module(
            ws.path().join("no_binary"),
            ModuleScript::clean().validate_fails("exec format error"),
        );

    let (orchestrator, root) = orchestrator(
        installer.clone(),
        Arc::new(executor),
        Arc::new(StaticVersionSource::new(REGISTRY)),
    );

    let modules: Vec<PathBuf> = [
        "clean",
        "init_fails",
        "unformatted",
        "invalid",
        "no_match",
        "malformed",
        "install_fails",
        "no_binary",
    ]
    .iter()
    .map(|m| ws.path().join(m))
    .collect();

    let result = orchestrator.run(modules.clone()).await;

    assert_eq!(result.failed, 6);
    assert_eq!(result.exit_code(), 6);
    assert_eq!(result.modules.len(), modules.len());

    let by_name = |name: &str| {
        result
            .modules
            .iter()
            .find(|r| r.module == ws.path().join(name))
            .unwrap()
    };

    assert!(!by_name("clean").failed);
    assert!(!by_name("init_fails").failed);

    let unformatted = by_name("unformatted");
    assert!(unformatted.failed);
    let outcome = unformatted.outcome.as_ref().unwrap();
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(outcome.unformatted_files, vec!["main.tf"]);

    assert!(by_name("invalid").failed);
    assert!(by_name("no_match")
        .error
        .as_deref()
        .unwrap()
        .contains("no matching versions"));
    assert!(by_name("malformed").error.is_some());
    assert!(by_name("install_fails").error.is_some());
    assert!(by_name("no_binary").outcome.is_none());

    assert!(!root.exists());
}

fn workspace_with_mixed_modules() -> tempfile::TempDir {
    let ws = tempfile::tempdir().unwrap();
    module(ws.path(), "clean", None);
    module(ws.path(), "init_fails", Some(&requiring("~> 1.5")));
    module(ws.path(), "unformatted", None);
    module(ws.path(), "invalid", Some(&requiring(">= 1.2, < 2.0")));
    module(ws.path(), "no_match", Some(&requiring(">= 9.0")));
    module(ws.path(), "malformed", Some("terraform {\n  required_version = \n"));
    module(ws.path(), "install_fails", Some(&requiring("= 0.9.0")));
    module(ws.path(), "no_binary", Some(&requiring("1.0.0")));
    ws
}

/// Test: many modules over two versions trigger exactly two installs
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_fan_out_deduplicates_installs() {
    let ws = tempfile::tempdir().unwrap();
    let mut modules = Vec::new();
    for i in 0..24 {
        let expr = if i % 2 == 0 { "~> 1.0" } else { ">1.0.0" };
        modules.push(module(ws.path(), &format!("m{i}"), Some(&requiring(expr))));
    }

    let installer = Arc::new(CountingInstaller::new().with_delay(Duration::from_millis(20)));
    let (orchestrator, _root) = orchestrator(
        installer.clone(),
        Arc::new(ScriptedExecutor::new()),
        Arc::new(StaticVersionSource::new(REGISTRY)),
    );

    let result = orchestrator.run(modules).await;

    assert!(result.passed());
    assert_eq!(installer.install_count("1.5.7"), 1);
    assert_eq!(installer.install_count("2.0.0"), 1);
    assert_eq!(installer.total_installs(), 2);
}

/// Test: a registry outage fails every module without aborting the run
#[tokio::test]
async fn test_registry_outage_fails_each_module() {
    let ws = tempfile::tempdir().unwrap();
    let modules = vec![module(ws.path(), "a", None), module(ws.path(), "b", None)];

    let installer = Arc::new(CountingInstaller::new());
    let (orchestrator, root) = orchestrator(
        installer.clone(),
        Arc::new(ScriptedExecutor::new()),
        Arc::new(StaticVersionSource::failing("registry unavailable")),
    );

    let result = orchestrator.run(modules).await;

    assert_eq!(result.failed, 2);
    assert_eq!(installer.total_installs(), 0);
    assert!(!root.exists());
}

/// Test: an empty change set passes and still cleans up
#[tokio::test]
async fn test_no_modules() {
    let (orchestrator, root) = orchestrator(
        Arc::new(CountingInstaller::new()),
        Arc::new(ScriptedExecutor::new()),
        Arc::new(StaticVersionSource::new(REGISTRY)),
    );
    assert!(root.exists());

    let result = orchestrator.run(Vec::new()).await;

    assert!(result.passed());
    assert!(result.modules.is_empty());
    assert!(!root.exists());
}

/// Test: a module whose task panics counts once and leaves siblings untouched
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_module_counts_as_one_failure() {
    let ws = tempfile::tempdir().unwrap();
    let modules = vec![
        module(ws.path(), "first", None),
        module(ws.path(), "crashes", None),
        module(ws.path(), "last", None),
    ];

    let executor = ScriptedExecutor::new()
        .with_module(ws.path().join("crashes"), ModuleScript::clean().validate_panics());
    let (orchestrator, root) = orchestrator(
        Arc::new(CountingInstaller::new()),
        Arc::new(executor),
        Arc::new(StaticVersionSource::new(REGISTRY)),
    );

    let result = orchestrator.run(modules.clone()).await;

    assert_eq!(result.failed, 1);
    assert_eq!(result.exit_code(), 1);

    let order: Vec<&PathBuf> = result.modules.iter().map(|r| &r.module).collect();
    assert_eq!(order, modules.iter().collect::<Vec<_>>());

    assert!(!result.modules[0].failed);
    assert!(!result.modules[2].failed);

    let crashed = &result.modules[1];
    assert!(crashed.failed);
    assert!(crashed.outcome.is_none());
    assert_eq!(crashed.error.as_deref(), Some("module task panicked"));

    assert!(!root.exists());
}
