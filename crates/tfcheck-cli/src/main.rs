//! tfcheck - Terraform module checker for pull requests
//!
//! Validates every Terraform module changed in a pull request with the
//! Terraform version that module declares.
//!
//! ## Commands
//!
//! - `check` (default): validate changed (or explicitly listed) modules; the
//!   exit status is the number of modules that failed
//! - `changed`: list the module directories changed against the base branch
//! - `resolve`: show the constraint and resolved version for one module

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, Level};

use tfcheck_core::telemetry::{json_from_env_value, level_from_env_value};
use tfcheck_core::{
    find_changed_modules, git, ConstraintReader, InstallRoot, OrchestratorConfig,
    RunOrchestrator, VersionResolver, DEFAULT_CONSTRAINT,
};
use tfcheck_toolchain::{
    ReleaseInstaller, ReleasesClient, TerraformCli, DEFAULT_RELEASES_URL, TERRAFORM,
};

#[derive(Parser)]
#[command(name = "tfcheck")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validate changed Terraform modules with the version each one requires", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level; DEBUG enables verbose output
    #[arg(long, env = "LOG_LEVEL", global = true, hide = true)]
    log_level: Option<String>,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Log format; JSON enables JSON-formatted log lines
    #[arg(long, env = "LOG_TYPE", global = true, hide = true)]
    log_type: Option<String>,

    /// Base URL of the Terraform release registry
    #[arg(long, env = "TFCHECK_REGISTRY_URL", global = true, default_value = DEFAULT_RELEASES_URL)]
    registry_url: String,

    /// GitHub token used to fetch private module sources over HTTPS
    #[arg(long, env = "GH_TOKEN", global = true, hide_env_values = true)]
    gh_token: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    check: CheckArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate modules and exit with the number that failed
    Check(CheckArgs),

    /// List module directories changed against the base branch
    Changed(DiscoverArgs),

    /// Show the constraint and resolved Terraform version of a module
    Resolve {
        /// Module directory
        module: PathBuf,

        /// Constraint used when the module declares none
        #[arg(long, env = "TFCHECK_DEFAULT_CONSTRAINT", default_value = DEFAULT_CONSTRAINT)]
        default_constraint: String,
    },
}

#[derive(Args, Clone, Debug, Default)]
struct DiscoverArgs {
    /// Branch the pull request targets
    #[arg(long, env = "GITHUB_BASE_REF")]
    base_ref: Option<String>,

    /// Repository checkout root
    #[arg(long, env = "GITHUB_WORKSPACE")]
    workspace: Option<PathBuf>,
}

#[derive(Args, Clone, Debug, Default)]
struct CheckArgs {
    /// Modules to validate (default: modules changed against the base branch)
    modules: Vec<PathBuf>,

    #[command(flatten)]
    discover: DiscoverArgs,

    /// Constraint used when a module declares none
    #[arg(long, env = "TFCHECK_DEFAULT_CONSTRAINT", default_value = DEFAULT_CONSTRAINT)]
    default_constraint: String,

    /// Parent directory for the run's temporary toolchain installs
    #[arg(long, env = "TFCHECK_INSTALL_DIR")]
    install_dir: Option<PathBuf>,

    /// Write a JSON report of the run to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        level_from_env_value(cli.log_level.as_deref())
    };
    let json = cli.json || json_from_env_value(cli.log_type.as_deref());
    tfcheck_core::init_tracing(json, level);

    if let Some(token) = cli.gh_token.as_deref().filter(|t| !t.is_empty()) {
        git::configure_github_token(token).context("Failed to configure GitHub token")?;
    }

    match cli.command.unwrap_or(Commands::Check(cli.check)) {
        Commands::Check(args) => {
            let code = cmd_check(args, &cli.registry_url).await?;
            std::process::exit(code);
        }
        Commands::Changed(args) => cmd_changed(&args),
        Commands::Resolve {
            module,
            default_constraint,
        } => cmd_resolve(&module, &default_constraint, &cli.registry_url).await,
    }
}

/// Make `path` absolute against the current directory.
fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        Ok(cwd.join(path))
    }
}

/// Changed module directories, from git.
fn discover_modules(args: &DiscoverArgs) -> Result<Vec<PathBuf>> {
    let Some(workspace) = args.workspace.as_deref() else {
        bail!("Workspace is not set (use --workspace or GITHUB_WORKSPACE)");
    };
    let Some(base_ref) = args.base_ref.as_deref() else {
        bail!("Base branch is not set (use --base-ref or GITHUB_BASE_REF)");
    };
    let workspace = absolutize(workspace)?;

    debug!(workspace = %workspace.display(), target_branch = %base_ref, "Discovering changed modules");
    git::mark_safe_directory(&workspace).context("Failed to mark workspace as safe")?;
    find_changed_modules(&workspace, base_ref).context("Failed to find changed modules")
}

/// Modules a check should cover: explicit ones, or the discovered change set.
fn modules_to_check(args: &CheckArgs) -> Result<Vec<PathBuf>> {
    if args.modules.is_empty() {
        discover_modules(&args.discover)
    } else {
        args.modules.iter().map(|m| absolutize(m)).collect()
    }
}

/// Validate modules; returns the process exit status.
async fn cmd_check(args: CheckArgs, registry_url: &str) -> Result<i32> {
    let modules = modules_to_check(&args)?;
    if modules.is_empty() {
        info!("No changed modules to check");
        return Ok(0);
    }

    let client = ReleasesClient::new(registry_url).context("Failed to create registry client")?;
    let root = InstallRoot::create(args.install_dir.as_deref())
        .context("Failed to create temporary folder for binaries")?;
    debug!(root = %root.path().display(), "Created temporary folder for binaries");

    let config = OrchestratorConfig {
        product: TERRAFORM.to_string(),
        default_constraint: args.default_constraint.clone(),
    };
    let orchestrator = RunOrchestrator::new(
        root,
        config,
        Arc::new(client.clone()),
        Arc::new(ReleaseInstaller::new(client)),
        Arc::new(TerraformCli::new()),
    );

    let result = orchestrator.run(modules).await;

    if let Some(path) = &args.report {
        match serde_json::to_vec_pretty(&result) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    error!(path = %path.display(), "Failed to write report: {}", e);
                }
            }
            Err(e) => error!("Failed to serialize report: {}", e),
        }
    }

    if result.passed() {
        info!(modules = result.modules.len(), "All modules passed");
    } else {
        error!(
            failed = result.failed,
            modules = result.modules.len(),
            "Module checks failed"
        );
    }

    Ok(result.exit_code())
}

/// Print changed module directories
fn cmd_changed(args: &DiscoverArgs) -> Result<()> {
    for module in discover_modules(args)? {
        println!("{}", module.display());
    }
    Ok(())
}

/// Print the constraint and resolved version of a module
async fn cmd_resolve(module: &Path, default_constraint: &str, registry_url: &str) -> Result<()> {
    let module = absolutize(module)?;
    let constraint = ConstraintReader::new(default_constraint)
        .read(&module)
        .await
        .with_context(|| format!("Failed to read constraint of {}", module.display()))?;

    let client = ReleasesClient::new(registry_url).context("Failed to create registry client")?;
    let resolver = VersionResolver::new(Arc::new(client), TERRAFORM);
    let version = resolver
        .resolve(&constraint.expr)
        .await
        .with_context(|| format!("Failed to resolve {}", constraint.expr))?;

    println!("Module: {}", module.display());
    println!("Constraint: {} ({:?})", constraint.expr, constraint.source);
    println!("Version: {}", version);
    Ok(())
}
