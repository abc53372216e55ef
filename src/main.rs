//! Stratus CLI entrypoint.
//!
//! This is the main entrypoint for the stratus command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use stratus::cli::{Cli, Commands, OutputFormatter, StateCommands};
use stratus::config::{find_stack_file, ProviderBackend, StackConfig, StackParser};
use stratus::converger::Converger;
use stratus::engine::CancelToken;
use stratus::error::{ConfigError, Result};
use stratus::planner::Planner;
use stratus::provider::{CloudProvider, HttpProvider, MemoryProvider};
use stratus::state::{generate_holder_id, LocalStateStore, StateStore};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Exit code when a plan has pending changes.
const EXIT_CHANGES_PENDING: u8 = 2;
/// Exit code when an apply or destroy run completed partially.
const EXIT_PARTIAL: u8 = 3;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate => cmd_validate(cli.stack.as_ref(), &formatter),
        Commands::Plan { detailed } => cmd_plan(cli.stack.as_ref(), detailed, &formatter).await,
        Commands::Apply {
            yes,
            dry_run,
            concurrency,
        } => cmd_apply(cli.stack.as_ref(), yes, dry_run, concurrency, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(cli.stack.as_ref(), yes, &formatter).await,
        Commands::Graph => cmd_graph(cli.stack.as_ref(), &formatter),
        Commands::State { command } => cmd_state(cli.stack.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &PathBuf, force: bool) -> Result<u8> {
    info!("Initializing new Stratus project in: {}", path.display());

    let stack_path = path.join("stratus.stack.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && stack_path.exists() {
        eprintln!("Stack file already exists: {}", stack_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(0);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let stack_template = include_str!("../templates/stratus.stack.yaml");
    std::fs::write(&stack_path, stack_template)?;
    eprintln!("Created: {}", stack_path.display());

    let env_template = include_str!("../templates/.env.example");
    std::fs::write(&env_path, env_template)?;
    eprintln!("Created: {}", env_path.display());

    let gitignore_content = ".env\n.stratus/\n";
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(".stratus") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Stratus")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(".stratus") {
                writeln!(file, ".stratus/")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, gitignore_content)?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your API token");
    eprintln!("  2. Edit stratus.stack.yaml with your resources");
    eprintln!("  3. Run 'stratus validate' to check the stack");
    eprintln!("  4. Run 'stratus plan' to see what will change");
    eprintln!("  5. Run 'stratus apply' to converge");

    Ok(0)
}

/// Validate the stack file.
fn cmd_validate(stack_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<u8> {
    let (config, stack_file) = load_stack(stack_path)?;
    info!("Validating stack: {}", stack_file.display());

    let converger = build_converger(&config, &stack_file)?;
    converger.validate()?;

    formatter.success("Stack is valid.");
    eprintln!("\nStack summary:");
    eprintln!("  Project: {}", config.project.name);
    eprintln!("  Environment: {}", config.project.environment);
    eprintln!("  Resources: {}", config.resources.len());

    Ok(0)
}

/// Show the change plan.
async fn cmd_plan(
    stack_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (config, stack_file) = load_stack(stack_path)?;
    let converger = build_converger(&config, &stack_file)?;

    let changeset = converger.plan().await?;
    println!("{}", formatter.format_plan(&changeset, detailed));

    if changeset.has_changes() {
        Ok(EXIT_CHANGES_PENDING)
    } else {
        Ok(0)
    }
}

/// Converge remote resources to the stack.
async fn cmd_apply(
    stack_path: Option<&PathBuf>,
    auto_approve: bool,
    dry_run: bool,
    concurrency: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (mut config, stack_file) = load_stack(stack_path)?;
    if let Some(workers) = concurrency {
        config.run.concurrency = workers;
    }

    let converger = build_converger(&config, &stack_file)?.with_cancel_token(ctrl_c_token());

    let changeset = converger.plan().await?;
    if !changeset.has_changes() {
        eprintln!("No changes to apply.");
        return Ok(0);
    }

    println!("{}", formatter.format_plan(&changeset, false));

    if dry_run {
        eprintln!("Dry run: nothing was executed.");
        return Ok(0);
    }

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(0);
    }

    let report = converger.apply_changeset(&changeset).await?;
    println!("{}", formatter.format_report(&report));

    if report.is_success() {
        Ok(0)
    } else {
        Ok(EXIT_PARTIAL)
    }
}

/// Destroy every tracked resource.
async fn cmd_destroy(
    stack_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (config, stack_file) = load_stack(stack_path)?;
    let converger = build_converger(&config, &stack_file)?.with_cancel_token(ctrl_c_token());

    let store = build_store(&config, &stack_file);
    let Some(snapshot) = store.load().await? else {
        eprintln!("No state found, nothing to destroy.");
        return Ok(0);
    };

    let planned = Planner::plan_destroy(&snapshot);
    if planned.entries.is_empty() {
        eprintln!("No live resources to destroy.");
        return Ok(0);
    }

    eprintln!("The following resources will be destroyed:");
    for entry in &planned.entries {
        eprintln!("  - {} ({})", entry.logical_id, entry.kind);
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(0);
    }

    let (_, report) = converger.destroy().await?;
    println!("{}", formatter.format_report(&report));

    if report.is_success() {
        Ok(0)
    } else {
        Ok(EXIT_PARTIAL)
    }
}

/// Print the dependency graph.
fn cmd_graph(stack_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<u8> {
    let (config, stack_file) = load_stack(stack_path)?;
    let converger = build_converger(&config, &stack_file)?;

    let graph = converger.validate()?;
    println!("{}", formatter.format_graph(&graph));
    Ok(0)
}

/// State management commands.
async fn cmd_state(
    stack_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (config, stack_file) = load_stack(stack_path)?;
    let store = build_store(&config, &stack_file);

    match command {
        StateCommands::Show => {
            if let Some(snapshot) = store.load().await? {
                println!("{}", formatter.format_state(&snapshot));
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Journal { limit } => {
            let entries = store.journal(limit).await?;
            println!("{}", formatter.format_journal(&entries));
        }
        StateCommands::Lock { holder } => {
            let holder_id = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder_id).await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = store.get_lock_info().await? {
                    store.release_lock(&lock_info.lock_id).await?;
                    eprintln!("State forcefully unlocked.");
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(0)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Prompts on stderr and checks the response against the expected answer.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Returns a token that is cancelled on Ctrl-C.
fn ctrl_c_token() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupt received, letting in-flight operations finish...");
            handle.cancel();
        }
    });
    token
}

/// Resolves the stack file path.
fn resolve_stack_path(stack_path: Option<&PathBuf>) -> Result<PathBuf> {
    stack_path.map_or_else(|| find_stack_file("."), |path| Ok(path.clone()))
}

/// Loads and validates the stack file with environment overrides applied.
fn load_stack(stack_path: Option<&PathBuf>) -> Result<(StackConfig, PathBuf)> {
    let stack_file = resolve_stack_path(stack_path)?;
    debug!("Loading stack from: {}", stack_file.display());

    let parser = StackParser::new().with_base_path(
        stack_file
            .parent()
            .unwrap_or_else(|| Path::new(".")),
    );
    parser.load_dotenv()?;

    let config = parser.load_with_env(&stack_file)?;
    Ok((config, stack_file))
}

/// Creates the state store for a stack.
fn build_store(config: &StackConfig, stack_file: &Path) -> Arc<dyn StateStore> {
    let base_dir = config.state.path.as_ref().map_or_else(
        || {
            stack_file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(".stratus")
        },
        PathBuf::from,
    );
    Arc::new(LocalStateStore::with_base_dir(base_dir))
}

/// Creates the provider client for a stack.
fn build_provider(config: &StackConfig) -> Result<Arc<dyn CloudProvider>> {
    match config.provider.backend {
        ProviderBackend::Http => {
            let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
                ConfigError::SchemaError {
                    message: String::from(
                        "provider.endpoint is required for the http backend",
                    ),
                    resource: None,
                }
            })?;
            let token = StackParser::get_api_token()?;
            Ok(Arc::new(HttpProvider::with_timeout(
                endpoint,
                &token,
                config.provider.request_timeout_secs,
            )?))
        }
        ProviderBackend::Memory => Ok(Arc::new(MemoryProvider::new())),
    }
}

/// Wires config, provider, and state store into a converger.
fn build_converger(config: &StackConfig, stack_file: &Path) -> Result<Converger> {
    let provider = build_provider(config)?;
    let store = build_store(config, stack_file);
    Ok(Converger::new(config.clone(), provider, store))
}
