use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repowarden::config::LoggingSettings;
use repowarden::{
    sync_rulesets, sync_teams, GitHubClient, MappingError, ReconcileReport, Settings,
};

/// Exit status when some operation failed and `--fail-on-error` is set
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "repowarden")]
#[command(about = "Reconcile GitHub rulesets and team access with YAML mapping files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show what would change without changing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Exit with status 2 if any operation failed
    #[arg(long, global = true)]
    fail_on_error: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync repository rulesets with a mapping file (<owner>.yaml)
    Rulesets {
        /// Path to the ruleset mapping file
        file: PathBuf,
    },

    /// Sync repository team permissions with a mapping file (<org>.yaml)
    Teams {
        /// Path to the team mapping file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and succeed; usage errors exit with 1
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return Ok(ExitCode::from(code));
        }
    };

    let mut settings = load_settings(cli.config.as_deref())?;
    settings.reconcile.dry_run |= cli.dry_run;
    settings.reconcile.fail_on_error |= cli.fail_on_error;

    init_logging(cli.verbose, &settings.logging)?;
    info!("Starting repowarden v{}", env!("CARGO_PKG_VERSION"));

    let file = match &cli.command {
        Commands::Rulesets { file } | Commands::Teams { file } => file.clone(),
    };

    if !file.is_file() {
        error!("The file {:?} does not exist", file);
        return Ok(ExitCode::from(1));
    }

    let client = GitHubClient::new(&settings.github)?;

    if settings.reconcile.dry_run {
        println!("🔍 Dry run mode - no changes will be made");
    }

    let result = match cli.command {
        Commands::Rulesets { .. } => sync_rulesets(&client, &settings, &file).await,
        Commands::Teams { .. } => sync_teams(&client, &settings, &file).await,
    };

    let failed = match result {
        Ok(report) => {
            print_report(&report);
            report.has_failures()
        }
        Err(MappingError::NotFound(path)) => {
            error!("The file {:?} does not exist", path);
            return Ok(ExitCode::from(1));
        }
        Err(e) => {
            error!("{}", e);
            println!("❌ {}", e);
            true
        }
    };

    if failed && settings.reconcile.fail_on_error {
        Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Load settings from specified path or default location
fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path),
        None => Settings::load_or_default(),
    }
}

/// Initialize logging; RUST_LOG wins over the settings file
fn init_logging(verbose: bool, logging: &LoggingSettings) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {}", level))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_writer(std::io::stderr);

    match logging.format.as_str() {
        "json" => registry.with(layer.json()).try_init(),
        "pretty" => registry.with(layer.pretty().with_ansi(logging.color)).try_init(),
        _ => registry.with(layer.compact().with_ansi(logging.color)).try_init(),
    }
    .context("Failed to initialize logging")?;

    Ok(())
}

/// Print the run summary to stdout
fn print_report(report: &ReconcileReport) {
    println!("\n🎉 Reconciliation complete for {}", report.owner);
    println!("   📊 Repositories: {}", report.repositories);
    println!("   ➕ Created: {}", report.created());
    println!("   🔄 Updated: {}", report.updated());
    println!("   🗑️  Deleted: {}", report.deleted());
    println!("   ✅ Unchanged: {}", report.unchanged());
    if report.planned() > 0 {
        println!("   📝 Planned: {}", report.planned());
    }
    println!("   ❌ Failed: {}", report.failed());
    println!("   ⏱️  Duration: {:.2}s", report.duration.as_secs_f64());

    if report.has_failures() {
        println!("\n🔍 Failed Operations:");
        for record in report.failures() {
            let resource = if record.resource.is_empty() {
                String::new()
            } else {
                format!(" {}", record.resource)
            };
            println!(
                "   ❌ {}/{}: {}{}: {}",
                report.owner, record.repo, record.action, resource, record.message
            );
        }
    }
}
