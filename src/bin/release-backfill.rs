//! Release Backfill CLI
//!
//! Recreates release-host releases for versions already published on a
//! package index.

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use release_backfill::core::{
    BackfillConfig, ConfigLoadOptions, ConfigLoader, RetryManager, SyncError, SyncSettings,
};
use release_backfill::orchestration::{
    CancellationFlag, SyncOrchestrator, check_exit_code, check_releases, check_table,
};
use release_backfill::{GitHubPublisher, PypiFetcher, SecureTokenManager};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

const HOST_SERVICE: &str = "github";

/// Backfill tagged releases from package index history
#[derive(Parser)]
#[command(name = "release-backfill")]
#[command(version)]
#[command(about = "Backfill tagged releases from package index history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing releases for every listed version
    Sync(TargetArgs),

    /// Report which listed versions already have a release, without writing
    Check(TargetArgs),
}

#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Config file (defaults to ./.backfill.yaml when present)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Package name on the index
    #[arg(short, long)]
    package: Option<String>,

    /// Comma-separated versions, processed in the given order
    #[arg(long, value_delimiter = ',', conflicts_with = "versions_file")]
    versions: Option<Vec<String>>,

    /// File with one version per line
    #[arg(long, value_name = "PATH")]
    versions_file: Option<PathBuf>,

    /// Target repository as owner/name
    #[arg(short, long)]
    repository: Option<String>,

    /// Package index base URL
    #[arg(long)]
    index_url: Option<String>,

    /// Directory under which the staging root is created
    #[arg(long, value_name = "PATH")]
    staging_dir: Option<PathBuf>,

    /// Print the result as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let tokens = SecureTokenManager::from_env();
    let code = match run(cli, &tokens).await {
        Ok(code) => code,
        Err(e) => {
            report_fatal(&e, &tokens);
            2
        }
    };

    process::exit(code);
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    // RUST_LOG wins over the flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, tokens: &SecureTokenManager) -> Result<i32> {
    match cli.command {
        Commands::Sync(args) => sync_command(args, tokens).await,
        Commands::Check(args) => check_command(args, tokens).await,
    }
}

async fn load_settings(args: &TargetArgs) -> Result<SyncSettings> {
    let versions = match &args.versions_file {
        Some(path) => Some(ConfigLoader::read_versions_file(path).await?),
        None => args.versions.clone(),
    };

    let cli_args = BackfillConfig {
        package: args.package.clone(),
        versions,
        repository: args.repository.clone(),
        index_url: args.index_url.clone(),
        staging_dir: args.staging_dir.clone(),
        ..Default::default()
    };

    let settings = ConfigLoader::load_settings(ConfigLoadOptions {
        config_path: args.config.clone(),
        working_dir: std::env::current_dir()?,
        cli_args: Some(cli_args),
        env: std::env::vars().collect(),
    })
    .await?;

    debug!(?settings, "resolved settings");
    Ok(settings)
}

fn build_publisher(settings: &SyncSettings, tokens: &SecureTokenManager) -> Result<GitHubPublisher> {
    let token = tokens.require_token(HOST_SERVICE)?;

    Ok(GitHubPublisher::new(
        &settings.api_url,
        &settings.uploads_url,
        settings.repository.clone(),
        token,
        settings.timeout,
        settings.retry.clone(),
    )?)
}

async fn sync_command(args: TargetArgs, tokens: &SecureTokenManager) -> Result<i32> {
    let settings = load_settings(&args).await?;
    let publisher = build_publisher(&settings, tokens)?;
    let fetcher = PypiFetcher::new(&settings.index_url, settings.timeout)?;

    let cancellation = CancellationFlag::new();
    watch_interrupts(cancellation.clone());

    let orchestrator =
        SyncOrchestrator::from_settings(&settings, Box::new(fetcher), Box::new(publisher))?
            .with_cancellation(cancellation);

    let summary = orchestrator
        .run(&settings.package, &settings.versions)
        .await?;

    if let Err(e) = orchestrator.close() {
        warn!("failed to remove staging root: {}", e);
    }

    let rendered = if args.json {
        summary.to_json()?
    } else {
        summary.to_string()
    };
    println!("{}", tokens.mask_tokens_in_string(&rendered));

    if let Some(abort) = &summary.aborted {
        print_fatal(
            &format!("aborted at {}: {}", abort.version, abort.message),
            Some(abort.code),
            &abort.suggested_actions,
            tokens,
        );
    }

    Ok(summary.exit_code())
}

async fn check_command(args: TargetArgs, tokens: &SecureTokenManager) -> Result<i32> {
    let settings = load_settings(&args).await?;
    let publisher = build_publisher(&settings, tokens)?;

    let reports = check_releases(
        &publisher,
        &settings.template,
        &RetryManager::new(settings.retry.clone()),
        &settings.package,
        &settings.versions,
    )
    .await?;

    let rendered = if args.json {
        serde_json::to_string_pretty(&reports)?
    } else {
        check_table(&reports).to_string()
    };
    println!("{}", tokens.mask_tokens_in_string(&rendered));

    Ok(check_exit_code(&reports))
}

/// First Ctrl-C stops after the current version; a second one exits at once
fn watch_interrupts(cancellation: CancellationFlag) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received, stopping after the current version (press Ctrl-C again to exit now)");
        cancellation.cancel();

        if signal::ctrl_c().await.is_ok() {
            error!("second interrupt, exiting; the staging directory and a partially published release may be left behind");
            process::exit(130);
        }
    });
}

fn report_fatal(error: &anyhow::Error, tokens: &SecureTokenManager) {
    match error.downcast_ref::<SyncError>() {
        Some(sync_error) => print_fatal(
            &sync_error.to_string(),
            Some(sync_error.code()),
            &sync_error.suggested_actions(),
            tokens,
        ),
        None => print_fatal(&error.to_string(), None, &[], tokens),
    }
}

fn print_fatal(
    message: &str,
    code: Option<&str>,
    actions: &[&str],
    tokens: &SecureTokenManager,
) {
    eprintln!("\n❌ Error");
    eprintln!("{}", tokens.mask_tokens_in_string(message));

    if let Some(code) = code {
        eprintln!("   code: {}", code);
    }

    if !actions.is_empty() {
        eprintln!("\n💡 Suggested actions:");
        for action in actions {
            eprintln!("   - {}", action);
        }
    }
}
