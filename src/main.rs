//! Database dump retention tool
//!
//! Applies tiered retention, same-day consolidation and checksum policy to a
//! directory of database dumps and mirrors it to an SFTP or S3 remote.

// dumpkeeper/src/main.rs
mod archive;
mod audit;
mod checksum;
mod config;
mod errors;
mod report;
mod retention;
mod store;
mod sync;
mod utils;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::{AppConfig, RemoteConfig};
use errors::AppError;
use report::Summary;
use store::Store;
use store::local::LocalStore;
use sync::SyncDirection;

#[derive(Parser, Debug)]
#[command(name = "dumpkeeper", version, about = "Retention, consolidation and sync for database dump archives")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short = 'c', global = true, env = "DUMPKEEPER_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs and reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete archives past their tier window and prune emptied directories
    Cleanup(EngineArgs),
    /// Keep one archive per database and day for older dumps
    Consolidate(EngineArgs),
    /// Check that archives and checksum sidecars match up
    Verify(VerifyArgs),
    /// Report retention, consolidation and sidecar violations without changing anything
    Audit(AuditArgs),
    /// Upload the local backup tree to the remote
    Push,
    /// Download the remote tree into the local backup directory
    Pull,
    /// Consolidate, clean up and verify locally, then optionally push
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Operate on the configured remote instead of the local directory
    #[arg(long)]
    remote: bool,

    /// Print the plan without deleting anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    #[arg(long)]
    remote: bool,

    /// Also recompute SHA-256 digests (local directory only)
    #[arg(long, conflicts_with = "remote")]
    digests: bool,
}

#[derive(Args, Debug)]
struct AuditArgs {
    #[arg(long, conflicts_with = "listing")]
    remote: bool,

    /// Audit an `s3cmd ls --recursive` inventory instead of a live store
    #[arg(long, value_name = "FILE")]
    listing: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Push to the remote afterwards and apply the same policy there
    #[arg(long)]
    push: bool,
}

fn init_tracing(cli: &Cli) {
    let filter = match cli.verbose {
        0 => "warn,dumpkeeper=info",
        1 => "info,dumpkeeper=debug",
        2 => "debug,dumpkeeper=trace",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Main entry point for the retention tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    match run_app(&cli).await {
        Ok(()) => {
            if !cli.json {
                println!("✅ Operation completed successfully.");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            if cli.json {
                let error_json = serde_json::json!({
                    "error": true,
                    "message": format!("{:#}", e),
                });
                println!("{}", error_json);
            } else {
                eprintln!("❌ Error: {:?}", e);
            }
            ExitCode::FAILURE
        }
    }
}

fn emit<R: Summary + Serialize>(json: bool, report: &R) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string(report).context("Failed to serialize report")?
        );
    } else {
        println!("{}", report.summary_line());
        for line in report.details() {
            println!("  ⚠️ {}", line);
        }
    }
    Ok(())
}

async fn open_remote(config: &AppConfig) -> Result<Box<dyn Store>> {
    let remote = config.remote.as_ref().ok_or_else(|| {
        AppError::Config(
            "no remote configured (s3_storage, sftp_storage or mirror_dir)".to_string(),
        )
    })?;
    store::open_remote(remote).await
}

/// Holds either the local store or a freshly opened remote.
async fn select_store(config: &AppConfig, local: LocalStore, remote: bool) -> Result<Box<dyn Store>> {
    if remote {
        open_remote(config).await
    } else {
        Ok(Box::new(local))
    }
}

async fn run_app(cli: &Cli) -> Result<()> {
    let config = AppConfig::load(&cli.config, |key| std::env::var(key).ok()).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;
    let policy = &config.policy;
    let local = LocalStore::new(config.local_root.clone());
    let now: NaiveDateTime = Local::now().naive_local();

    match &cli.command {
        Commands::Cleanup(args) => {
            info!("🧹 Starting cleanup...");
            let store = select_store(&config, local, args.remote).await?;
            let report = retention::run_retention(store.as_ref(), policy, now, args.dry_run)
                .await
                .with_context(|| format!("Retention failed on {}", store.label()))?;
            emit(cli.json, &report)?;
        }
        Commands::Consolidate(args) => {
            info!("🗜️ Starting consolidation...");
            let store = select_store(&config, local, args.remote).await?;
            let report = retention::consolidation::run_consolidation(store.as_ref(), policy, now, args.dry_run)
                .await
                .with_context(|| format!("Consolidation failed on {}", store.label()))?;
            emit(cli.json, &report)?;
        }
        Commands::Verify(args) => {
            let report = if args.remote {
                let store = open_remote(&config).await?;
                checksum::run_validation(store.as_ref(), policy).await?
            } else {
                let mut report = checksum::run_validation(&local, policy).await?;
                if args.digests {
                    let listing = local.list().await?;
                    checksum::verify_digests(&local, &listing, &mut report);
                }
                report
            };
            emit(cli.json, &report)?;
            if !report.is_clean() {
                return Err(AppError::Verification(report.violation_count()).into());
            }
        }
        Commands::Audit(args) => {
            let report = match &args.listing {
                Some(path) => {
                    let text = fs::read_to_string(path)
                        .with_context(|| format!("Failed to read listing file {}", path.display()))?;
                    let prefix = match &config.remote {
                        Some(RemoteConfig::S3(spaces)) => spaces.folder_prefix.as_deref(),
                        _ => None,
                    };
                    let parsed = store::listing::parse_object_listing(&text, prefix);
                    if !parsed.skipped_lines.is_empty() {
                        warn!(
                            "Skipped {} malformed line(s) in {}",
                            parsed.skipped_lines.len(),
                            path.display()
                        );
                    }
                    let mut report = audit::audit_listing(&parsed.listing, policy, now);
                    report.store = path.display().to_string();
                    report
                }
                None => {
                    let store = select_store(&config, local, args.remote).await?;
                    audit::run_audit(store.as_ref(), policy, now).await?
                }
            };
            emit(cli.json, &report)?;
            if !report.is_clean() {
                return Err(AppError::Verification(report.violations.len()).into());
            }
        }
        Commands::Push => {
            let remote = open_remote(&config).await?;
            let report = sync::run_sync_flow(SyncDirection::Push, &local, remote.as_ref())
                .await
                .context("Push failed")?;
            emit(cli.json, &report)?;
        }
        Commands::Pull => {
            let remote = open_remote(&config).await?;
            let report = sync::run_sync_flow(SyncDirection::Pull, &local, remote.as_ref())
                .await
                .context("Pull failed")?;
            emit(cli.json, &report)?;
        }
        Commands::Run(args) => run_full_pass(cli, &config, &local, now, args.push).await?,
    }
    Ok(())
}

/// Local maintenance first, then the remote, so an unreachable remote never
/// blocks cleanup of the local directory.
async fn run_full_pass(
    cli: &Cli,
    config: &AppConfig,
    local: &LocalStore,
    now: NaiveDateTime,
    push: bool,
) -> Result<()> {
    let policy = &config.policy;

    let consolidated = retention::consolidation::run_consolidation(local, policy, now, false)
        .await
        .context("Local consolidation failed")?;
    emit(cli.json, &consolidated)?;
    let cleaned = retention::run_retention(local, policy, now, false)
        .await
        .context("Local cleanup failed")?;
    emit(cli.json, &cleaned)?;
    let verified = checksum::run_validation(local, policy)
        .await
        .context("Local verification failed")?;
    emit(cli.json, &verified)?;

    if push {
        let remote = open_remote(config).await?;
        let pushed = sync::run_sync_flow(SyncDirection::Push, local, remote.as_ref())
            .await
            .context("Push failed")?;
        emit(cli.json, &pushed)?;

        let remote_consolidated =
            retention::consolidation::run_consolidation(remote.as_ref(), policy, now, false)
                .await
                .context("Remote consolidation failed")?;
        emit(cli.json, &remote_consolidated)?;
        let remote_cleaned = retention::run_retention(remote.as_ref(), policy, now, false)
            .await
            .context("Remote cleanup failed")?;
        emit(cli.json, &remote_cleaned)?;
    }

    if !verified.is_clean() {
        return Err(AppError::Verification(verified.violation_count()).into());
    }
    Ok(())
}
