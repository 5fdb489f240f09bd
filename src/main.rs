use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use loom::domain::Repository;
use loom::operation::OperationRegistry;
use loom::storage::SnapshotFilter;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

mod cli;
mod config;

use cli::commands::{Commands, FreezeCommands, StashCommands};
use cli::{Cli, print_json, print_report, print_summary};
use config::{Config, Services};

fn setup_logging(level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loom")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("loom.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<bool> {
    let services = Services::build(config)?;
    let repos = config.select_repos(&cli.repos);

    if cli.is_verbose() {
        eprintln!("{} {} repo(s)", "Selected".yellow(), repos.len());
    }

    match &cli.command {
        Commands::Exec {
            timeout_ms,
            operation,
            args,
        } => {
            let op = OperationRegistry::builtin().create(operation, args)?;
            let report = services.bulk.run_operation(&repos, op, timeout(*timeout_ms)).await?;
            print_report(operation, &report)
        }
        Commands::Git { timeout_ms, args } => {
            let report = services.bulk.run_git(&repos, args.as_slice(), timeout(*timeout_ms)).await?;
            print_report("git", &report)
        }
        Commands::Status => {
            let report = services.status.status_all(&repos).await?;
            print_report("status", &report)
        }
        Commands::Freeze { command } => handle_freeze_command(command, &services, &repos).await,
        Commands::Stash { command } => handle_stash_command(command, &services, &repos).await,
    }
}

async fn handle_freeze_command(command: &FreezeCommands, services: &Services, repos: &[Repository]) -> Result<bool> {
    info!("Handling freeze command: {:?}", command);
    match command {
        FreezeCommands::Create { name } => {
            let report = services.freeze.create(repos, name).await?;
            print_json(&report)?;
            eprintln!("{} {}", "Created:".green(), report.snapshot.describe());
            for failure in &report.per_repo_errors {
                eprintln!("  {} {}: {}", "skipped".red(), failure.repo, failure.error);
            }
            Ok(report.per_repo_errors.is_empty())
        }
        FreezeCommands::Restore { snapshot, only } => {
            let only = (!only.is_empty()).then_some(only.as_slice());
            let restore = services.freeze.restore(snapshot, only).await?;
            eprintln!("{} {}", "Restoring:".cyan(), restore.snapshot_id);
            print_json(&restore)?;
            Ok(print_summary("restore", &restore.report))
        }
        FreezeCommands::List { filter } => {
            let filter = filter
                .as_deref()
                .map(SnapshotFilter::name_contains)
                .unwrap_or_default();
            let summaries = services.freeze.list(&filter)?;
            print_json(&summaries)?;
            eprintln!("{} {} snapshot(s)", "Found".green(), summaries.len());
            Ok(true)
        }
        FreezeCommands::Delete { snapshot } => {
            let deleted = services.freeze.delete(snapshot)?;
            print_json(&deleted)?;
            eprintln!("{} {} snapshot(s)", "Deleted".red(), deleted.len());
            Ok(true)
        }
    }
}

async fn handle_stash_command(command: &StashCommands, services: &Services, repos: &[Repository]) -> Result<bool> {
    info!("Handling stash command: {:?}", command);
    let stash = &services.stash;
    match command {
        StashCommands::Save { message } => print_report("stash save", &stash.stash_all(repos, message.as_deref()).await?),
        StashCommands::Pop { filter } => print_report("stash pop", &stash.unstash_all(repos, filter.as_deref()).await?),
        StashCommands::List => print_report("stash list", &stash.list_stashes(repos).await?),
        StashCommands::Status => print_report("stash status", &stash.stash_status(repos).await?),
        StashCommands::Clear => print_report("stash clear", &stash.clear_loom_stashes(repos).await?),
    }
}

fn timeout(ms: Option<u64>) -> Option<Duration> {
    ms.map(Duration::from_millis)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(workers) = cli.workers {
        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        config.concurrency.max_workers = workers;
    }

    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    let ok = runtime
        .block_on(run_application(&cli, &config))
        .context("Application failed")?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
