//! PostgreSQL backup and recovery tool
//!
//! Provides CLI interface for scheduled and one-shot backups, restores,
//! verification and retention.

// pgvault/src/main.rs
mod backup;
mod cloud;
mod config;
mod errors;
mod events;
mod restore;
mod scheduler;
mod service;
#[cfg(test)]
mod testing;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use backup::{BackupOptions, BackupType};
use config::{BackupConfig, DEFAULT_CONFIG_PATH};
use events::EventKind;
use restore::RestoreOptions;
use service::BackupService;
use utils::redact_url;

#[derive(Parser)]
#[command(name = "pgvault")]
#[command(about = "PostgreSQL backup scheduler, restore and retention tool")]
#[command(version)]
struct Cli {
    /// JSON configuration file (optional)
    #[arg(long, env = "BACKUP_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backup scheduler until interrupted (default)
    Start,
    /// Take a one-shot backup
    Backup {
        /// full, incremental, schema or data
        #[arg(default_value = "full")]
        backup_type: BackupType,
        /// Only dump these tables
        #[arg(long = "include-table", value_delimiter = ',')]
        include_tables: Vec<String>,
        /// Skip these tables
        #[arg(long = "exclude-table", value_delimiter = ',')]
        exclude_tables: Vec<String>,
        /// Write into this directory instead of the configured one
        #[arg(long)]
        output: Option<PathBuf>,
        /// Do not gzip the dump
        #[arg(long)]
        no_compression: bool,
    },
    /// Restore a backup file or cloud locator (s3://bucket/backups/<file>)
    Restore {
        target: String,
        /// Drop and recreate the database before loading
        #[arg(long = "drop")]
        drop_database: bool,
        /// Skip the interactive confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// List local backups, newest first
    List {
        #[arg(long, short)]
        verbose: bool,
    },
    /// Delete backups beyond the retention limit
    Cleanup {
        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
        /// Keep this many backups instead of the configured limit
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Check that a backup file is decompressible/decryptable
    Verify { file: PathBuf },
    /// Show statistics, schedules and the latest backup
    Status,
    /// List backups stored in the cloud bucket
    CloudList,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    match run_app(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<ExitCode> {
    let mut config = BackupConfig::load(&cli.config)
        .with_context(|| format!("Failed to load backup configuration from {}", cli.config.display()))?;
    let command = cli.command.unwrap_or(Commands::Start);

    if let Commands::Backup {
        output,
        no_compression,
        ..
    } = &command
    {
        if let Some(dir) = output {
            config.backup_directory = dir.clone();
        }
        if *no_compression {
            config.compression = false;
        }
    }

    let service = BackupService::new(config)
        .await
        .context("Failed to initialize backup service")?;
    service.on_event(|event| match event.kind {
        EventKind::Success => info!("📣 {}", event.message),
        EventKind::Error => warn!("📣 {}", event.message),
    });

    match command {
        Commands::Start => run_scheduler(&service).await,
        Commands::Backup {
            backup_type,
            include_tables,
            exclude_tables,
            ..
        } => {
            let options = BackupOptions {
                include_tables,
                exclude_tables,
            };
            run_backup(&service, backup_type, &options).await
        }
        Commands::Restore {
            target,
            drop_database,
            yes,
        } => run_restore(&service, &target, drop_database, yes).await,
        Commands::List { verbose } => run_list(&service, verbose),
        Commands::Cleanup { dry_run, keep } => Ok(run_cleanup(&service, keep, dry_run)),
        Commands::Verify { file } => Ok(run_verify(&service, &file).await),
        Commands::Status => Ok(run_status(&service).await),
        Commands::CloudList => Ok(run_cloud_list(&service).await),
    }
}

async fn check_connection(service: &BackupService) -> bool {
    match service.check_connection().await {
        Ok(name) => {
            println!("✅ Connected to database '{}'", name);
            true
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            false
        }
    }
}

async fn run_scheduler(service: &Arc<BackupService>) -> Result<ExitCode> {
    println!("🚀 Starting backup scheduler...");
    println!("   Database: {}", redact_url(&service.config().database_url));
    println!("   Backup directory: {}", service.config().backup_directory.display());
    if !check_connection(service).await {
        return Ok(ExitCode::FAILURE);
    }

    if service.config().wal_archiving {
        let pitr = service.setup_point_in_time_recovery().await;
        if let Some(e) = pitr.error {
            warn!("⚠️  Point-in-time recovery setup failed: {}", e);
        }
    }

    service.start_scheduler();
    if service.config().schedule.is_empty() {
        warn!("⚠️  No schedules enabled; nothing will run until one is configured");
    }
    for run in service.status().scheduled {
        println!(
            "📅 {} (next: {})",
            run.cadence,
            run.next_run
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string())
        );
    }
    println!("⏳ Scheduler running. Press Ctrl+C to stop.");

    wait_for_shutdown().await.context("Failed to listen for shutdown signals")?;

    println!("\n🛑 Shutting down backup scheduler...");
    service.stop_scheduler();
    println!("✅ Backup scheduler stopped");
    Ok(ExitCode::SUCCESS)
}

#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

async fn run_backup(
    service: &BackupService,
    backup_type: BackupType,
    options: &BackupOptions,
) -> Result<ExitCode> {
    println!("🔄 Creating {} backup...", backup_type);
    let record = service.create_backup(backup_type, options).await;

    if !record.success {
        eprintln!(
            "❌ Backup failed: {}",
            record.error.as_deref().unwrap_or("unknown error")
        );
        return Ok(ExitCode::FAILURE);
    }

    println!("✅ Backup created successfully");
    println!("   File: {}", record.filename);
    println!("   Path: {}", record.path.display());
    println!("   Size: {}", record.size_formatted);
    println!("   Duration: {:.2}s", record.duration_secs);
    println!(
        "   Checksum: {}",
        record.checksum.as_deref().unwrap_or("unavailable")
    );
    Ok(ExitCode::SUCCESS)
}

fn run_list(service: &BackupService, verbose: bool) -> Result<ExitCode> {
    let backups = service.list_backups().context("Failed to list backups")?;
    if backups.is_empty() {
        println!("📋 No backups found in {}", service.config().backup_directory.display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("📋 {} backup(s) in {}:", backups.len(), service.config().backup_directory.display());
    for backup in &backups {
        println!(
            "   {:<55} {:>12}  {:<12} {}",
            backup.filename, backup.size_formatted, backup.backup_type, backup.age
        );
        if verbose {
            println!("      path: {}", backup.path.display());
            println!("      modified: {}", backup.modified.to_rfc3339());
            println!(
                "      compressed: {}, encrypted: {}",
                backup.compressed, backup.encrypted
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_cleanup(service: &BackupService, keep: Option<usize>, dry_run: bool) -> ExitCode {
    if keep == Some(0) {
        eprintln!("❌ --keep must be at least 1");
        return ExitCode::FAILURE;
    }
    println!(
        "🧹 Cleaning up old backups{}...",
        if dry_run { " (dry run)" } else { "" }
    );
    let report = service.cleanup(keep, dry_run);

    if report.deleted.is_empty() && report.failed.is_empty() {
        println!("✅ Nothing to clean up ({} backups kept)", report.kept);
        return ExitCode::SUCCESS;
    }
    let verb = if dry_run { "Would delete" } else { "Deleted" };
    for name in &report.deleted {
        println!("   {} {}", verb, name);
    }
    for (name, reason) in &report.failed {
        eprintln!("   ❌ Could not delete {}: {}", name, reason);
    }
    println!(
        "✅ {} {} backup(s), kept {}",
        verb,
        report.deleted.len(),
        report.kept
    );
    if report.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_verify(service: &BackupService, file: &std::path::Path) -> ExitCode {
    println!("🔍 Verifying {}...", file.display());
    let report = service.verify_backup(file).await;
    if report.valid {
        println!("✅ Backup is valid");
        println!(
            "   Checksum: {}",
            report.checksum.as_deref().unwrap_or("unavailable")
        );
        ExitCode::SUCCESS
    } else {
        eprintln!(
            "❌ Backup verification failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
        ExitCode::FAILURE
    }
}

async fn run_status(service: &BackupService) -> ExitCode {
    let connected = check_connection(service).await;
    let status = service.status();
    let config = service.config();

    println!("📊 Backup status");
    println!("   Database: {}", redact_url(&config.database_url));
    println!("   Backup directory: {}", config.backup_directory.display());
    println!("   Retention: {} backups", config.max_backups);
    println!("   Compression: {}", config.compression);
    println!("   Encryption: {}", config.encryption);
    println!(
        "   Cloud storage: {}",
        if status.cloud_available { "available" } else { "disabled" }
    );
    println!("   Point-in-time recovery: {}", config.wal_archiving);
    println!("   Local backups: {}", status.local_backups);
    if let Some(latest) = &status.latest_backup {
        println!(
            "   Latest backup: {} ({}, {})",
            latest.filename, latest.size_formatted, latest.age
        );
    }
    if config.schedule.is_empty() {
        println!("   Schedule: none");
    }
    for cadence in config.schedule.cadences() {
        println!("   Schedule: {}", cadence);
    }
    println!(
        "   Runs this process: {} total, {} successful, {} failed",
        status.statistics.total_backups,
        status.statistics.successful_backups,
        status.statistics.failed_backups
    );

    if connected {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_cloud_list(service: &BackupService) -> ExitCode {
    if !service.cloud_available() {
        eprintln!("❌ Cloud storage is not configured");
        return ExitCode::FAILURE;
    }
    let objects = service.list_cloud_backups().await;
    if objects.is_empty() {
        println!("📋 No cloud backups found");
        return ExitCode::SUCCESS;
    }
    println!("📋 {} cloud backup(s):", objects.len());
    for object in objects {
        println!(
            "   {:<70} {:>12}  {}",
            object.locator,
            utils::format_size(object.size),
            object
                .last_modified
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        );
    }
    ExitCode::SUCCESS
}

async fn run_restore(
    service: &BackupService,
    target: &str,
    drop_database: bool,
    yes: bool,
) -> Result<ExitCode> {
    let confirmed = yes || confirm_restore(service, target, drop_database)?;
    if !confirmed {
        println!("🚫 Restore cancelled");
        return Ok(ExitCode::SUCCESS);
    }

    println!("🔄 Restoring from {}...", target);
    let result = service
        .restore(
            target,
            RestoreOptions {
                drop_database,
                confirmed,
            },
        )
        .await;

    if result.declined {
        println!("🚫 Restore cancelled");
        Ok(ExitCode::SUCCESS)
    } else if result.success {
        println!("✅ Restore completed in {:.2}s", result.duration_secs);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "❌ Restore failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Shows what is about to be restored and asks the operator to confirm.
fn confirm_restore(service: &BackupService, target: &str, drop_database: bool) -> Result<bool> {
    use std::io::{Write, stdin, stdout};

    println!("⚠️  About to restore database '{}'", service.config().database_name);
    println!("   Source: {}", target);
    if let Ok(metadata) = std::fs::metadata(target) {
        println!("   Size: {}", utils::format_size(metadata.len()));
        if let Ok(modified) = metadata.modified() {
            let modified: chrono::DateTime<chrono::Local> = modified.into();
            println!("   Modified: {}", modified.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    if drop_database {
        println!("   The database will be DROPPED and recreated first.");
    }
    print!("Continue? (y/N): ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    let answer = input.trim().to_ascii_lowercase();
    if answer != "y" && answer != "yes" {
        info!("Restore of {} declined by operator", target);
        return Ok(false);
    }
    Ok(true)
}
