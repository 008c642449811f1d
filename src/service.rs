//! `BackupService` owns every collaborator of the backup subsystem and is
//! passed explicitly to whoever drives it (CLI, scheduler, tests).

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::backup::{
    BackupFile, BackupOptions, BackupOrchestrator, BackupRecord, BackupType, IntegrityVerifier,
    PitrStatus, RetentionManager, RetentionReport, VerificationReport, list_backups,
    setup_point_in_time_recovery,
};
use crate::cloud::{CloudLocator, CloudObjectRef, CloudStorageAdapter};
use crate::config::BackupConfig;
use crate::errors::Result;
use crate::events::{BackupEvent, NotificationDispatcher, Statistics, StatisticsTracker};
use crate::restore::{RestoreOptions, RestoreOrchestrator, RestoreResult};
use crate::scheduler::Cadence;
use crate::scheduler::runner::{ScheduledBackup, Scheduler};
use crate::utils::command::{CommandRunner, ProcessRunner};
use crate::utils::database::{DatabaseAdmin, PgAdmin};

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledRun {
    pub cadence: String,
    pub next_run: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub statistics: Statistics,
    pub scheduler_running: bool,
    pub scheduled: Vec<ScheduledRun>,
    pub local_backups: usize,
    pub latest_backup: Option<BackupFile>,
    pub cloud_available: bool,
}

pub struct BackupService {
    config: Arc<BackupConfig>,
    backups: BackupOrchestrator,
    restores: RestoreOrchestrator,
    verifier: IntegrityVerifier,
    retention: RetentionManager,
    cloud: Arc<CloudStorageAdapter>,
    database: Arc<dyn DatabaseAdmin>,
    stats: Arc<StatisticsTracker>,
    notifier: Arc<NotificationDispatcher>,
    scheduler: Scheduler,
    run_lock: tokio::sync::Mutex<()>,
}

impl BackupService {
    /// Wires the service to real processes, Postgres and the configured cloud.
    pub async fn new(config: BackupConfig) -> Result<Arc<Self>> {
        let cloud = CloudStorageAdapter::from_config(&config).await;
        let database = Arc::new(PgAdmin::new(config.database_url.clone()));
        let service = Self::with_parts(config, Arc::new(ProcessRunner), database, cloud)?;
        info!(
            "💾 Backup service initialized {}",
            if service.cloud.is_available() {
                "(with cloud storage)"
            } else {
                "(local storage only)"
            }
        );
        Ok(service)
    }

    /// Fails when the configuration is unusable, e.g. encryption without a key.
    pub fn with_parts(
        config: BackupConfig,
        runner: Arc<dyn CommandRunner>,
        database: Arc<dyn DatabaseAdmin>,
        cloud: CloudStorageAdapter,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let config = Arc::new(config);
        let cloud = Arc::new(cloud);
        let stats = Arc::new(StatisticsTracker::new());
        let notifier = Arc::new(NotificationDispatcher::new());

        Ok(Arc::new(Self {
            backups: BackupOrchestrator::new(
                config.clone(),
                runner.clone(),
                database.clone(),
                cloud.clone(),
                stats.clone(),
                notifier.clone(),
            ),
            restores: RestoreOrchestrator::new(
                config.clone(),
                runner.clone(),
                database.clone(),
                cloud.clone(),
                notifier.clone(),
            ),
            verifier: IntegrityVerifier::new(runner, config.encryption_key.clone()),
            retention: RetentionManager::new(&config.backup_directory, config.max_backups),
            config,
            cloud,
            database,
            stats,
            notifier,
            scheduler: Scheduler::new(),
            run_lock: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Overlapping requests wait for the running backup and then run in turn.
    pub async fn create_backup(&self, backup_type: BackupType, options: &BackupOptions) -> BackupRecord {
        let _guard = self.run_lock.lock().await;
        self.backups.create_backup(backup_type, options).await
    }

    pub async fn restore_backup(&self, path: &Path, options: RestoreOptions) -> RestoreResult {
        self.restores.restore_backup(path, options).await
    }

    pub async fn restore_from_cloud(&self, locator: &str, options: RestoreOptions) -> RestoreResult {
        self.restores.restore_from_cloud(locator, options).await
    }

    /// Restores from a local path or, for `s3://…` style targets, from the cloud.
    pub async fn restore(&self, target: &str, options: RestoreOptions) -> RestoreResult {
        if CloudLocator::is_locator(target) {
            self.restore_from_cloud(target, options).await
        } else {
            self.restore_backup(Path::new(target), options).await
        }
    }

    pub async fn verify_backup(&self, path: &Path) -> VerificationReport {
        self.verifier.verify(path).await
    }

    pub fn list_backups(&self) -> Result<Vec<BackupFile>> {
        list_backups(&self.config.backup_directory)
    }

    pub fn cleanup(&self, keep: Option<usize>, dry_run: bool) -> RetentionReport {
        self.retention
            .cleanup(keep.unwrap_or(self.retention.max_backups()), dry_run)
    }

    pub async fn list_cloud_backups(&self) -> Vec<CloudObjectRef> {
        self.cloud.list().await
    }

    pub fn cloud_available(&self) -> bool {
        self.cloud.is_available()
    }

    pub async fn check_connection(&self) -> Result<String> {
        self.database.current_database().await
    }

    pub async fn setup_point_in_time_recovery(&self) -> PitrStatus {
        setup_point_in_time_recovery(&self.config).await
    }

    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&BackupEvent) + Send + Sync + 'static,
    {
        self.notifier.on_event(handler);
    }

    /// Starts (or restarts) one trigger per configured cadence.
    pub fn start_scheduler(self: &Arc<Self>) -> usize {
        let target: Arc<dyn ScheduledBackup> = self.clone();
        self.scheduler.start(&self.config.schedule, target)
    }

    /// Stops every trigger. Triggers hold a reference to the service, so this
    /// must be called before the service can be dropped.
    pub fn stop_scheduler(&self) -> usize {
        self.scheduler.stop()
    }

    pub fn status(&self) -> ServiceStatus {
        let backups = self.list_backups().unwrap_or_else(|e| {
            error!("❌ Failed to list backups: {}", e);
            Vec::new()
        });
        ServiceStatus {
            statistics: self.statistics(),
            scheduler_running: self.scheduler.is_running(),
            scheduled: self
                .scheduler
                .next_runs(Local::now())
                .into_iter()
                .map(|(cadence, next_run)| ScheduledRun {
                    cadence: cadence.to_string(),
                    next_run,
                })
                .collect(),
            local_backups: backups.len(),
            latest_backup: backups.into_iter().next(),
            cloud_available: self.cloud.is_available(),
        }
    }
}

#[async_trait]
impl ScheduledBackup for BackupService {
    async fn run_scheduled(&self, cadence: Cadence) {
        let record = self
            .create_backup(BackupType::Full, &BackupOptions::default())
            .await;
        if !record.success {
            error!(
                "❌ Scheduled {} backup failed: {}",
                cadence.name(),
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
