// pgvault/src/backup/logic.rs
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::commands::{dump_pipeline, encrypt_command};
use super::{
    BackupOptions, BackupRecord, BackupType, ENCRYPTED_SUFFIX, IntegrityVerifier, RetentionManager,
    backup_filename,
};
use crate::cloud::CloudStorageAdapter;
use crate::config::BackupConfig;
use crate::errors::{BackupError, Result};
use crate::events::{BackupEvent, NotificationDispatcher, StatisticsTracker};
use crate::utils::checksum::calculate_checksum;
use crate::utils::command::CommandRunner;
use crate::utils::database::DatabaseAdmin;
use crate::utils::{format_size, redact_url};

/// Drives one backup run from directory preparation to retention.
pub struct BackupOrchestrator {
    config: Arc<BackupConfig>,
    runner: Arc<dyn CommandRunner>,
    database: Arc<dyn DatabaseAdmin>,
    cloud: Arc<CloudStorageAdapter>,
    verifier: IntegrityVerifier,
    retention: RetentionManager,
    stats: Arc<StatisticsTracker>,
    notifier: Arc<NotificationDispatcher>,
}

impl BackupOrchestrator {
    pub fn new(
        config: Arc<BackupConfig>,
        runner: Arc<dyn CommandRunner>,
        database: Arc<dyn DatabaseAdmin>,
        cloud: Arc<CloudStorageAdapter>,
        stats: Arc<StatisticsTracker>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            verifier: IntegrityVerifier::new(runner.clone(), config.encryption_key.clone()),
            retention: RetentionManager::new(&config.backup_directory, config.max_backups),
            config,
            runner,
            database,
            cloud,
            stats,
            notifier,
        }
    }

    /// Runs a backup and reports the outcome in the returned record. This
    /// never fails: errors end up in `record.error` with `success == false`.
    pub async fn create_backup(&self, backup_type: BackupType, options: &BackupOptions) -> BackupRecord {
        let started = Instant::now();
        let created_at = Utc::now();
        let filename = backup_filename(backup_type, created_at, self.config.compression);
        let path = self.config.backup_directory.join(&filename);

        info!("🔄 Starting {} backup...", backup_type);

        let final_path = match self.produce_artifact(backup_type, options, &path).await {
            Ok(final_path) => final_path,
            Err(e) => {
                let record = BackupRecord {
                    filename,
                    path,
                    backup_type,
                    size: 0,
                    size_formatted: format_size(0),
                    duration_secs: started.elapsed().as_secs_f64(),
                    checksum: None,
                    created_at,
                    success: false,
                    error: Some(e.to_string()),
                };
                error!("❌ Backup failed: {}", e);
                self.stats.record(&record);
                self.notifier
                    .emit(BackupEvent::error(format!("Backup failed: {e}")).with_details(&record));
                return record;
            }
        };

        let size = tokio::fs::metadata(&final_path)
            .await
            .map(|m| m.len())
            .unwrap_or_else(|e| {
                warn!("Could not stat {}: {}", final_path.display(), e);
                0
            });
        let checksum = calculate_checksum(&final_path).await;
        let record = BackupRecord {
            filename: final_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(filename),
            path: std::path::absolute(&final_path).unwrap_or_else(|_| final_path.clone()),
            backup_type,
            size,
            size_formatted: format_size(size),
            duration_secs: started.elapsed().as_secs_f64(),
            checksum,
            created_at,
            success: true,
            error: None,
        };

        info!(
            "✅ Backup completed: {} ({}, {:.2}s)",
            record.filename, record.size_formatted, record.duration_secs
        );
        self.stats.record(&record);
        self.notifier.emit(
            BackupEvent::success(format!("Backup completed successfully: {}", record.filename))
                .with_details(&record),
        );

        let report = self.verifier.verify(&final_path).await;
        if !report.valid {
            warn!(
                "⚠️  Freshly written backup {} failed verification: {}",
                record.filename,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }

        self.offload(&final_path).await;

        let report = self.retention.cleanup_old_backups();
        if !report.failed.is_empty() {
            warn!("⚠️  {} old backups could not be deleted", report.failed.len());
        }

        record
    }

    /// Steps that abort the run on failure. Returns the path of the final artifact.
    async fn produce_artifact(
        &self,
        backup_type: BackupType,
        options: &BackupOptions,
        path: &Path,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.backup_directory).await?;

        let database = self.database.current_database().await?;
        info!("✅ Database connection verified ({})", database);

        let pipeline = dump_pipeline(
            &self.config.database_url,
            backup_type,
            options,
            self.config.compression,
            path,
        );
        info!("📦 Dumping {}", redact_url(&self.config.database_url));
        match self.runner.run(&pipeline).await {
            Ok(output) if !output.stderr.trim().is_empty() => {
                debug!("pg_dump: {}", output.stderr.trim());
            }
            Ok(_) => {}
            Err(e) => {
                remove_partial(path).await;
                return Err(e.into());
            }
        }

        if !self.config.encryption {
            return Ok(path.to_path_buf());
        }

        let Some(key) = self.config.encryption_key() else {
            remove_partial(path).await;
            return Err(BackupError::Config(
                "encryption is enabled but BACKUP_ENCRYPTION_KEY is not set".to_string(),
            ));
        };
        let mut encrypted = path.as_os_str().to_owned();
        encrypted.push(ENCRYPTED_SUFFIX);
        let encrypted = PathBuf::from(encrypted);

        info!("🔐 Encrypting backup");
        let result = self.runner.run(&encrypt_command(path, &encrypted, key)).await;
        remove_partial(path).await;
        if let Err(e) = result {
            remove_partial(&encrypted).await;
            return Err(e.into());
        }
        Ok(encrypted)
    }

    /// Best-effort upload. The outcome is logged and notified but never
    /// changes the result of the backup itself.
    async fn offload(&self, path: &Path) {
        if !self.cloud.is_available() {
            return;
        }
        let upload = self.cloud.upload(path).await;
        if upload.success {
            self.notifier.emit(
                BackupEvent::success(format!(
                    "Backup uploaded to cloud storage: {}",
                    upload.locator.as_deref().unwrap_or_default()
                ))
                .with_details(&upload),
            );
        } else {
            self.notifier.emit(
                BackupEvent::error(format!(
                    "Cloud upload failed: {}",
                    upload.reason.as_deref().unwrap_or("unknown error")
                ))
                .with_details(&upload),
            );
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}
