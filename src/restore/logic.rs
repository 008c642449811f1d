// pgvault/src/restore/logic.rs
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, error, info};

use super::db_restore::load_pipeline;
use super::{RestoreOptions, RestoreResult};
use crate::backup::commands::decrypt_command;
use crate::backup::{COMPRESSED_SUFFIX, ENCRYPTED_SUFFIX};
use crate::cloud::CloudStorageAdapter;
use crate::config::BackupConfig;
use crate::errors::{BackupError, Result};
use crate::events::{BackupEvent, NotificationDispatcher};
use crate::utils::command::CommandRunner;
use crate::utils::database::DatabaseAdmin;

/// Drives one restore run: decrypt, optionally recreate the database, load.
pub struct RestoreOrchestrator {
    config: Arc<BackupConfig>,
    runner: Arc<dyn CommandRunner>,
    database: Arc<dyn DatabaseAdmin>,
    cloud: Arc<CloudStorageAdapter>,
    notifier: Arc<NotificationDispatcher>,
}

impl RestoreOrchestrator {
    pub fn new(
        config: Arc<BackupConfig>,
        runner: Arc<dyn CommandRunner>,
        database: Arc<dyn DatabaseAdmin>,
        cloud: Arc<CloudStorageAdapter>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            config,
            runner,
            database,
            cloud,
            notifier,
        }
    }

    pub async fn restore_backup(&self, path: &Path, options: RestoreOptions) -> RestoreResult {
        let started = Instant::now();
        info!("🔄 Starting restore from: {}", path.display());

        let outcome = self.restore(path, options).await;
        let mut result = RestoreResult {
            success: false,
            backup_file: path.to_path_buf(),
            declined: false,
            error: None,
            duration_secs: started.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
        };

        match outcome {
            Ok(()) => {
                result.success = true;
                info!("✅ Restore completed from {} in {:.2}s", path.display(), result.duration_secs);
                self.notifier.emit(
                    BackupEvent::success(format!("Database restored from {}", path.display()))
                        .with_details(&result),
                );
            }
            Err(BackupError::ConfirmationDeclined) => {
                result.declined = true;
                info!("🚫 Restore of {} cancelled: confirmation not given", path.display());
            }
            Err(e) => {
                error!("❌ Restore failed: {}", e);
                result.error = Some(e.to_string());
                self.notifier
                    .emit(BackupEvent::error(format!("Restore failed: {e}")).with_details(&result));
            }
        }
        result
    }

    /// Downloads the object into the backup directory, then restores it.
    pub async fn restore_from_cloud(&self, locator: &str, options: RestoreOptions) -> RestoreResult {
        match self.cloud.download(locator).await {
            Ok(local) => self.restore_backup(&local, options).await,
            Err(e) => {
                error!("❌ Restore failed: {}", e);
                let result = RestoreResult {
                    success: false,
                    backup_file: PathBuf::from(locator),
                    declined: false,
                    error: Some(e.to_string()),
                    duration_secs: 0.0,
                    timestamp: Utc::now(),
                };
                self.notifier
                    .emit(BackupEvent::error(format!("Restore failed: {e}")).with_details(&result));
                result
            }
        }
    }

    async fn restore(&self, path: &Path, options: RestoreOptions) -> Result<()> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(BackupError::NotFound(path.display().to_string()));
        }
        if self.config.require_confirmation && !options.confirmed {
            return Err(BackupError::ConfirmationDeclined);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Plaintext goes to a scratch directory that is removed on return.
        let mut scratch: Option<TempDir> = None;
        let sql_path = match name.strip_suffix(ENCRYPTED_SUFFIX) {
            Some(inner) => {
                let key = self.config.encryption_key().ok_or_else(|| {
                    BackupError::Config(
                        "backup is encrypted but BACKUP_ENCRYPTION_KEY is not set".to_string(),
                    )
                })?;
                let dir = scratch.insert(tempfile::tempdir()?);
                let decrypted = dir.path().join(inner);
                info!("🔓 Decrypting {}", name);
                self.runner.run(&decrypt_command(path, &decrypted, key)).await?;
                decrypted
            }
            None => path.to_path_buf(),
        };

        self.load(&sql_path, options).await
    }

    async fn load(&self, sql_path: &Path, options: RestoreOptions) -> Result<()> {
        if options.drop_database {
            self.database
                .recreate_database(&self.config.database_name)
                .await?;
        }

        let compressed = sql_path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(COMPRESSED_SUFFIX));
        let pipeline = load_pipeline(&self.config.database_url, sql_path, compressed);
        info!("📥 Loading {} into {}", sql_path.display(), self.config.database_name);
        let output = self.runner.run(&pipeline).await?;
        for line in output.stdout.lines().chain(output.stderr.lines()) {
            debug!("psql: {}", line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::events::EventKind;
    use crate::testing::{FakeDatabase, FakeObjectStore, FakeRunner, test_config};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        runner: Arc<FakeRunner>,
        database: Arc<FakeDatabase>,
        events: Arc<Mutex<Vec<BackupEvent>>>,
        orchestrator: RestoreOrchestrator,
    }

    fn harness(configure: impl FnOnce(&mut BackupConfig), store: Option<Arc<FakeObjectStore>>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path().to_path_buf());
        configure(&mut config);
        let runner = Arc::new(FakeRunner::new());
        let database = Arc::new(FakeDatabase::reachable("ge_metrics"));
        let notifier = Arc::new(NotificationDispatcher::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        notifier.on_event(move |e| sink.lock().unwrap().push(e.clone()));
        let cloud = match store {
            Some(store) => CloudStorageAdapter::with_store(
                store,
                "s3",
                "ge-backups",
                &config.backup_directory,
                &config.database_name,
            ),
            None => CloudStorageAdapter::disabled(&config.backup_directory, &config.database_name),
        };
        let orchestrator = RestoreOrchestrator::new(
            Arc::new(config),
            runner.clone(),
            database.clone(),
            Arc::new(cloud),
            notifier,
        );
        Harness {
            dir,
            runner,
            database,
            events,
            orchestrator,
        }
    }

    fn write_backup(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"backup-bytes").unwrap();
        path
    }

    #[tokio::test]
    async fn missing_file_fails_without_touching_the_database() {
        let h = harness(|_| {}, None);
        let options = RestoreOptions {
            drop_database: true,
            confirmed: true,
        };

        let result = h
            .orchestrator
            .restore_backup(&h.dir.path().join("full_backup_2024-01-01T00-00-00-000.sql.gz"), options)
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
        assert!(h.database.recreated().is_empty());
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn unconfirmed_restore_is_declined_not_failed() {
        let h = harness(|c| c.require_confirmation = true, None);
        let path = write_backup(h.dir.path(), "full_backup_2024-01-01T00-00-00-000.sql");

        let result = h
            .orchestrator
            .restore_backup(
                &path,
                RestoreOptions {
                    drop_database: true,
                    confirmed: false,
                },
            )
            .await;

        assert!(!result.success);
        assert!(result.declined);
        assert!(result.error.is_none());
        assert!(h.database.recreated().is_empty());
        assert!(h.runner.calls().is_empty());
        assert!(h.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn encrypted_compressed_backup_is_decrypted_then_streamed() {
        let h = harness(
            |c| c.encryption_key = Some(Secret::new("k3y")),
            None,
        );
        let path = write_backup(h.dir.path(), "full_backup_2024-01-01T00-00-00-000.sql.gz.enc");

        let result = h.orchestrator.restore_backup(&path, RestoreOptions::default()).await;

        assert!(result.success, "{:?}", result.error);
        let calls = h.runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].programs(), vec!["openssl"]);
        assert_eq!(calls[1].programs(), vec!["gzip", "psql"]);
        let decrypted = PathBuf::from(calls[0].stages[0].flag_value("-out").unwrap());
        assert_eq!(calls[1].stages[0].arg_strings()[1], decrypted.to_string_lossy());
        assert!(decrypted.ends_with("full_backup_2024-01-01T00-00-00-000.sql.gz"));
        assert!(!decrypted.starts_with(h.dir.path()));
        assert!(!decrypted.exists());
        assert!(path.exists());
        assert_eq!(crate::backup::list_backups(h.dir.path()).unwrap().len(), 1);
        assert!(h.database.recreated().is_empty());
        assert_eq!(h.events.lock().unwrap()[0].kind, EventKind::Success);
    }

    #[tokio::test]
    async fn drop_database_recreates_before_loading() {
        let h = harness(|_| {}, None);
        let path = write_backup(h.dir.path(), "schema_backup_2024-01-01T00-00-00-000.sql");

        let result = h
            .orchestrator
            .restore_backup(
                &path,
                RestoreOptions {
                    drop_database: true,
                    confirmed: false,
                },
            )
            .await;

        assert!(result.success);
        assert_eq!(h.database.recreated(), vec!["ge_metrics".to_string()]);
        assert_eq!(h.runner.calls()[0].programs(), vec!["psql"]);
    }

    #[tokio::test]
    async fn load_failure_is_reported_and_cleans_up() {
        let h = harness(|c| c.encryption_key = Some(Secret::new("k3y")), None);
        let path = write_backup(h.dir.path(), "data_backup_2024-01-01T00-00-00-000.sql.enc");
        h.runner.fail_program("psql", "ERROR:  relation \"items\" already exists");

        let result = h.orchestrator.restore_backup(&path, RestoreOptions::default()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("already exists"));
        assert!(h.runner.ran("openssl"));
        let decrypted = PathBuf::from(h.runner.calls()[0].stages[0].flag_value("-out").unwrap());
        assert!(!decrypted.exists());
        assert!(!h.dir.path().join("data_backup_2024-01-01T00-00-00-000.sql").exists());
        assert_eq!(h.events.lock().unwrap()[0].kind, EventKind::Error);
    }

    #[tokio::test]
    async fn encrypted_backup_without_key_is_a_configuration_error() {
        let h = harness(|_| {}, None);
        let path = write_backup(h.dir.path(), "data_backup_2024-01-01T00-00-00-000.sql.enc");

        let result = h.orchestrator.restore_backup(&path, RestoreOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("BACKUP_ENCRYPTION_KEY"));
        assert!(!h.runner.ran("openssl"));
    }

    #[tokio::test]
    async fn cloud_restore_downloads_then_loads() {
        let store = Arc::new(FakeObjectStore::default());
        store.insert("backups/schema_backup_2024-02-01T00-00-00-000.sql", b"CREATE TABLE t();");
        let h = harness(|_| {}, Some(store));

        let result = h
            .orchestrator
            .restore_from_cloud(
                "s3://ge-backups/backups/schema_backup_2024-02-01T00-00-00-000.sql",
                RestoreOptions::default(),
            )
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            result.backup_file,
            h.dir.path().join("schema_backup_2024-02-01T00-00-00-000.sql")
        );
        assert_eq!(h.runner.calls()[0].programs(), vec!["psql"]);
    }

    #[tokio::test]
    async fn cloud_restore_with_unknown_object_fails() {
        let h = harness(|_| {}, Some(Arc::new(FakeObjectStore::default())));

        let result = h
            .orchestrator
            .restore_from_cloud("s3://ge-backups/backups/missing.sql", RestoreOptions::default())
            .await;
        assert!(!result.success);
        assert!(h.runner.calls().is_empty());
    }
}
