//! Best-effort offload of backup files to a cloud bucket.
//!
//! Every object lives under the `backups/` prefix and is addressed by a
//! locator of the form `<provider>://<bucket>/backups/<filename>`.

pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::BackupConfig;
use crate::errors::{BackupError, Result};

pub const KEY_PREFIX: &str = "backups/";
pub const LIST_LIMIT: i32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Minimal object API the adapter needs from a provider SDK.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: &[(String, String)],
    ) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn list_objects(&self, bucket: &str, prefix: &str, max_keys: i32) -> Result<Vec<ObjectSummary>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudLocator {
    pub provider: String,
    pub bucket: String,
    pub key: String,
}

impl CloudLocator {
    /// Parses `<provider>://<bucket>/<key>`.
    pub fn parse(locator: &str) -> Result<Self> {
        let url = url::Url::parse(locator)
            .map_err(|e| BackupError::CloudTransfer(format!("invalid cloud locator '{locator}': {e}")))?;
        let bucket = url
            .host_str()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| BackupError::CloudTransfer(format!("cloud locator '{locator}' has no bucket")))?
            .to_string();
        let key = url.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            return Err(BackupError::CloudTransfer(format!(
                "cloud locator '{locator}' has no object key"
            )));
        }
        Ok(Self {
            provider: url.scheme().to_string(),
            bucket,
            key,
        })
    }

    pub fn is_locator(value: &str) -> bool {
        ["s3://", "gs://", "azure://"]
            .iter()
            .any(|scheme| value.starts_with(scheme))
    }

    /// Last path segment of the key.
    pub fn filename(&self) -> Option<&str> {
        self.key
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
    }
}

impl fmt::Display for CloudLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.provider, self.bucket, self.key)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudObjectRef {
    pub key: String,
    pub filename: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub locator: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudUpload {
    pub success: bool,
    pub locator: Option<String>,
    pub reason: Option<String>,
    pub upload_secs: f64,
    pub size_bytes: u64,
}

impl CloudUpload {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            locator: None,
            reason: Some(reason.into()),
            upload_secs: 0.0,
            size_bytes: 0,
        }
    }
}

pub struct CloudStorageAdapter {
    store: Option<Arc<dyn ObjectStore>>,
    provider: String,
    bucket: String,
    backup_directory: PathBuf,
    database_name: String,
}

impl CloudStorageAdapter {
    /// Builds the provider client when cloud storage is enabled and fully
    /// configured; otherwise returns an adapter that reports itself unavailable.
    pub async fn from_config(config: &BackupConfig) -> Self {
        let disabled = || Self::disabled(&config.backup_directory, &config.database_name);
        if !config.cloud.enabled {
            return disabled();
        }
        let Some((bucket, key_id, secret)) = config.cloud.credentials() else {
            warn!("⚠️  Cloud bucket or credentials not configured. Cloud backup disabled.");
            return disabled();
        };
        if config.cloud.provider != "s3" {
            warn!(
                "⚠️  Cloud provider '{}' is not supported (only s3). Cloud backup disabled.",
                config.cloud.provider
            );
            return disabled();
        }

        let store = s3::S3ObjectStore::connect(
            &config.cloud.region,
            config.cloud.endpoint_url.as_deref(),
            key_id,
            secret,
        )
        .await;
        info!("✅ S3 client initialized for region: {}", config.cloud.region);

        Self::with_store(
            Arc::new(store),
            &config.cloud.provider,
            bucket,
            &config.backup_directory,
            &config.database_name,
        )
    }

    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        provider: &str,
        bucket: &str,
        backup_directory: &Path,
        database_name: &str,
    ) -> Self {
        Self {
            store: Some(store),
            provider: provider.to_string(),
            bucket: bucket.to_string(),
            backup_directory: backup_directory.to_path_buf(),
            database_name: database_name.to_string(),
        }
    }

    pub fn disabled(backup_directory: &Path, database_name: &str) -> Self {
        Self {
            store: None,
            provider: String::new(),
            bucket: String::new(),
            backup_directory: backup_directory.to_path_buf(),
            database_name: database_name.to_string(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn locator_for(&self, filename: &str) -> String {
        format!("{}://{}/{}{}", self.provider, self.bucket, KEY_PREFIX, filename)
    }

    /// Uploads one backup file. Never fails: problems are reported in the result.
    pub async fn upload(&self, path: &Path) -> CloudUpload {
        let Some(store) = &self.store else {
            info!("📁 Skipping cloud upload - cloud storage disabled");
            return CloudUpload::skipped("Cloud storage disabled");
        };
        let Some(filename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return CloudUpload::skipped(format!("{} has no file name", path.display()));
        };

        let started = Instant::now();
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) => {
                error!("❌ Cloud upload failed reading {}: {}", path.display(), e);
                return CloudUpload::skipped(format!("Failed to read {}: {}", path.display(), e));
            }
        };
        let size_bytes = body.len() as u64;
        let key = format!("{KEY_PREFIX}{filename}");
        let metadata = vec![
            ("backup-type".to_string(), "database".to_string()),
            ("created-at".to_string(), Utc::now().to_rfc3339()),
            ("database-name".to_string(), self.database_name.clone()),
            ("file-size".to_string(), size_bytes.to_string()),
        ];

        info!("☁️  Uploading {} to {}", filename, self.bucket);
        match store.put_object(&self.bucket, &key, body, &metadata).await {
            Ok(()) => {
                let upload_secs = started.elapsed().as_secs_f64();
                let locator = self.locator_for(&filename);
                info!(
                    "✅ Backup uploaded to {} in {:.2}s ({:.2}MB)",
                    locator,
                    upload_secs,
                    size_bytes as f64 / (1024.0 * 1024.0)
                );
                CloudUpload {
                    success: true,
                    locator: Some(locator),
                    reason: None,
                    upload_secs,
                    size_bytes,
                }
            }
            Err(e) => {
                error!("❌ Cloud upload failed: {}", e);
                CloudUpload {
                    success: false,
                    locator: None,
                    reason: Some(e.to_string()),
                    upload_secs: started.elapsed().as_secs_f64(),
                    size_bytes,
                }
            }
        }
    }

    /// Fetches an object into the backup directory under its original file name.
    pub async fn download(&self, locator: &str) -> Result<PathBuf> {
        let Some(store) = &self.store else {
            return Err(BackupError::CloudTransfer("Cloud storage not configured".to_string()));
        };
        let parsed = CloudLocator::parse(locator)?;
        if parsed.provider != self.provider {
            return Err(BackupError::CloudTransfer(format!(
                "locator provider '{}' does not match configured provider '{}'",
                parsed.provider, self.provider
            )));
        }
        let filename = parsed
            .filename()
            .ok_or_else(|| BackupError::CloudTransfer(format!("locator '{locator}' has no file name")))?
            .to_string();

        let started = Instant::now();
        info!("☁️  Downloading {}", parsed);
        let body = store.get_object(&parsed.bucket, &parsed.key).await?;

        tokio::fs::create_dir_all(&self.backup_directory).await?;
        let local_path = self.backup_directory.join(&filename);
        tokio::fs::write(&local_path, &body).await?;

        info!(
            "✅ Backup downloaded to {} in {:.2}s ({:.2}MB)",
            local_path.display(),
            started.elapsed().as_secs_f64(),
            body.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(local_path)
    }

    /// Up to [`LIST_LIMIT`] objects under the backup prefix, in provider order.
    pub async fn list(&self) -> Vec<CloudObjectRef> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.list_objects(&self.bucket, KEY_PREFIX, LIST_LIMIT).await {
            Ok(objects) => objects
                .into_iter()
                .map(|object| CloudObjectRef {
                    filename: object.key.rsplit('/').next().unwrap_or_default().to_string(),
                    locator: format!("{}://{}/{}", self.provider, self.bucket, object.key),
                    key: object.key,
                    size: object.size,
                    last_modified: object.last_modified,
                })
                .collect(),
            Err(e) => {
                error!("❌ Failed to list cloud backups: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeObjectStore;

    fn adapter(store: Arc<FakeObjectStore>, dir: &Path) -> CloudStorageAdapter {
        CloudStorageAdapter::with_store(store, "s3", "ge-backups", dir, "ge_metrics")
    }

    #[test]
    fn locators_parse_into_parts() -> anyhow::Result<()> {
        let locator = CloudLocator::parse("s3://ge-backups/backups/full_backup_2024-01-15T10-30-45.sql.gz")?;
        assert_eq!(locator.provider, "s3");
        assert_eq!(locator.bucket, "ge-backups");
        assert_eq!(locator.key, "backups/full_backup_2024-01-15T10-30-45.sql.gz");
        assert_eq!(locator.filename(), Some("full_backup_2024-01-15T10-30-45.sql.gz"));
        assert_eq!(locator.to_string(), "s3://ge-backups/backups/full_backup_2024-01-15T10-30-45.sql.gz");

        assert!(CloudLocator::parse("s3://ge-backups/").is_err());
        assert!(CloudLocator::parse("not a locator").is_err());
        assert!(CloudLocator::is_locator("gs://bucket/backups/x.sql"));
        assert!(!CloudLocator::is_locator("./backups/x.sql"));
        Ok(())
    }

    #[tokio::test]
    async fn upload_stores_object_with_metadata() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("full_backup_2024-01-15T10-30-45-000.sql.gz");
        tokio::fs::write(&path, b"dump-bytes").await?;
        let store = Arc::new(FakeObjectStore::default());

        let upload = adapter(store.clone(), dir.path()).upload(&path).await;

        assert!(upload.success);
        assert_eq!(
            upload.locator.as_deref(),
            Some("s3://ge-backups/backups/full_backup_2024-01-15T10-30-45-000.sql.gz")
        );
        let stored = store.object("backups/full_backup_2024-01-15T10-30-45-000.sql.gz").unwrap();
        assert_eq!(stored.body, b"dump-bytes");
        assert!(stored.metadata.contains(&("database-name".to_string(), "ge_metrics".to_string())));
        assert!(stored.metadata.contains(&("file-size".to_string(), "10".to_string())));
        Ok(())
    }

    #[tokio::test]
    async fn upload_failure_is_reported_not_raised() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("full_backup_2024-01-15T10-30-45-000.sql");
        tokio::fs::write(&path, b"x").await?;
        let store = Arc::new(FakeObjectStore::failing("access denied"));

        let upload = adapter(store, dir.path()).upload(&path).await;
        assert!(!upload.success);
        assert!(upload.reason.unwrap().contains("access denied"));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_adapter_is_a_no_op() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let adapter = CloudStorageAdapter::disabled(dir.path(), "ge_metrics");
        assert!(!adapter.is_available());

        let upload = adapter.upload(&dir.path().join("whatever.sql")).await;
        assert!(!upload.success);
        assert_eq!(upload.reason.as_deref(), Some("Cloud storage disabled"));
        assert!(adapter.list().await.is_empty());
        assert!(adapter.download("s3://b/backups/x.sql").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn download_restores_original_filename() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(FakeObjectStore::default());
        store.insert("backups/schema_backup_2024-02-01T00-00-00-000.sql", b"CREATE TABLE t();");
        let backups = dir.path().join("restore-area");

        let local = adapter(store, &backups)
            .download("s3://ge-backups/backups/schema_backup_2024-02-01T00-00-00-000.sql")
            .await?;

        assert_eq!(local, backups.join("schema_backup_2024-02-01T00-00-00-000.sql"));
        assert_eq!(tokio::fs::read(&local).await?, b"CREATE TABLE t();");
        Ok(())
    }

    #[tokio::test]
    async fn list_maps_objects_to_locators() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(FakeObjectStore::default());
        store.insert("backups/full_backup_2024-01-01T00-00-00-000.sql.gz", b"a");
        store.insert("other/unrelated.txt", b"b");

        let listed = adapter(store, dir.path()).list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "full_backup_2024-01-01T00-00-00-000.sql.gz");
        assert_eq!(
            listed[0].locator,
            "s3://ge-backups/backups/full_backup_2024-01-01T00-00-00-000.sql.gz"
        );
        assert_eq!(listed[0].size, 1);
        Ok(())
    }
}
