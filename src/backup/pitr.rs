// pgvault/src/backup/pitr.rs
//! WAL archive scaffolding for point-in-time recovery. Only the archive
//! directory is prepared; the server's `archive_command` is left to the operator.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

use crate::config::BackupConfig;

#[derive(Debug, Clone, Serialize)]
pub struct PitrStatus {
    pub wal_archiving: bool,
    pub archive_directory: Option<PathBuf>,
    /// Suggested `archive_command` for postgresql.conf.
    pub archive_command: Option<String>,
    pub error: Option<String>,
}

pub async fn setup_point_in_time_recovery(config: &BackupConfig) -> PitrStatus {
    if !config.wal_archiving {
        return PitrStatus {
            wal_archiving: false,
            archive_directory: None,
            archive_command: None,
            error: None,
        };
    }

    info!("📝 Setting up WAL archiving for point-in-time recovery");
    let dir = &config.wal_archive_directory;
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        error!("❌ Failed to setup point-in-time recovery: {}", e);
        return PitrStatus {
            wal_archiving: false,
            archive_directory: None,
            archive_command: None,
            error: Some(e.to_string()),
        };
    }

    let absolute = std::path::absolute(dir).unwrap_or_else(|_| dir.clone());
    let archive_command = format!(
        "test ! -f {dir}/%f && cp %p {dir}/%f",
        dir = absolute.display()
    );
    info!("WAL archive directory ready at {}", absolute.display());
    info!("Set archive_mode = on and archive_command = '{}' in postgresql.conf", archive_command);

    PitrStatus {
        wal_archiving: true,
        archive_directory: Some(absolute),
        archive_command: Some(archive_command),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;

    #[tokio::test]
    async fn disabled_archiving_touches_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = test_config(dir.path().join("backups"));
        config.wal_archive_directory = dir.path().join("wal");

        let status = setup_point_in_time_recovery(&config).await;
        assert!(!status.wal_archiving);
        assert!(!config.wal_archive_directory.exists());
        Ok(())
    }

    #[tokio::test]
    async fn enabled_archiving_creates_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = test_config(dir.path().join("backups"));
        config.wal_archiving = true;
        config.wal_archive_directory = dir.path().join("wal").join("archive");

        let status = setup_point_in_time_recovery(&config).await;
        assert!(status.wal_archiving);
        assert!(config.wal_archive_directory.is_dir());
        assert!(status.archive_command.unwrap().contains("cp %p"));
        Ok(())
    }
}
