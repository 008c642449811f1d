// pgvault/src/backup/retention.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use super::{BackupName, BackupType};
use crate::errors::Result;
use crate::utils::{format_age, format_size};

/// A backup artifact found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct BackupFile {
    pub filename: String,
    pub path: PathBuf,
    pub backup_type: BackupType,
    pub compressed: bool,
    pub encrypted: bool,
    pub size: u64,
    pub size_formatted: String,
    pub modified: DateTime<Utc>,
    pub age: String,
}

/// Lists the files in `dir` that follow the backup naming convention, newest
/// first. A missing directory simply has no backups.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let now = Utc::now();
    let mut backups = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        let Some(name) = BackupName::parse(&filename) else {
            continue;
        };
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {}: {}", filename, e);
                continue;
            }
        };
        let modified: DateTime<Utc> = metadata.modified()?.into();

        backups.push(BackupFile {
            path: entry.path().to_path_buf(),
            backup_type: name.backup_type,
            compressed: name.compressed,
            encrypted: name.encrypted,
            size: metadata.len(),
            size_formatted: format_size(metadata.len()),
            modified,
            age: format_age(modified, now),
            filename,
        });
    }

    backups.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.filename.cmp(&a.filename))
    });
    Ok(backups)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub kept: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub dry_run: bool,
}

/// Keeps the newest `max_backups` files in the backup directory.
pub struct RetentionManager {
    backup_directory: PathBuf,
    max_backups: usize,
}

impl RetentionManager {
    pub fn new(backup_directory: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            backup_directory: backup_directory.into(),
            max_backups,
        }
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Files that a sweep keeping `keep` backups would delete, newest first.
    pub fn plan(&self, keep: usize) -> Result<(usize, Vec<BackupFile>)> {
        let mut backups = list_backups(&self.backup_directory)?;
        if backups.len() <= keep {
            return Ok((backups.len(), Vec::new()));
        }
        let expired = backups.split_off(keep);
        Ok((backups.len(), expired))
    }

    pub fn cleanup_old_backups(&self) -> RetentionReport {
        self.cleanup(self.max_backups, false)
    }

    /// Deletes everything beyond the newest `keep` files. A file that cannot
    /// be removed is recorded and the sweep carries on.
    pub fn cleanup(&self, keep: usize, dry_run: bool) -> RetentionReport {
        let mut report = RetentionReport {
            dry_run,
            ..RetentionReport::default()
        };
        let (kept, expired) = match self.plan(keep) {
            Ok(plan) => plan,
            Err(e) => {
                error!("❌ Failed to list backups for cleanup: {}", e);
                return report;
            }
        };
        report.kept = kept;

        if expired.is_empty() {
            info!("📁 {} backups present, limit {}. Nothing to clean up.", kept, keep);
            return report;
        }

        for backup in expired {
            if dry_run {
                info!("Would delete {} ({})", backup.filename, backup.age);
                report.deleted.push(backup.filename);
                continue;
            }
            match std::fs::remove_file(&backup.path) {
                Ok(()) => {
                    info!("🗑️  Deleted old backup: {}", backup.filename);
                    report.deleted.push(backup.filename);
                }
                Err(e) => {
                    error!("❌ Failed to delete {}: {}", backup.filename, e);
                    report.failed.push((backup.filename, e.to_string()));
                }
            }
        }

        if !dry_run {
            info!("🧹 Cleaned up {} old backups", report.deleted.len());
        }
        report
    }
}
