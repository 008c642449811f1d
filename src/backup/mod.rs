pub(crate) mod commands;
pub(crate) mod logic;
pub(crate) mod pitr;
pub(crate) mod retention;
pub(crate) mod verification;

pub use logic::BackupOrchestrator;
pub use pitr::{PitrStatus, setup_point_in_time_recovery};
pub use retention::{BackupFile, RetentionManager, RetentionReport, list_backups};
pub use verification::{IntegrityVerifier, VerificationReport};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

pub const COMPRESSED_SUFFIX: &str = ".gz";
pub const ENCRYPTED_SUFFIX: &str = ".enc";

static BACKUP_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(full|incremental|schema|data)_backup_(\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}(?:-\d{3})?)\.sql(\.gz)?(\.enc)?$",
    )
    .expect("backup filename pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
    Schema,
    Data,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::Schema => "schema",
            BackupType::Data => "data",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            "schema" => Ok(BackupType::Schema),
            "data" => Ok(BackupType::Data),
            other => Err(format!(
                "unknown backup type '{other}' (expected full, incremental, schema or data)"
            )),
        }
    }
}

/// Table selection passed through to the dump tool. Both lists may be set;
/// how they interact is up to pg_dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupOptions {
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
}

/// Outcome of one backup run. Built once at the end of the run and never
/// changed afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRecord {
    pub filename: String,
    pub path: PathBuf,
    pub backup_type: BackupType,
    pub size: u64,
    pub size_formatted: String,
    pub duration_secs: f64,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// What a backup file name says about its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupName {
    pub backup_type: BackupType,
    pub timestamp: String,
    pub compressed: bool,
    pub encrypted: bool,
}

impl BackupName {
    pub fn parse(filename: &str) -> Option<Self> {
        let caps = BACKUP_FILENAME.captures(filename)?;
        Some(Self {
            backup_type: caps.get(1)?.as_str().parse().ok()?,
            timestamp: caps.get(2)?.as_str().to_string(),
            compressed: caps.get(3).is_some(),
            encrypted: caps.get(4).is_some(),
        })
    }
}

/// `<type>_backup_<timestamp>.sql[.gz]` with colons and periods of the ISO
/// timestamp replaced by dashes. The encryption suffix is added by the
/// encryption pass, never here.
pub fn backup_filename(backup_type: BackupType, at: DateTime<Utc>, compressed: bool) -> String {
    format!(
        "{}_backup_{}.sql{}",
        backup_type,
        at.format("%Y-%m-%dT%H-%M-%S-%3f"),
        if compressed { COMPRESSED_SUFFIX } else { "" }
    )
}

#[cfg(test)]
pub fn is_backup_filename(filename: &str) -> bool {
    BACKUP_FILENAME.is_match(filename)
}
