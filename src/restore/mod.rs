mod logic;
pub(crate) mod db_restore;

pub use logic::RestoreOrchestrator;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Drop and recreate the target database before loading.
    pub drop_database: bool,
    /// The operator has confirmed the restore.
    pub confirmed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub success: bool,
    pub backup_file: PathBuf,
    /// Aborted at the confirmation gate. Not a failure.
    pub declined: bool,
    pub error: Option<String>,
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
}
