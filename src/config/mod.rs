// pgvault/src/config/mod.rs
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::errors::{BackupError, Result};
use crate::scheduler::{ScheduleSpec, TimeOfDay, weekday_from_index, weekday_from_name};
use crate::utils::database::database_name_from_url;

pub const DEFAULT_CONFIG_PATH: &str = "backup-config.json";
const DEFAULT_BACKUP_DIR: &str = "./backups";
const DEFAULT_WAL_ARCHIVE_DIR: &str = "./wal_archive";
const DEFAULT_MAX_BACKUPS: usize = 30;
const DEFAULT_CLOUD_PROVIDER: &str = "s3";
const DEFAULT_CLOUD_REGION: &str = "us-east-1";

// Structs for deserializing backup-config.json
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JsonCloudConfig {
    pub enabled: Option<bool>,
    pub provider: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JsonSchedule {
    pub enabled: bool,
    pub time: Option<String>,
    /// Weekday name/index for weekly schedules, day of month for monthly ones.
    pub day: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JsonSchedules {
    pub daily: Option<JsonSchedule>,
    pub weekly: Option<JsonSchedule>,
    pub monthly: Option<JsonSchedule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawJsonConfig {
    pub database_url: Option<String>,
    pub database_name: Option<String>,
    pub backup_directory: Option<PathBuf>,
    pub max_backups: Option<usize>,
    pub compression: Option<bool>,
    pub encryption: Option<bool>,
    pub encryption_key: Option<String>,
    pub require_confirmation: Option<bool>,
    pub cloud_storage: Option<JsonCloudConfig>,
    pub wal_archiving: Option<bool>,
    pub wal_archive_directory: Option<PathBuf>,
    pub schedules: Option<JsonSchedules>,
}

impl RawJsonConfig {
    /// Reads the JSON config file. A missing file is not an error: every
    /// setting has a default or an environment override.
    pub fn load_optional(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!("📝 No {} found, using defaults and environment", config_path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(config_path)?;
        serde_json::from_str(&content).map_err(|e| {
            BackupError::Config(format!(
                "Failed to parse JSON from config file at {}: {}",
                config_path.display(),
                e
            ))
        })
    }
}

/// Key material that must never end up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub enabled: bool,
    pub provider: String,
    pub bucket: Option<String>,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<Secret>,
}

impl CloudConfig {
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            provider: DEFAULT_CLOUD_PROVIDER.to_string(),
            bucket: None,
            region: DEFAULT_CLOUD_REGION.to_string(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }

    /// Credentials and bucket, when all of them are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str, &str)> {
        let bucket = self.bucket.as_deref().filter(|s| !s.is_empty())?;
        let key_id = self.access_key_id.as_deref().filter(|s| !s.is_empty())?;
        let secret = self
            .secret_access_key
            .as_ref()
            .map(Secret::expose)
            .filter(|s| !s.is_empty())?;
        Some((bucket, key_id, secret))
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub database_url: String,
    pub database_name: String,
    pub backup_directory: PathBuf,
    pub max_backups: usize,
    pub compression: bool,
    pub encryption: bool,
    pub encryption_key: Option<Secret>,
    pub require_confirmation: bool,
    pub cloud: CloudConfig,
    pub wal_archiving: bool,
    pub wal_archive_directory: PathBuf,
    pub schedule: ScheduleSpec,
}

impl BackupConfig {
    /// Loads the JSON file (if any) and overlays the process environment.
    pub fn load(config_path: &Path) -> Result<Self> {
        let raw = RawJsonConfig::load_optional(config_path)?;
        Self::from_sources(&raw, |key| std::env::var(key).ok())
    }

    /// Builds and validates the configuration from a parsed file and an
    /// environment lookup. Environment values win over file values.
    pub fn from_sources<F>(raw: &RawJsonConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_string = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let env_flag = |key: &str| env_string(key).map(|v| parse_flag(&v));

        let database_url = env_string("DATABASE_URL")
            .or_else(|| raw.database_url.clone())
            .ok_or_else(|| BackupError::Config("DATABASE_URL must be set".to_string()))?;

        let database_name = env_string("DB_NAME")
            .or_else(|| raw.database_name.clone())
            .or_else(|| database_name_from_url(&database_url))
            .ok_or_else(|| {
                BackupError::Config("database name missing from DATABASE_URL and DB_NAME".to_string())
            })?;

        let max_backups = match env_string("MAX_BACKUPS") {
            Some(value) => value.trim().parse().map_err(|_| {
                BackupError::Config(format!("MAX_BACKUPS must be a positive integer, got '{value}'"))
            })?,
            None => raw.max_backups.unwrap_or(DEFAULT_MAX_BACKUPS),
        };

        let raw_cloud = raw.cloud_storage.clone().unwrap_or_default();
        let cloud = CloudConfig {
            enabled: env_flag("CLOUD_BACKUP").or(raw_cloud.enabled).unwrap_or(false),
            provider: env_string("CLOUD_PROVIDER")
                .or(raw_cloud.provider)
                .unwrap_or_else(|| DEFAULT_CLOUD_PROVIDER.to_string()),
            bucket: env_string("CLOUD_BUCKET").or(raw_cloud.bucket),
            region: env_string("CLOUD_REGION")
                .or(raw_cloud.region)
                .unwrap_or_else(|| DEFAULT_CLOUD_REGION.to_string()),
            endpoint_url: env_string("CLOUD_ENDPOINT_URL").or(raw_cloud.endpoint_url),
            access_key_id: env_string("AWS_ACCESS_KEY_ID").or(raw_cloud.access_key_id),
            secret_access_key: env_string("AWS_SECRET_ACCESS_KEY")
                .or(raw_cloud.secret_access_key)
                .map(Secret::new),
        };

        let schedule = match &raw.schedules {
            Some(schedules) => parse_schedules(schedules)?,
            None => default_schedule(),
        };

        let config = BackupConfig {
            database_url,
            database_name,
            backup_directory: env_string("BACKUP_DIR")
                .map(PathBuf::from)
                .or_else(|| raw.backup_directory.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            max_backups,
            compression: env_string("COMPRESSION")
                .map(|v| !v.trim().eq_ignore_ascii_case("false"))
                .or(raw.compression)
                .unwrap_or(true),
            encryption: env_flag("BACKUP_ENCRYPTION").or(raw.encryption).unwrap_or(false),
            encryption_key: env_string("BACKUP_ENCRYPTION_KEY")
                .or_else(|| raw.encryption_key.clone())
                .map(Secret::new),
            require_confirmation: env_flag("REQUIRE_CONFIRMATION")
                .or(raw.require_confirmation)
                .unwrap_or(false),
            cloud,
            wal_archiving: env_flag("WAL_ARCHIVING")
                .or_else(|| env_flag("ENABLE_PITR"))
                .or(raw.wal_archiving)
                .unwrap_or(false),
            wal_archive_directory: env_string("WAL_ARCHIVE_DIR")
                .map(PathBuf::from)
                .or_else(|| raw.wal_archive_directory.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WAL_ARCHIVE_DIR)),
            schedule,
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants that must hold before any backup or restore runs.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(BackupError::Config("DATABASE_URL cannot be empty".to_string()));
        }
        if self.backup_directory.as_os_str().is_empty() {
            return Err(BackupError::Config("backup directory cannot be empty".to_string()));
        }
        if self.backup_directory.exists() && !self.backup_directory.is_dir() {
            return Err(BackupError::Config(format!(
                "backup directory {} exists but is not a directory",
                self.backup_directory.display()
            )));
        }
        if self.max_backups == 0 {
            return Err(BackupError::Config("MAX_BACKUPS must be at least 1".to_string()));
        }
        if self.encryption && self.encryption_key().is_none() {
            return Err(BackupError::Config(
                "encryption is enabled but BACKUP_ENCRYPTION_KEY is not set".to_string(),
            ));
        }
        if self.cloud.enabled && self.cloud.credentials().is_none() {
            warn!("⚠️  Cloud backup enabled but bucket or credentials are missing. Cloud backup disabled.");
        }
        Ok(())
    }

    /// Key material, when configured and non-empty.
    pub fn encryption_key(&self) -> Option<&str> {
        self.encryption_key
            .as_ref()
            .map(Secret::expose)
            .filter(|k| !k.is_empty())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn default_schedule() -> ScheduleSpec {
    ScheduleSpec {
        daily: TimeOfDay::new(2, 0),
        weekly: TimeOfDay::new(3, 0).map(|at| (chrono::Weekday::Sun, at)),
        monthly: TimeOfDay::new(4, 0).map(|at| (1, at)),
    }
}

fn parse_time(entry: &JsonSchedule, default: &str, cadence: &str) -> Result<TimeOfDay> {
    entry
        .time
        .as_deref()
        .unwrap_or(default)
        .parse()
        .map_err(|e| BackupError::Config(format!("{cadence} schedule: {e}")))
}

fn parse_schedules(schedules: &JsonSchedules) -> Result<ScheduleSpec> {
    let mut spec = ScheduleSpec::default();

    if let Some(daily) = schedules.daily.as_ref().filter(|s| s.enabled) {
        spec.daily = Some(parse_time(daily, "02:00", "daily")?);
    }

    if let Some(weekly) = schedules.weekly.as_ref().filter(|s| s.enabled) {
        let at = parse_time(weekly, "03:00", "weekly")?;
        let weekday = match &weekly.day {
            None => Some(chrono::Weekday::Sun),
            Some(serde_json::Value::String(name)) => weekday_from_name(name),
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .and_then(|i| u32::try_from(i).ok())
                .and_then(weekday_from_index),
            Some(_) => None,
        }
        .ok_or_else(|| {
            BackupError::Config("weekly schedule: day must be a weekday name or 0-6".to_string())
        })?;
        spec.weekly = Some((weekday, at));
    }

    if let Some(monthly) = schedules.monthly.as_ref().filter(|s| s.enabled) {
        let at = parse_time(monthly, "04:00", "monthly")?;
        let day = match &monthly.day {
            None => Some(1),
            Some(value) => value.as_u64().and_then(|d| u32::try_from(d).ok()),
        }
        .filter(|d| (1..=31).contains(d))
        .ok_or_else(|| BackupError::Config("monthly schedule: day must be 1-31".to_string()))?;
        spec.monthly = Some((day, at));
    }

    Ok(spec)
}
