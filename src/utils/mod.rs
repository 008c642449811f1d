pub mod checksum;
pub mod command;
pub mod database;

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use url::Url;
use which::which;

use crate::errors::CommandError;

/// Finds an executable (pg_dump, psql, gzip, openssl) in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf, CommandError> {
    which(name).map_err(|_| CommandError::NotFound {
        program: name.to_string(),
    })
}

/// Replaces the password of a connection URL so it can be logged.
/// Anything that is not a URL with a password is returned untouched.
pub fn redact_url(value: &str) -> String {
    match Url::parse(value) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("****"));
            url.to_string()
        }
        _ => value.to_string(),
    }
}

pub fn format_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

pub fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);
    let days = elapsed.num_days();
    let hours = elapsed.num_hours() % 24;
    if days > 0 {
        format!("{} day{} ago", days, if days > 1 { "s" } else { "" })
    } else if hours > 0 {
        format!("{} hour{} ago", hours, if hours > 1 { "s" } else { "" })
    } else {
        "Less than an hour ago".to_string()
    }
}
