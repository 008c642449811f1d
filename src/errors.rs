use std::time::Duration;
use thiserror::Error;

/// Failure of an external process or process pipeline.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{program} executable not found in PATH")]
    NotFound { program: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("pipeline timed out after {0:?}")]
    Timeout(Duration),

    #[error("captured output exceeded {limit} bytes from {program}")]
    OutputLimit { program: String, limit: usize },

    #[error("pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database connection failed: {0}")]
    Connectivity(String),

    #[error(transparent)]
    Pipeline(#[from] CommandError),

    #[error("Cloud transfer failed: {0}")]
    CloudTransfer(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Backup file not found: {0}")]
    NotFound(String),

    #[error("Restore cancelled by user")]
    ConfirmationDeclined,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_message_matches_operator_wording() {
        let err = BackupError::Connectivity("timeout".to_string());
        assert_eq!(err.to_string(), "Database connection failed: timeout");
    }

    #[test]
    fn pipeline_errors_are_transparent() {
        let err: BackupError = CommandError::Failed {
            program: "pg_dump".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "permission denied".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "pg_dump exited with exit status: 1: permission denied");

        let err: BackupError = CommandError::Timeout(Duration::from_secs(1800)).into();
        assert_eq!(err.to_string(), "pipeline timed out after 1800s");

        let err = CommandError::Timeout(Duration::from_millis(300));
        assert_eq!(err.to_string(), "pipeline timed out after 300ms");
    }
}
