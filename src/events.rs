//! Run statistics and the notification callback.

use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

use crate::backup::BackupRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Success,
    Error,
}

/// Payload delivered to the registered handler: `{type, message, details?}`.
#[derive(Debug, Clone, Serialize)]
pub struct BackupEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl BackupEvent {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Success,
            message: message.into(),
            details: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details<T: Serialize>(mut self, details: &T) -> Self {
        match serde_json::to_value(details) {
            Ok(value) => self.details = Some(value),
            Err(e) => warn!("Dropping unserializable event details: {}", e),
        }
        self
    }
}

pub type EventHandler = Arc<dyn Fn(&BackupEvent) + Send + Sync>;

/// Holds zero or one handler. Events emitted with no handler are dropped.
#[derive(Default)]
pub struct NotificationDispatcher {
    handler: RwLock<Option<EventHandler>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler, replacing any previous one.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&BackupEvent) + Send + Sync + 'static,
    {
        let mut slot = self.handler.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(Arc::new(handler));
    }

    /// Invokes the handler synchronously, outside the lock.
    pub fn emit(&self, event: BackupEvent) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(&event);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub total_backups: u64,
    pub successful_backups: u64,
    pub failed_backups: u64,
    pub last_success: Option<BackupRecord>,
    pub last_failure: Option<BackupRecord>,
}

/// In-memory counters, reset on process restart.
#[derive(Default)]
pub struct StatisticsTracker {
    inner: Mutex<Statistics>,
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Statistics {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Only the backup orchestrator records runs.
    pub(crate) fn record(&self, record: &BackupRecord) {
        let mut stats = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        stats.total_backups += 1;
        if record.success {
            stats.successful_backups += 1;
            stats.last_success = Some(record.clone());
        } else {
            stats.failed_backups += 1;
            stats.last_failure = Some(record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupType;
    use chrono::Utc;
    use std::path::PathBuf;

    fn record(success: bool) -> BackupRecord {
        BackupRecord {
            filename: "full_backup_2024-01-15T10-30-45-000.sql.gz".to_string(),
            path: PathBuf::from("/backups/full_backup_2024-01-15T10-30-45-000.sql.gz"),
            backup_type: BackupType::Full,
            size: 42,
            size_formatted: "0.00 MB".to_string(),
            duration_secs: 1.5,
            checksum: None,
            created_at: Utc::now(),
            success,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn counters_track_success_and_failure_separately() {
        let tracker = StatisticsTracker::new();
        tracker.record(&record(true));
        tracker.record(&record(false));
        tracker.record(&record(true));

        let stats = tracker.snapshot();
        assert_eq!(stats.total_backups, 3);
        assert_eq!(stats.successful_backups, 2);
        assert_eq!(stats.failed_backups, 1);
        assert!(stats.last_success.unwrap().success);
        assert_eq!(stats.last_failure.unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn events_serialize_with_type_field() {
        let event = BackupEvent::error("Backup failed: disk full");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({ "type": "error", "message": "Backup failed: disk full" })
        );

        let detailed = BackupEvent::success("ok").with_details(&record(true));
        assert_eq!(detailed.details.unwrap()["backup_type"], "full");
    }

    #[test]
    fn dispatcher_without_handler_drops_events() {
        let dispatcher = NotificationDispatcher::new();
        dispatcher.emit(BackupEvent::success("nobody listening"));
    }

    #[test]
    fn latest_handler_wins() {
        let dispatcher = NotificationDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        dispatcher.on_event(|_| panic!("replaced handler must not run"));
        let sink = Arc::clone(&seen);
        dispatcher.on_event(move |event| sink.lock().unwrap().push(event.message.clone()));
        dispatcher.emit(BackupEvent::success("first"));
        dispatcher.emit(BackupEvent::error("second"));

        assert_eq!(*seen.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }
}
