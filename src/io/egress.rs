//! Notification log
//!
//! Every notification is appended as one JSON object per line to the
//! configured file. Parent directories are created on first write.

use crate::domain::notification::Notification;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Append-only JSONL sink for notifications
pub struct NotificationLog {
    path: PathBuf,
}

impl NotificationLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "notification_log_initialized");
        Self { path: PathBuf::from(file_path) }
    }

    /// Append a notification; false when the file could not be written
    pub fn write_notification(&self, notification: &Notification) -> bool {
        let mut record = notification.to_json();
        record.push('\n');

        if let Err(e) = self.append(record.as_bytes()) {
            error!(
                nid = %notification.nid,
                path = %self.path.display(),
                error = %e,
                "notification_log_failed"
            );
            return false;
        }

        debug!(
            nid = %notification.nid,
            user = %notification.user,
            kind = %notification.kind.as_str(),
            "notification_logged"
        );
        true
    }

    fn append(&self, bytes: &[u8]) -> io::Result<()> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)?,
            _ => {}
        }
        OpenOptions::new().create(true).append(true).open(&self.path)?.write_all(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::NotificationKind;
    use crate::domain::types::UserId;
    use std::fs;
    use tempfile::tempdir;

    fn notification() -> Notification {
        Notification::new(&UserId::from("u1"), NotificationKind::Panic, "Panic alert", "help")
    }

    #[test]
    fn test_write_notification() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("notifications.jsonl");
        let log = NotificationLog::new(file_path.to_str().unwrap());

        let n = notification();
        assert!(log.write_notification(&n));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["nid"], n.nid);
        assert_eq!(parsed["kind"], "panic");
    }

    #[test]
    fn test_missing_log_directory_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("var").join("safetrail").join("notifications.jsonl");
        let log = NotificationLog::new(nested.to_str().unwrap());

        assert!(log.write_notification(&notification()));
        assert!(nested.exists());
    }

    #[test]
    fn test_notifications_accumulate_across_restarts() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("notifications.jsonl");
        let first = notification();
        NotificationLog::new(file_path.to_str().unwrap()).write_notification(&first);

        let reopened = NotificationLog::new(file_path.to_str().unwrap());
        let second = notification();
        reopened.write_notification(&second);

        let content = fs::read_to_string(&file_path).unwrap();
        let nids: Vec<String> = content
            .lines()
            .map(|line| {
                let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
                parsed["nid"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(nids, vec![first.nid.clone(), second.nid.clone()]);
    }

    #[test]
    fn test_unwritable_path_reports_failure() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for append
        let log = NotificationLog::new(dir.path().to_str().unwrap());
        assert!(!log.write_notification(&notification()));
    }
}
