//! Alerts and the sink capability they are delivered through.

use crate::digest::Digest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Which transition an [`Alert`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    FileCreated,
    DirectoryCreated,
    FileModified,
    FileDeleted,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::FileCreated => "file created",
            AlertKind::DirectoryCreated => "directory created",
            AlertKind::FileModified => "file modified",
            AlertKind::FileDeleted => "file deleted",
        };
        f.write_str(s)
    }
}

/// One genuine state transition of a watched path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub path: PathBuf,
    pub previous: Option<Digest>,
    pub current: Option<Digest>,
    pub detected_at: DateTime<Utc>,
}

impl Alert {
    /// New alert stamped with a fresh id and the current time.
    pub fn new(
        kind: AlertKind,
        path: PathBuf,
        previous: Option<Digest>,
        current: Option<Digest>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            path,
            previous,
            current,
            detected_at: Utc::now(),
        }
    }

    /// Human-readable text for operators.
    pub fn message(&self) -> String {
        let path = self.path.display();
        match self.kind {
            AlertKind::FileCreated => format!("File created: {path}"),
            AlertKind::DirectoryCreated => format!("Directory created: {path}"),
            AlertKind::FileModified => format!("File {path} has been modified."),
            AlertKind::FileDeleted => format!("File deleted: {path}"),
        }
    }
}

/// Delivery capability for alerts. Failures are reported back to the caller,
/// which logs them; sinks own any retry policy.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> anyhow::Result<()>;
}
