use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;
use warden_core::{Alert, AlertSink};

/// Writes each alert as a structured warn-level record.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        warn!(
            alert_id = %alert.id,
            kind = %alert.kind,
            path = %alert.path.display(),
            previous = ?alert.previous,
            current = ?alert.current,
            "{}",
            alert.message()
        );
        Ok(())
    }
}
