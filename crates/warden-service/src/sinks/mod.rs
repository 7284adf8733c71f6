//! Alert delivery backends.

mod journal;
mod log;
mod webhook;

pub use journal::{JournalEntry, JournalSink};
pub use log::LogSink;
pub use webhook::WebhookSink;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use warden_core::config::AlertSettings;
use warden_core::{Alert, AlertSink};

/// Delivers to every inner sink. One failing sink does not stop the others;
/// the combined error names each failure.
pub struct FanoutSink {
    sinks: Vec<(&'static str, Arc<dyn AlertSink>)>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Add `sink`; `name` labels its failures.
    pub fn with(mut self, name: &'static str, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push((name, sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for FanoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSink for FanoutSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let mut failures = Vec::new();
        for (name, sink) in &self.sinks {
            if let Err(e) = sink.notify(alert).await {
                failures.push(format!("{name}: {e:#}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(failures.join("; ")))
        }
    }
}

/// Build the configured sink set. With nothing enabled, alerts still go to
/// the log so they are never silently discarded.
pub fn build_sink(settings: &AlertSettings) -> Result<Arc<dyn AlertSink>> {
    let mut fanout = FanoutSink::new();
    if let Some(path) = &settings.journal {
        fanout = fanout.with(
            "journal",
            Arc::new(JournalSink::new(path, settings.journal_max_bytes)?),
        );
    }
    if let Some(webhook) = &settings.webhook {
        fanout = fanout.with("webhook", Arc::new(WebhookSink::new(webhook)?));
    }
    if settings.log || fanout.is_empty() {
        if !settings.log {
            warn!("no alert sinks configured; falling back to log output");
        }
        fanout = fanout.with("log", Arc::new(LogSink));
    }
    Ok(Arc::new(fanout))
}
