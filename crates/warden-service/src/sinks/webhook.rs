use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use warden_core::config::WebhookConfig;
use warden_core::{Alert, AlertSink};

/// POSTs each alert as JSON. Not retried; a failed delivery is reported to the
/// monitor, which logs it.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl WebhookSink {
    /// Builds the HTTP client; no request is made until the first alert.
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build webhook client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
            token: config.token.clone(),
        })
    }
}

pub(crate) fn payload(alert: &Alert) -> serde_json::Value {
    serde_json::json!({
        "id": alert.id,
        "kind": alert.kind,
        "path": alert.path,
        "message": alert.message(),
        "previous": alert.previous,
        "current": alert.current,
        "detected_at": alert.detected_at,
    })
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let mut request = self.client.post(self.url.as_str()).json(&payload(alert));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let res = request.send().await?;
        if res.status().is_success() {
            return Ok(());
        }
        Err(anyhow!("webhook rejected alert with status {}", res.status()))
    }
}
