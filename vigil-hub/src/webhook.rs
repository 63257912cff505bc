//! Fire-and-forget relay of detection events to an external webhook.

use std::time::Duration;
use tracing::warn;

use vigil_core::config::WebhookConfig;
use vigil_core::message::WebhookEvent;

#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url })
    }

    /// `None` when no webhook URL is configured.
    pub fn from_config(config: &WebhookConfig) -> anyhow::Result<Option<Self>> {
        match &config.url {
            Some(url) => Ok(Some(Self::new(
                url.clone(),
                Duration::from_secs(config.timeout_seconds),
            )?)),
            None => Ok(None),
        }
    }

    /// Deliver without waiting: no acknowledgement, no retry. A failed
    /// delivery is logged and forgotten.
    pub fn deliver(&self, event: WebhookEvent) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "webhook relay rejected event");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "webhook relay failed"),
            }
        });
    }
}
