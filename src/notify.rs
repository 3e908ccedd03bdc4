//! Terminal Job notifications.
//!
//! The pipeline emits one event when a Job completes or fails. Delivery is
//! best-effort: a failed notification is logged and never affects the Job.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::NotifyConfig;
use crate::types::{ErrorClassifier, JobStatus, Progress, Result, ScribeError};

const WEBHOOK_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub status: JobStatus,
    /// Failed stage, or the last stage reached
    pub stage: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Length of the delivered document
    pub chars: usize,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &JobEvent) -> Result<()>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes events to the log only
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &JobEvent) -> Result<()> {
        info!(
            job_id = %event.job_id,
            status = event.status.as_str(),
            stage = %event.stage,
            chars = event.chars,
            message = event.message.as_deref().unwrap_or(""),
            "Job finished"
        );
        Ok(())
    }
}

/// Posts events as JSON to a configured URL
#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        url::Url::parse(url)
            .map_err(|e| ScribeError::Config(format!("Invalid webhook URL '{}': {}", url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .map_err(|e| ScribeError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &JobEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, "webhook"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("Webhook rejected event ({})", status),
                "webhook",
            )
            .into());
        }
        Ok(())
    }
}

/// Webhook when configured, log otherwise
pub fn from_config(config: &NotifyConfig) -> Result<SharedNotifier> {
    match config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
