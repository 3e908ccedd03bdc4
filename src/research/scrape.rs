//! Scrape collaborator: turns a URL or uploaded document into plain text.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::ScrapeConfig;
use crate::types::{ErrorCategory, ErrorClassifier, Result, ScribeError, UserSource};

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Extract the text of `url`. The caller bounds the call with its own timeout.
    async fn scrape(&self, url: &str) -> Result<String>;
}

pub type SharedScraper = Arc<dyn Scraper>;

/// Client for a scrape API (`POST {endpoint}/scrape`)
pub struct HttpScraper {
    endpoint: String,
    api_key: Option<SecretString>,
    document_base_url: Option<url::Url>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpScraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpScraper")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("document_base_url", &self.document_base_url)
            .finish()
    }
}

impl HttpScraper {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        url::Url::parse(&endpoint).map_err(|e| {
            ScribeError::Config(format!("Invalid scrape endpoint '{}': {}", endpoint, e))
        })?;

        let document_base_url = config
            .document_base_url
            .as_deref()
            .map(|base| {
                url::Url::parse(base).map_err(|e| {
                    ScribeError::Config(format!("Invalid document base URL '{}': {}", base, e))
                })
            })
            .transpose()?;

        // Per-call timeouts are applied by the caller; this only caps runaway connections
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.user_timeout_secs.max(config.discovered_timeout_secs)))
            .build()
            .map_err(|e| ScribeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            api_key: config
                .api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .map(SecretString::from),
            document_base_url,
            client,
        })
    }
}

/// Fetchable URL for a user source
pub fn resolve_user_source(source: &UserSource, document_base: Option<&url::Url>) -> Result<String> {
    match source {
        UserSource::Url { url } => Ok(url.clone()),
        UserSource::Document { reference } => {
            let base = document_base.ok_or_else(|| {
                ScribeError::Config(
                    "scrape.document_base_url is required for uploaded documents".to_string(),
                )
            })?;
            base.join(reference.trim_start_matches('/'))
                .map(|u| u.to_string())
                .map_err(|e| ScribeError::InvalidJob(format!("Bad document reference '{}': {}", reference, e)))
        }
    }
}

impl HttpScraper {
    pub fn document_base(&self) -> Option<&url::Url> {
        self.document_base_url.as_ref()
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape(&self, url: &str) -> Result<String> {
        let mut request = self
            .client
            .post(format!("{}/scrape", self.endpoint))
            .json(&ScrapeRequest {
                url: url.to_string(),
                formats: vec!["markdown".to_string()],
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, "scrape"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("Scrape API error ({}): {}", status, body),
                "scrape",
            )
            .into());
        }

        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, "scrape"))?;

        if !body.success {
            return Err(ScribeError::external(
                ErrorCategory::Unavailable,
                body.error.unwrap_or_else(|| format!("scrape of {} failed", url)),
                "scrape",
            ));
        }

        let text = body.data.and_then(|d| d.markdown).unwrap_or_default();
        debug!(url, chars = text.chars().count(), "Scrape succeeded");
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ScrapeRequest {
    url: String,
    formats: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_document_reference() {
        let base = url::Url::parse("https://files.example/uploads/").unwrap();
        let source = UserSource::Document {
            reference: "/orders/42/brief.pdf".into(),
        };
        assert_eq!(
            resolve_user_source(&source, Some(&base)).unwrap(),
            "https://files.example/uploads/orders/42/brief.pdf"
        );
        assert!(resolve_user_source(&source, None).is_err());
    }

    #[test]
    fn test_failed_scrape_body_parses() {
        let body: ScrapeResponse =
            serde_json::from_str(r#"{"success": false, "error": "blocked"}"#).unwrap();
        assert!(!body.success);
        assert_eq!(body.error.as_deref(), Some("blocked"));
    }
}
