//! Web search collaborator.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::SearchConfig;
use crate::types::{ErrorClassifier, Language, Result, ScribeError, SearchHit};

/// One page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Cursor for the next page; None when the service has no more results
    pub next: Option<usize>,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Fetch one page. `cursor` is the 1-based index of the first result.
    async fn search(
        &self,
        query: &str,
        language: Language,
        cursor: usize,
        page_size: usize,
    ) -> Result<SearchPage>;
}

pub type SharedSearch = Arc<dyn SearchClient>;

/// Client for a Programmable Search style JSON API
pub struct HttpSearchClient {
    endpoint: String,
    api_key: Option<SecretString>,
    engine_id: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSearchClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("engine_id", &self.engine_id)
            .finish()
    }
}

impl HttpSearchClient {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        url::Url::parse(&config.endpoint).map_err(|e| {
            ScribeError::Config(format!("Invalid search endpoint '{}': {}", config.endpoint, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ScribeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: std::env::var(&config.api_key_env).ok().map(SecretString::from),
            engine_id: config.engine_id.clone(),
            client,
        })
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(
        &self,
        query: &str,
        language: Language,
        cursor: usize,
        page_size: usize,
    ) -> Result<SearchPage> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("hl", language.code().to_string()),
            ("start", cursor.to_string()),
            ("num", page_size.to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("key", key.expose_secret().to_string()));
        }
        if let Some(cx) = &self.engine_id {
            params.push(("cx", cx.clone()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, "search"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("Search API error ({}): {}", status, body),
                "search",
            )
            .into());
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, "search"))?;

        let hits: Vec<SearchHit> = body
            .items
            .into_iter()
            .map(|item| SearchHit {
                url: item.link,
                title: item.title,
                snippet: item.snippet,
            })
            .collect();

        let next = body
            .queries
            .and_then(|q| q.next_page)
            .and_then(|pages| pages.into_iter().next())
            .map(|p| p.start_index);

        debug!(query, cursor, hits = hits.len(), "Search page received");
        Ok(SearchPage { hits, next })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    #[serde(default)]
    queries: Option<SearchQueries>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchQueries {
    #[serde(rename = "nextPage", default)]
    next_page: Option<Vec<NextPage>>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    #[serde(rename = "startIndex")]
    start_index: usize,
}
