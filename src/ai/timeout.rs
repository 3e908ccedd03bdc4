//! Unified Timeout Configuration
//!
//! Every external call (model, search, scrape, store) is bounded by one of
//! these durations. A timeout surfaces as a recoverable `ScribeError::Timeout`.
//!
//! ## Usage
//!
//! ```ignore
//! let text = with_timeout(
//!     timeouts.user_scrape,
//!     scraper.fetch(&url),
//!     "scrape user source",
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::constants::network as net_constants;
use crate::types::{Result, ScribeError};

/// Timeouts for every collaborator call
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub llm_request: Duration,
    pub search: Duration,
    /// Scrape of a discovered search result
    pub discovered_scrape: Duration,
    /// Scrape of a user-supplied source
    pub user_scrape: Duration,
    pub store: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_request: Duration::from_secs(net_constants::LLM_TIMEOUT_SECS),
            search: Duration::from_secs(net_constants::SEARCH_TIMEOUT_SECS),
            discovered_scrape: Duration::from_secs(net_constants::DISCOVERED_SCRAPE_TIMEOUT_SECS),
            user_scrape: Duration::from_secs(net_constants::USER_SCRAPE_TIMEOUT_SECS),
            store: Duration::from_secs(net_constants::STORE_TIMEOUT_SECS),
        }
    }
}

impl From<&Config> for TimeoutConfig {
    fn from(config: &Config) -> Self {
        Self {
            llm_request: config.llm.timeout(),
            search: Duration::from_secs(config.search.timeout_secs),
            discovered_scrape: Duration::from_secs(config.scrape.discovered_timeout_secs),
            user_scrape: Duration::from_secs(config.scrape.user_timeout_secs),
            store: Duration::from_secs(config.storage.timeout_secs),
        }
    }
}

impl TimeoutConfig {
    /// Scrape timeout for a source of the given provenance
    pub fn scrape(&self, user_supplied: bool) -> Duration {
        if user_supplied {
            self.user_scrape
        } else {
            self.discovered_scrape
        }
    }
}

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ScribeError::timeout(operation_name, timeout)),
    }
}
