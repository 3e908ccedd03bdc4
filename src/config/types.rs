//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (platform config dir) and project (.longscribe/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{generation, network, planning, retry, search, sources, validation};
use crate::types::{Result, ScribeError};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Generative model settings
    pub llm: LlmConfig,

    /// Web search service settings
    pub search: SearchConfig,

    /// Scrape service settings
    pub scrape: ScrapeConfig,

    /// Source acquisition tuning
    pub sources: SourcesConfig,

    /// Planning, synthesis and recovery tuning
    pub generation: GenerationConfig,

    /// Call-site retry policy
    pub retry: RetryConfig,

    /// Order/Text store settings
    pub storage: StorageConfig,

    /// Terminal-state notifications
    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            scrape: ScrapeConfig::default(),
            sources: SourcesConfig::default(),
            generation: GenerationConfig::default(),
            retry: RetryConfig::default(),
            storage: StorageConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `ScribeError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ScribeError::Config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        for (name, secs) in [
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("search.timeout_secs", self.search.timeout_secs),
            ("scrape.discovered_timeout_secs", self.scrape.discovered_timeout_secs),
            ("scrape.user_timeout_secs", self.scrape.user_timeout_secs),
            ("storage.timeout_secs", self.storage.timeout_secs),
        ] {
            if secs == 0 {
                return Err(ScribeError::Config(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        let s = &self.sources;
        if s.min_selected < 3 || s.min_selected > s.max_selected || s.max_selected > 8 {
            return Err(ScribeError::Config(format!(
                "Source selection bounds must satisfy 3 <= min <= max <= 8, got {}..{}",
                s.min_selected, s.max_selected
            )));
        }
        if s.batch_char_budget < s.min_fetch_share {
            return Err(ScribeError::Config(
                "sources.batch_char_budget must be at least sources.min_fetch_share".to_string(),
            ));
        }

        if self.search.max_results < self.search.min_results || self.search.max_pages == 0 {
            return Err(ScribeError::Config(
                "search.max_results must be >= search.min_results and max_pages > 0".to_string(),
            ));
        }

        let g = &self.generation;
        if !(0.0..=1.0).contains(&g.heading_similarity) {
            return Err(ScribeError::Config(format!(
                "generation.heading_similarity must be between 0.0 and 1.0, got {}",
                g.heading_similarity
            )));
        }
        if g.max_writers == 0 || g.chars_per_writer == 0 || g.chars_per_section == 0 {
            return Err(ScribeError::Config(
                "generation writer and section sizes must be greater than 0".to_string(),
            ));
        }
        if g.min_output_tokens > g.max_output_tokens {
            return Err(ScribeError::Config(
                "generation.min_output_tokens must not exceed max_output_tokens".to_string(),
            ));
        }

        if self.retry.max_delay_secs == 0 {
            return Err(ScribeError::Config(
                "retry.max_delay_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai" or "ollama"
    pub provider: String,

    /// Model name
    pub model: String,

    /// Custom API base URL
    pub api_base: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Sampling temperature for prose generation
    pub temperature: f32,

    /// Temperature for structured calls (query, selection, plan, checks)
    pub structured_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_base: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: network::LLM_TIMEOUT_SECS,
            temperature: 0.7,
            structured_temperature: 0.2,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Search Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search API endpoint
    pub endpoint: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Search engine identifier (`cx`)
    pub engine_id: Option<String>,

    pub timeout_secs: u64,

    /// Stop paging once this many results are collected
    pub min_results: usize,

    /// Keep at most this many results
    pub max_results: usize,

    pub page_size: usize,

    pub max_pages: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
            api_key_env: "SEARCH_API_KEY".to_string(),
            engine_id: None,
            timeout_secs: network::SEARCH_TIMEOUT_SECS,
            min_results: search::MIN_RESULTS,
            max_results: search::MAX_RESULTS,
            page_size: search::PAGE_SIZE,
            max_pages: search::MAX_PAGES,
        }
    }
}

// =============================================================================
// Scrape Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Scrape API base URL (`POST {endpoint}/scrape`)
    pub endpoint: String,

    /// Environment variable holding the API key, if the service needs one
    pub api_key_env: Option<String>,

    /// Base URL that uploaded-document references resolve against
    pub document_base_url: Option<String>,

    /// Timeout for discovered sources
    pub discovered_timeout_secs: u64,

    /// Timeout for user-supplied sources
    pub user_timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3002/v1".to_string(),
            api_key_env: None,
            document_base_url: None,
            discovered_timeout_secs: network::DISCOVERED_SCRAPE_TIMEOUT_SECS,
            user_timeout_secs: network::USER_SCRAPE_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Sources Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// User-supplied text above this skips discovery
    pub user_budget_threshold: usize,

    /// Discovered text shorter than this is discarded
    pub min_text_chars: usize,

    /// Character budget shared by one scrape batch
    pub batch_char_budget: usize,

    /// Floor of one fetch's budget share
    pub min_fetch_share: usize,

    /// Preview characters per candidate in the selection prompt
    pub preview_chars: usize,

    pub min_selected: usize,

    pub max_selected: usize,

    pub max_query_words: usize,

    /// Case-insensitive markers of blocked or error pages
    pub failure_markers: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            user_budget_threshold: sources::USER_BUDGET_THRESHOLD,
            min_text_chars: sources::MIN_TEXT_CHARS,
            batch_char_budget: sources::BATCH_CHAR_BUDGET,
            min_fetch_share: sources::MIN_FETCH_SHARE,
            preview_chars: sources::PREVIEW_CHARS,
            min_selected: sources::MIN_SELECTED,
            max_selected: sources::MAX_SELECTED,
            max_query_words: sources::MAX_QUERY_WORDS,
            failure_markers: [
                "access denied",
                "403 forbidden",
                "404 not found",
                "page not found",
                "captcha",
                "enable javascript",
                "checking your browser",
                "attention required! | cloudflare",
                "are you a robot",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

// =============================================================================
// Generation Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Below this length no planner call is made
    pub plan_threshold: u32,

    /// Characters per writer for long documents
    pub chars_per_writer: u32,

    pub max_writers: u32,

    /// One top-level section per this many characters
    pub chars_per_section: u32,

    pub max_subsections: u32,

    /// Trailing context given to later writers and continuations
    pub tail_window_chars: usize,

    pub max_continuations: usize,

    /// Dice similarity at which a written heading matches a planned one
    pub heading_similarity: f64,

    pub token_headroom: f64,

    pub min_output_tokens: u32,

    pub max_output_tokens: u32,

    /// Characters inspected by the ending check
    pub ending_window_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            plan_threshold: planning::PLAN_THRESHOLD,
            chars_per_writer: planning::CHARS_PER_WRITER,
            max_writers: planning::MAX_WRITERS,
            chars_per_section: planning::CHARS_PER_SECTION,
            max_subsections: planning::MAX_SUBSECTIONS,
            tail_window_chars: generation::TAIL_WINDOW_CHARS,
            max_continuations: generation::MAX_CONTINUATIONS,
            heading_similarity: generation::HEADING_SIMILARITY,
            token_headroom: generation::TOKEN_HEADROOM,
            min_output_tokens: generation::MIN_OUTPUT_TOKENS,
            max_output_tokens: generation::MAX_OUTPUT_TOKENS,
            ending_window_chars: validation::ENDING_WINDOW_CHARS,
        }
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: retry::MAX_RETRIES,
            base_delay_ms: retry::BASE_DELAY_MS,
            max_delay_secs: retry::MAX_DELAY_SECS,
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file, relative to the project directory
    pub database: PathBuf,

    /// Connection pool size
    pub pool_size: u32,

    /// Per-write timeout in seconds
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("longscribe.db"),
            pool_size: 4,
            timeout_secs: network::STORE_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Notify Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving terminal Job events; log-only when unset
    pub webhook_url: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.llm.provider, "openai");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_selection_bounds_validated() {
        let mut config = Config::default();
        config.sources.min_selected = 5;
        config.sources.max_selected = 4;
        assert!(config.validate().is_err());

        config.sources.min_selected = 3;
        config.sources.max_selected = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_temperature_validated() {
        let mut config = Config::default();
        config.llm.temperature = 2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.scrape.user_timeout_secs = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("scrape.user_timeout_secs"));
    }
}
