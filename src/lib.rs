//! longscribe - Long-Form Content Generation
//!
//! Turns an order line (topic, target length, language, SEO requirements and
//! optional reference material) into a finished long-form document.
//!
//! ## Pipeline
//!
//! - **Source acquisition**: user sources, search, scraping, model selection
//! - **Structure planning**: section skeleton split across up to 7 writers
//! - **Segmented synthesis**: writers run in order, each seeing the tail of
//!   what came before, with bounded truncation recovery
//! - **Post-generation validation**: clean ending, required SEO links
//! - **Persistence**: content and coarse progress written after every stage
//!
//! ## Quick Start
//!
//! ```ignore
//! use longscribe::{Collaborators, ConfigLoader, JobPipeline};
//!
//! let config = ConfigLoader::load()?;
//! let pipeline = JobPipeline::new(&config, collaborators)?;
//! let result = pipeline.run(&job_id).await?;
//! println!("{} chars", result.chars);
//! pipeline.drain(Duration::from_secs(15)).await;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: model providers, retry, timeouts, prompt building
//! - [`research`]: search and scrape collaborators, source selection
//! - [`planning`], [`synthesis`], [`recovery`], [`validation`]: the stages
//! - [`pipeline`]: stage orchestration and the order runner
//! - [`storage`]: SQLite persistence with connection pooling

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod document;
pub mod notify;
pub mod pipeline;
pub mod planning;
pub mod recovery;
pub mod research;
pub mod storage;
pub mod synthesis;
pub mod types;
pub mod validation;

#[cfg(test)]
mod testing;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use config::{Config, ConfigLoader};

pub use types::error::{ErrorCategory, Result, ResultExt, ScribeError};
pub use types::{Job, JobContent, JobStatus, Language, Progress};

pub use storage::{Database, JobStore, PoolConfig, SharedDatabase, SharedStore, SqliteJobStore};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{Collaborators, JobPipeline, JobResult, OrderResult, ProgressSink};

pub use notify::{JobEvent, LogNotifier, Notifier, SharedNotifier, WebhookNotifier};

// =============================================================================
// Collaborator Re-exports
// =============================================================================

pub use ai::{
    LlmProvider, ModelClient, OllamaProvider, OpenAiProvider, RetryPolicy, SharedProvider,
    TimeoutConfig, with_timeout,
};

pub use research::{HttpScraper, HttpSearchClient, Scraper, SearchClient};
