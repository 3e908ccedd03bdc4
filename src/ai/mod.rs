//! AI Integration Layer
//!
//! Model providers plus the call-site plumbing every stage shares:
//! retries, timeouts, token ceilings, prompt assembly and JSON extraction.

pub mod budget;
pub mod client;
pub mod json_repair;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod timeout;

pub use budget::TokenCeiling;
pub use client::ModelClient;
pub use json_repair::{extract_json, parse_reply};
pub use prompt::PromptBuilder;
pub use provider::{
    Completion, CompletionRequest, LlmProvider, OllamaProvider, OpenAiProvider, ProviderConfig,
    ResponseMetadata, ResponseTiming, SharedProvider, create_provider,
};
pub use retry::RetryPolicy;
pub use timeout::{TimeoutConfig, with_timeout};
