//! LLM Provider Abstraction
//!
//! Defines the LlmProvider trait for plain-text completions.
//! Every provider surfaces a distinguishable length-limited signal and token
//! usage; recovery depends on the former.

mod ollama;
mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::types::{FinishSignal, PromptKind, Result, ScribeError, TokenUsage};

// =============================================================================
// Request / Response
// =============================================================================

/// One completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Template that built the prompt, for logging and test dispatch
    pub kind: PromptKind,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(kind: PromptKind, prompt: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            max_tokens,
            temperature,
        }
    }
}

/// Model response with its terminal signal and usage metrics
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub finish: FinishSignal,
    pub usage: TokenUsage,
    pub timing: ResponseTiming,
    pub metadata: ResponseMetadata,
}

impl Completion {
    /// Response with unknown usage, as produced by test doubles
    pub fn text_only(text: impl Into<String>, finish: FinishSignal) -> Self {
        Self {
            text: text.into(),
            finish,
            usage: TokenUsage::default(),
            timing: ResponseTiming::default(),
            metadata: ResponseMetadata::default(),
        }
    }

    pub fn is_length_limited(&self) -> bool {
        self.finish == FinishSignal::LengthLimited
    }
}

/// Response timing metrics
#[derive(Debug, Clone, Default)]
pub struct ResponseTiming {
    /// Wall clock time in milliseconds
    pub total_ms: u64,
}

impl ResponseTiming {
    pub fn from_duration(duration: std::time::Duration) -> Self {
        Self {
            total_ms: duration.as_millis() as u64,
        }
    }
}

/// Response metadata
#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    pub model: String,
    pub provider: String,
}

/// Shared LLM provider handle injected into every stage
pub type SharedProvider = Arc<dyn LlmProvider + Send + Sync>;

// =============================================================================
// Provider Configuration
// =============================================================================

/// Configuration for LLM providers
///
/// API keys are never serialized and are redacted in debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider type: "openai", "ollama"
    pub provider: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            timeout_secs: 300,
            api_key: None,
            api_base: None,
        }
    }
}

impl From<&LlmConfig> for ProviderConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            provider: config.provider.clone(),
            model: Some(config.model.clone()),
            timeout_secs: config.timeout_secs,
            api_key: std::env::var(&config.api_key_env).ok(),
            api_base: config.api_base.clone(),
        }
    }
}

// =============================================================================
// LLM Provider Trait
// =============================================================================

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion. A length-limited stop is a normal response, not an error.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;

    /// Check if the provider is available
    async fn health_check(&self) -> Result<bool>;
}

/// Create a shared provider from configuration
pub fn create_provider(config: &ProviderConfig) -> Result<SharedProvider> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config.clone())?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config.clone())?)),
        _ => Err(ScribeError::Config(format!(
            "Unknown provider: {}. Supported: openai, ollama",
            config.provider
        ))),
    }
}
