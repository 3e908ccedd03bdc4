//! OpenAI API Provider
//!
//! Plain-text completions over the Chat Completions API.
//! `finish_reason == "length"` maps to a length-limited completion.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    Completion, CompletionRequest, LlmProvider, ProviderConfig, ResponseMetadata, ResponseTiming,
};
use crate::types::{ErrorClassifier, FinishSignal, Result, ScribeError, TokenUsage};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const SYSTEM_PROMPT: &str = "You are a professional long-form writer and research editor. Follow the output format requested in each task exactly.";

/// OpenAI API Provider with secure API key handling
pub struct OpenAiProvider {
    api_key: SecretString,
    api_base: String,
    model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_key_str = config
            .api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                ScribeError::Config(
                    "OpenAI API key not found. Set OPENAI_API_KEY env var or llm.api_key_env"
                        .to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let model = config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ScribeError::LlmApi(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key_str),
            api_base,
            model,
            client,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        info!(
            kind = %request.kind,
            max_tokens = request.max_tokens,
            "Completing with OpenAI (model: {})",
            self.model
        );

        let start_time = Instant::now();
        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, "openai"))?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("OpenAI API error ({}): {}", status, body),
                "openai",
            )
            .into());
        }

        let response_body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, "openai"))?;

        let usage = response_body
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let choice = response_body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ScribeError::LlmApi("No choices in OpenAI response".to_string()))?;

        let finish = match choice.finish_reason.as_deref() {
            Some("length") => FinishSignal::LengthLimited,
            _ => FinishSignal::Complete,
        };
        let text = choice.message.content.unwrap_or_default();
        debug!(chars = text.chars().count(), finish = finish.as_str(), "OpenAI response received");

        Ok(Completion {
            text,
            finish,
            usage,
            timing: ResponseTiming::from_duration(elapsed),
            metadata: ResponseMetadata {
                model: self.model.clone(),
                provider: "openai".to_string(),
            },
        })
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.api_base);

        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("OpenAI API is available");
                Ok(true)
            }
            Ok(resp) => {
                warn!("OpenAI API check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("OpenAI API check failed: {}", e);
                Ok(false)
            }
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u64,
    completion_tokens: u64,
}
