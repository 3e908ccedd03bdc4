//! Ollama Local LLM Provider
//!
//! Plain-text completions against a locally running Ollama server.
//! `done_reason == "length"` maps to a length-limited completion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    Completion, CompletionRequest, LlmProvider, ProviderConfig, ResponseMetadata, ResponseTiming,
};
use crate::types::{ErrorCategory, ErrorClassifier, FinishSignal, Result, ScribeError, TokenUsage};

const DEFAULT_API_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3:latest";

/// Ollama Local LLM Provider
pub struct OllamaProvider {
    api_base: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_base = config
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_base = Self::validate_endpoint(&api_base)?;

        let model = config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ScribeError::LlmApi(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_base,
            model,
            client,
        })
    }

    /// Only http/https endpoints; warns for non-localhost hosts
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            ScribeError::Config(format!("Invalid Ollama endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ScribeError::Config(format!(
                "Ollama endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "::1")
        {
            warn!(
                "Ollama endpoint is not localhost: {}. Ensure this is intentional.",
                host
            );
        }

        Ok(url.to_string().trim_end_matches('/').to_string())
    }

    fn build_request(&self, request: &CompletionRequest) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            prompt: request.prompt.clone(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        info!(
            kind = %request.kind,
            max_tokens = request.max_tokens,
            "Completing with Ollama (model: {})",
            self.model
        );

        let start_time = Instant::now();
        let body = self.build_request(request);
        let url = format!("{}/api/generate", self.api_base);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ScribeError::external(
                        ErrorCategory::Network,
                        format!(
                            "Failed to connect to Ollama at {}. Is Ollama running? Start with: ollama serve",
                            self.api_base
                        ),
                        "ollama",
                    )
                } else {
                    ErrorClassifier::classify_reqwest(&e, "ollama").into()
                }
            })?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("Ollama API error ({}): {}", status, body),
                "ollama",
            )
            .into());
        }

        let response_body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ErrorClassifier::classify_reqwest(&e, "ollama"))?;

        let usage = TokenUsage::new(
            response_body.prompt_eval_count.unwrap_or(0),
            response_body.eval_count.unwrap_or(0),
        );
        let finish = match response_body.done_reason.as_deref() {
            Some("length") => FinishSignal::LengthLimited,
            _ => FinishSignal::Complete,
        };
        debug!(finish = finish.as_str(), "Ollama response received");

        Ok(Completion {
            text: response_body.response,
            finish,
            usage,
            timing: ResponseTiming::from_duration(elapsed),
            metadata: ResponseMetadata {
                model: self.model.clone(),
                provider: "ollama".to_string(),
            },
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.api_base);

        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(tags) = resp.json::<OllamaTagsResponse>().await {
                    let model_available = tags.models.iter().any(|m| {
                        m.name == self.model
                            || m.name.starts_with(&self.model.replace(":latest", ""))
                    });

                    if model_available {
                        info!("Ollama is available with model: {}", self.model);
                        Ok(true)
                    } else {
                        warn!(
                            "Ollama is running but model '{}' not found. Pull with: ollama pull {}",
                            self.model, self.model
                        );
                        Ok(false)
                    }
                } else {
                    Ok(true)
                }
            }
            Ok(resp) => {
                warn!("Ollama API check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Ollama not available: {}. Start with: ollama serve", e);
                Ok(false)
            }
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}
