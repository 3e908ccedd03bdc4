//! Model client used by every stage of one Job.
//!
//! Wraps the shared provider with the call-site retry policy and timeout and
//! records every prompt/response pair in the Job's audit buffer.

use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::{Completion, CompletionRequest, SharedProvider};
use super::retry::RetryPolicy;
use super::timeout::with_timeout;
use crate::types::{FinishSignal, GenerationAttempt, PromptKind, Result, TokenUsage};

pub struct ModelClient {
    provider: SharedProvider,
    retry: RetryPolicy,
    timeout: Duration,
    /// Temperature for prose generation
    pub writing_temperature: f32,
    /// Temperature for structured calls
    pub structured_temperature: f32,
    attempts: Mutex<Vec<GenerationAttempt>>,
    usage: Mutex<TokenUsage>,
}

impl ModelClient {
    pub fn new(provider: SharedProvider, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            provider,
            retry,
            timeout,
            writing_temperature: 0.7,
            structured_temperature: 0.2,
            attempts: Mutex::new(Vec::new()),
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    pub fn with_temperatures(mut self, writing: f32, structured: f32) -> Self {
        self.writing_temperature = writing;
        self.structured_temperature = structured;
        self
    }

    /// Prose call (writing, continuation, repair)
    pub async fn write(
        &self,
        assignment: Option<usize>,
        kind: PromptKind,
        prompt: String,
        max_tokens: u32,
    ) -> Result<Completion> {
        let request = CompletionRequest::new(kind, prompt, max_tokens, self.writing_temperature);
        self.complete(assignment, request).await
    }

    /// Structured call (query, selection, planning, checks)
    pub async fn ask(&self, kind: PromptKind, prompt: String, max_tokens: u32) -> Result<Completion> {
        let request = CompletionRequest::new(kind, prompt, max_tokens, self.structured_temperature);
        self.complete(None, request).await
    }

    /// One bounded, retried call; the final outcome, success or not, is
    /// appended to the audit buffer
    pub async fn complete(
        &self,
        assignment: Option<usize>,
        request: CompletionRequest,
    ) -> Result<Completion> {
        let provider = self.provider.clone();
        let timeout = self.timeout;
        let operation = format!("{} completion", request.kind);

        let outcome = self
            .retry
            .run(&operation, || {
                let provider = provider.clone();
                let request = request.clone();
                let operation = operation.clone();
                async move {
                    with_timeout(timeout, provider.complete(&request), &operation).await
                }
            })
            .await;

        let completion = match outcome {
            Ok(completion) => completion,
            Err(e) => {
                warn!(kind = %request.kind, assignment, error = %e, "Model call failed");
                self.record(GenerationAttempt::new(
                    assignment,
                    request.kind,
                    request.prompt,
                    e.to_string(),
                    FinishSignal::Failed,
                    TokenUsage::default(),
                ));
                return Err(e);
            }
        };

        debug!(
            kind = %request.kind,
            assignment,
            chars = completion.text.chars().count(),
            finish = completion.finish.as_str(),
            length_limited = completion.is_length_limited(),
            model = %completion.metadata.model,
            elapsed_ms = completion.timing.total_ms,
            "Model call finished"
        );

        self.record(GenerationAttempt::new(
            assignment,
            request.kind,
            request.prompt,
            completion.text.clone(),
            completion.finish,
            completion.usage,
        ));

        Ok(completion)
    }

    fn record(&self, attempt: GenerationAttempt) {
        *self.usage.lock().unwrap_or_else(|p| p.into_inner()) += attempt.usage;
        self.attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(attempt);
    }

    /// Take the attempts recorded since the last drain
    pub fn drain_attempts(&self) -> Vec<GenerationAttempt> {
        std::mem::take(&mut *self.attempts.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Put attempts back ahead of anything recorded since they were drained
    pub fn restore_attempts(&self, attempts: Vec<GenerationAttempt>) {
        let mut buffer = self.attempts.lock().unwrap_or_else(|p| p.into_inner());
        let later = std::mem::replace(&mut *buffer, attempts);
        buffer.extend(later);
    }

    pub fn total_usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap_or_else(|p| p.into_inner())
    }
}
