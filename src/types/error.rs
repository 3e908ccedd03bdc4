//! Unified Error Type System
//!
//! Centralized error types for the entire orchestrator.
//! Provides classification of collaborator failures for retry decisions.
//!
//! ## Error Categories
//!
//! - **Transient**: Temporary server issues (retry)
//! - **RateLimit**: Service rate limiting (wait and retry)
//! - **TokenLimit**: Context too large (fail the call)
//! - **Auth**: Authentication failures (fail fast)
//! - **Network**: Connectivity issues (retry with backoff)
//! - **Unavailable**: Collaborator unreachable or missing (fail the call)
//!
//! Structural mismatches in model output are never errors; the stage that
//! parses them falls back deterministically.

use std::time::Duration;
use thiserror::Error;

use super::job::{JobStatus, Progress};

// =============================================================================
// Error Categories
// =============================================================================

/// Error categories for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited - wait then retry
    RateLimit,
    /// Context/token limit exceeded - retrying the same prompt cannot help
    TokenLimit,
    /// Authentication failed - fail fast
    Auth,
    /// Network/connectivity issues - retry with backoff
    Network,
    /// Service unavailable or resource missing
    Unavailable,
    /// Invalid request - don't retry, fix request
    BadRequest,
    /// Response body could not be decoded
    ParseError,
    /// Temporary server issues - retry
    Transient,
    /// Unknown error - not retried
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::TokenLimit => write!(f, "TOKEN_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Check if this category is retryable at the call site
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Transient | Self::ParseError
        )
    }
}

// =============================================================================
// Collaborator Error
// =============================================================================

/// Classified error from an external collaborator (model, search, scrape)
#[derive(Debug, Clone)]
pub struct LlmError {
    /// Error category for routing decisions
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// Collaborator that produced the error
    pub provider: Option<String>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Classifies collaborator failures into categories
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any collaborator
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
        {
            return LlmError::with_provider(ErrorCategory::RateLimit, message, provider);
        }

        if lower.contains("token")
            && (lower.contains("limit") || lower.contains("exceed") || lower.contains("maximum"))
            || lower.contains("context length")
            || lower.contains("too large")
        {
            return LlmError::with_provider(ErrorCategory::TokenLimit, message, provider);
        }

        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
        {
            return LlmError::with_provider(ErrorCategory::Auth, message, provider);
        }

        if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timeout")
            || lower.contains("timed out")
        {
            return LlmError::with_provider(ErrorCategory::Network, message, provider);
        }

        if lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
            || lower.contains("service unavailable")
            || lower.contains("overloaded")
            || lower.contains("temporary")
        {
            return LlmError::with_provider(ErrorCategory::Transient, message, provider);
        }

        if lower.contains("400") || lower.contains("bad request") || lower.contains("malformed") {
            return LlmError::with_provider(ErrorCategory::BadRequest, message, provider);
        }

        if lower.contains("decode") || lower.contains("json") || lower.contains("parse") {
            return LlmError::with_provider(ErrorCategory::ParseError, message, provider);
        }

        LlmError::with_provider(ErrorCategory::Unknown, message, provider)
    }

    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> LlmError {
        match status {
            429 => LlmError::with_provider(ErrorCategory::RateLimit, message, provider),
            401 | 403 => LlmError::with_provider(ErrorCategory::Auth, message, provider),
            400 | 422 => LlmError::with_provider(ErrorCategory::BadRequest, message, provider),
            408 => LlmError::with_provider(ErrorCategory::Network, message, provider),
            500..=599 => LlmError::with_provider(ErrorCategory::Transient, message, provider),
            404 | 410 => LlmError::with_provider(ErrorCategory::Unavailable, message, provider),
            _ => LlmError::with_provider(ErrorCategory::Unknown, message, provider),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn classify_reqwest(err: &reqwest::Error, provider: &str) -> LlmError {
        if err.is_timeout() || err.is_connect() {
            return LlmError::with_provider(ErrorCategory::Network, err.to_string(), provider);
        }
        if let Some(status) = err.status() {
            return Self::classify_http_status(status.as_u16(), &err.to_string(), provider);
        }
        if err.is_decode() {
            return LlmError::with_provider(ErrorCategory::ParseError, err.to_string(), provider);
        }
        Self::classify(&err.to_string(), provider)
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ScribeError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // -------------------------------------------------------------------------
    // Collaborator Errors
    // -------------------------------------------------------------------------
    /// Classified failure of the model, search or scrape service
    #[error("External service error: {0}")]
    External(LlmError),

    /// Unclassified model API error
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Order/Text store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Operation timeout with context
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    /// Terminal Job failure, tagged with the stage it occurred in
    #[error("Job failed during {stage}: {message}")]
    Pipeline { stage: Progress, message: String },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Completed and running Jobs are never started again
    #[error("Job {id} is {}, only pending or failed jobs can run", .status.as_str())]
    JobNotRunnable { id: String, status: JobStatus },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not initialized: run 'longscribe init' first")]
    NotInitialized,
}

impl From<LlmError> for ScribeError {
    fn from(err: LlmError) -> Self {
        ScribeError::External(err)
    }
}

pub type Result<T> = std::result::Result<T, ScribeError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl ScribeError {
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a terminal pipeline error for the given stage
    pub fn pipeline(stage: Progress, message: impl Into<String>) -> Self {
        Self::Pipeline {
            stage,
            message: message.into(),
        }
    }

    /// Classified collaborator error
    pub fn external(category: ErrorCategory, message: impl Into<String>, provider: &str) -> Self {
        Self::External(LlmError::with_provider(category, message, provider))
    }

    /// Check if this error is a transient external failure (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::External(e) => e.is_retryable(),
            Self::LlmApi(msg) => ErrorClassifier::classify(msg, "llm").is_retryable(),
            Self::Timeout { .. } => true,
            Self::Store(_) => true,
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| ScribeError::Store(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| ScribeError::Store(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
