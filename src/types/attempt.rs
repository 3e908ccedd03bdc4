//! Generation attempt audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which prompt template produced a model call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptKind {
    Query,
    Selection,
    Plan,
    Write,
    Continue,
    EndingCheck,
    LinkRepair,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Selection => "selection",
            Self::Plan => "plan",
            Self::Write => "write",
            Self::Continue => "continue",
            Self::EndingCheck => "ending-check",
            Self::LinkRepair => "link-repair",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "query" => Some(Self::Query),
            "selection" => Some(Self::Selection),
            "plan" => Some(Self::Plan),
            "write" => Some(Self::Write),
            "continue" => Some(Self::Continue),
            "ending-check" => Some(Self::EndingCheck),
            "link-repair" => Some(Self::LinkRepair),
            _ => None,
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal signal of one model call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FinishSignal {
    #[default]
    Complete,
    /// Output stopped at the token ceiling
    LengthLimited,
    /// No completion after every retry; the output holds the error
    Failed,
}

impl FinishSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::LengthLimited => "length-limited",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "length-limited" => Self::LengthLimited,
            "failed" => Self::Failed,
            _ => Self::Complete,
        }
    }
}

/// Token accounting for a model call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// One model call made while producing a Job. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAttempt {
    /// Assignment index; None for calls outside synthesis (query, selection, planning, validation)
    pub assignment: Option<usize>,
    pub kind: PromptKind,
    pub prompt: String,
    pub output: String,
    pub finish: FinishSignal,
    pub usage: TokenUsage,
    pub created_at: DateTime<Utc>,
}

impl GenerationAttempt {
    pub fn new(
        assignment: Option<usize>,
        kind: PromptKind,
        prompt: impl Into<String>,
        output: impl Into<String>,
        finish: FinishSignal,
        usage: TokenUsage,
    ) -> Self {
        Self {
            assignment,
            kind,
            prompt: prompt.into(),
            output: output.into(),
            finish,
            usage,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_kind_parse() {
        for kind in [
            PromptKind::Query,
            PromptKind::Selection,
            PromptKind::Plan,
            PromptKind::Write,
            PromptKind::Continue,
            PromptKind::EndingCheck,
            PromptKind::LinkRepair,
        ] {
            assert_eq!(PromptKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(PromptKind::parse("other"), None);
    }

    #[test]
    fn test_usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage::new(100, 20);
        total += TokenUsage::new(50, 30);
        assert_eq!(total.total(), 200);
    }

    #[test]
    fn test_finish_wire_format() {
        let json = serde_json::to_string(&FinishSignal::LengthLimited).unwrap();
        assert_eq!(json, "\"length-limited\"");
        assert_eq!(FinishSignal::parse("complete"), FinishSignal::Complete);
        assert_eq!(FinishSignal::parse(FinishSignal::Failed.as_str()), FinishSignal::Failed);
    }
}
