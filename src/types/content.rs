//! Persisted Job content: the JSON document written back to the store.
//!
//! Top-level keys are stable: consumers read `generatedContent` and
//! `generatedAt`, everything else is diagnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Result, ScribeError};
use super::plan::StructurePlan;
use super::source::{FetchStatus, SearchHit, SourceCandidate};

/// Per-source summary stored under `scrapedSources`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedSourceRecord {
    pub url: String,
    pub length: usize,
    pub status: FetchStatus,
    pub is_user_source: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<&SourceCandidate> for ScrapedSourceRecord {
    fn from(c: &SourceCandidate) -> Self {
        Self {
            url: c.url.clone(),
            length: c.length,
            status: c.status,
            is_user_source: c.is_user_source(),
            note: c.note.clone(),
        }
    }
}

/// Structured trace of source acquisition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTrace {
    /// Discovery was skipped because user sources filled the budget
    pub discovery_skipped: bool,
    pub selected_urls: Vec<String>,
    #[serde(default)]
    pub selection_rationale: String,
    /// Selection came from the deterministic longest-first fallback
    pub selection_fallback: bool,
}

/// Outcome of ending validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndingReport {
    pub model_said_complete: bool,
    pub trimmed_chars: usize,
    /// A closing block had to be appended
    pub closing_appended: bool,
}

/// Outcome of link validation and repair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkReport {
    pub required: usize,
    pub missing_before: Vec<String>,
    pub missing_after: Vec<String>,
    pub repair_attempted: bool,
    /// Repair output was discarded as unsafe
    pub repair_rejected: bool,
    pub duplicates_removed: usize,
}

impl LinkReport {
    pub fn is_complete(&self) -> bool {
        self.missing_after.is_empty()
    }
}

/// The content JSON stored per Job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContent {
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub all_discovered_results: Vec<SearchHit>,
    #[serde(default)]
    pub scraped_sources: Vec<ScrapedSourceRecord>,
    #[serde(default)]
    pub structure_plan: Option<StructurePlan>,
    /// Synthesized document before validation; dropped once it is final
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_content: Option<String>,
    #[serde(default)]
    pub generated_content: Option<String>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub no_sources_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_trace: Option<SourceTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ending_report: Option<EndingReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_report: Option<LinkReport>,
}

impl JobContent {
    /// Schema checks applied at the store boundary
    pub fn validate(&self) -> Result<()> {
        if let Some(plan) = &self.structure_plan {
            if plan.assignments.is_empty() {
                return Err(ScribeError::InvalidContent(
                    "structure plan has no assignments".to_string(),
                ));
            }
            plan.verify_partition()
                .map_err(|e| ScribeError::InvalidContent(format!("structure plan: {}", e)))?;
        }

        match (&self.generated_content, &self.generated_at) {
            (Some(text), Some(_)) if text.trim().is_empty() => {
                return Err(ScribeError::InvalidContent(
                    "generatedContent is empty".to_string(),
                ));
            }
            (Some(_), None) => {
                return Err(ScribeError::InvalidContent(
                    "generatedContent without generatedAt".to_string(),
                ));
            }
            _ => {}
        }

        if self.no_sources_available
            && self
                .source_trace
                .as_ref()
                .is_some_and(|t| !t.selected_urls.is_empty())
        {
            return Err(ScribeError::InvalidContent(
                "noSourcesAvailable set while sources were selected".to_string(),
            ));
        }

        Ok(())
    }

    /// Keep the unvalidated document so a later failure does not lose it
    pub fn draft(&mut self, text: &str) {
        self.draft_content = Some(text.to_string());
    }

    /// Record the final document
    pub fn finish(&mut self, text: String) {
        self.draft_content = None;
        self.generated_content = Some(text);
        self.generated_at = Some(Utc::now());
    }
}
