//! Model-driven selection of discovered sources.
//!
//! The model reads a preview of every candidate and names the ones worth
//! grounding the document on. Its reply is advisory: indices are validated,
//! padded to the minimum with the longest remaining candidates and capped at
//! the maximum. An unusable reply falls back to the longest candidates.

use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::ai::{ModelClient, PromptBuilder, parse_reply};
use crate::document::head_chars;
use crate::types::{Job, PromptKind, SourceCandidate};

const SELECTION_MAX_TOKENS: u32 = 1024;

/// Selection bounds and preview size
#[derive(Debug, Clone, Copy)]
pub struct SelectionLimits {
    pub min: usize,
    pub max: usize,
    pub preview_chars: usize,
}

/// Outcome of selection over a candidate list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Indices into the candidate list, in the order they were chosen
    pub indices: Vec<usize>,
    pub rationale: String,
    /// True when the model reply was discarded
    pub fallback: bool,
}

#[derive(Debug, Deserialize)]
struct SelectionReply {
    #[serde(default)]
    selected: Vec<usize>,
    #[serde(default)]
    rationale: String,
}

/// Candidate indices ordered by extracted length, longest first
fn by_length(candidates: &[SourceCandidate]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| candidates[b].length.cmp(&candidates[a].length).then(a.cmp(&b)));
    order
}

/// Deterministic fallback: the `min` longest candidates
pub fn longest(candidates: &[SourceCandidate], min: usize, reason: &str) -> Selection {
    Selection {
        indices: by_length(candidates).into_iter().take(min).collect(),
        rationale: reason.to_string(),
        fallback: true,
    }
}

/// Validate raw model indices against the candidate list and the bounds
pub fn normalise_selection(
    raw: &[usize],
    candidates: &[SourceCandidate],
    limits: SelectionLimits,
) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut indices: Vec<usize> = raw
        .iter()
        .copied()
        .filter(|&i| i < candidates.len() && seen.insert(i))
        .take(limits.max)
        .collect();

    if indices.len() < limits.min {
        for i in by_length(candidates) {
            if indices.len() >= limits.min {
                break;
            }
            if seen.insert(i) {
                indices.push(i);
            }
        }
    }
    indices
}

pub fn selection_prompt(job: &Job, candidates: &[SourceCandidate], limits: SelectionLimits) -> String {
    let mut builder = PromptBuilder::new()
        .role("You are a research editor choosing reference material for a commissioned text.")
        .block(
            "assignment",
            format!(
                "Topic: {}\nDocument type: {}\nLanguage: {}",
                job.topic.trim(),
                job.kind.label(),
                job.language.name()
            ),
        )
        .objectives([
            "Prefer sources that are directly relevant to the topic",
            "Prefer rigorous, well-sourced and recent material",
            "Cover a diversity of viewpoints",
            "Exclude promotional or advertorial content",
        ]);

    for (i, candidate) in candidates.iter().enumerate() {
        builder = builder.block(
            &format!("source_{}", i),
            format!(
                "URL: {}\n{}",
                candidate.url,
                head_chars(&candidate.text, limits.preview_chars)
            ),
        );
    }

    builder
        .rules([format!(
            "Select between {} and {} sources by their number",
            limits.min, limits.max
        )])
        .output(r#"JSON only: {"selected": [0, 2, 5], "rationale": "one or two sentences"}"#)
        .build()
}

/// Ask the model to pick sources. Never fails: errors and unusable replies fall back.
pub async fn select_sources(
    client: &ModelClient,
    job: &Job,
    candidates: &[SourceCandidate],
    limits: SelectionLimits,
) -> Selection {
    if candidates.len() <= limits.min {
        return Selection {
            indices: (0..candidates.len()).collect(),
            rationale: "all candidates kept".to_string(),
            fallback: false,
        };
    }

    let prompt = selection_prompt(job, candidates, limits);
    let reply = match client.ask(PromptKind::Selection, prompt, SELECTION_MAX_TOKENS).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Source selection call failed");
            return longest(candidates, limits.min, "selection call failed");
        }
    };

    match parse_reply::<SelectionReply>(&reply.text) {
        Some(parsed) if parsed.selected.iter().any(|&i| i < candidates.len()) => {
            let indices = normalise_selection(&parsed.selected, candidates, limits);
            debug!(job_id = %job.id, selected = ?indices, "Sources selected");
            Selection {
                indices,
                rationale: parsed.rationale,
                fallback: false,
            }
        }
        _ => {
            warn!(job_id = %job.id, "Selection reply unusable, keeping longest sources");
            longest(candidates, limits.min, "selection reply unparseable or empty")
        }
    }
}
