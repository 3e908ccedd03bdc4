//! Ending validation: make sure the document stops on a complete sentence.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::ai::{ModelClient, PromptBuilder, parse_reply};
use crate::document::{char_len, ends_cleanly, ensure_closed, head_chars, tail_chars, trim_to_last_sentence};
use crate::types::{EndingReport, Job, PromptKind, Result};

const ENDING_MAX_TOKENS: u32 = 256;

#[derive(Debug, Deserialize)]
struct EndingReply {
    #[serde(default = "default_complete", alias = "is_complete")]
    complete: bool,
    #[serde(default, alias = "trim")]
    trim_chars: usize,
}

fn default_complete() -> bool {
    true
}

/// Model verdict on the document tail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndingVerdict {
    pub complete: bool,
    /// Trailing characters the model wants removed
    pub trim_chars: usize,
    /// Whether the verdict came from the model or the local heuristic
    pub from_model: bool,
}

pub fn ending_prompt(job: &Job, window: &str) -> String {
    PromptBuilder::new()
        .role(format!(
            "You proofread the final lines of a {} written in {}.",
            job.kind.label(),
            job.language.name()
        ))
        .block("document_end", window)
        .objectives([
            "Decide whether the last sentence is grammatically complete and not cut mid-word",
            "If it is not, count how many trailing characters must be removed to drop the broken part",
        ])
        .rules(["Count characters of DOCUMENT_END exactly as given, markup included"])
        .output(r#"JSON only: {"complete": true|false, "trim_chars": <number>}"#)
        .build()
}

/// Cut `trim` characters from the end and close at the nearest sentence boundary
pub fn apply_trim(doc: &str, trim: usize) -> String {
    let keep = char_len(doc).saturating_sub(trim);
    trim_to_last_sentence(head_chars(doc, keep))
}

fn common_prefix_chars(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

pub struct EndingValidator {
    window: usize,
}

impl EndingValidator {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    /// Ask the model about the tail; an unusable reply falls back to the local check
    pub async fn verdict(&self, client: &ModelClient, job: &Job, doc: &str) -> EndingVerdict {
        let window = tail_chars(doc, self.window);
        let local = EndingVerdict {
            complete: ends_cleanly(doc),
            trim_chars: 0,
            from_model: false,
        };

        let reply = match client
            .ask(PromptKind::EndingCheck, ending_prompt(job, window), ENDING_MAX_TOKENS)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Ending check failed, using local check");
                return local;
            }
        };

        match parse_reply::<EndingReply>(&reply.text) {
            Some(parsed) => EndingVerdict {
                complete: parsed.complete,
                trim_chars: parsed.trim_chars.min(char_len(window)),
                from_model: true,
            },
            None => {
                debug!("Ending reply not parseable, using local check");
                local
            }
        }
    }

    /// Validate and repair the ending. The result always ends on a closed block.
    pub async fn validate(&self, client: &ModelClient, job: &Job, doc: &str) -> Result<(String, EndingReport)> {
        let verdict = self.verdict(client, job, doc).await;
        let mut report = EndingReport {
            model_said_complete: verdict.complete,
            ..Default::default()
        };

        let mut text = if verdict.complete {
            doc.to_string()
        } else if verdict.trim_chars > 0 {
            apply_trim(doc, verdict.trim_chars)
        } else {
            trim_to_last_sentence(doc)
        };
        if text.trim().is_empty() {
            // No clean boundary anywhere; keep the text and close it
            text = doc.to_string();
        }
        let (closed, changed) = ensure_closed(&text);
        if changed {
            text = closed;
        }

        let kept = common_prefix_chars(doc, &text);
        report.trimmed_chars = char_len(doc) - kept;
        report.closing_appended = char_len(&text) > kept;

        info!(
            complete = verdict.complete,
            from_model = verdict.from_model,
            trimmed = report.trimmed_chars,
            closing_appended = report.closing_appended,
            "Ending validated"
        );
        Ok((text, report))
    }
}
