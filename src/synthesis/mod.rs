//! Segmented Synthesis
//!
//! Runs the plan's writer assignments strictly in order. Every assignment
//! after the first sees the trailing window of the document so far plus the
//! labels of what is already written; each output goes through truncation
//! recovery before it is appended.

mod prompt;

pub use prompt::{WritePrompt, structure_quotas};

use tracing::{info, instrument};

use crate::ai::{ModelClient, TokenCeiling};
use crate::config::{GenerationConfig, SourcesConfig};
use crate::constants::generation::MAX_OVERLAP_CHARS;
use crate::document::{char_len, clean_fragment, strip_overlap, tail_chars};
use crate::recovery::{RecoveryEngine, RecoveryInput, RecoveryState, drop_written_sections};
use crate::types::{Job, PromptKind, Result, SourceCandidate, StructurePlan};

/// Per-assignment record of how the segment was produced
#[derive(Debug, Clone)]
pub struct SegmentReport {
    pub assignment: usize,
    pub chars: usize,
    pub continuations: usize,
    pub missing: Vec<String>,
    pub state: RecoveryState,
}

#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub document: String,
    pub segments: Vec<SegmentReport>,
}

impl SynthesisOutcome {
    pub fn continuations(&self) -> usize {
        self.segments.iter().map(|s| s.continuations).sum()
    }
}

pub struct SynthesisEngine {
    ceiling: TokenCeiling,
    recovery: RecoveryEngine,
    tail_window: usize,
    source_chars: usize,
}

impl SynthesisEngine {
    pub fn new(generation: &GenerationConfig, sources: &SourcesConfig) -> Self {
        Self {
            ceiling: TokenCeiling::from(generation),
            recovery: RecoveryEngine::new(generation),
            tail_window: generation.tail_window_chars,
            source_chars: sources.preview_chars,
        }
    }

    #[instrument(skip_all, fields(job_id = %job.id, assignments = plan.assignments.len()))]
    pub async fn synthesize(
        &self,
        job: &Job,
        plan: &StructurePlan,
        sources: &[SourceCandidate],
        client: &ModelClient,
    ) -> Result<SynthesisOutcome> {
        let total = plan.assignments.len();
        let mut document = String::new();
        let mut completed: Vec<String> = Vec::with_capacity(total);
        let mut segments = Vec::with_capacity(total);

        for assignment in &plan.assignments {
            let prompt = WritePrompt {
                job,
                assignment,
                total_assignments: total,
                previous_tail: tail_chars(&document, self.tail_window),
                completed: &completed,
                sources,
                source_chars: self.source_chars,
            }
            .build();

            let reply = client
                .write(
                    Some(assignment.index),
                    PromptKind::Write,
                    prompt,
                    self.ceiling.for_chars(assignment.target_chars as usize),
                )
                .await?;

            let mut output = clean_fragment(&reply.text);
            if !document.is_empty() {
                output = strip_overlap(&document, &output, MAX_OVERLAP_CHARS).to_string();
                output = drop_written_sections(&document, &output, self.recovery.matcher());
            }

            let outcome = self
                .recovery
                .recover(
                    client,
                    RecoveryInput {
                        job,
                        assignment,
                        preceding: &document,
                        output,
                        finish: reply.finish,
                    },
                )
                .await?;

            info!(
                assignment = assignment.index,
                chars = char_len(&outcome.text),
                target_chars = assignment.target_chars,
                continuations = outcome.continuations,
                missing = outcome.missing.len(),
                "Assignment written"
            );

            let segment = outcome.text.trim();
            if !segment.is_empty() {
                if !document.is_empty() {
                    document.push('\n');
                }
                document.push_str(segment);
            }

            completed.push(completed_entry(&assignment.label, &assignment.headings()));
            segments.push(SegmentReport {
                assignment: assignment.index,
                chars: char_len(segment),
                continuations: outcome.continuations,
                missing: outcome.missing,
                state: outcome.state,
            });
        }

        Ok(SynthesisOutcome { document, segments })
    }
}

fn completed_entry(label: &str, headings: &[&str]) -> String {
    if headings.is_empty() {
        label.to_string()
    } else {
        format!("{}: {}", label, headings.join("; "))
    }
}
