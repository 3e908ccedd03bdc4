//! Truncation Recovery
//!
//! Bounded state machine run on every writer output:
//!
//! ```text
//! Generated ──▶ Complete                     (model finished, nothing missing)
//!     │
//!     └──▶ Continuing(n) ──▶ Generated ...   (length-limited or headings missing)
//!               │
//!               └──▶ Exhausted               (n == max_continuations)
//! ```
//!
//! A continuation sees only the trailing window of the document. Whatever
//! comes back is stripped of text overlapping the existing tail and of
//! sections that were already written, so the document never repeats itself
//! and always ends on a closed block.

use tracing::{debug, info, instrument, warn};

use crate::ai::{ModelClient, PromptBuilder, TokenCeiling};
use crate::config::GenerationConfig;
use crate::constants::generation::MAX_OVERLAP_CHARS;
use crate::document::{
    HeadingMatcher, char_len, clean_fragment, ensure_closed, extract_headings, strip_overlap, tail_chars,
    trim_to_last_sentence,
};
use crate::types::{FinishSignal, Job, PromptKind, Result, Section, WriterAssignment};

/// Smallest length asked of a continuation per missing section
const MIN_SECTION_CHARS: usize = 800;

/// Length asked of a closing-only continuation
const CLOSING_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Output received with the given finish signal
    Generated(FinishSignal),
    /// Continuation number `n` requested
    Continuing(usize),
    Complete,
    /// Continuation budget spent; the text is accepted as is
    Exhausted,
}

/// Result of recovering one assignment
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub text: String,
    pub continuations: usize,
    /// Planned headings still absent when recovery stopped
    pub missing: Vec<String>,
    pub state: RecoveryState,
}

/// One writer output awaiting recovery
pub struct RecoveryInput<'a> {
    pub job: &'a Job,
    pub assignment: &'a WriterAssignment,
    /// Document produced by earlier assignments
    pub preceding: &'a str,
    pub output: String,
    pub finish: FinishSignal,
}

/// Does the document need another generation?
pub fn needs_continuation(finish: FinishSignal, missing: &[&Section]) -> bool {
    finish == FinishSignal::LengthLimited || !missing.is_empty()
}

/// Drop every section of `continuation` whose heading already exists in `existing`
pub fn drop_written_sections(existing: &str, continuation: &str, matcher: &HeadingMatcher) -> String {
    let written = extract_headings(existing);
    let incoming = extract_headings(continuation);
    if incoming.is_empty() {
        return continuation.to_string();
    }

    let mut kept = String::with_capacity(continuation.len());
    kept.push_str(&continuation[..incoming[0].start]);
    for (i, heading) in incoming.iter().enumerate() {
        let end = incoming
            .get(i + 1)
            .map(|next| next.start)
            .unwrap_or(continuation.len());
        if matcher.is_present(&written, &heading.text) {
            debug!(heading = %heading.text, "Dropping repeated section from continuation");
            continue;
        }
        kept.push_str(&continuation[heading.start..end]);
    }
    kept
}

/// Append a continuation on a block boundary
fn join_blocks(text: &str, continuation: &str) -> String {
    let continuation = continuation.trim();
    if continuation.is_empty() {
        return text.to_string();
    }
    let mut joined = text.trim_end().to_string();
    if !joined.is_empty() {
        joined.push('\n');
    }
    joined.push_str(continuation);
    joined
}

pub struct RecoveryEngine {
    max_continuations: usize,
    tail_window: usize,
    matcher: HeadingMatcher,
    ceiling: TokenCeiling,
}

impl RecoveryEngine {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            max_continuations: config.max_continuations,
            tail_window: config.tail_window_chars,
            matcher: HeadingMatcher::new(config.heading_similarity),
            ceiling: TokenCeiling::from(config),
        }
    }

    pub fn matcher(&self) -> &HeadingMatcher {
        &self.matcher
    }

    /// Drive one assignment's output to completion or to the continuation bound
    #[instrument(skip(self, client, input), fields(job_id = %input.job.id, assignment = input.assignment.index))]
    pub async fn recover(&self, client: &ModelClient, input: RecoveryInput<'_>) -> Result<RecoveryOutcome> {
        let RecoveryInput {
            job,
            assignment,
            preceding,
            output,
            finish,
        } = input;
        let target = assignment.target_chars as usize;

        let mut text = output;
        let mut state = RecoveryState::Generated(finish);
        let mut continuations = 0;

        loop {
            let RecoveryState::Generated(finish) = state else {
                break;
            };

            if finish == FinishSignal::LengthLimited {
                text = trim_to_last_sentence(&text);
            }
            let missing = self.matcher.missing(&assignment.sections, &text);

            if !needs_continuation(finish, &missing) {
                state = RecoveryState::Complete;
                break;
            }
            if continuations >= self.max_continuations {
                warn!(
                    missing = missing.len(),
                    continuations, "Continuation budget spent, accepting output"
                );
                state = RecoveryState::Exhausted;
                break;
            }

            continuations += 1;
            let remaining = target.saturating_sub(char_len(&text));
            let wanted = if missing.is_empty() {
                remaining.max(CLOSING_CHARS)
            } else {
                remaining.max(missing.len() * MIN_SECTION_CHARS)
            };

            let context = format!("{}{}", tail_chars(preceding, self.tail_window), text);
            let prompt = self.continuation_prompt(job, tail_chars(&context, self.tail_window), &missing, wanted);
            info!(
                state = ?RecoveryState::Continuing(continuations),
                missing = missing.len(),
                chars = char_len(&text),
                "Requesting continuation"
            );

            let reply = client
                .write(
                    Some(assignment.index),
                    PromptKind::Continue,
                    prompt,
                    self.ceiling.for_chars(wanted),
                )
                .await?;

            let reply_text = clean_fragment(&reply.text);
            let fresh = strip_overlap(&text, &reply_text, MAX_OVERLAP_CHARS);
            let existing = format!("{}\n{}", preceding, text);
            let fresh = drop_written_sections(&existing, fresh, &self.matcher);
            text = join_blocks(&text, &fresh);
            state = RecoveryState::Generated(reply.finish);
        }

        let (closed, changed) = ensure_closed(&text);
        if changed {
            text = closed;
        }
        let missing = self
            .matcher
            .missing(&assignment.sections, &text)
            .into_iter()
            .map(|s| s.heading.clone())
            .collect();

        Ok(RecoveryOutcome {
            text,
            continuations,
            missing,
            state,
        })
    }

    pub fn continuation_prompt(&self, job: &Job, tail: &str, missing: &[&Section], wanted: usize) -> String {
        let mut builder = PromptBuilder::new()
            .role(format!(
                "You are continuing a {} in {} that stopped early.",
                job.kind.label(),
                job.language.name()
            ))
            .block("previous_text", tail);

        if missing.is_empty() {
            builder = builder.objectives([
                "Continue exactly where the previous text stops".to_string(),
                "Bring the text to a natural close, ending with a short concluding paragraph".to_string(),
                format!("Remaining length: about {} characters", wanted),
            ]);
        } else {
            let headings = missing
                .iter()
                .map(|s| format!("<h{lvl}>{}</h{lvl}>", s.heading, lvl = s.level))
                .collect::<Vec<_>>()
                .join("\n");
            builder = builder.block("missing_sections", headings).objectives([
                "Write exactly the sections listed in MISSING_SECTIONS next, in that order".to_string(),
                "Use each listed heading verbatim".to_string(),
                format!("Remaining length: about {} characters", wanted),
            ]);
        }

        builder
            .rules([
                "Do not repeat any text or section from PREVIOUS_TEXT",
                "Start with a new block element; never resume a cut sentence mid-word",
                "HTML fragment only: h2, h3, p, ul, ol, table, blockquote",
                "End on a complete sentence inside a closed block",
            ])
            .output("The continuation only, without commentary or code fences.")
            .build()
    }
}
