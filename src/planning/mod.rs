//! Structure Planning
//!
//! Decides the section skeleton of a Job and, for long documents, splits it
//! across sequential writers.
//!
//! | Target length        | Plan                                              |
//! |----------------------|---------------------------------------------------|
//! | below threshold      | no planner call, the writer improvises            |
//! | up to one writer     | one skeleton, one assignment                      |
//! | several writers      | skeleton plus exactly `writers` assignments       |
//!
//! Planner replies that do not fit the requested shape are replaced by a
//! deterministic fallback recorded in `StructurePlan::fallback_reason`.

mod parse;

pub use parse::{PlanReply, SectionReply, build_skeleton};

use tracing::{info, instrument, warn};

use crate::ai::{ModelClient, PromptBuilder, parse_reply};
use crate::config::GenerationConfig;
use crate::constants::planning::MIN_SECTIONS;
use crate::document::{head_chars, normalise_heading};
use crate::types::{
    Job, PlanMode, PromptKind, Result, Section, SourceCandidate, StructurePlan, WriterAssignment,
};

const PLAN_MAX_TOKENS: u32 = 4096;
const SOURCE_HINT_CHARS: usize = 600;

/// Shape of the plan required for a target length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanShape {
    Improvised,
    Single { max_sections: usize },
    Multi { writers: usize, max_sections: usize },
}

impl PlanShape {
    pub fn for_length(target: u32, config: &GenerationConfig) -> Self {
        if target < config.plan_threshold {
            return Self::Improvised;
        }
        let sections = (target.div_ceil(config.chars_per_section) as usize).max(MIN_SECTIONS as usize);
        let writers = (target.div_ceil(config.chars_per_writer)).min(config.max_writers) as usize;
        if writers <= 1 {
            Self::Single {
                max_sections: sections,
            }
        } else {
            Self::Multi {
                writers,
                max_sections: sections.max(writers),
            }
        }
    }
}

/// Split `total` into shares proportional to `weights`; the shares sum to `total`
pub fn proportional_targets(total: u32, weights: &[u64]) -> Vec<u32> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: u128 = weights.iter().map(|&w| u128::from(w)).sum();
    if sum == 0 {
        return proportional_targets(total, &vec![1; weights.len()]);
    }

    let mut shares: Vec<u32> = weights
        .iter()
        .map(|&w| (u128::from(total) * u128::from(w) / sum) as u32)
        .collect();
    let assigned: u32 = shares.iter().sum();
    if let Some(last) = shares.last_mut() {
        *last += total - assigned;
    }
    shares
}

/// Top-level sections with their subsections, as contiguous groups
fn top_level_groups(skeleton: &[Section]) -> Vec<Vec<Section>> {
    let mut groups: Vec<Vec<Section>> = Vec::new();
    for section in skeleton {
        match groups.last_mut() {
            Some(group) if section.level > 2 => group.push(section.clone()),
            _ => groups.push(vec![section.clone()]),
        }
    }
    groups
}

fn slice_weight(sections: &[Section]) -> u64 {
    // a subsection carries roughly half the text of a top-level section
    sections.iter().map(|s| if s.level > 2 { 1 } else { 2 }).sum()
}

/// Deterministic split of a parsed skeleton into contiguous, balanced assignments
pub fn contiguous_split(skeleton: &[Section], writers: usize, target: u32) -> Vec<WriterAssignment> {
    let groups = top_level_groups(skeleton);
    let count = groups.len().max(1);
    let writers = writers.min(groups.len()).max(1);

    let mut buckets: Vec<Vec<Section>> = vec![Vec::new(); writers];
    for (i, group) in groups.into_iter().enumerate() {
        buckets[i * writers / count].extend(group);
    }

    let weights: Vec<u64> = buckets.iter().map(|b| slice_weight(b)).collect();
    let targets = proportional_targets(target, &weights);

    buckets
        .into_iter()
        .zip(targets)
        .enumerate()
        .map(|(index, (sections, target_chars))| WriterAssignment {
            index,
            label: assignment_label(&sections, index),
            sections,
            target_chars,
            approximate_skeleton: None,
        })
        .collect()
}

fn assignment_label(sections: &[Section], index: usize) -> String {
    let top: Vec<&str> = sections
        .iter()
        .filter(|s| s.level == 2)
        .map(|s| s.heading.as_str())
        .collect();
    match (top.first(), top.last()) {
        (Some(first), Some(last)) if first != last => format!("{} to {}", first, last),
        (Some(first), _) => first.to_string(),
        _ => format!("Part {}", index + 1),
    }
}

/// Equal synthetic assignments carrying the raw plan text as guidance
pub fn synthetic_split(raw_plan: &str, writers: usize, target: u32) -> Vec<WriterAssignment> {
    let writers = writers.max(1);
    let targets = proportional_targets(target, &vec![1; writers]);
    let guidance = raw_plan.trim();

    targets
        .into_iter()
        .enumerate()
        .map(|(index, target_chars)| WriterAssignment {
            index,
            label: format!("Part {} of {}", index + 1, writers),
            sections: Vec::new(),
            target_chars,
            approximate_skeleton: (!guidance.is_empty()).then(|| {
                format!(
                    "{}\n\nWrite part {} of {} of this outline, continuing from the previous part.",
                    guidance,
                    index + 1,
                    writers
                )
            }),
        })
        .collect()
}

/// Map the planner's assignments onto the skeleton; None unless they form an
/// exact, ordered partition with the requested writer count
pub fn assignments_from_reply(
    reply: &PlanReply,
    skeleton: &[Section],
    writers: usize,
    target: u32,
) -> Option<Vec<WriterAssignment>> {
    if reply.assignments.len() != writers {
        return None;
    }

    let groups = top_level_groups(skeleton);
    let keys: Vec<String> = groups.iter().map(|g| normalise_heading(&g[0].heading)).collect();

    let mut next = 0;
    let mut slices: Vec<Vec<Section>> = Vec::with_capacity(writers);
    for assignment in &reply.assignments {
        if assignment.sections.is_empty() {
            return None;
        }
        let mut slice = Vec::new();
        for heading in &assignment.sections {
            let key = normalise_heading(heading);
            if keys.get(next) != Some(&key) {
                return None;
            }
            slice.extend(groups[next].iter().cloned());
            next += 1;
        }
        slices.push(slice);
    }
    if next != groups.len() {
        return None;
    }

    // lengths the model states are only trusted when each fits the Job
    let bound = 1..=u64::from(target);
    let weights: Vec<u64> = if reply.assignments.iter().all(|a| bound.contains(&a.target_length)) {
        reply.assignments.iter().map(|a| a.target_length).collect()
    } else {
        slices.iter().map(|s| slice_weight(s)).collect()
    };
    let targets = proportional_targets(target, &weights);

    Some(
        slices
            .into_iter()
            .zip(targets)
            .zip(&reply.assignments)
            .enumerate()
            .map(|(index, ((sections, target_chars), spec))| WriterAssignment {
                index,
                label: if spec.label.trim().is_empty() {
                    assignment_label(&sections, index)
                } else {
                    spec.label.trim().to_string()
                },
                sections,
                target_chars,
                approximate_skeleton: None,
            })
            .collect(),
    )
}

pub struct PlanningEngine {
    config: GenerationConfig,
}

impl PlanningEngine {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Produce the structure plan. Only a failed model call is an error;
    /// unusable replies fall back deterministically.
    #[instrument(skip(self, job, sources, client), fields(job_id = %job.id))]
    pub async fn plan(
        &self,
        job: &Job,
        target: u32,
        sources: &[SourceCandidate],
        client: &ModelClient,
    ) -> Result<StructurePlan> {
        let shape = PlanShape::for_length(target, &self.config);
        if shape == PlanShape::Improvised {
            info!("Short document, writer improvises the structure");
            return Ok(StructurePlan::improvised(target));
        }

        let prompt = self.plan_prompt(job, target, shape, sources);
        let reply = client.ask(PromptKind::Plan, prompt, PLAN_MAX_TOKENS).await?;
        let plan = self.build_plan(&reply.text, shape, target);

        match &plan.fallback_reason {
            Some(reason) => warn!(reason = %reason, "Planner reply replaced by fallback"),
            None => info!(
                sections = plan.skeleton.len(),
                writers = plan.assignments.len(),
                "Structure planned"
            ),
        }
        Ok(plan)
    }

    /// Turn a raw planner reply into a plan of the requested shape
    pub fn build_plan(&self, raw: &str, shape: PlanShape, target: u32) -> StructurePlan {
        let parsed: Option<PlanReply> = parse_reply(raw);
        let max_subsections = self.config.max_subsections as usize;

        match shape {
            PlanShape::Improvised => StructurePlan::improvised(target),
            PlanShape::Single { max_sections } => {
                let skeleton = parsed
                    .as_ref()
                    .map(|p| build_skeleton(&p.sections, max_sections, max_subsections))
                    .unwrap_or_default();
                if skeleton.is_empty() {
                    let mut plan = StructurePlan::single(Vec::new(), target);
                    let guidance = raw.trim();
                    if !guidance.is_empty() {
                        plan.assignments[0].approximate_skeleton = Some(guidance.to_string());
                    }
                    plan.with_fallback("planner reply had no usable skeleton")
                } else {
                    StructurePlan::single(skeleton, target)
                }
            }
            PlanShape::Multi {
                writers,
                max_sections,
            } => {
                let Some(reply) = parsed else {
                    return StructurePlan {
                        mode: PlanMode::MultiWriter,
                        skeleton: Vec::new(),
                        assignments: synthetic_split(raw, writers, target),
                        fallback_reason: None,
                    }
                    .with_fallback("planner reply was not parseable");
                };

                let skeleton = build_skeleton(&reply.sections, max_sections, max_subsections);
                if skeleton.is_empty() {
                    return StructurePlan {
                        mode: PlanMode::MultiWriter,
                        skeleton: Vec::new(),
                        assignments: synthetic_split(raw, writers, target),
                        fallback_reason: None,
                    }
                    .with_fallback("planner reply had no usable skeleton");
                }

                match assignments_from_reply(&reply, &skeleton, writers, target) {
                    Some(assignments) => StructurePlan {
                        mode: PlanMode::MultiWriter,
                        skeleton,
                        assignments,
                        fallback_reason: None,
                    },
                    None => {
                        let reason = format!(
                            "planner returned {} assignments not partitioning the skeleton, expected {}",
                            reply.assignments.len(),
                            writers
                        );
                        StructurePlan {
                            mode: PlanMode::MultiWriter,
                            assignments: contiguous_split(&skeleton, writers, target),
                            skeleton,
                            fallback_reason: None,
                        }
                        .with_fallback(reason)
                    }
                }
            }
        }
    }

    pub fn plan_prompt(&self, job: &Job, target: u32, shape: PlanShape, sources: &[SourceCandidate]) -> String {
        let max_subsections = self.config.max_subsections;
        let mut task = format!(
            "Topic: {}\nDocument type: {}\nLanguage: {}\nTotal length: {} characters",
            job.topic.trim(),
            job.kind.label(),
            job.language.name(),
            target
        );
        if !job.guidelines.trim().is_empty() {
            task.push_str(&format!("\nAuthor guidelines: {}", job.guidelines.trim()));
        }
        if !job.seo_keywords.is_empty() {
            task.push_str(&format!("\nKeywords: {}", job.seo_keywords.join(", ")));
        }

        let hints = sources
            .iter()
            .map(|s| format!("- {}: {}", s.url, head_chars(s.text.trim(), SOURCE_HINT_CHARS).replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n");

        let (max_sections, writers) = match shape {
            PlanShape::Improvised => (MIN_SECTIONS as usize, 1),
            PlanShape::Single { max_sections } => (max_sections, 1),
            PlanShape::Multi {
                writers,
                max_sections,
            } => (max_sections, writers),
        };

        let mut rules = vec![
            format!("Use at most {} top-level sections", max_sections),
            format!("Use at most {} subsections per section", max_subsections),
            "Every heading must be unique".to_string(),
            "Headings are short and written in the document language".to_string(),
        ];
        let output = if writers > 1 {
            rules.push(format!(
                "Split the sections into exactly {} assignments, in order; each top-level section belongs to exactly one assignment",
                writers
            ));
            rules.push("Give each assignment a target_length proportional to its content; the targets add up to the total length".to_string());
            r#"JSON only: {"sections": [{"heading": "...", "description": "...", "subsections": ["..."]}], "assignments": [{"label": "...", "sections": ["top-level heading", "..."], "target_length": 12000}]}"#
        } else {
            r#"JSON only: {"sections": [{"heading": "...", "description": "...", "subsections": ["..."]}]}"#
        };

        PromptBuilder::new()
            .role("You are a senior editor outlining a commissioned long-form text.")
            .block("task", task)
            .block("sources", hints)
            .rules(rules)
            .output(output)
            .build()
    }
}
