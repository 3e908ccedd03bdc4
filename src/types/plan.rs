//! Structure plan types: the section skeleton and its per-writer split.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One heading of the skeleton with its descriptive text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    /// 2 for top-level sections, 3 for subsections
    pub level: u8,
    #[serde(default)]
    pub description: String,
}

impl Section {
    pub fn new(heading: impl Into<String>, level: u8, description: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            level: level.clamp(2, 3),
            description: description.into(),
        }
    }
}

/// Render sections as the skeleton text embedded in prompts
pub fn render_skeleton(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| {
            let indent = if s.level > 2 { "  " } else { "" };
            if s.description.trim().is_empty() {
                format!("{indent}<h{lvl}>{}</h{lvl}>", s.heading, lvl = s.level)
            } else {
                format!(
                    "{indent}<h{lvl}>{}</h{lvl}>: {}",
                    s.heading,
                    s.description.trim(),
                    lvl = s.level
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One writer's slice of the skeleton plus its length target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterAssignment {
    /// Zero-based sequence index
    pub index: usize,
    pub label: String,
    pub sections: Vec<Section>,
    pub target_chars: u32,
    /// Free-text skeleton used when the planner reply could not be parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_skeleton: Option<String>,
}

impl WriterAssignment {
    pub fn headings(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.heading.as_str()).collect()
    }

    /// Skeleton text for the prompt, or None when the writer improvises
    pub fn skeleton_text(&self) -> Option<String> {
        if !self.sections.is_empty() {
            Some(render_skeleton(&self.sections))
        } else {
            self.approximate_skeleton.clone()
        }
    }
}

/// How the plan was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanMode {
    /// Short document: the writer improvises the skeleton inline
    Improvised,
    /// One skeleton, one writer
    SingleWriter,
    /// Planner plus several sequential writers
    MultiWriter,
}

/// Section skeleton for a Job. Fixed once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructurePlan {
    pub mode: PlanMode,
    pub skeleton: Vec<Section>,
    pub assignments: Vec<WriterAssignment>,
    /// Set when the planner reply was replaced by a deterministic fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl StructurePlan {
    /// Plan for documents short enough to skip the planner
    pub fn improvised(target_chars: u32) -> Self {
        Self {
            mode: PlanMode::Improvised,
            skeleton: Vec::new(),
            assignments: vec![WriterAssignment {
                index: 0,
                label: "Full document".to_string(),
                sections: Vec::new(),
                target_chars,
                approximate_skeleton: None,
            }],
            fallback_reason: None,
        }
    }

    /// One assignment wrapping the whole skeleton
    pub fn single(skeleton: Vec<Section>, target_chars: u32) -> Self {
        Self {
            mode: PlanMode::SingleWriter,
            assignments: vec![WriterAssignment {
                index: 0,
                label: "Full document".to_string(),
                sections: skeleton.clone(),
                target_chars,
                approximate_skeleton: None,
            }],
            skeleton,
            fallback_reason: None,
        }
    }

    pub fn with_fallback(mut self, reason: impl Into<String>) -> Self {
        self.fallback_reason = Some(reason.into());
        self
    }

    pub fn headings(&self) -> Vec<&str> {
        self.skeleton.iter().map(|s| s.heading.as_str()).collect()
    }

    /// Check that the assignments partition the skeleton in order:
    /// concatenating every slice reproduces the skeleton exactly.
    pub fn verify_partition(&self) -> std::result::Result<(), String> {
        if self.skeleton.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::new();
        for assignment in &self.assignments {
            for section in &assignment.sections {
                if !seen.insert(section.heading.as_str()) {
                    return Err(format!(
                        "heading '{}' appears in more than one assignment",
                        section.heading
                    ));
                }
            }
        }

        let flattened: Vec<&Section> = self
            .assignments
            .iter()
            .flat_map(|a| a.sections.iter())
            .collect();
        if flattened.len() != self.skeleton.len()
            || flattened.iter().zip(&self.skeleton).any(|(a, b)| *a != b)
        {
            return Err("assignments do not reconstruct the skeleton".to_string());
        }

        Ok(())
    }
}
