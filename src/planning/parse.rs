//! Planner reply schema and skeleton construction.

use serde::{Deserialize, Deserializer};
use std::collections::HashSet;

use crate::document::normalise_heading;
use crate::types::Section;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanReply {
    #[serde(default, alias = "skeleton", alias = "outline")]
    pub sections: Vec<SectionReply>,
    #[serde(default, alias = "writers")]
    pub assignments: Vec<AssignmentReply>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionReply {
    #[serde(alias = "title")]
    pub heading: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subsections: Vec<SubsectionReply>,
}

/// Subsections arrive either as plain titles or as objects
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubsectionReply {
    Title(String),
    Detailed {
        #[serde(alias = "title")]
        heading: String,
        #[serde(default)]
        description: String,
    },
}

impl SubsectionReply {
    fn into_parts(self) -> (String, String) {
        match self {
            Self::Title(heading) => (heading, String::new()),
            Self::Detailed {
                heading,
                description,
            } => (heading, description),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentReply {
    #[serde(default)]
    pub label: String,
    /// Top-level headings covered by this assignment, in order
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default, alias = "target_chars", deserialize_with = "lenient_length")]
    pub target_length: u64,
}

/// Accept lengths written as integers, floats or numeric strings
fn lenient_length<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f.round() as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0),
        _ => 0,
    })
}

/// Flatten planner sections into a skeleton: unique non-empty headings,
/// at most `max_sections` top-level entries with `max_subsections` each
pub fn build_skeleton(
    sections: &[SectionReply],
    max_sections: usize,
    max_subsections: usize,
) -> Vec<Section> {
    let mut seen = HashSet::new();
    let mut skeleton = Vec::new();
    let mut top_level = 0;

    for section in sections {
        if top_level >= max_sections {
            break;
        }
        let heading = section.heading.trim();
        let key = normalise_heading(heading);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        skeleton.push(Section::new(heading, 2, section.description.trim()));
        top_level += 1;

        let mut subsections = 0;
        for sub in section.subsections.iter().cloned() {
            if subsections >= max_subsections {
                break;
            }
            let (heading, description) = sub.into_parts();
            let key = normalise_heading(&heading);
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            skeleton.push(Section::new(heading.trim(), 3, description.trim()));
            subsections += 1;
        }
    }

    skeleton
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_shapes_accepted() {
        let reply: PlanReply = serde_json::from_str(
            r#"{
                "outline": [
                    {"title": "Intro", "subsections": ["Scope", {"heading": "Terms", "description": "glossary"}]}
                ],
                "assignments": [{"label": "one", "sections": ["Intro"], "target_length": "12,000"}]
            }"#,
        )
        .unwrap();
        assert_eq!(reply.sections[0].heading, "Intro");
        assert_eq!(reply.sections[0].subsections.len(), 2);
        assert_eq!(reply.assignments[0].target_length, 12_000);
    }

    #[test]
    fn test_float_length() {
        let reply: AssignmentReply =
            serde_json::from_str(r#"{"sections": ["A"], "target_length": 24000.0}"#).unwrap();
        assert_eq!(reply.target_length, 24_000);
    }

    #[test]
    fn test_build_skeleton_caps_and_dedupes() {
        let reply: PlanReply = serde_json::from_str(
            r#"{"sections": [
                {"heading": "Costs", "subsections": ["A", "B", "C", "D", "E", "F"]},
                {"heading": "1. Costs"},
                {"heading": "  "},
                {"heading": "Savings"},
                {"heading": "Outlook"}
            ]}"#,
        )
        .unwrap();
        let skeleton = build_skeleton(&reply.sections, 2, 4);
        let headings: Vec<&str> = skeleton.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, vec!["Costs", "A", "B", "C", "D", "Savings"]);
        assert_eq!(skeleton[1].level, 3);
    }
}
