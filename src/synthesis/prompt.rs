//! Writer prompt assembly.

use crate::ai::PromptBuilder;
use crate::constants::generation::{CHARS_PER_LIST, CHARS_PER_TABLE};
use crate::constants::planning::{CHARS_PER_SECTION, MIN_SECTIONS};
use crate::document::head_chars;
use crate::types::{Job, SourceCandidate, WriterAssignment};

/// Minimum embedded lists and tables for a length
pub fn structure_quotas(target_chars: u32) -> (u32, u32) {
    (target_chars / CHARS_PER_LIST, target_chars / CHARS_PER_TABLE)
}

/// Everything one writer call is told
pub struct WritePrompt<'a> {
    pub job: &'a Job,
    pub assignment: &'a WriterAssignment,
    pub total_assignments: usize,
    /// Trailing window of the document so far; empty for the first writer
    pub previous_tail: &'a str,
    /// Labels of assignments already written
    pub completed: &'a [String],
    pub sources: &'a [SourceCandidate],
    /// Characters of each source included in the prompt
    pub source_chars: usize,
}

impl WritePrompt<'_> {
    fn is_first(&self) -> bool {
        self.assignment.index == 0
    }

    fn task(&self) -> String {
        let job = self.job;
        let mut task = format!(
            "Topic: {}\nDocument type: {}\nLanguage: {}\nTarget length: {} characters",
            job.topic.trim(),
            job.kind.label(),
            job.language.name(),
            self.assignment.target_chars
        );
        if self.total_assignments > 1 {
            task.push_str(&format!(
                "\nThis is part {} of {}: {}",
                self.assignment.index + 1,
                self.total_assignments,
                self.assignment.label
            ));
        }
        task
    }

    fn seo(&self) -> String {
        if !self.is_first() {
            return String::new();
        }
        let job = self.job;
        let mut lines = Vec::new();
        if !job.seo_keywords.is_empty() {
            lines.push(format!(
                "Keywords: {}. Use each keyword naturally at least once, including once in the first paragraph.",
                job.seo_keywords.join(", ")
            ));
        }
        if !job.seo_links.is_empty() {
            lines.push(
                "Links: insert each link below exactly once, inside a paragraph, as <a href=\"URL\">anchor</a>. \
                 Never in a heading, never next to another link, anchor text exactly as given."
                    .to_string(),
            );
            for link in &job.seo_links {
                lines.push(format!("{} | {}", link.url, link.anchor));
            }
        }
        lines.join("\n")
    }

    pub fn build(&self) -> String {
        let target = self.assignment.target_chars;
        let (lists, tables) = structure_quotas(target);

        let mut objectives = Vec::new();
        match self.assignment.skeleton_text() {
            Some(_) if !self.assignment.sections.is_empty() => objectives.push(
                "Follow SKELETON exactly: write every heading in order, verbatim, at the level shown".to_string(),
            ),
            Some(_) => objectives.push("Use SKELETON as guidance for the structure".to_string()),
            None => objectives.push(format!(
                "Choose your own structure of about {} <h2> sections",
                target.div_ceil(CHARS_PER_SECTION).max(MIN_SECTIONS)
            )),
        }
        if !self.previous_tail.is_empty() {
            objectives.push(
                "Continue the document from PREVIOUS_TEXT; do not repeat its introduction or any completed section"
                    .to_string(),
            );
        }
        objectives.push(format!("Write about {} characters in total", target));

        let mut rules = vec![
            "HTML fragment only: h2, h3, p, ul, ol, table, blockquote; no h1, no title, no markdown".to_string(),
            "End on a complete sentence inside a closed block".to_string(),
        ];
        if lists > 0 {
            rules.push(format!("Include at least {} bulleted or numbered lists", lists));
        }
        if tables > 0 {
            rules.push(format!("Include at least {} tables", tables));
        }
        if self.sources.is_empty() {
            rules.push(
                "No external sources are available: rely on well-established knowledge and avoid figures you cannot attribute"
                    .to_string(),
            );
        } else {
            rules.push("Ground facts in SOURCE blocks; never mention the sources themselves".to_string());
        }
        if !self.job.guidelines.trim().is_empty() {
            rules.push("Respect the author guidelines".to_string());
        }

        let mut builder = PromptBuilder::new()
            .role(format!(
                "You are an experienced {} writer producing a {}.",
                self.job.language.name(),
                self.job.kind.label()
            ))
            .block("task", self.task())
            .block("guidelines", self.job.guidelines.trim())
            .block("skeleton", self.assignment.skeleton_text().unwrap_or_default())
            .block("previous_text", self.previous_tail)
            .block("completed_sections", self.completed.join("\n"))
            .block("seo", self.seo());

        for (i, source) in self.sources.iter().enumerate() {
            builder = builder.block(
                &format!("source_{}", i + 1),
                format!("URL: {}\n{}", source.url, head_chars(&source.text, self.source_chars)),
            );
        }

        builder
            .objectives(objectives)
            .rules(rules)
            .output("The HTML fragment only, without commentary or code fences.")
            .build()
    }
}
