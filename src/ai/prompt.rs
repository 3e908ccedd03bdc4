//! Prompt Builder
//!
//! Every model prompt is assembled from tagged sections so the model can tell
//! instructions, reference material and output requirements apart.

/// Prompt section types
#[derive(Debug, Clone)]
enum PromptSection {
    Role(String),
    Objectives(Vec<String>),
    /// Tagged block of reference material
    Block { tag: String, content: String },
    Rules(Vec<String>),
    Output(String),
}

/// Builder for tagged prompts
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.sections.push(PromptSection::Role(role.into()));
        self
    }

    /// Numbered objectives
    pub fn objectives<I, S>(mut self, objectives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections.push(PromptSection::Objectives(
            objectives.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Tagged block; skipped when the content is blank
    pub fn block(mut self, tag: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() {
            self.sections.push(PromptSection::Block {
                tag: tag.to_uppercase(),
                content,
            });
        }
        self
    }

    /// Bulleted hard rules
    pub fn rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rules: Vec<String> = rules.into_iter().map(Into::into).collect();
        if !rules.is_empty() {
            self.sections.push(PromptSection::Rules(rules));
        }
        self
    }

    pub fn output(mut self, format: impl Into<String>) -> Self {
        self.sections.push(PromptSection::Output(format.into()));
        self
    }

    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Role(role) => {
                    prompt.push_str("<ROLE>\n");
                    prompt.push_str(&role);
                    prompt.push_str("\n</ROLE>\n\n");
                }
                PromptSection::Objectives(objectives) => {
                    prompt.push_str("<OBJECTIVES>\n");
                    for (i, obj) in objectives.iter().enumerate() {
                        prompt.push_str(&format!("{}. {}\n", i + 1, obj));
                    }
                    prompt.push_str("</OBJECTIVES>\n\n");
                }
                PromptSection::Block { tag, content } => {
                    prompt.push_str(&format!("<{}>\n{}\n</{}>\n\n", tag, content.trim_end(), tag));
                }
                PromptSection::Rules(rules) => {
                    prompt.push_str("<RULES>\n");
                    for rule in rules {
                        prompt.push_str(&format!("- {}\n", rule));
                    }
                    prompt.push_str("</RULES>\n\n");
                }
                PromptSection::Output(format) => {
                    prompt.push_str("<OUTPUT>\n");
                    prompt.push_str(&format);
                    prompt.push_str("\n</OUTPUT>\n\n");
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_render_in_order() {
        let prompt = PromptBuilder::new()
            .role("You are an editor.")
            .objectives(["Read", "Decide"])
            .block("source_1", "Some text")
            .rules(["No headings"])
            .output("JSON only")
            .build();

        let role = prompt.find("<ROLE>").unwrap();
        let block = prompt.find("<SOURCE_1>").unwrap();
        let output = prompt.find("<OUTPUT>").unwrap();
        assert!(role < block && block < output);
        assert!(prompt.contains("2. Decide"));
        assert!(prompt.contains("- No headings"));
    }

    #[test]
    fn test_blank_block_skipped() {
        let prompt = PromptBuilder::new().block("context", "   ").build();
        assert!(prompt.is_empty());
    }
}
