//! Search query formulation.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::ai::{ModelClient, PromptBuilder};
use crate::types::{Job, PromptKind};

const QUERY_MAX_TOKENS: u32 = 64;

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*\d.)\s]*)(?:search\s+)?(?:query|keywords?)\s*[:=-]\s*")
        .expect("valid label regex")
});

pub fn query_prompt(job: &Job, max_words: usize) -> String {
    let mut context = format!("Topic: {}\nDocument type: {}", job.topic.trim(), job.kind.label());
    if !job.guidelines.trim().is_empty() {
        context.push_str(&format!("\nAuthor guidelines: {}", job.guidelines.trim()));
    }

    PromptBuilder::new()
        .role("You write web search queries that find authoritative reference material.")
        .block("request", context)
        .rules([
            format!("Write the query in {}", job.language.name()),
            format!("Use at most {} words", max_words),
            "No quotation marks, operators, hashtags or explanations".to_string(),
        ])
        .output("Reply with the query on a single line and nothing else.")
        .build()
}

/// Strip labels, quoting and markup from a model reply and cap its word count
pub fn clean_query(raw: &str, max_words: usize) -> Option<String> {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))?;
    let unlabelled = LABEL_RE.replace(line, "");

    let words: Vec<&str> = unlabelled
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '“' | '”' | '«' | '»' | '#')))
        .filter(|w| !w.is_empty())
        .take(max_words)
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Fallback query built from the topic itself
pub fn topic_query(job: &Job, max_words: usize) -> String {
    clean_query(&job.topic, max_words).unwrap_or_else(|| job.topic.trim().to_string())
}

/// Ask the model for a language-matched query; any failure falls back to the topic.
pub async fn formulate_query(client: &ModelClient, job: &Job, max_words: usize) -> String {
    let prompt = query_prompt(job, max_words);
    match client.ask(PromptKind::Query, prompt, QUERY_MAX_TOKENS).await {
        Ok(reply) => match clean_query(&reply.text, max_words) {
            Some(query) => {
                debug!(job_id = %job.id, query = %query, "Search query formulated");
                query
            }
            None => {
                warn!(job_id = %job.id, "Empty query reply, using topic");
                topic_query(job, max_words)
            }
        },
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Query formulation failed, using topic");
            topic_query(job, max_words)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;

    #[test]
    fn test_clean_query_strips_artifacts() {
        assert_eq!(
            clean_query("Search query: \"solar roof installation cost\"", 8).as_deref(),
            Some("solar roof installation cost")
        );
        assert_eq!(
            clean_query("```\n**heat pump efficiency winter**\n```", 8).as_deref(),
            Some("heat pump efficiency winter")
        );
        assert_eq!(clean_query("   \n  ", 8), None);
    }

    #[test]
    fn test_clean_query_caps_words() {
        let q = clean_query("one two three four five six seven eight nine ten", 8).unwrap();
        assert_eq!(q.split_whitespace().count(), 8);
    }

    #[test]
    fn test_prompt_mentions_language() {
        let job = Job::new("Wärmepumpen im Altbau", 4000, Language::De);
        let prompt = query_prompt(&job, 8);
        assert!(prompt.contains("German"));
        assert!(prompt.contains("at most 8 words"));
    }
}
