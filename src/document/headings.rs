//! Heading extraction and fuzzy reconciliation against a planned skeleton.
//!
//! Planned and written headings are compared after normalisation using the
//! Dice coefficient over character bigrams. A false "missing" only costs one
//! continuation call, so the threshold errs on the strict side.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::strip_tags;
use crate::constants::generation::HEADING_SIMILARITY;
use crate::types::Section;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<h([2-4])\b[^>]*>(.*?)</h[2-4]\s*>").expect("valid heading regex")
});

/// Arabic numbering, or an uppercase roman numeral up to 89 with punctuation
static NUMBERING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+(?:\.\d+)*[.):]?|(?:XL|L?X{0,3})(?:IX|IV|V?I{0,3})[.):])\s+").expect("valid numbering regex")
});

/// A heading found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub text: String,
    /// Byte offset of the opening tag
    pub start: usize,
    /// Byte offset just past the closing tag
    pub end: usize,
}

/// All `<h2>`..`<h4>` headings in document order
pub fn extract_headings(doc: &str) -> Vec<Heading> {
    HEADING_RE
        .captures_iter(doc)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let level = cap[1].parse().ok()?;
            Some(Heading {
                level,
                text: strip_tags(&cap[2]),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// Lowercased alphanumeric form with entities decoded and numbering removed
pub fn normalise_heading(text: &str) -> String {
    let decoded = strip_tags(text)
        .replace("&amp;", "&")
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let unnumbered = NUMBERING_RE.replace(decoded.trim(), "").to_lowercase();
    unnumbered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn bigrams(s: &str) -> HashMap<(char, char), usize> {
    let chars: Vec<char> = s.chars().collect();
    let mut counts = HashMap::new();
    for pair in chars.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

/// Dice coefficient over character bigrams of the normalised headings
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalise_heading(a);
    let b = normalise_heading(b);
    if a == b {
        return 1.0;
    }
    if a.chars().count() < 2 || b.chars().count() < 2 {
        return 0.0;
    }

    let ga = bigrams(&a);
    let gb = bigrams(&b);
    let total: usize = ga.values().sum::<usize>() + gb.values().sum::<usize>();
    let shared: usize = ga
        .iter()
        .map(|(k, n)| (*n).min(gb.get(k).copied().unwrap_or(0)))
        .sum();
    2.0 * shared as f64 / total as f64
}

/// Matches written headings against planned ones
#[derive(Debug, Clone, Copy)]
pub struct HeadingMatcher {
    threshold: f64,
}

impl Default for HeadingMatcher {
    fn default() -> Self {
        Self::new(HEADING_SIMILARITY)
    }
}

impl HeadingMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn matches(&self, a: &str, b: &str) -> bool {
        similarity(a, b) >= self.threshold
    }

    /// True if any written heading matches `planned`
    pub fn is_present(&self, written: &[Heading], planned: &str) -> bool {
        written.iter().any(|h| self.matches(&h.text, planned))
    }

    /// Planned sections with no matching heading in `doc`, in plan order
    pub fn missing<'a>(&self, planned: &'a [Section], doc: &str) -> Vec<&'a Section> {
        let written = extract_headings(doc);
        planned
            .iter()
            .filter(|s| !self.is_present(&written, &s.heading))
            .collect()
    }
}
