//! HTML fragment utilities for generated documents.
//!
//! Documents are fragments of `<h2>`/`<h3>` headings and block elements
//! (`<p>`, `<ul>`, `<ol>`, `<table>`, `<blockquote>`). The helpers here keep a
//! document closeable: sentence-boundary trimming, tag balancing and overlap
//! removal between consecutive generations.

pub mod headings;

pub use headings::{Heading, HeadingMatcher, extract_headings, normalise_heading, similarity};

use regex::Regex;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*?(/?)>").expect("valid tag regex")
});

/// Elements that count as a closed structural block at the end of a document
const BLOCK_TAGS: &[&str] = &["p", "ul", "ol", "table", "blockquote", "h2", "h3", "h4"];

const VOID_TAGS: &[&str] = &["br", "hr", "img", "wbr"];

const SENTENCE_END: &[char] = &['.', '!', '?', '…'];

const CLOSING_QUOTES: &[char] = &['"', '\'', '”', '’', '»', ')'];

/// Character count (not bytes)
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`
pub fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if len <= n {
        return s;
    }
    match s.char_indices().nth(len - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// First `n` characters of `s`
pub fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Visible text with tags removed and whitespace collapsed
pub fn strip_tags(s: &str) -> String {
    let without = TAG_RE.replace_all(s, " ");
    without.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Open element names left unclosed at the end of `doc`, outermost first
fn open_elements(doc: &str) -> Vec<String> {
    let mut stack: Vec<String> = Vec::new();
    for cap in TAG_RE.captures_iter(doc) {
        let name = cap[2].to_lowercase();
        let closing = &cap[1] == "/";
        let self_closing = &cap[3] == "/";
        if VOID_TAGS.contains(&name.as_str()) || self_closing {
            continue;
        }
        if closing {
            if let Some(pos) = stack.iter().rposition(|t| *t == name) {
                stack.truncate(pos);
            }
        } else {
            stack.push(name);
        }
    }
    stack
}

/// Drop an incomplete trailing tag such as `<p cla` or `</stro`
fn drop_dangling_tag(doc: &str) -> &str {
    match (doc.rfind('<'), doc.rfind('>')) {
        (Some(open), Some(close)) if open > close => &doc[..open],
        (Some(open), None) => &doc[..open],
        _ => doc,
    }
}

/// Byte offset just past the last closing block tag
fn last_block_close(doc: &str) -> Option<usize> {
    TAG_RE
        .captures_iter(doc)
        .filter(|cap| &cap[1] == "/" && BLOCK_TAGS.contains(&cap[2].to_lowercase().as_str()))
        .filter_map(|cap| cap.get(0).map(|m| m.end()))
        .last()
}

/// Close every open element and make sure the document ends on a closed block.
///
/// Returns the closed document and whether anything had to be appended or wrapped.
pub fn ensure_closed(doc: &str) -> (String, bool) {
    let trimmed = doc.trim_end();
    if trimmed.is_empty() {
        return (String::new(), false);
    }

    let base = drop_dangling_tag(trimmed).trim_end();
    let mut changed = base.len() != trimmed.len();
    let mut out = base.to_string();

    let open = open_elements(&out);
    if !open.is_empty() {
        changed = true;
        for name in open.iter().rev() {
            out.push_str(&format!("</{}>", name));
        }
    }

    let tail_start = last_block_close(&out).unwrap_or(0);
    let trailing = &out[tail_start..];
    if !strip_tags(trailing).is_empty() {
        changed = true;
        let wrapped = format!("<p>{}</p>", trailing.trim());
        out.truncate(tail_start);
        if tail_start > 0 {
            out.push('\n');
        }
        out.push_str(&wrapped);
    }

    (out, changed)
}

/// Cut the document after its last complete sentence or closed block, then close it.
pub fn trim_to_last_sentence(doc: &str) -> String {
    let mut in_tag = false;
    let mut boundary: Option<usize> = None;
    let chars: Vec<(usize, char)> = doc.char_indices().collect();

    for (i, &(_, ch)) in chars.iter().enumerate() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag && SENTENCE_END.contains(&c) => {
                let mut j = i + 1;
                while j < chars.len() && CLOSING_QUOTES.contains(&chars[j].1) {
                    j += 1;
                }
                let next = chars.get(j).map(|&(_, c)| c);
                if matches!(next, None | Some('<')) || next.is_some_and(char::is_whitespace) {
                    boundary = Some(chars.get(j).map(|&(b, _)| b).unwrap_or(doc.len()));
                }
            }
            _ => {}
        }
    }

    let block_end = last_block_close(doc);
    let cut = match (boundary, block_end) {
        (Some(a), Some(b)) => a.max(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return ensure_closed(doc).0,
    };

    ensure_closed(&doc[..cut]).0
}

/// True when the document ends on a complete sentence inside balanced markup,
/// or on a closed list/table.
pub fn ends_cleanly(doc: &str) -> bool {
    let trimmed = doc.trim_end();
    if trimmed.is_empty() || !open_elements(trimmed).is_empty() {
        return false;
    }
    if drop_dangling_tag(trimmed).len() != trimmed.len() {
        return false;
    }

    let lower = trimmed.to_lowercase();
    if lower.ends_with("</table>") || lower.ends_with("</ul>") || lower.ends_with("</ol>") {
        return true;
    }

    let mut rest = trimmed;
    while rest.ends_with('>') {
        match rest.rfind('<') {
            Some(pos) if rest[pos..].starts_with("</") => rest = rest[..pos].trim_end(),
            _ => break,
        }
    }

    let visible = rest.trim_end_matches(CLOSING_QUOTES);
    visible.ends_with(SENTENCE_END)
}

static WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)</?(?:html|body|article|main)\b[^>]*>|<!doctype[^>]*>|<head\b.*?</head>")
        .expect("valid wrapper regex")
});

/// Remove code fences and page wrappers a model sometimes puts around a fragment
pub fn clean_fragment(raw: &str) -> String {
    let mut body = raw.trim();
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(i) => &body[i + 1..],
            None => "",
        };
    }
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    WRAPPER_RE.replace_all(body, "").trim().to_string()
}

/// Strip the longest prefix of `continuation` that repeats the end of `existing`
pub fn strip_overlap<'a>(existing: &str, continuation: &'a str, max_chars: usize) -> &'a str {
    const MIN_OVERLAP: usize = 20;

    let cont = continuation.trim_start();
    let existing = existing.trim_end();
    let window = tail_chars(existing, max_chars);

    let limit = char_len(cont).min(char_len(window));
    for k in (MIN_OVERLAP..=limit).rev() {
        let prefix = head_chars(cont, k);
        if window.ends_with(prefix) {
            return &cont[prefix.len()..];
        }
    }
    cont
}
