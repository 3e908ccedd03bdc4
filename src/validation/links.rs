//! SEO link validation and one-shot repair.
//!
//! A required link counts as present when an `<a>` element outside any
//! heading points at the exact URL and carries the exact anchor text.

use regex::Regex;
use tracing::{info, warn};

use crate::ai::{ModelClient, PromptBuilder, TokenCeiling};
use crate::constants::validation::MIN_REPAIR_RATIO;
use crate::document::{char_len, clean_fragment, extract_headings, strip_tags};
use crate::types::{FinishSignal, Job, LinkReport, PromptKind, Result, SeoLink};

/// Matches anchors pointing at one exact URL; group 1 is the inner HTML
fn link_regex(url: &str) -> Regex {
    let pattern = format!(
        r#"(?is)<a\s[^>]*?href\s*=\s*["']{}["'][^>]*>(.*?)</a\s*>"#,
        regex::escape(url.trim())
    );
    Regex::new(&pattern).unwrap_or_else(|_| Regex::new("$^").expect("empty regex compiles"))
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn same_anchor(found: &str, wanted: &str) -> bool {
    let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    squash(&decode_entities(&strip_tags(found))) == squash(&decode_entities(wanted))
}

/// Byte ranges of matching anchors outside headings, in document order
fn link_spans(doc: &str, link: &SeoLink) -> Vec<(usize, usize, String)> {
    let headings = extract_headings(doc);
    let in_heading = |pos: usize| headings.iter().any(|h| h.start <= pos && pos < h.end);

    link_regex(&link.url)
        .captures_iter(doc)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let inner = cap.get(1)?.as_str();
            (same_anchor(inner, &link.anchor) && !in_heading(whole.start()))
                .then(|| (whole.start(), whole.end(), inner.to_string()))
        })
        .collect()
}

pub fn count_link(doc: &str, link: &SeoLink) -> usize {
    link_spans(doc, link).len()
}

/// Required links with no valid occurrence
pub fn missing_links<'a>(doc: &str, links: &'a [SeoLink]) -> Vec<&'a SeoLink> {
    links.iter().filter(|l| count_link(doc, l) == 0).collect()
}

/// Unwrap every occurrence of a required link after its first to plain text
pub fn dedupe_links(doc: &str, links: &[SeoLink]) -> (String, usize) {
    let mut out = doc.to_string();
    let mut removed = 0;
    for link in links {
        let spans = link_spans(&out, link);
        if spans.len() < 2 {
            continue;
        }
        for (start, end, inner) in spans.into_iter().skip(1).rev() {
            out.replace_range(start..end, &inner);
            removed += 1;
        }
    }
    (out, removed)
}

/// Split off a head of at most `max_chars` at a heading boundary so long
/// documents can be repaired in one call; the tail is kept verbatim
fn split_for_repair(doc: &str, max_chars: usize) -> (&str, &str) {
    if char_len(doc) <= max_chars {
        return (doc, "");
    }
    let limit = doc
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(doc.len());
    let cut = extract_headings(doc)
        .iter()
        .map(|h| h.start)
        .filter(|&start| start > 0 && start <= limit)
        .last()
        .or_else(|| doc[..limit].rfind("</p>").map(|i| i + "</p>".len()));
    match cut {
        Some(cut) => doc.split_at(cut),
        None => (doc, ""),
    }
}

pub fn repair_prompt(job: &Job, document: &str, missing: &[&SeoLink]) -> String {
    let links = missing
        .iter()
        .map(|l| format!("{} | {}", l.url, l.anchor))
        .collect::<Vec<_>>()
        .join("\n");

    PromptBuilder::new()
        .role(format!(
            "You are an editor inserting links into a {} written in {}.",
            job.kind.label(),
            job.language.name()
        ))
        .block("document", document)
        .block("missing_links", links)
        .objectives([
            "Insert every link from MISSING_LINKS exactly once as <a href=\"URL\">anchor</a>",
            "Return DOCUMENT otherwise verbatim",
        ])
        .rules([
            "Place links in the middle of existing paragraphs, never inside headings",
            "Never put two links next to each other",
            "Use the anchor text exactly as given; you may adjust the surrounding words so it reads naturally",
            "Do not shorten, summarise or reorder the document",
        ])
        .output("The complete HTML document only, without commentary or code fences.")
        .build()
}

pub struct LinkValidator {
    ceiling: TokenCeiling,
}

impl LinkValidator {
    pub fn new(ceiling: TokenCeiling) -> Self {
        Self { ceiling }
    }

    /// Check required links, repair once if needed, re-validate and de-duplicate.
    /// Missing links after repair are reported, never fatal, and a failed
    /// repair call counts as a rejected repair.
    pub async fn validate(&self, client: &ModelClient, job: &Job, doc: &str) -> Result<(String, LinkReport)> {
        let links = &job.seo_links;
        let mut report = LinkReport {
            required: links.len(),
            ..Default::default()
        };
        if links.is_empty() {
            return Ok((doc.to_string(), report));
        }

        let missing = missing_links(doc, links);
        report.missing_before = missing.iter().map(|l| l.url.clone()).collect();
        let mut text = doc.to_string();

        if !missing.is_empty() {
            report.repair_attempted = true;
            match self.repair(client, job, doc, &missing).await {
                Ok(Some(repaired)) => text = repaired,
                Ok(None) => report.repair_rejected = true,
                Err(e) => {
                    warn!(error = %e, "Link repair call failed, keeping the original");
                    report.repair_rejected = true;
                }
            }
        }

        let (deduped, removed) = dedupe_links(&text, links);
        report.duplicates_removed = removed;
        report.missing_after = missing_links(&deduped, links)
            .iter()
            .map(|l| l.url.clone())
            .collect();

        if report.missing_after.is_empty() {
            info!(required = report.required, duplicates = removed, "All required links present");
        } else {
            warn!(
                missing = report.missing_after.len(),
                required = report.required,
                "Required links still missing after repair"
            );
        }
        Ok((deduped, report))
    }

    /// One repair call. Returns None when the reply is rejected.
    async fn repair(
        &self,
        client: &ModelClient,
        job: &Job,
        doc: &str,
        missing: &[&SeoLink],
    ) -> Result<Option<String>> {
        let (head, tail) = split_for_repair(doc, self.ceiling.max_chars_per_call());
        let prompt = repair_prompt(job, head, missing);
        let reply = client
            .write(None, PromptKind::LinkRepair, prompt, self.ceiling.for_chars(char_len(head)))
            .await?;

        if reply.finish == FinishSignal::LengthLimited {
            warn!("Link repair was cut off, keeping the original");
            return Ok(None);
        }

        let repaired_head = clean_fragment(&reply.text);
        if (char_len(&repaired_head) as f64) < char_len(head) as f64 * MIN_REPAIR_RATIO {
            warn!(
                before = char_len(head),
                after = char_len(&repaired_head),
                "Link repair shortened the document, keeping the original"
            );
            return Ok(None);
        }

        let repaired = if tail.is_empty() {
            repaired_head
        } else {
            format!("{}\n{}", repaired_head.trim_end(), tail.trim_start())
        };
        let still_missing = missing_links(&repaired, &job.seo_links).len();
        if still_missing > missing.len() {
            warn!(
                before = missing.len(),
                after = still_missing,
                "Link repair lost existing links, keeping the original"
            );
            return Ok(None);
        }

        info!(inserted = missing.len() - still_missing, "Link repair applied");
        Ok(Some(repaired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, test_client};
    use crate::types::Language;
    use std::sync::Arc;

    fn link(url: &str, anchor: &str) -> SeoLink {
        SeoLink {
            url: url.into(),
            anchor: anchor.into(),
        }
    }

    fn job_with(links: Vec<SeoLink>) -> Job {
        let mut job = Job::new("Garden tools", 2_000, Language::En);
        job.seo_links = links;
        job
    }

    fn body() -> String {
        (0..6)
            .map(|i| format!("<p>Paragraph {} talks about spades, rakes and the care they need over a season.</p>", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_exact_url_and_anchor() {
        let l = link("https://shop.example/spades?id=1", "steel spades");
        let doc = r#"<p>Buy <a href="https://shop.example/spades?id=1">steel spades</a> here.</p>"#;
        assert_eq!(count_link(doc, &l), 1);

        let other_url = r#"<p><a href="https://shop.example/spades?id=10">steel spades</a></p>"#;
        assert_eq!(count_link(other_url, &l), 0);

        let other_anchor = r#"<p><a href="https://shop.example/spades?id=1">spades</a></p>"#;
        assert_eq!(count_link(other_anchor, &l), 0);
    }

    #[test]
    fn test_link_in_heading_does_not_count() {
        let l = link("https://a.example/", "rakes");
        let doc = r#"<h2>Best <a href="https://a.example/">rakes</a></h2><p>Text.</p>"#;
        assert_eq!(count_link(doc, &l), 0);
    }

    #[test]
    fn test_dedupe_unwraps_extras() {
        let l = link("https://a.example/", "rakes");
        let doc = r#"<p>Good <a href="https://a.example/">rakes</a>.</p><p>More <a href="https://a.example/">rakes</a>.</p>"#;
        let (out, removed) = dedupe_links(doc, &[l.clone()]);
        assert_eq!(removed, 1);
        assert_eq!(count_link(&out, &l), 1);
        assert!(out.ends_with("<p>More rakes.</p>"));
    }

    #[test]
    fn test_split_for_repair_cuts_at_heading() {
        let doc = "<h2>A</h2><p>aaaa.</p><h2>B</h2><p>bbbb.</p>";
        let (head, tail) = split_for_repair(doc, 30);
        assert_eq!(head, "<h2>A</h2><p>aaaa.</p>");
        assert_eq!(tail, "<h2>B</h2><p>bbbb.</p>");
        assert_eq!(split_for_repair(doc, 1_000), (doc, ""));
    }

    #[tokio::test]
    async fn test_no_links_required() {
        let provider = Arc::new(ScriptedProvider::new());
        let client = test_client(provider.clone());
        let (out, report) = LinkValidator::new(TokenCeiling::default())
            .validate(&client, &job_with(vec![]), "<p>x.</p>")
            .await
            .unwrap();
        assert_eq!(out, "<p>x.</p>");
        assert!(report.is_complete());
        assert_eq!(provider.calls(PromptKind::LinkRepair), 0);
    }

    #[tokio::test]
    async fn test_repair_inserts_missing_links() {
        let provider = Arc::new(ScriptedProvider::new());
        let client = test_client(provider.clone());
        let links = vec![link("https://a.example/rakes", "garden rakes"), link("https://b.example/spades", "spades")];
        let job = job_with(links.clone());

        let (out, report) = LinkValidator::new(TokenCeiling::default())
            .validate(&client, &job, &body())
            .await
            .unwrap();
        assert_eq!(provider.calls(PromptKind::LinkRepair), 1);
        assert!(report.repair_attempted);
        assert!(!report.repair_rejected);
        assert_eq!(report.missing_before.len(), 2);
        assert!(report.missing_after.len() < report.missing_before.len());
        for l in &links {
            assert!(count_link(&out, l) <= 1);
        }
    }

    #[tokio::test]
    async fn test_shortened_repair_rejected() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply(
            PromptKind::LinkRepair,
            r#"<p>Short <a href="https://a.example/rakes">garden rakes</a>.</p>"#,
        );
        let client = test_client(provider);
        let job = job_with(vec![link("https://a.example/rakes", "garden rakes")]);
        let doc = body();

        let (out, report) = LinkValidator::new(TokenCeiling::default())
            .validate(&client, &job, &doc)
            .await
            .unwrap();
        assert_eq!(out, doc);
        assert!(report.repair_rejected);
        assert_eq!(report.missing_after, vec!["https://a.example/rakes".to_string()]);
    }

    #[tokio::test]
    async fn test_repair_never_duplicates_present_link() {
        let provider = Arc::new(ScriptedProvider::new());
        let client = test_client(provider);
        let present = link("https://a.example/rakes", "garden rakes");
        let absent = link("https://b.example/spades", "spades");
        let job = job_with(vec![present.clone(), absent.clone()]);
        let doc = format!(
            "<p>See our <a href=\"https://a.example/rakes\">garden rakes</a> first.</p>\n{}",
            body()
        );

        let (out, report) = LinkValidator::new(TokenCeiling::default())
            .validate(&client, &job, &doc)
            .await
            .unwrap();
        assert_eq!(report.missing_before, vec!["https://b.example/spades".to_string()]);
        assert_eq!(count_link(&out, &present), 1);
        assert_eq!(count_link(&out, &absent), 1);
    }

    #[test]
    fn test_anchor_entities_decoded() {
        let l = link("https://shop.example/tools", "Tools & More");
        let doc = r#"<p>Browse <a href="https://shop.example/tools">Tools &amp; More</a> today.</p>"#;
        assert_eq!(count_link(doc, &l), 1);

        let encoded = link("https://shop.example/tools", "Tools &amp; More");
        assert_eq!(count_link(doc, &encoded), 1);
    }

    #[tokio::test]
    async fn test_truncated_repair_rejected() {
        let provider = Arc::new(ScriptedProvider::new());
        let doc = body();
        provider.push_truncated(
            PromptKind::LinkRepair,
            &format!("{} See <a href=\"https://a.example/rakes\">garden rakes</a>", doc),
        );
        let client = test_client(provider);
        let job = job_with(vec![link("https://a.example/rakes", "garden rakes")]);

        let (out, report) = LinkValidator::new(TokenCeiling::default())
            .validate(&client, &job, &doc)
            .await
            .unwrap();
        assert_eq!(out, doc);
        assert!(report.repair_attempted);
        assert!(report.repair_rejected);
        assert_eq!(report.missing_after.len(), 1);
    }

    #[tokio::test]
    async fn test_repair_losing_links_rejected() {
        let provider = Arc::new(ScriptedProvider::new());
        let present = link("https://a.example/rakes", "garden rakes");
        let absent = link("https://b.example/spades", "spades");
        let doc = format!(
            "<p>See our <a href=\"https://a.example/rakes\">garden rakes</a> first.</p>\n{}",
            body()
        );
        // full length, but the present link is dropped and nothing is inserted
        provider.push_reply(
            PromptKind::LinkRepair,
            &format!("<p>See our garden rakes first, they last for years.</p>\n{}", body()),
        );
        let client = test_client(provider);
        let job = job_with(vec![present.clone(), absent]);

        let (out, report) = LinkValidator::new(TokenCeiling::default())
            .validate(&client, &job, &doc)
            .await
            .unwrap();
        assert!(report.repair_rejected);
        assert_eq!(out, doc);
        assert_eq!(count_link(&out, &present), 1);
        assert_eq!(report.missing_after, vec!["https://b.example/spades".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_repair_call_keeps_original() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.fail_next(PromptKind::LinkRepair, "model refused");
        let client = test_client(provider.clone());
        let job = job_with(vec![link("https://a.example/rakes", "garden rakes")]);
        let doc = body();

        let (out, report) = LinkValidator::new(TokenCeiling::default())
            .validate(&client, &job, &doc)
            .await
            .unwrap();
        assert_eq!(provider.calls(PromptKind::LinkRepair), 1);
        assert_eq!(out, doc);
        assert!(report.repair_attempted);
        assert!(report.repair_rejected);
        assert!(!report.is_complete());
    }
}
