//! In-process collaborators for unit and end-to-end tests.
//!
//! `ScriptedProvider` answers every prompt kind with a well-formed default
//! derived from the prompt itself, so whole Jobs can run without a model.
//! Tests queue explicit replies or failures to steer individual calls.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use crate::ai::{Completion, CompletionRequest, LlmProvider, ModelClient, RetryPolicy};
use crate::notify::{JobEvent, Notifier};
use crate::pipeline::ProgressSink;
use crate::research::{SearchClient, SearchPage, Scraper};
use crate::storage::{JobRecord, JobStore};
use crate::types::{
    ErrorCategory, FinishSignal, GenerationAttempt, Job, JobContent, JobStatus, Language, Progress,
    PromptKind, Result, ScribeError, SearchHit, SourceCandidate, TokenUsage,
};

// =============================================================================
// Model
// =============================================================================

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<h([23])>(.*?)</h[23]>").expect("valid heading regex"));

/// Distinct headings with low pairwise similarity
const SECTION_WORDS: [&str; 14] = [
    "Foundations",
    "Installation",
    "Maintenance",
    "Efficiency",
    "Regulation",
    "Economics",
    "Outlook",
    "Components",
    "Safety",
    "History",
    "Comparison",
    "Troubleshooting",
    "Sustainability",
    "Glossary",
];

const SENTENCES: [&str; 8] = [
    "Good results start with a clear plan and a realistic budget.",
    "Most owners underestimate how much preparation the first weeks require.",
    "Small adjustments made early save a great deal of effort later on.",
    "Experienced installers recommend checking every connection twice.",
    "Local conditions decide which option pays off over a full decade.",
    "Regular inspections keep running costs low and surprises rare.",
    "Independent advice helps when offers differ widely in price.",
    "Careful records make later repairs faster and cheaper.",
];

enum Scripted {
    Reply(Completion),
    Fail(String),
}

fn number_after(prompt: &str, pattern: &str) -> Option<usize> {
    Regex::new(pattern)
        .ok()?
        .captures(prompt)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Content of a `<TAG>` block as rendered by the prompt builder
fn block<'a>(prompt: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>\n", tag);
    let close = format!("\n</{}>", tag);
    let start = prompt.find(&open)? + open.len();
    let end = prompt[start..].find(&close)? + start;
    Some(&prompt[start..end])
}

fn headings_in(text: &str) -> Vec<(u8, String)> {
    HEADING_RE
        .captures_iter(text)
        .map(|c| (if &c[1] == "3" { 3 } else { 2 }, c[2].trim().to_string()))
        .collect()
}

/// Sentence paragraphs totalling at most `budget` characters
pub fn fill(budget: usize, seed: usize) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut used = 0;
    let mut k = seed;
    loop {
        let sep = usize::from(!paragraphs.is_empty());
        let mut paragraph = String::from("<p>");
        let mut sentences = 0;
        while sentences < 3 {
            let sentence = SENTENCES[k % SENTENCES.len()];
            let glue = usize::from(sentences > 0);
            let grown = paragraph.chars().count() + glue + sentence.len() + "</p>".len();
            if used + sep + grown > budget {
                break;
            }
            if sentences > 0 {
                paragraph.push(' ');
            }
            paragraph.push_str(sentence);
            sentences += 1;
            k += 1;
        }
        if sentences == 0 {
            break;
        }
        paragraph.push_str("</p>");
        used += sep + paragraph.chars().count();
        paragraphs.push(paragraph);
    }
    if paragraphs.is_empty() {
        return format!("<p>{}</p>", SENTENCES[seed % SENTENCES.len()]);
    }
    paragraphs.join("\n")
}

fn sections_text(headings: &[(u8, String)], target: usize) -> String {
    let overhead: usize = headings
        .iter()
        .map(|(lvl, h)| format!("<h{lvl}>{h}</h{lvl}>").chars().count() + 2)
        .sum();
    let per = (target * 95 / 100).saturating_sub(overhead) / headings.len().max(1);
    headings
        .iter()
        .enumerate()
        .map(|(i, (lvl, h))| format!("<h{lvl}>{h}</h{lvl}>\n{}", fill(per, i * 3)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn query_reply(prompt: &str) -> String {
    Regex::new(r"Topic: (.+)")
        .ok()
        .and_then(|re| re.captures(prompt).map(|c| c[1].to_lowercase()))
        .map(|t| t.split_whitespace().take(4).collect::<Vec<_>>().join(" "))
        .unwrap_or_else(|| "practical guide".to_string())
}

fn plan_reply(prompt: &str) -> String {
    let total = number_after(prompt, r"Total length: (\d+) characters").unwrap_or(10_000);
    let max = number_after(prompt, r"Use at most (\d+) top-level sections").unwrap_or(4);
    let writers = number_after(prompt, r"exactly (\d+) assignments").unwrap_or(1).max(1);
    let n = max
        .min((2 * writers).max(4))
        .min(SECTION_WORDS.len())
        .max(writers);
    let words = &SECTION_WORDS[..n];

    let sections: Vec<serde_json::Value> = words
        .iter()
        .map(|w| {
            serde_json::json!({
                "heading": w,
                "description": format!("What matters about {}", w.to_lowercase()),
                "subsections": [],
            })
        })
        .collect();

    if writers == 1 {
        return serde_json::json!({ "sections": sections }).to_string();
    }

    let mut assignments = Vec::new();
    let mut start = 0;
    for i in 0..writers {
        let count = n / writers + usize::from(i < n % writers);
        let slice = &words[start..start + count];
        assignments.push(serde_json::json!({
            "label": format!("{} to {}", slice[0], slice[slice.len() - 1]),
            "sections": slice,
            "target_length": total * count / n,
        }));
        start += count;
    }
    serde_json::json!({ "sections": sections, "assignments": assignments }).to_string()
}

fn write_reply(prompt: &str) -> String {
    let target = number_after(prompt, r"Target length: (\d+) characters").unwrap_or(3_000);
    let mut headings = block(prompt, "SKELETON").map(headings_in).unwrap_or_default();
    if headings.is_empty() {
        let n = (target / 3_000).clamp(2, SECTION_WORDS.len());
        headings = SECTION_WORDS[..n].iter().map(|w| (2, w.to_string())).collect();
    }
    sections_text(&headings, target)
}

fn continue_reply(prompt: &str) -> String {
    let wanted = number_after(prompt, r"Remaining length: about (\d+) characters").unwrap_or(1_000);
    let missing = block(prompt, "MISSING_SECTIONS").map(headings_in).unwrap_or_default();
    if missing.is_empty() {
        fill(wanted * 9 / 10, 5)
    } else {
        sections_text(&missing, wanted)
    }
}

fn link_repair_reply(prompt: &str) -> String {
    let doc = block(prompt, "DOCUMENT").unwrap_or_default();
    let links: Vec<(&str, &str)> = block(prompt, "MISSING_LINKS")
        .unwrap_or_default()
        .lines()
        .filter_map(|l| l.split_once(" | "))
        .map(|(u, a)| (u.trim(), a.trim()))
        .collect();

    let closes: Vec<usize> = doc.match_indices("</p>").map(|(i, _)| i).collect();
    if closes.is_empty() {
        return doc.to_string();
    }
    let mut inserts: Vec<(usize, String)> = links
        .iter()
        .enumerate()
        .map(|(i, (url, anchor))| {
            let at = closes[(2 * i).min(closes.len() - 1)];
            (at, format!(" See <a href=\"{}\">{}</a> for details.", url, anchor))
        })
        .collect();
    inserts.sort_by(|a, b| b.0.cmp(&a.0));

    let mut out = doc.to_string();
    for (at, text) in inserts {
        out.insert_str(at, &text);
    }
    out
}

fn default_reply(kind: PromptKind, prompt: &str) -> String {
    match kind {
        PromptKind::Query => query_reply(prompt),
        PromptKind::Selection => {
            r#"{"selected": [0, 1, 2, 3], "rationale": "Broad and complementary coverage"}"#.to_string()
        }
        PromptKind::Plan => plan_reply(prompt),
        PromptKind::Write => write_reply(prompt),
        PromptKind::Continue => continue_reply(prompt),
        PromptKind::EndingCheck => r#"{"complete": true, "trim_chars": 0}"#.to_string(),
        PromptKind::LinkRepair => link_repair_reply(prompt),
    }
}

/// Model double: queued replies first, prompt-derived defaults otherwise
#[derive(Default)]
pub struct ScriptedProvider {
    queues: Mutex<HashMap<PromptKind, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<PromptKind, usize>>,
    prompts: Mutex<Vec<(PromptKind, String)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, kind: PromptKind, item: Scripted) {
        self.queues
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(item);
    }

    pub fn push_reply(&self, kind: PromptKind, text: &str) {
        self.push(kind, Scripted::Reply(Completion::text_only(text, FinishSignal::Complete)));
    }

    /// Reply that stops on the output limit
    pub fn push_truncated(&self, kind: PromptKind, text: &str) {
        self.push(kind, Scripted::Reply(Completion::text_only(text, FinishSignal::LengthLimited)));
    }

    /// Next call of `kind` fails with a non-retryable error
    pub fn fail_next(&self, kind: PromptKind, message: &str) {
        self.push(kind, Scripted::Fail(message.to_string()));
    }

    pub fn calls(&self, kind: PromptKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }

    pub fn prompts(&self, kind: PromptKind) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        *self.calls.lock().unwrap().entry(request.kind).or_default() += 1;
        self.prompts
            .lock()
            .unwrap()
            .push((request.kind, request.prompt.clone()));

        let queued = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&request.kind)
            .and_then(|q| q.pop_front());

        let mut completion = match queued {
            Some(Scripted::Reply(c)) => c,
            Some(Scripted::Fail(message)) => {
                return Err(ScribeError::external(ErrorCategory::BadRequest, message, "scripted"));
            }
            None => Completion::text_only(default_reply(request.kind, &request.prompt), FinishSignal::Complete),
        };
        completion.usage = TokenUsage::new(
            (request.prompt.chars().count() / 4) as u64,
            (completion.text.chars().count() / 4) as u64,
        );
        Ok(completion)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

pub fn test_client(provider: Arc<ScriptedProvider>) -> ModelClient {
    ModelClient::new(provider, RetryPolicy::none(), Duration::from_secs(5))
}

// =============================================================================
// Search & Scrape
// =============================================================================

/// Search double serving `https://result-{i}.example/page`, i from 1
#[derive(Default)]
pub struct StubSearch {
    total: usize,
    page_size: Option<usize>,
    calls: AtomicUsize,
}

impl StubSearch {
    pub fn with_results(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Serve pages of `size` regardless of the requested size
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchClient for StubSearch {
    async fn search(&self, _query: &str, _language: Language, cursor: usize, page_size: usize) -> Result<SearchPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let size = self.page_size.unwrap_or(page_size).max(1);
        let start = cursor.max(1);
        if start > self.total {
            return Ok(SearchPage::default());
        }
        let end = (start + size - 1).min(self.total);
        let hits = (start..=end)
            .map(|i| SearchHit {
                url: format!("https://result-{}.example/page", i),
                title: format!("Result {}", i),
                snippet: String::new(),
            })
            .collect();
        Ok(SearchPage {
            hits,
            next: (end < self.total).then_some(end + 1),
        })
    }
}

/// Scrape double returning distinct prose of a fixed length per URL
pub struct StubScraper {
    default_len: usize,
    texts: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl StubScraper {
    pub fn new(default_len: usize) -> Self {
        Self {
            default_len,
            texts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_text(&self, url: &str, text: &str) {
        self.texts.lock().unwrap().insert(url.to_string(), text.to_string());
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Answer `url` only after `delay`
    pub fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn generate(&self, url: &str) -> String {
        let sentence = format!("The guide at {} explains sizing, running costs and upkeep in plain words. ", url);
        sentence
            .chars()
            .cycle()
            .take(self.default_len)
            .collect()
    }
}

#[async_trait]
impl Scraper for StubScraper {
    async fn scrape(&self, url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(url) {
            return Err(ScribeError::external(ErrorCategory::BadRequest, "scrape rejected", "stub"));
        }
        if let Some(text) = self.texts.lock().unwrap().get(url) {
            return Ok(text.clone());
        }
        Ok(self.generate(url))
    }
}

// =============================================================================
// Progress, Store & Notifier
// =============================================================================

#[derive(Clone, Default)]
pub struct RecordingProgress {
    seen: Arc<Mutex<Vec<Progress>>>,
}

impl RecordingProgress {
    pub fn seen(&self) -> Vec<Progress> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn report(&self, progress: Progress) -> Result<()> {
        self.seen.lock().unwrap().push(progress);
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    jobs: Vec<(Job, JobRecord)>,
    progress_log: HashMap<String, Vec<Progress>>,
    content: HashMap<String, JobContent>,
    sources: HashMap<String, Vec<(SourceCandidate, bool)>>,
    attempts: HashMap<String, Vec<GenerationAttempt>>,
}

impl MemoryState {
    fn record_mut(&mut self, id: &str) -> Result<&mut JobRecord> {
        self.jobs
            .iter_mut()
            .find(|(job, _)| job.id.as_str() == id)
            .map(|(_, record)| record)
            .ok_or_else(|| ScribeError::JobNotFound(id.to_string()))
    }
}

/// In-memory store with injectable write failures
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
    failing_writes: AtomicUsize,
    /// (first failing write, count), writes numbered from 1
    failing_window: Mutex<Option<(usize, usize)>>,
    writes: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` writes fail with a store error
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Writes `first..first + n` fail with a store error
    pub fn fail_writes_from(&self, first: usize, n: usize) {
        *self.failing_window.lock().unwrap() = Some((first, n));
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn progress_log(&self, id: &str) -> Vec<Progress> {
        self.state
            .lock()
            .unwrap()
            .progress_log
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    fn write_gate(&self) -> Result<()> {
        let number = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        let in_window = self
            .failing_window
            .lock()
            .unwrap()
            .is_some_and(|(first, n)| (first..first + n).contains(&number));
        let injected = in_window
            || self
                .failing_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            return Err(ScribeError::Store("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        job.validate()?;
        self.write_gate()?;
        let now = chrono::Utc::now();
        let record = JobRecord {
            id: job.id.to_string(),
            order_id: job.order_id.clone(),
            topic: job.topic.clone(),
            target_length: job.target_length,
            status: JobStatus::Pending,
            progress: None,
            error: None,
            error_stage: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().unwrap().jobs.push((job.clone(), record));
        Ok(())
    }

    async fn load_job(&self, id: &str) -> Result<Job> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|(job, _)| job.id.as_str() == id)
            .map(|(job, _)| job.clone())
            .ok_or_else(|| ScribeError::JobNotFound(id.to_string()))
    }

    async fn job_record(&self, id: &str) -> Result<JobRecord> {
        self.state.lock().unwrap().record_mut(id).map(|r| r.clone())
    }

    async fn list_jobs(&self, order_id: Option<&str>, status: Option<JobStatus>) -> Result<Vec<JobRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .jobs
            .iter()
            .map(|(_, r)| r)
            .filter(|r| order_id.is_none_or(|o| r.order_id.as_deref() == Some(o)))
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }

    async fn set_progress(&self, id: &str, progress: Progress) -> Result<()> {
        self.write_gate()?;
        let mut state = self.state.lock().unwrap();
        state.record_mut(id)?.progress = Some(progress);
        state.progress_log.entry(id.to_string()).or_default().push(progress);
        Ok(())
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        stage: Option<Progress>,
    ) -> Result<()> {
        self.write_gate()?;
        let mut state = self.state.lock().unwrap();
        let record = state.record_mut(id)?;
        record.status = status;
        record.error = error.map(str::to_string);
        record.error_stage = stage;
        record.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn save_content(&self, id: &str, content: &JobContent) -> Result<()> {
        content.validate()?;
        self.write_gate()?;
        self.state
            .lock()
            .unwrap()
            .content
            .insert(id.to_string(), content.clone());
        Ok(())
    }

    async fn load_content(&self, id: &str) -> Result<Option<JobContent>> {
        Ok(self.state.lock().unwrap().content.get(id).cloned())
    }

    async fn save_sources(&self, id: &str, candidates: &[SourceCandidate], selected: &[String]) -> Result<()> {
        self.write_gate()?;
        let rows = candidates
            .iter()
            .map(|c| (c.clone(), selected.contains(&c.url)))
            .collect();
        self.state.lock().unwrap().sources.insert(id.to_string(), rows);
        Ok(())
    }

    async fn load_sources(&self, id: &str) -> Result<Vec<(SourceCandidate, bool)>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .sources
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_attempts(&self, id: &str, attempts: &[GenerationAttempt]) -> Result<()> {
        self.write_gate()?;
        self.state
            .lock()
            .unwrap()
            .attempts
            .entry(id.to_string())
            .or_default()
            .extend_from_slice(attempts);
        Ok(())
    }

    async fn load_attempts(&self, id: &str) -> Result<Vec<GenerationAttempt>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .attempts
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<JobEvent>>>,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    /// Deliveries take `delay` before they are recorded
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &JobEvent) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::char_len;

    #[test]
    fn test_fill_stays_within_budget() {
        for budget in [150, 900, 5_000, 33_000] {
            let text = fill(budget, 1);
            let len = char_len(&text);
            assert!(len <= budget, "{} > {}", len, budget);
            assert!(len * 10 >= budget * 8, "{} too short for {}", len, budget);
        }
    }

    #[test]
    fn test_plan_reply_partitions_writers() {
        let prompt = "<TASK>\nTotal length: 100000 characters\n</TASK>\n\n<RULES>\n- Use at most 33 top-level sections\n- Split the sections into exactly 3 assignments, in order\n</RULES>";
        let reply: serde_json::Value = serde_json::from_str(&plan_reply(prompt)).unwrap();
        assert_eq!(reply["sections"].as_array().unwrap().len(), 6);
        assert_eq!(reply["assignments"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_link_repair_reply_inserts_before_paragraph_end() {
        let prompt = "<DOCUMENT>\n<p>One.</p><p>Two.</p><p>Three.</p>\n</DOCUMENT>\n\n<MISSING_LINKS>\nhttps://a.example/ | alpha\nhttps://b.example/ | beta\n</MISSING_LINKS>";
        let out = link_repair_reply(prompt);
        assert!(out.starts_with("<p>One. See <a href=\"https://a.example/\">alpha</a> for details.</p>"));
        assert!(out.contains("Three. See <a href=\"https://b.example/\">beta</a> for details.</p>"));
    }
}
