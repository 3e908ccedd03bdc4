//! Source Acquisition
//!
//! Turns a Job into the reference material its writers are grounded on.
//!
//! ```text
//! user sources ──▶ budget check ──┬──▶ (over threshold) ───────────────┐
//!                                 └──▶ query ─▶ search ─▶ scrape ─▶ select ─▶ selected set
//! ```
//!
//! Individual search and scrape failures are recorded on the candidate and
//! never abort the Job. No usable source at all degrades to writing without
//! external sources.

pub mod query;
pub mod scrape;
pub mod search;
pub mod selection;

pub use query::{clean_query, formulate_query};
pub use scrape::{HttpScraper, Scraper, SharedScraper, resolve_user_source};
pub use search::{HttpSearchClient, SearchClient, SearchPage, SharedSearch};
pub use selection::{Selection, SelectionLimits, select_sources};

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::ai::{ModelClient, RetryPolicy, TimeoutConfig, with_timeout};
use crate::config::{Config, SearchConfig, SourcesConfig};
use crate::constants::sources::FAILURE_MARKER_SCAN_CHARS;
use crate::document::head_chars;
use crate::pipeline::ProgressSink;
use crate::types::{
    Job, Progress, Provenance, Result, ScribeError, SearchHit, SourceCandidate, SourceTrace,
};

/// Everything source acquisition produced for one Job
#[derive(Debug, Clone, Default)]
pub struct SourceOutcome {
    pub search_query: Option<String>,
    /// Raw search results after URL de-duplication
    pub discovered: Vec<SearchHit>,
    /// Every fetch attempt, user sources first
    pub candidates: Vec<SourceCandidate>,
    /// Sources handed to the writers, user sources first
    pub selected: Vec<SourceCandidate>,
    pub trace: SourceTrace,
}

impl SourceOutcome {
    pub fn no_sources_available(&self) -> bool {
        self.selected.is_empty()
    }
}

/// URL form used for de-duplication: no fragment, no tracking parameters,
/// no trailing slash
pub fn normalise_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw.trim()) else {
        return raw.trim().to_lowercase();
    };
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && k != "fbclid" && k != "gclid")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }

    let host = parsed
        .host_str()
        .map(|h| h.trim_start_matches("www.").to_string())
        .unwrap_or_default();
    let path = parsed.path().trim_end_matches('/').to_string();
    match parsed.query() {
        Some(q) => format!("{}{}?{}", host, path, q),
        None => format!("{}{}", host, path),
    }
}

/// SHA-256 of the whitespace-collapsed, lowercased text
pub fn text_fingerprint(text: &str) -> String {
    let normalised = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalised.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Running character budget shared by the fetches of one batch
#[derive(Debug, Clone, Copy)]
pub struct FetchBudget {
    remaining: usize,
    floor: usize,
}

impl FetchBudget {
    pub fn new(total: usize, floor: usize) -> Self {
        Self {
            remaining: total,
            floor,
        }
    }

    /// Characters the next fetch may keep when `pending` fetches are left
    pub fn share(&self, pending: usize) -> usize {
        (self.remaining / pending.max(1)).max(self.floor)
    }

    pub fn consume(&mut self, chars: usize) {
        self.remaining = self.remaining.saturating_sub(chars);
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

pub struct SourceEngine {
    search: SharedSearch,
    scraper: SharedScraper,
    sources: SourcesConfig,
    search_config: SearchConfig,
    retry: RetryPolicy,
    timeouts: TimeoutConfig,
    document_base: Option<url::Url>,
}

impl SourceEngine {
    pub fn new(search: SharedSearch, scraper: SharedScraper, config: &Config) -> Result<Self> {
        let document_base = config
            .scrape
            .document_base_url
            .as_deref()
            .map(|base| {
                url::Url::parse(base).map_err(|e| {
                    ScribeError::Config(format!("Invalid document base URL '{}': {}", base, e))
                })
            })
            .transpose()?;

        Ok(Self {
            search,
            scraper,
            sources: config.sources.clone(),
            search_config: config.search.clone(),
            retry: RetryPolicy::from(&config.retry),
            timeouts: TimeoutConfig::from(config),
            document_base,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn limits(&self) -> SelectionLimits {
        SelectionLimits {
            min: self.sources.min_selected,
            max: self.sources.max_selected,
            preview_chars: self.sources.preview_chars,
        }
    }

    /// Run the whole acquisition stage for one Job
    #[instrument(skip(self, job, client, progress), fields(job_id = %job.id))]
    pub async fn acquire(
        &self,
        job: &Job,
        client: &ModelClient,
        progress: &dyn ProgressSink,
    ) -> Result<SourceOutcome> {
        progress.report(Progress::Query).await?;

        let user_sources = self.fetch_user_sources(job).await;
        let user_chars: usize = user_sources
            .iter()
            .filter(|c| c.is_usable())
            .map(|c| c.length)
            .sum();

        let mut outcome = SourceOutcome {
            candidates: user_sources.clone(),
            selected: user_sources.into_iter().filter(SourceCandidate::is_usable).collect(),
            ..Default::default()
        };

        if user_chars > self.sources.user_budget_threshold {
            info!(
                user_chars,
                threshold = self.sources.user_budget_threshold,
                "User sources exceed budget, skipping discovery"
            );
            outcome.trace.discovery_skipped = true;
            outcome.trace.selection_rationale = "user sources only".to_string();
            outcome.trace.selected_urls = outcome.selected.iter().map(|c| c.url.clone()).collect();
            progress.report(Progress::Selecting).await?;
            return Ok(outcome);
        }

        let query = formulate_query(client, job, self.sources.max_query_words).await;
        outcome.search_query = Some(query.clone());

        progress.report(Progress::Search).await?;
        let known: HashSet<String> = outcome.candidates.iter().map(|c| normalise_url(&c.url)).collect();
        outcome.discovered = self.collect_results(job, &query, &known).await;

        progress.report(Progress::ScrapingAll).await?;
        let urls: Vec<String> = outcome.discovered.iter().map(|h| h.url.clone()).collect();
        let seen_texts: HashSet<String> = outcome
            .selected
            .iter()
            .map(|c| text_fingerprint(&c.text))
            .collect();
        let fetched = self.scrape_discovered(&urls, seen_texts).await;

        progress.report(Progress::Selecting).await?;
        let usable: Vec<SourceCandidate> = fetched.iter().filter(|c| c.is_usable()).cloned().collect();
        let selection = select_sources(client, job, &usable, self.limits()).await;

        outcome.candidates.extend(fetched);
        outcome
            .selected
            .extend(selection.indices.iter().filter_map(|&i| usable.get(i).cloned()));
        outcome.trace.selection_rationale = selection.rationale;
        outcome.trace.selection_fallback = selection.fallback;
        outcome.trace.selected_urls = outcome.selected.iter().map(|c| c.url.clone()).collect();

        if outcome.no_sources_available() {
            warn!("No usable sources, writing without external sources");
        } else {
            info!(
                fetched = outcome.candidates.len(),
                selected = outcome.selected.len(),
                "Sources acquired"
            );
        }
        Ok(outcome)
    }

    /// Fetch every user source with the long timeout; never filtered for quality
    async fn fetch_user_sources(&self, job: &Job) -> Vec<SourceCandidate> {
        let mut fetched = Vec::with_capacity(job.user_sources.len());
        for source in &job.user_sources {
            let origin = source.origin();
            let url = match resolve_user_source(source, self.document_base.as_ref()) {
                Ok(url) => url,
                Err(e) => {
                    warn!(origin = %origin, error = %e, "User source cannot be resolved");
                    fetched.push(SourceCandidate::failed(origin, Provenance::UserSupplied, e.to_string()));
                    continue;
                }
            };

            match self.fetch(&url, true).await {
                Ok(text) => fetched.push(SourceCandidate::fetched(origin, text, Provenance::UserSupplied)),
                Err(e) => {
                    warn!(origin = %origin, error = %e, "User source fetch failed");
                    fetched.push(SourceCandidate::failed(origin, Provenance::UserSupplied, e.to_string()));
                }
            }
        }
        fetched
    }

    async fn fetch(&self, url: &str, user_supplied: bool) -> Result<String> {
        let timeout = self.timeouts.scrape(user_supplied);
        let scraper = self.scraper.clone();
        self.retry
            .run("scrape", || {
                let scraper = scraper.clone();
                async move { with_timeout(timeout, scraper.scrape(url), "scrape").await }
            })
            .await
    }

    /// Page through search results until enough are collected or the service runs out
    async fn collect_results(&self, job: &Job, query: &str, known: &HashSet<String>) -> Vec<SearchHit> {
        let cfg = &self.search_config;
        let mut seen = known.clone();
        let mut hits = Vec::new();
        let mut cursor = 1;

        for page in 0..cfg.max_pages {
            let search = self.search.clone();
            let timeout = self.timeouts.search;
            let language = job.language;
            let result = self
                .retry
                .run("search", || {
                    let search = search.clone();
                    async move {
                        with_timeout(
                            timeout,
                            search.search(query, language, cursor, cfg.page_size),
                            "search",
                        )
                        .await
                    }
                })
                .await;

            let page_result = match result {
                Ok(page_result) => page_result,
                Err(e) => {
                    warn!(page, error = %e, "Search page failed, keeping results so far");
                    break;
                }
            };

            for hit in page_result.hits {
                if seen.insert(normalise_url(&hit.url)) {
                    hits.push(hit);
                }
            }

            debug!(page, collected = hits.len(), "Search page merged");
            if hits.len() >= cfg.min_results {
                break;
            }
            match page_result.next {
                Some(next) if next > cursor => cursor = next,
                _ => break,
            }
        }

        hits.truncate(cfg.max_results);
        hits
    }

    /// Why a discovered text is unusable, if it is
    fn rejection(&self, text: &str) -> Option<String> {
        let length = text.chars().count();
        if text.trim().is_empty() {
            return Some("empty extraction".to_string());
        }
        if length < self.sources.min_text_chars {
            return Some(format!("too short ({} chars)", length));
        }
        let head = head_chars(text, FAILURE_MARKER_SCAN_CHARS).to_lowercase();
        self.sources
            .failure_markers
            .iter()
            .find(|marker| head.contains(&marker.to_lowercase()))
            .map(|marker| format!("failure marker: {}", marker))
    }

    /// Sequential scrape of discovered URLs under a shared character budget
    async fn scrape_discovered(&self, urls: &[String], mut seen_texts: HashSet<String>) -> Vec<SourceCandidate> {
        let mut budget = FetchBudget::new(self.sources.batch_char_budget, self.sources.min_fetch_share);
        let mut fetched = Vec::with_capacity(urls.len());

        for (i, url) in urls.iter().enumerate() {
            let share = budget.share(urls.len() - i);
            let text = match self.fetch(url, false).await {
                Ok(text) => text,
                Err(e) => {
                    debug!(url = %url, error = %e, "Discovered source fetch failed");
                    fetched.push(SourceCandidate::failed(url, Provenance::Discovered, e.to_string()));
                    continue;
                }
            };

            if let Some(reason) = self.rejection(&text) {
                debug!(url = %url, reason = %reason, "Discovered source discarded");
                fetched.push(SourceCandidate::fetched(url, text, Provenance::Discovered).discarded(reason));
                continue;
            }

            if !seen_texts.insert(text_fingerprint(&text)) {
                fetched.push(
                    SourceCandidate::fetched(url, text, Provenance::Discovered)
                        .discarded("duplicate content"),
                );
                continue;
            }

            let kept = head_chars(&text, share).to_string();
            let candidate = SourceCandidate::fetched(url, kept, Provenance::Discovered);
            budget.consume(candidate.length);
            fetched.push(candidate);
        }

        fetched
    }
}
