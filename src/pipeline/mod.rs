//! Job Pipeline
//!
//! Drives one Job through every stage and persists each stage's output
//! before the next one starts.
//!
//! ```text
//! acquisition ─▶ planning ─▶ synthesis (+ recovery) ─▶ validation ─▶ completed
//!      │             │               │                      │
//!      └──── content + progress written to the store after each stage
//! ```
//!
//! Store writes are retried one by one; a write that still fails is terminal.
//! A terminal failure freezes progress, records the stage and keeps whatever
//! content was already written. Completed and running Jobs are never started
//! again.
//!
//! Notifications are delivered in the background; callers that are about to
//! exit call [`JobPipeline::drain`] first.

pub mod progress;

pub use progress::{MonotonicProgress, NoProgress, ProgressSink};

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::ai::{ModelClient, RetryPolicy, SharedProvider, with_timeout};
use crate::config::Config;
use crate::notify::{JobEvent, SharedNotifier};
use crate::planning::PlanningEngine;
use crate::research::{SharedScraper, SharedSearch, SourceEngine};
use crate::storage::SharedStore;
use crate::synthesis::SynthesisEngine;
use crate::types::{
    Job, JobContent, JobStatus, Progress, Result, ScrapedSourceRecord, ScribeError, TokenUsage,
};
use crate::validation::PostValidator;

/// Run a store operation with the per-write timeout and bounded retries
async fn persist<T, F, Fut>(retry: &RetryPolicy, timeout: Duration, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry
        .run(operation, || with_timeout(timeout, f(), operation))
        .await
}

/// Writes each progress marker to the Job record
struct StoreProgress {
    store: SharedStore,
    job_id: String,
    retry: RetryPolicy,
    timeout: Duration,
}

#[async_trait]
impl ProgressSink for StoreProgress {
    async fn report(&self, progress: Progress) -> Result<()> {
        persist(&self.retry, self.timeout, "progress write", || {
            self.store.set_progress(&self.job_id, progress)
        })
        .await
    }
}

/// Long-lived collaborator handles shared by every Job
#[derive(Clone)]
pub struct Collaborators {
    pub provider: SharedProvider,
    pub search: SharedSearch,
    pub scraper: SharedScraper,
    pub store: SharedStore,
    pub notifier: SharedNotifier,
}

/// Outcome of one completed Job
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub target_length: u32,
    pub chars: usize,
    pub assignments: usize,
    pub continuations: usize,
    pub sources_selected: usize,
    pub links_complete: bool,
    pub tokens: TokenUsage,
    pub duration_secs: u64,
}

/// Outcome of running every pending Job of an order
#[derive(Debug, Clone, Default)]
pub struct OrderResult {
    pub completed: Vec<JobResult>,
    /// (job id, error message)
    pub failed: Vec<(String, String)>,
}

pub struct JobPipeline {
    config: Config,
    provider: SharedProvider,
    store: SharedStore,
    notifier: SharedNotifier,
    sources: SourceEngine,
    planning: PlanningEngine,
    synthesis: SynthesisEngine,
    validator: PostValidator,
    retry: RetryPolicy,
    store_timeout: Duration,
    notifications: Mutex<JoinSet<()>>,
}

impl JobPipeline {
    pub fn new(config: &Config, deps: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sources: SourceEngine::new(deps.search, deps.scraper, config)?,
            planning: PlanningEngine::new(&config.generation),
            synthesis: SynthesisEngine::new(&config.generation, &config.sources),
            validator: PostValidator::new(&config.generation),
            retry: RetryPolicy::from(&config.retry),
            store_timeout: Duration::from_secs(config.storage.timeout_secs),
            config: config.clone(),
            provider: deps.provider,
            store: deps.store,
            notifier: deps.notifier,
            notifications: Mutex::new(JoinSet::new()),
        })
    }

    /// Override the retry policy of every collaborator call
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.sources = self.sources.with_retry(retry);
        self.retry = retry;
        self
    }

    fn client(&self) -> ModelClient {
        ModelClient::new(self.provider.clone(), self.retry, self.config.llm.timeout()).with_temperatures(
            self.config.llm.temperature,
            self.config.llm.structured_temperature,
        )
    }

    async fn persist<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        persist(&self.retry, self.store_timeout, operation, f).await
    }

    async fn save_content(&self, job_id: &str, content: &JobContent) -> Result<()> {
        self.persist("content write", || self.store.save_content(job_id, content))
            .await
    }

    /// Move the audit buffer into the store; a failed write keeps it buffered
    async fn flush_attempts(&self, job_id: &str, client: &ModelClient) -> Result<()> {
        let attempts = client.drain_attempts();
        if attempts.is_empty() {
            return Ok(());
        }
        let written = self
            .persist("attempt write", || self.store.append_attempts(job_id, &attempts))
            .await;
        if written.is_err() {
            client.restore_attempts(attempts);
        }
        written
    }

    /// Run one Job to a terminal state
    #[instrument(skip(self))]
    pub async fn run(&self, job_id: &str) -> Result<JobResult> {
        let start = Instant::now();
        let record = self.persist("job read", || self.store.job_record(job_id)).await?;
        if !record.status.is_runnable() {
            warn!(job_id, status = record.status.as_str(), "Job not runnable");
            return Err(ScribeError::JobNotRunnable {
                id: job_id.to_string(),
                status: record.status,
            });
        }
        let job = self.persist("job read", || self.store.load_job(job_id)).await?;
        job.validate()?;

        self.persist("status write", || {
            self.store.set_status(job_id, JobStatus::Running, None, None)
        })
        .await?;

        let client = self.client();
        let progress = MonotonicProgress::new(StoreProgress {
            store: self.store.clone(),
            job_id: job_id.to_string(),
            retry: self.retry,
            timeout: self.store_timeout,
        });
        let mut content = JobContent::default();

        let outcome = self.execute(&job, &client, &progress, &mut content).await;

        match outcome {
            Ok(mut result) => {
                result.tokens = client.total_usage();
                result.duration_secs = start.elapsed().as_secs();
                info!(
                    job_id,
                    chars = result.chars,
                    target_length = result.target_length,
                    tokens = result.tokens.total(),
                    "Job completed"
                );
                self.notify(JobEvent {
                    job_id: job_id.to_string(),
                    order_id: job.order_id.clone(),
                    status: JobStatus::Completed,
                    stage: Progress::Completed,
                    message: None,
                    chars: result.chars,
                });
                Ok(result)
            }
            Err(e) => Err(self.fail(&job, &client, &progress, e).await),
        }
    }

    async fn execute(
        &self,
        job: &Job,
        client: &ModelClient,
        progress: &MonotonicProgress<StoreProgress>,
        content: &mut JobContent,
    ) -> Result<JobResult> {
        let job_id = job.id.as_str();

        // ===== STAGE 1: Source acquisition =====
        let sources = self.sources.acquire(job, client, progress).await?;
        content.search_query = sources.search_query.clone();
        content.all_discovered_results = sources.discovered.clone();
        content.scraped_sources = sources.candidates.iter().map(ScrapedSourceRecord::from).collect();
        content.no_sources_available = sources.no_sources_available();
        content.source_trace = Some(sources.trace.clone());

        self.persist("source write", || {
            self.store
                .save_sources(job_id, &sources.candidates, &sources.trace.selected_urls)
        })
        .await?;
        self.save_content(job_id, content).await?;
        self.flush_attempts(job_id, client).await?;

        // ===== STAGE 2: Structure planning =====
        let plan = self
            .planning
            .plan(job, job.target_length, &sources.selected, client)
            .await?;
        content.structure_plan = Some(plan.clone());
        self.save_content(job_id, content).await?;
        self.flush_attempts(job_id, client).await?;

        // ===== STAGE 3: Segmented synthesis =====
        progress.report(Progress::Writing).await?;
        let synthesis = self
            .synthesis
            .synthesize(job, &plan, &sources.selected, client)
            .await?;
        content.draft(&synthesis.document);
        self.save_content(job_id, content).await?;
        self.flush_attempts(job_id, client).await?;

        // ===== STAGE 4: Post-generation validation =====
        let validated = self.validator.validate(client, job, &synthesis.document).await?;
        if validated.text.trim().is_empty() {
            return Err(ScribeError::pipeline(
                Progress::Writing,
                "model produced no content",
            ));
        }

        let chars = validated.text.chars().count();
        let links_complete = validated.links.is_complete();
        content.ending_report = Some(validated.ending);
        content.link_report = Some(validated.links);
        content.finish(validated.text);
        self.save_content(job_id, content).await?;
        self.flush_attempts(job_id, client).await?;
        self.persist("status write", || {
            self.store.set_status(job_id, JobStatus::Completed, None, None)
        })
        .await?;
        progress.report(Progress::Completed).await?;

        Ok(JobResult {
            job_id: job_id.to_string(),
            target_length: job.target_length,
            chars,
            assignments: plan.assignments.len(),
            continuations: synthesis.continuations(),
            sources_selected: sources.selected.len(),
            links_complete,
            tokens: TokenUsage::default(),
            duration_secs: 0,
        })
    }

    /// Terminal failure: freeze progress, record the stage, keep the audit trail
    async fn fail(
        &self,
        job: &Job,
        client: &ModelClient,
        progress: &MonotonicProgress<StoreProgress>,
        e: ScribeError,
    ) -> ScribeError {
        let job_id = job.id.as_str();
        let (stage, message) = match e {
            ScribeError::Pipeline { stage, message } => (stage, message),
            other => (progress.current().unwrap_or(Progress::Query), other.to_string()),
        };
        error!(job_id, stage = %stage, error = %message, "Job failed");

        if let Err(flush_err) = self.flush_attempts(job_id, client).await {
            warn!(job_id, error = %flush_err, "Attempt log not written");
        }
        if let Err(progress_err) = progress.report(Progress::Error).await {
            warn!(job_id, error = %progress_err, "Error marker not written");
        }
        if let Err(status_err) = self
            .persist("status write", || {
                self.store
                    .set_status(job_id, JobStatus::Error, Some(message.as_str()), Some(stage))
            })
            .await
        {
            error!(job_id, error = %status_err, "Failed to mark job as failed");
        }

        self.notify(JobEvent {
            job_id: job_id.to_string(),
            order_id: job.order_id.clone(),
            status: JobStatus::Error,
            stage,
            message: Some(message.clone()),
            chars: 0,
        });
        ScribeError::pipeline(stage, message)
    }

    /// Deliver in the background; delivery failures never touch the Job
    fn notify(&self, event: JobEvent) {
        let notifier = Arc::clone(&self.notifier);
        let mut tasks = self.notifications.lock().unwrap_or_else(|p| p.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                warn!(job_id = %event.job_id, error = %e, "Notification failed");
            }
        });
    }

    /// Wait up to `limit` for pending notifications. Returns how many were
    /// abandoned.
    pub async fn drain(&self, limit: Duration) -> usize {
        let mut pending = std::mem::take(&mut *self.notifications.lock().unwrap_or_else(|p| p.into_inner()));
        if pending.is_empty() {
            return 0;
        }
        debug!(pending = pending.len(), "Waiting for notifications");
        let finished = tokio::time::timeout(limit, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if finished.is_ok() {
            return 0;
        }
        let abandoned = pending.len();
        warn!(abandoned, "Notifications still pending, giving up");
        pending.abort_all();
        abandoned
    }

    /// Run every pending Job of an order, one after another. A failed Job is
    /// left in `error` and the runner moves on.
    #[instrument(skip(self))]
    pub async fn run_order(&self, order_id: &str) -> Result<OrderResult> {
        let pending = self
            .persist("job listing", || self.store.pending_jobs(order_id))
            .await?;
        info!(order_id, jobs = pending.len(), "Running order");

        let mut result = OrderResult::default();
        for record in pending {
            match self.run(&record.id).await {
                Ok(done) => result.completed.push(done),
                Err(e) => {
                    warn!(job_id = %record.id, error = %e, "Job failed, continuing with order");
                    result.failed.push((record.id, e.to_string()));
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{char_len, ends_cleanly, extract_headings};
    use crate::notify::Notifier;
    use crate::storage::JobStore;
    use crate::testing::{MemoryJobStore, RecordingNotifier, ScriptedProvider, StubScraper, StubSearch};
    use crate::types::{FetchStatus, FinishSignal, Language, PromptKind, SeoLink, UserSource};
    use crate::validation::count_link;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    struct Harness {
        provider: Arc<ScriptedProvider>,
        search: Arc<StubSearch>,
        store: Arc<MemoryJobStore>,
        notifier: RecordingNotifier,
        pipeline: JobPipeline,
    }

    fn build(search: StubSearch, scraper: StubScraper, notifier: RecordingNotifier) -> Harness {
        let provider = Arc::new(ScriptedProvider::new());
        let search = Arc::new(search);
        let store = Arc::new(MemoryJobStore::new());
        let pipeline = JobPipeline::new(
            &Config::default(),
            Collaborators {
                provider: provider.clone(),
                search: search.clone(),
                scraper: Arc::new(scraper),
                store: store.clone(),
                notifier: Arc::new(notifier.clone()) as Arc<dyn Notifier>,
            },
        )
        .unwrap()
        .with_retry(RetryPolicy::immediate(3));
        Harness {
            provider,
            search,
            store,
            notifier,
            pipeline,
        }
    }

    fn harness_with(search: StubSearch, scraper: StubScraper) -> Harness {
        build(search, scraper, RecordingNotifier::default())
    }

    fn harness() -> Harness {
        harness_with(StubSearch::with_results(12), StubScraper::new(3_000))
    }

    async fn submit(h: &Harness, job: &Job) {
        h.store.create_job(job).await.unwrap();
    }

    async fn content(h: &Harness, job: &Job) -> JobContent {
        h.store.load_content(job.id.as_str()).await.unwrap().unwrap()
    }

    async fn delivered(h: &Harness) -> Vec<JobEvent> {
        assert_eq!(h.pipeline.drain(Duration::from_secs(2)).await, 0);
        h.notifier.events()
    }

    #[tokio::test]
    async fn test_short_job_scenario() {
        let h = harness();
        let job = Job::new("Indoor herb gardens", 2_000, Language::En);
        submit(&h, &job).await;

        let result = h.pipeline.run(job.id.as_str()).await.unwrap();
        assert_eq!(h.search.calls(), 1);
        assert_eq!(h.provider.calls(PromptKind::Write), 1);
        assert_eq!(h.provider.calls(PromptKind::Continue), 0);
        assert_eq!(result.assignments, 1);
        assert!((3..=8).contains(&result.sources_selected));

        let record = h.store.job_record(job.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, Some(Progress::Completed));
        assert_eq!(
            h.store.progress_log(job.id.as_str()),
            vec![
                Progress::Query,
                Progress::Search,
                Progress::ScrapingAll,
                Progress::Selecting,
                Progress::Writing,
                Progress::Completed
            ]
        );

        let content = content(&h, &job).await;
        assert!(content.scraped_sources.len() <= 15);
        assert!(content.scraped_sources.iter().all(|s| s.status == FetchStatus::Success));
        let text = content.generated_content.as_deref().unwrap();
        assert!(!text.trim().is_empty());
        assert!(ends_cleanly(text));
        assert!(content.generated_at.is_some());

        let attempts = h.store.load_attempts(job.id.as_str()).await.unwrap();
        assert!(attempts.iter().any(|a| a.kind == PromptKind::Query));
        assert!(attempts.iter().any(|a| a.kind == PromptKind::Write && a.assignment == Some(0)));

        let events = delivered(&h).await;
        assert_eq!(events[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_length_converges() {
        for target in [2_000u32, 12_000, 60_000] {
            let h = harness();
            let job = Job::new("Rainwater harvesting", target, Language::En);
            submit(&h, &job).await;

            let result = h.pipeline.run(job.id.as_str()).await.unwrap();
            let text = content(&h, &job).await.generated_content.unwrap();
            let len = char_len(&text) as f64;
            let ratio = len / target as f64;
            assert!((0.80..=1.15).contains(&ratio), "target {} produced {}", target, len);
            assert_eq!(result.chars, char_len(&text));
        }
    }

    #[tokio::test]
    async fn test_user_sources_skip_search() {
        let h = harness_with(StubSearch::with_results(12), StubScraper::new(210_000));
        let mut job = Job::new("Heat pumps", 2_000, Language::De);
        job.user_sources = vec![UserSource::Url {
            url: "https://docs.example/heat-pumps".into(),
        }];
        submit(&h, &job).await;

        h.pipeline.run(job.id.as_str()).await.unwrap();
        assert_eq!(h.search.calls(), 0);
        let content = content(&h, &job).await;
        assert!(content.search_query.is_none());
        assert!(content.source_trace.unwrap().discovery_skipped);
        assert!(content.scraped_sources[0].is_user_source);
    }

    #[tokio::test]
    async fn test_no_sources_still_completes() {
        let h = harness_with(StubSearch::with_results(0), StubScraper::new(3_000));
        let job = Job::new("Obscure folk instruments", 2_000, Language::En);
        submit(&h, &job).await;

        h.pipeline.run(job.id.as_str()).await.unwrap();
        let content = content(&h, &job).await;
        assert!(content.no_sources_available);
        assert!(content.generated_content.is_some());
        let writes = h.provider.prompts(PromptKind::Write);
        assert!(writes[0].contains("No external sources are available"));
    }

    #[tokio::test]
    async fn test_missing_links_repaired_once() {
        let h = harness();
        let mut job = Job::new("Garden tools", 4_000, Language::En);
        job.seo_links = vec![
            SeoLink {
                url: "https://shop.example/rakes".into(),
                anchor: "garden rakes".into(),
            },
            SeoLink {
                url: "https://shop.example/spades".into(),
                anchor: "steel spades".into(),
            },
        ];
        submit(&h, &job).await;

        let result = h.pipeline.run(job.id.as_str()).await.unwrap();
        assert_eq!(h.provider.calls(PromptKind::LinkRepair), 1);

        let content = content(&h, &job).await;
        let report = content.link_report.unwrap();
        assert_eq!(report.missing_before.len(), 2);
        assert!(report.missing_after.len() < report.missing_before.len());
        assert_eq!(result.links_complete, report.is_complete());

        let text = content.generated_content.unwrap();
        for link in &job.seo_links {
            assert!(count_link(&text, link) <= 1);
        }
    }

    #[tokio::test]
    async fn test_store_writes_retried() {
        let clean = harness();
        let job = Job::new("Balcony solar", 2_000, Language::En);
        submit(&clean, &job).await;
        clean.pipeline.run(job.id.as_str()).await.unwrap();

        let h = harness();
        submit(&h, &job).await;
        h.store.fail_next_writes(2);
        h.pipeline.run(job.id.as_str()).await.unwrap();

        let record = h.store.job_record(job.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(h.store.writes(), clean.store.writes() + 2);
    }

    #[tokio::test]
    async fn test_planner_failure_is_terminal_and_keeps_content() {
        let h = harness();
        let job = Job::new("Timber frame houses", 12_000, Language::En);
        submit(&h, &job).await;
        h.provider.fail_next(PromptKind::Plan, "model unavailable");

        let err = h.pipeline.run(job.id.as_str()).await.unwrap_err();
        assert!(matches!(
            err,
            ScribeError::Pipeline {
                stage: Progress::Selecting,
                ..
            }
        ));

        let record = h.store.job_record(job.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error_stage, Some(Progress::Selecting));
        assert_eq!(record.progress, Some(Progress::Error));

        let content = content(&h, &job).await;
        assert!(content.search_query.is_some());
        assert!(content.generated_content.is_none());

        let attempts = h.store.load_attempts(job.id.as_str()).await.unwrap();
        assert!(attempts.iter().any(|a| a.kind == PromptKind::Selection));
        assert_eq!(h.provider.calls(PromptKind::Write), 0);

        let events = delivered(&h).await;
        assert_eq!(events[0].status, JobStatus::Error);
        assert_eq!(events[0].stage, Progress::Selecting);
    }

    #[tokio::test]
    async fn test_order_continues_past_failed_job() {
        let h = harness();
        let topics = [("Attic insulation", 2_000), ("Cellar damp", 12_000), ("Roof tiles", 2_000)];
        let mut jobs = Vec::new();
        for (topic, len) in topics {
            let mut job = Job::new(topic, len, Language::En);
            job.order_id = Some("order-42".into());
            submit(&h, &job).await;
            jobs.push(job);
        }
        // only the middle Job needs a planner
        h.provider.fail_next(PromptKind::Plan, "model unavailable");

        let result = h.pipeline.run_order("order-42").await.unwrap();
        assert_eq!(result.completed.len(), 2);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].0, jobs[1].id.as_str());

        let statuses: Vec<JobStatus> = h
            .store
            .list_jobs(Some("order-42"), None)
            .await
            .unwrap()
            .iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(statuses, vec![JobStatus::Completed, JobStatus::Error, JobStatus::Completed]);
        assert!(h.store.pending_jobs("order-42").await.unwrap().is_empty());
    }

    fn seo_link() -> SeoLink {
        SeoLink {
            url: "https://shop.example/rakes".into(),
            anchor: "garden rakes".into(),
        }
    }

    #[tokio::test]
    async fn test_failed_link_repair_still_completes() {
        let h = harness();
        let mut job = Job::new("Garden tools", 4_000, Language::En);
        job.seo_links = vec![seo_link()];
        submit(&h, &job).await;
        h.provider.fail_next(PromptKind::LinkRepair, "model refused");

        let result = h.pipeline.run(job.id.as_str()).await.unwrap();
        assert!(!result.links_complete);
        assert_eq!(h.provider.calls(PromptKind::LinkRepair), 1);

        let record = h.store.job_record(job.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);

        let content = content(&h, &job).await;
        assert!(content.generated_content.is_some_and(|t| !t.trim().is_empty()));
        assert!(content.draft_content.is_none());
        let report = content.link_report.unwrap();
        assert!(report.repair_attempted);
        assert!(report.repair_rejected);
        assert_eq!(report.missing_after, vec![seo_link().url]);

        let attempts = h.store.load_attempts(job.id.as_str()).await.unwrap();
        assert!(attempts
            .iter()
            .any(|a| a.kind == PromptKind::LinkRepair && a.finish == FinishSignal::Failed));
    }

    #[tokio::test]
    async fn test_draft_kept_when_validation_write_fails() {
        let clean = harness();
        let job = Job::new("Rain gardens", 2_000, Language::En);
        submit(&clean, &job).await;
        clean.pipeline.run(job.id.as_str()).await.unwrap();
        // the final content write comes right before the last attempt,
        // status and progress writes
        let final_content_write = clean.store.writes() - 3;

        let h = harness();
        submit(&h, &job).await;
        h.store.fail_writes_from(final_content_write, 4);
        h.pipeline.run(job.id.as_str()).await.unwrap_err();

        let content = content(&h, &job).await;
        assert!(content.generated_content.is_none());
        assert!(content.draft_content.is_some_and(|t| !t.trim().is_empty()));
        let record = h.store.job_record(job.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error_stage, Some(Progress::Writing));
    }

    #[tokio::test]
    async fn test_completed_job_is_not_run_again() {
        let h = harness();
        let job = Job::new("Compost heaps", 2_000, Language::En);
        submit(&h, &job).await;
        h.pipeline.run(job.id.as_str()).await.unwrap();
        let first = content(&h, &job).await;
        let log = h.store.progress_log(job.id.as_str());

        let err = h.pipeline.run(job.id.as_str()).await.unwrap_err();
        assert!(matches!(
            err,
            ScribeError::JobNotRunnable {
                status: JobStatus::Completed,
                ..
            }
        ));

        let second = content(&h, &job).await;
        assert_eq!(second.generated_at, first.generated_at);
        assert_eq!(second.generated_content, first.generated_content);
        assert_eq!(h.store.progress_log(job.id.as_str()), log);
        assert_eq!(h.provider.calls(PromptKind::Write), 1);
        let record = h.store.job_record(job.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_running_job_is_refused_and_failed_job_retried() {
        let h = harness();
        let running = Job::new("Pond liners", 2_000, Language::En);
        submit(&h, &running).await;
        h.store
            .set_status(running.id.as_str(), JobStatus::Running, None, None)
            .await
            .unwrap();
        assert!(matches!(
            h.pipeline.run(running.id.as_str()).await,
            Err(ScribeError::JobNotRunnable {
                status: JobStatus::Running,
                ..
            })
        ));

        let failed = Job::new("Timber decks", 12_000, Language::En);
        submit(&h, &failed).await;
        h.provider.fail_next(PromptKind::Plan, "model unavailable");
        h.pipeline.run(failed.id.as_str()).await.unwrap_err();
        h.pipeline.run(failed.id.as_str()).await.unwrap();

        let record = h.store.job_record(failed.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_final_write_failure_routes_through_fail() {
        let clean = harness();
        let job = Job::new("Balcony planters", 2_000, Language::En);
        submit(&clean, &job).await;
        clean.pipeline.run(job.id.as_str()).await.unwrap();
        // last three writes: attempt log, completed status, completed progress
        let final_attempt_write = clean.store.writes() - 2;

        let h = harness();
        submit(&h, &job).await;
        h.store.fail_writes_from(final_attempt_write, 4);
        let err = h.pipeline.run(job.id.as_str()).await.unwrap_err();
        assert!(matches!(err, ScribeError::Pipeline { .. }));

        let record = h.store.job_record(job.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.progress, Some(Progress::Error));

        // the attempts that missed the failed flush are written by the failure path
        let attempts = h.store.load_attempts(job.id.as_str()).await.unwrap();
        assert!(attempts.iter().any(|a| a.kind == PromptKind::EndingCheck));

        let events = delivered(&h).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, JobStatus::Error);
    }

    #[test]
    fn test_notifications_delivered_before_runtime_drops() {
        let h = build(
            StubSearch::with_results(12),
            StubScraper::new(3_000),
            RecordingNotifier::slow(Duration::from_millis(20)),
        );
        let job = Job::new("Greenhouse heating", 2_000, Language::En);

        let rt = tokio::runtime::Runtime::new().unwrap();
        let abandoned = rt.block_on(async {
            submit(&h, &job).await;
            h.pipeline.run(job.id.as_str()).await.unwrap();
            h.pipeline.drain(Duration::from_secs(2)).await
        });
        drop(rt);

        assert_eq!(abandoned, 0);
        assert_eq!(h.notifier.events().len(), 1);
        assert_eq!(h.notifier.events()[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_limit() {
        let h = build(
            StubSearch::with_results(12),
            StubScraper::new(3_000),
            RecordingNotifier::slow(Duration::from_secs(30)),
        );
        let job = Job::new("Greenhouse heating", 2_000, Language::En);
        submit(&h, &job).await;
        h.pipeline.run(job.id.as_str()).await.unwrap();

        assert_eq!(h.pipeline.drain(Duration::from_millis(20)).await, 1);
        assert!(h.notifier.events().is_empty());
        let record = h.store.job_record(job.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrape_timeout_does_not_fail_job() {
        let scraper = StubScraper::new(3_000);
        scraper.delay("https://result-2.example/page", Duration::from_secs(600));
        let h = harness_with(StubSearch::with_results(12), scraper);
        let job = Job::new("Green roofs", 2_000, Language::En);
        submit(&h, &job).await;

        h.pipeline.run(job.id.as_str()).await.unwrap();
        let record = h.store.job_record(job.id.as_str()).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);

        let content = content(&h, &job).await;
        let slow = content
            .scraped_sources
            .iter()
            .find(|s| s.url == "https://result-2.example/page")
            .unwrap();
        assert_eq!(slow.status, FetchStatus::Failed);
        assert!(content.generated_content.is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_every_planned_heading_written(writers in 2u32..=7, slack in 0u32..40_000) {
            let target = 48_000 * (writers - 1) + 1_000 + slack;
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let (planned, written, assignments) = rt.block_on(async {
                let h = harness();
                let job = Job::new("Heat pumps in old houses", target, Language::En);
                submit(&h, &job).await;
                h.pipeline.run(job.id.as_str()).await.unwrap();

                let content = content(&h, &job).await;
                let plan = content.structure_plan.unwrap();
                let planned: BTreeSet<String> = plan.headings().into_iter().map(String::from).collect();
                let written: Vec<String> = extract_headings(&content.generated_content.unwrap())
                    .into_iter()
                    .map(|h| h.text)
                    .collect();
                (planned, written, plan.assignments.len())
            });

            prop_assert_eq!(assignments, writers as usize);
            let written_set: BTreeSet<String> = written.iter().cloned().collect();
            prop_assert_eq!(&written_set, &planned);
            prop_assert_eq!(written.len(), planned.len());
        }
    }
}
