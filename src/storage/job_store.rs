//! Async store seam used by the pipeline.
//!
//! `SqliteJobStore` pushes every call onto the blocking pool so pooled
//! SQLite connections never stall the runtime.

use std::sync::Arc;

use async_trait::async_trait;

use super::database::{JobRecord, SharedDatabase};
use crate::types::{
    GenerationAttempt, Job, JobContent, JobStatus, Progress, Result, ScribeError, SourceCandidate,
};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<()>;

    async fn load_job(&self, id: &str) -> Result<Job>;

    async fn job_record(&self, id: &str) -> Result<JobRecord>;

    async fn list_jobs(&self, order_id: Option<&str>, status: Option<JobStatus>) -> Result<Vec<JobRecord>>;

    async fn set_progress(&self, id: &str, progress: Progress) -> Result<()>;

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        stage: Option<Progress>,
    ) -> Result<()>;

    async fn save_content(&self, id: &str, content: &JobContent) -> Result<()>;

    async fn load_content(&self, id: &str) -> Result<Option<JobContent>>;

    async fn save_sources(&self, id: &str, candidates: &[SourceCandidate], selected: &[String]) -> Result<()>;

    async fn load_sources(&self, id: &str) -> Result<Vec<(SourceCandidate, bool)>>;

    async fn append_attempts(&self, id: &str, attempts: &[GenerationAttempt]) -> Result<()>;

    async fn load_attempts(&self, id: &str) -> Result<Vec<GenerationAttempt>>;

    /// Pending Jobs of an order, in creation order
    async fn pending_jobs(&self, order_id: &str) -> Result<Vec<JobRecord>> {
        self.list_jobs(Some(order_id), Some(JobStatus::Pending)).await
    }
}

pub type SharedStore = Arc<dyn JobStore>;

pub struct SqliteJobStore {
    db: SharedDatabase,
}

impl SqliteJobStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&super::Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ScribeError::Store(format!("Store task failed: {}", e)))?
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        self.blocking(move |db| db.insert_job(&job)).await
    }

    async fn load_job(&self, id: &str) -> Result<Job> {
        let id = id.to_string();
        self.blocking(move |db| db.load_job(&id)).await
    }

    async fn job_record(&self, id: &str) -> Result<JobRecord> {
        let id = id.to_string();
        self.blocking(move |db| db.job_record(&id)).await
    }

    async fn list_jobs(&self, order_id: Option<&str>, status: Option<JobStatus>) -> Result<Vec<JobRecord>> {
        let order_id = order_id.map(str::to_string);
        self.blocking(move |db| db.list_jobs(order_id.as_deref(), status)).await
    }

    async fn set_progress(&self, id: &str, progress: Progress) -> Result<()> {
        let id = id.to_string();
        self.blocking(move |db| db.set_progress(&id, progress)).await
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        stage: Option<Progress>,
    ) -> Result<()> {
        let id = id.to_string();
        let error = error.map(str::to_string);
        self.blocking(move |db| db.set_status(&id, status, error.as_deref(), stage))
            .await
    }

    async fn save_content(&self, id: &str, content: &JobContent) -> Result<()> {
        let id = id.to_string();
        let content = content.clone();
        self.blocking(move |db| db.save_content(&id, &content)).await
    }

    async fn load_content(&self, id: &str) -> Result<Option<JobContent>> {
        let id = id.to_string();
        self.blocking(move |db| db.load_content(&id)).await
    }

    async fn save_sources(&self, id: &str, candidates: &[SourceCandidate], selected: &[String]) -> Result<()> {
        let id = id.to_string();
        let candidates = candidates.to_vec();
        let selected = selected.to_vec();
        self.blocking(move |db| db.replace_sources(&id, &candidates, &selected))
            .await
    }

    async fn load_sources(&self, id: &str) -> Result<Vec<(SourceCandidate, bool)>> {
        let id = id.to_string();
        self.blocking(move |db| db.load_sources(&id)).await
    }

    async fn append_attempts(&self, id: &str, attempts: &[GenerationAttempt]) -> Result<()> {
        let id = id.to_string();
        let attempts = attempts.to_vec();
        self.blocking(move |db| db.append_attempts(&id, &attempts)).await
    }

    async fn load_attempts(&self, id: &str) -> Result<Vec<GenerationAttempt>> {
        let id = id.to_string();
        self.blocking(move |db| db.load_attempts(&id)).await
    }
}
