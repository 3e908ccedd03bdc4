//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite job store featuring:
//! - Connection pooling via r2d2
//! - Panic-safe transactions with automatic rollback
//! - Version-tracked migrations
//! - WAL mode so progress polling never blocks the writer

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::StorageConfig;
use crate::types::{
    FetchStatus, FinishSignal, GenerationAttempt, Job, JobContent, JobStatus, Progress, PromptKind,
    Provenance, Result, ResultExt, ScribeError, SourceCandidate, TokenUsage,
};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

/// Migration definitions
struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Add selected flag to sources",
    up: "ALTER TABLE sources ADD COLUMN selected INTEGER NOT NULL DEFAULT 0",
}];

/// Stored Job header: everything a progress poll needs
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub order_id: Option<String>,
    pub topic: String,
    pub target_length: u32,
    pub status: JobStatus,
    pub progress: Option<Progress>,
    pub error: Option<String>,
    /// Stage the Job was in when it failed
    pub error_stage: Option<Progress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: u32,
    /// Minimum idle connections to keep ready
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 2;
    const MAX_POOL_SIZE: u32 = 16;
}

impl From<&StorageConfig> for PoolConfig {
    fn from(config: &StorageConfig) -> Self {
        let max_size = config.pool_size.clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE);
        Self {
            max_size,
            min_idle: 1,
            connection_timeout_secs: config.timeout_secs,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn fetch_status_str(status: FetchStatus) -> &'static str {
    match status {
        FetchStatus::Success => "success",
        FetchStatus::Failed => "failed",
    }
}

fn provenance_str(provenance: Provenance) -> &'static str {
    match provenance {
        Provenance::UserSupplied => "user-supplied",
        Provenance::Discovered => "discovered",
    }
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open database with connection pooling at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    /// Open database with custom pool configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(config.connection_timeout_secs))
            .build(manager)
            .map_err(|e| ScribeError::Store(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| ScribeError::Store(format!("Failed to create in-memory pool: {}", e)))?;

        Ok(Self { pool })
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| ScribeError::Store(format!("Failed to acquire database connection: {}", e)))
    }

    /// Create the schema on a fresh database, migrate an older one.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        if current_version == 0 {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to set schema version")?;
            return Ok(());
        }

        drop(conn);
        self.migrate(current_version)
    }

    fn migrate(&self, current_version: u32) -> Result<()> {
        let conn = self.conn()?;

        for migration in MIGRATIONS {
            if migration.version > current_version {
                conn.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;

                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }

    /// Get a raw connection for advanced operations.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.conn()
    }

    /// Execute a function within a panic-safe database transaction.
    ///
    /// If the closure panics, the transaction is rolled back and an error is
    /// returned instead of poisoning the connection pool.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + std::panic::UnwindSafe,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction().with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            // Rolled back on drop
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(ScribeError::Store(format!("Transaction panicked: {}", panic_msg)))
            }
        }
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    pub fn insert_job(&self, job: &Job) -> Result<()> {
        job.validate()?;
        let input = serde_json::to_string(job)?;
        let now = now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs (id, order_id, topic, target_length, input_json, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
            params![
                job.id.as_str(),
                job.order_id,
                job.topic,
                job.target_length,
                input,
                now
            ],
        )
        .with_context("Failed to insert job")?;
        Ok(())
    }

    pub fn load_job(&self, id: &str) -> Result<Job> {
        let conn = self.conn()?;
        let input: Option<String> = conn
            .query_row("SELECT input_json FROM jobs WHERE id = ?1", params![id], |row| row.get(0))
            .optional()
            .with_context("Failed to load job")?;
        let input = input.ok_or_else(|| ScribeError::JobNotFound(id.to_string()))?;
        Ok(serde_json::from_str(&input)?)
    }

    fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
        let status: String = row.get(4)?;
        let progress: Option<String> = row.get(5)?;
        let error_stage: Option<String> = row.get(7)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;
        Ok(JobRecord {
            id: row.get(0)?,
            order_id: row.get(1)?,
            topic: row.get(2)?,
            target_length: row.get(3)?,
            status: JobStatus::parse(&status),
            progress: progress.and_then(|p| p.parse().ok()),
            error: row.get(6)?,
            error_stage: error_stage.and_then(|p| p.parse().ok()),
            created_at: parse_time(&created_at),
            updated_at: parse_time(&updated_at),
        })
    }

    const JOB_COLUMNS: &'static str =
        "id, order_id, topic, target_length, status, progress, error, error_stage, created_at, updated_at";

    pub fn job_record(&self, id: &str) -> Result<JobRecord> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", Self::JOB_COLUMNS),
            params![id],
            Self::map_job_row,
        )
        .optional()
        .with_context("Failed to load job record")?
        .ok_or_else(|| ScribeError::JobNotFound(id.to_string()))
    }

    /// Jobs in creation order, optionally restricted to one order and/or status
    pub fn list_jobs(&self, order_id: Option<&str>, status: Option<JobStatus>) -> Result<Vec<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM jobs
                 WHERE (?1 IS NULL OR order_id = ?1) AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at, rowid",
                Self::JOB_COLUMNS
            ))
            .with_context("Failed to prepare job listing")?;
        let rows = stmt
            .query_map(params![order_id, status.map(|s| s.as_str())], Self::map_job_row)
            .with_context("Failed to list jobs")?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to read job rows")
    }

    fn touch(&self, id: &str, sql: &str, values: &[&dyn rusqlite::ToSql]) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(sql, values).with_context("Failed to update job")?;
        if updated == 0 {
            return Err(ScribeError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_progress(&self, id: &str, progress: Progress) -> Result<()> {
        self.touch(
            id,
            "UPDATE jobs SET progress = ?1, updated_at = ?2 WHERE id = ?3",
            &[&progress.as_str(), &now(), &id],
        )
    }

    /// Record a status change; `error` and `stage` describe a failure
    pub fn set_status(&self, id: &str, status: JobStatus, error: Option<&str>, stage: Option<Progress>) -> Result<()> {
        self.touch(
            id,
            "UPDATE jobs SET status = ?1, error = ?2, error_stage = ?3, updated_at = ?4 WHERE id = ?5",
            &[&status.as_str(), &error, &stage.map(|s| s.as_str()), &now(), &id],
        )
    }

    // =========================================================================
    // Content
    // =========================================================================

    /// Validated before it is written
    pub fn save_content(&self, id: &str, content: &JobContent) -> Result<()> {
        content.validate()?;
        let json = serde_json::to_string(content)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job_content (job_id, content_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET content_json = excluded.content_json, updated_at = excluded.updated_at",
            params![id, json, now()],
        )
        .with_context("Failed to save job content")?;
        Ok(())
    }

    /// Validated after it is read
    pub fn load_content(&self, id: &str) -> Result<Option<JobContent>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT content_json FROM job_content WHERE job_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .with_context("Failed to load job content")?;

        match json {
            Some(json) => {
                let content: JobContent = serde_json::from_str(&json)?;
                content.validate()?;
                Ok(Some(content))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // Sources
    // =========================================================================

    /// Replace the Job's source candidates; `selected` holds the URLs handed to the writers
    pub fn replace_sources(&self, id: &str, candidates: &[SourceCandidate], selected: &[String]) -> Result<()> {
        let id = id.to_string();
        let candidates = candidates.to_vec();
        let selected = selected.to_vec();
        self.transaction(move |conn| {
            conn.execute("DELETE FROM sources WHERE job_id = ?1", params![id])
                .with_context("Failed to clear sources")?;
            let mut stmt = conn
                .prepare(
                    "INSERT INTO sources (job_id, position, url, length, status, provenance, note, text, selected)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .with_context("Failed to prepare source insert")?;
            for (position, c) in candidates.iter().enumerate() {
                stmt.execute(params![
                    id,
                    position as i64,
                    c.url,
                    c.length as i64,
                    fetch_status_str(c.status),
                    provenance_str(c.provenance),
                    c.note,
                    c.text,
                    selected.contains(&c.url),
                ])
                .with_context("Failed to insert source")?;
            }
            Ok(())
        })
    }

    /// Stored candidates with their selection flag, in fetch order
    pub fn load_sources(&self, id: &str) -> Result<Vec<(SourceCandidate, bool)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT url, length, status, provenance, note, text, selected
                 FROM sources WHERE job_id = ?1 ORDER BY position",
            )
            .with_context("Failed to prepare source query")?;
        let rows = stmt
            .query_map(params![id], |row| {
                let status: String = row.get(2)?;
                let provenance: String = row.get(3)?;
                let length: i64 = row.get(1)?;
                let selected: bool = row.get(6)?;
                Ok((
                    SourceCandidate {
                        url: row.get(0)?,
                        length: length as usize,
                        status: if status == "success" {
                            FetchStatus::Success
                        } else {
                            FetchStatus::Failed
                        },
                        provenance: if provenance == "user-supplied" {
                            Provenance::UserSupplied
                        } else {
                            Provenance::Discovered
                        },
                        note: row.get(4)?,
                        text: row.get(5)?,
                    },
                    selected,
                ))
            })
            .with_context("Failed to load sources")?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to read source rows")
    }

    // =========================================================================
    // Attempt audit log
    // =========================================================================

    /// Append attempts after the Job's existing ones; never rewrites earlier rows
    pub fn append_attempts(&self, id: &str, attempts: &[GenerationAttempt]) -> Result<()> {
        if attempts.is_empty() {
            return Ok(());
        }
        let id = id.to_string();
        let attempts = attempts.to_vec();
        self.transaction(move |conn| {
            let next: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM attempts WHERE job_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .with_context("Failed to read attempt sequence")?;
            let mut stmt = conn
                .prepare(
                    "INSERT INTO attempts
                     (job_id, seq, assignment, kind, prompt, output, finish, input_tokens, output_tokens, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .with_context("Failed to prepare attempt insert")?;
            for (offset, a) in attempts.iter().enumerate() {
                stmt.execute(params![
                    id,
                    next + offset as i64,
                    a.assignment.map(|i| i as i64),
                    a.kind.as_str(),
                    a.prompt,
                    a.output,
                    a.finish.as_str(),
                    a.usage.input_tokens as i64,
                    a.usage.output_tokens as i64,
                    a.created_at.to_rfc3339(),
                ])
                .with_context("Failed to insert attempt")?;
            }
            Ok(())
        })
    }

    pub fn load_attempts(&self, id: &str) -> Result<Vec<GenerationAttempt>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT assignment, kind, prompt, output, finish, input_tokens, output_tokens, created_at
                 FROM attempts WHERE job_id = ?1 ORDER BY seq",
            )
            .with_context("Failed to prepare attempt query")?;
        let rows = stmt
            .query_map(params![id], |row| {
                let assignment: Option<i64> = row.get(0)?;
                let kind: String = row.get(1)?;
                let finish: String = row.get(4)?;
                let input_tokens: i64 = row.get(5)?;
                let output_tokens: i64 = row.get(6)?;
                let created_at: String = row.get(7)?;
                Ok(GenerationAttempt {
                    assignment: assignment.map(|i| i as usize),
                    kind: PromptKind::parse(&kind).unwrap_or(PromptKind::Write),
                    prompt: row.get(2)?,
                    output: row.get(3)?,
                    finish: FinishSignal::parse(&finish),
                    usage: TokenUsage::new(input_tokens as u64, output_tokens as u64),
                    created_at: parse_time(&created_at),
                })
            })
            .with_context("Failed to load attempts")?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to read attempt rows")
    }
}
