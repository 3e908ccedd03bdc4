pub mod database;
pub mod job_store;

pub use database::{Database, JobRecord, PoolConfig, SharedDatabase};
pub use job_store::{JobStore, SharedStore, SqliteJobStore};
