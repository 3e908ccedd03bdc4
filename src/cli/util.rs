//! CLI Common Utilities
//!
//! Shared initialization and context management for CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use crate::ai::{ProviderConfig, SharedProvider, create_provider};
use crate::config::{Config, ConfigLoader};
use crate::notify;
use crate::pipeline::{Collaborators, JobPipeline};
use crate::research::{HttpScraper, HttpSearchClient};
use crate::storage::{Database, PoolConfig, SharedDatabase, SharedStore, SqliteJobStore};
use crate::types::{Result, ScribeError};

/// Command execution context
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub db: SharedDatabase,
}

impl CommandContext {
    /// Validates initialization, loads config, and opens the database
    pub fn load() -> Result<Self> {
        require_initialized()?;
        let config = ConfigLoader::load()?;
        let db = open_database(&config)?;
        Ok(Self {
            config,
            db: Arc::new(db),
        })
    }

    pub fn store(&self) -> SharedStore {
        Arc::new(SqliteJobStore::new(Arc::clone(&self.db)))
    }

    pub fn provider(&self) -> Result<SharedProvider> {
        create_provider(&ProviderConfig::from(&self.config.llm))
    }

    /// Wire the HTTP collaborators and the store into a pipeline
    pub fn pipeline(&self, provider: SharedProvider) -> Result<JobPipeline> {
        let deps = Collaborators {
            provider,
            search: Arc::new(HttpSearchClient::new(&self.config.search)?),
            scraper: Arc::new(HttpScraper::new(&self.config.scrape)?),
            store: self.store(),
            notifier: notify::from_config(&self.config.notify)?,
        };
        JobPipeline::new(&self.config, deps)
    }
}

/// Returns the project directory if initialized
pub fn require_initialized() -> Result<PathBuf> {
    if !is_initialized() {
        return Err(ScribeError::NotInitialized);
    }
    Ok(ConfigLoader::project_dir())
}

pub fn is_initialized() -> bool {
    ConfigLoader::is_project_initialized()
}

/// Open an existing database; a missing file means `init` never ran
pub fn open_database(config: &Config) -> Result<Database> {
    let path = ConfigLoader::database_path(config);
    if !path.exists() {
        return Err(ScribeError::NotInitialized);
    }
    Database::open_with_config(&path, PoolConfig::from(&config.storage))
}

/// Create the database directory if needed and apply the schema
pub fn create_database(config: &Config) -> Result<Database> {
    let path = ConfigLoader::database_path(config);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open_with_config(&path, PoolConfig::from(&config.storage))?;
    db.initialize()?;
    Ok(db)
}

// Tests omitted: these helpers resolve paths against the current directory,
// which races when tests run in parallel.
