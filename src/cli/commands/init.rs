//! Init Command
//!
//! Initialize longscribe in the current directory.

use crate::cli::Output;
use crate::cli::util::create_database;
use crate::config::ConfigLoader;
use crate::types::{Result, ScribeError};

pub fn run(force: bool) -> Result<()> {
    let project_dir = ConfigLoader::project_dir();

    if project_dir.exists() && !force {
        return Err(ScribeError::Config(
            "Already initialized. Use --force to overwrite.".to_string(),
        ));
    }

    ConfigLoader::init_project()?;

    // Global config is optional; never overwrite it here
    if let Err(e) = ConfigLoader::init_global(false) {
        tracing::debug!("Global config init skipped: {}", e);
    }

    let config = ConfigLoader::load()?;
    create_database(&config)?;

    let out = Output::new();
    out.success(&format!("Initialized longscribe in {}/", project_dir.display()));
    out.field("Config", ConfigLoader::project_config_path().display());
    out.field("Database", ConfigLoader::database_path(&config).display());
    println!();
    println!("Next steps:");
    println!("  1. Set {} for the model provider", config.llm.api_key_env);
    println!("  2. Run 'longscribe submit <order-file>' to queue jobs");
    Ok(())
}
