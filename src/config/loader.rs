//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (platform config dir, e.g. ~/.config/longscribe/config.toml)
//! 3. Project config (.longscribe/config.toml)
//! 4. Environment variables (LONGSCRIBE_<SECTION>__<FIELD>)

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{Result, ScribeError};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // LONGSCRIBE_SOURCES__MIN_TEXT_CHARS -> sources.min_text_chars
        figment = figment.merge(Env::prefixed("LONGSCRIBE_").split("__").lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| ScribeError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| ScribeError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Global config directory from the platform conventions
    pub fn global_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "longscribe").map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    /// Project data directory
    pub fn project_dir() -> PathBuf {
        PathBuf::from(".longscribe")
    }

    /// Resolved database path for a config
    pub fn database_path(config: &Config) -> PathBuf {
        if config.storage.database.is_absolute() {
            config.storage.database.clone()
        } else {
            Self::project_dir().join(&config.storage.database)
        }
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());
    }

    /// Show current effective configuration
    pub fn show_config(as_json: bool) -> Result<()> {
        let config = Self::load()?;

        if as_json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| ScribeError::Config(e.to_string()))?
            );
        }

        Ok(())
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write the global config file
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            ScribeError::Config("Cannot determine global config directory".to_string())
        })?;
        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_config_toml()?)?;
            info!("Created global config: {}", config_path.display());
        } else {
            info!("Global config exists: {}", config_path.display());
        }

        Ok(global_dir)
    }

    /// Create `.longscribe/` with a default config
    pub fn init_project() -> Result<PathBuf> {
        let project_dir = Self::project_dir();
        fs::create_dir_all(&project_dir)?;

        let config_path = Self::project_config_path();
        if !config_path.exists() {
            fs::write(&config_path, Self::default_config_toml()?)?;
            info!("Created project config: {}", config_path.display());
        }

        Ok(project_dir)
    }

    pub fn is_project_initialized() -> bool {
        Self::project_dir().exists()
    }

    fn default_config_toml() -> Result<String> {
        let body = toml::to_string_pretty(&Config::default())
            .map_err(|e| ScribeError::Config(e.to_string()))?;
        Ok(format!(
            "# longscribe configuration\n# Environment overrides: LONGSCRIBE_<SECTION>__<FIELD>\n\n{}",
            body
        ))
    }
}
