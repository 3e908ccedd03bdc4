//! Config Command
//!
//! Manage longscribe configuration.
//!
//! Usage:
//!   longscribe config show [-g] [-f json]
//!   longscribe config path
//!   longscribe config init [-g] [--force]

use crate::cli::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show configuration
pub fn show(global: bool, format: &str) -> Result<()> {
    if global {
        match ConfigLoader::global_config_path() {
            Some(path) if path.exists() => {
                println!("# Global Config: {}\n", path.display());
                println!("{}", std::fs::read_to_string(&path)?);
            }
            Some(_) => {
                println!("No global config found.");
                println!("Run 'longscribe config init --global' to create one.");
            }
            None => println!("Cannot determine global config directory."),
        }
        return Ok(());
    }
    // Merged effective config
    ConfigLoader::show_config(format == "json")
}

pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

pub fn init(global: bool, force: bool) -> Result<()> {
    let out = Output::new();
    if global {
        let dir = ConfigLoader::init_global(force)?;
        out.success("Initialized global configuration");
        out.field("Directory", dir.display());
    } else {
        let dir = ConfigLoader::init_project()?;
        out.success("Initialized project configuration");
        out.field("Directory", dir.display());
        out.field("Config", ConfigLoader::project_config_path().display());
    }
    Ok(())
}
