// src/config.rs

//! Configuration loading utilities.
//!
//! A config directory holds `config.toml` (application settings) and
//! `sources.toml` (the `[[sources]]` catalog).

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::{Config, SourceCatalog};
use crate::utils::log;

pub const CONFIG_FILE: &str = "config.toml";
pub const SOURCES_FILE: &str = "sources.toml";

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file cannot be read.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::warn(&format!("{path:?} not found, using default configuration"));
        return Ok(Config::default().with_env());
    }
    let config = Config::load(path)?;
    config
        .validate()
        .map_err(|e| AppError::config(format!("Invalid config {path:?}: {e}")))?;
    Ok(config)
}

/// Load and validate the source catalog.
pub fn load_sources(path: &Path) -> Result<SourceCatalog> {
    let catalog = SourceCatalog::load(path)
        .map_err(|e| AppError::config(format!("Failed to load sources from {path:?}: {e}")))?;
    catalog
        .validate()
        .map_err(|e| AppError::config(format!("Invalid source catalog: {e}")))?;
    Ok(catalog)
}

/// Load both files from a config directory.
pub fn load_all(dir: &Path) -> Result<(Config, SourceCatalog)> {
    let config = load_config(&dir.join(CONFIG_FILE))?;
    let sources = load_sources(&dir.join(SOURCES_FILE))?;
    Ok((config, sources))
}
