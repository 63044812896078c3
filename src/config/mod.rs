// Configuration module for segment-recorder
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut RecorderConfig) -> Result<()> {
    if let Ok(log_root) = std::env::var("LOG_ROOT") {
        config.storage.log_root = log_root;
    }

    if let Ok(length) = std::env::var("SEGMENT_LENGTH") {
        config.recorder.segment_length_seconds = length
            .parse()
            .with_context(|| format!("SEGMENT_LENGTH is not a number: '{}'", length))?;
    }

    ConfigLoader::validate(config)
}
