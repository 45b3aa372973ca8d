//! Config file load and save.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::config::types::CollectorConfig;

/// Explicit path, else `config.json` next to the executable.
pub fn config_path(path: Option<&str>) -> Result<PathBuf> {
    if let Some(p) = path {
        return Ok(PathBuf::from(p));
    }
    let exe_dir = std::env::current_exe()?
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Cannot determine executable directory"))?
        .to_path_buf();
    Ok(exe_dir.join("config.json"))
}

/// Load the configuration, apply environment overrides and validate it.
/// A missing file yields the defaults.
pub async fn load_config(path: Option<&str>) -> Result<CollectorConfig> {
    let config_path = config_path(path)?;

    let mut config = if config_path.exists() {
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read {:?}", config_path))?;
        let config: CollectorConfig =
            serde_json::from_str(&content).with_context(|| format!("Invalid configuration in {:?}", config_path))?;
        info!("Loaded configuration from: {:?}", config_path);
        config
    } else {
        info!("Config file {:?} not found, using defaults", config_path);
        CollectorConfig::default()
    };

    config.apply_env_overrides();
    config.validate().with_context(|| format!("Invalid configuration in {:?}", config_path))?;
    Ok(config)
}

pub async fn save_config(config: &CollectorConfig, path: &str) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path))?;
    info!("Configuration saved to: {}", path);
    Ok(())
}
