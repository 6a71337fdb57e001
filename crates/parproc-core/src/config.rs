//! Configuration resolution for parproc.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/parproc/settings.json`)
//! 3. Project config (`.parproc/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments and manifest values (applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default number of concurrently running processes.
pub const DEFAULT_POOL_SIZE: i64 = 5;

/// Default delay between two polling passes, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Complete runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum concurrently running processes. Values below 1 mean unbounded.
    pub pool_size: i64,
    /// Delay between polling passes.
    pub poll_interval_ms: u64,
    /// Log level filter (e.g. "info", "debug").
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Poll interval as a [`Duration`].
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A settings file layer. Only the keys present in the file override
/// the layers below it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigLayer {
    pool_size: Option<i64>,
    poll_interval_ms: Option<u64>,
    log_level: Option<String>,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_layer(&mut config, load_config_file(&global_path)?);
    }

    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            merge_layer(&mut config, load_config_file(&project_path)?);
        }
    }

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    Ok(config)
}

/// Get the global settings file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("parproc").join("settings.json"))
}

/// Get the project settings file path under `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".parproc").join("settings.json")
}

fn load_config_file(path: &Path) -> Result<ConfigLayer> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_layer(base: &mut Config, layer: ConfigLayer) {
    if let Some(pool_size) = layer.pool_size {
        base.pool_size = pool_size;
    }
    if let Some(interval) = layer.poll_interval_ms {
        base.poll_interval_ms = interval;
    }
    if let Some(level) = layer.log_level {
        base.log_level = level;
    }
}

/// Apply `PARPROC_*` overrides. `lookup` resolves a variable name to its value.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("PARPROC_POOL_SIZE") {
        match val.parse() {
            Ok(n) => config.pool_size = n,
            Err(_) => tracing::warn!(value = %val, "Ignoring invalid PARPROC_POOL_SIZE"),
        }
    }
    if let Some(val) = lookup("PARPROC_POLL_INTERVAL_MS") {
        match val.parse() {
            Ok(n) => config.poll_interval_ms = n,
            Err(_) => tracing::warn!(value = %val, "Ignoring invalid PARPROC_POLL_INTERVAL_MS"),
        }
    }
    if let Some(val) = lookup("PARPROC_LOG_LEVEL") {
        config.log_level = val;
    }
}
