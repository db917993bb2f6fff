//! Configuration loading from file system
//!
//! Handles reading and parsing the JSON config file.

use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use super::types::Config;
use crate::error::{BridgeError, Result};

/// Default config location (~/.script-bridge/config.json)
pub fn default_config_path() -> PathBuf {
    PathBuf::from(shellexpand::tilde("~/.script-bridge/config.json").as_ref())
}

/// Load configuration from a JSON file, falling back to defaults
///
/// Returns Config::default() if the file is missing or cannot be parsed.
/// Missing fields fall back to their individual defaults.
#[instrument(name = "load_config", skip_all, fields(path = %path.display()))]
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Config::default();
    }

    match read_config(path) {
        Ok(config) => {
            info!(path = %path.display(), "Successfully loaded config");
            config
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Invalid config, using defaults");
            Config::default()
        }
    }
}

/// Strictly read a config file; every problem is a `BridgeError::Config`
pub fn read_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;

    serde_json::from_str::<Config>(&contents).map_err(|e| {
        // Provide helpful error message for common config mistakes
        let error_hint = if e.to_string().contains("invalid type") {
            "\n\nHint: durations are plain millisecond numbers and the port is an integer. Example:\n\
            {\n\
              \"console\": { \"port\": 1918, \"readTimeoutMs\": 3000 }\n\
            }"
        } else {
            ""
        };
        BridgeError::Config(format!("{}: {}{}", path.display(), e, error_hint))
    })
}
