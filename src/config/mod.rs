//! Configuration module - bridge settings
//!
//! This module provides functionality for:
//! - Loading configuration from ~/.script-bridge/config.json
//! - Default values for all settings
//! - Type definitions for config structures
//!
//! Configuration is passed explicitly into the channel, launcher and session
//! constructors; nothing here is process-global.
//!
//! # Module Structure
//!
//! - `defaults` - All default constant values
//! - `types` - Configuration struct definitions (Config, ConsoleConfig, etc.)
//! - `loader` - File system loading and parsing

mod defaults;
mod loader;
mod types;

pub use defaults::{DEFAULT_CONSOLE_HOST, DEFAULT_CONSOLE_PORT, DEFAULT_JAVA_COMMAND};

pub use types::{Config, ConsoleConfig, EnvironmentConfig, LoggingConfig, WorkerConfig};

pub use loader::{default_config_path, load_config, read_config};

#[cfg(test)]
pub use defaults::{
    DEFAULT_BACKEND_DIR, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_FLUSH_INTERVAL_MS,
    DEFAULT_MAX_READ_TIMEOUTS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_REPLY_EXIT_GRACE_MS,
};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
