//! Configuration type definitions
//!
//! This module contains all the struct definitions for configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;

// ============================================
// ENVIRONMENT
// ============================================

/// Where the worker runtime and its bundled programs live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// Explicit path to the Java runtime (None = auto-detect)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_path: Option<String>,
    /// Directory containing the worker .jar programs
    #[serde(default = "default_backend_dir")]
    pub backend_dir: String,
}

fn default_backend_dir() -> String {
    DEFAULT_BACKEND_DIR.to_string()
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            java_path: None,
            backend_dir: default_backend_dir(),
        }
    }
}

impl EnvironmentConfig {
    /// Backend directory with `~` expanded
    pub fn backend_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.backend_dir).as_ref())
    }
}

// ============================================
// CONSOLE SESSION
// ============================================

/// Timing and endpoint settings for the console session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Consecutive read timeouts tolerated before the session is force-closed
    #[serde(default = "default_max_read_timeouts")]
    pub max_read_timeouts: u32,
    /// How often the send loop wakes up to notice shutdown
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often buffered output is handed to observers
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// How long a freshly launched worker gets to open its console port
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
    /// Echo accepted commands into the output as `>cmd`
    #[serde(default = "default_echo_commands")]
    pub echo_commands: bool,
    #[serde(default = "default_autoscroll")]
    pub autoscroll: bool,
}

fn default_host() -> String {
    DEFAULT_CONSOLE_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_CONSOLE_PORT
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}
fn default_max_read_timeouts() -> u32 {
    DEFAULT_MAX_READ_TIMEOUTS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}
fn default_startup_grace_ms() -> u64 {
    DEFAULT_STARTUP_GRACE_MS
}
fn default_read_chunk_bytes() -> usize {
    DEFAULT_READ_CHUNK_BYTES
}
fn default_echo_commands() -> bool {
    DEFAULT_ECHO_COMMANDS
}
fn default_autoscroll() -> bool {
    DEFAULT_AUTOSCROLL
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            host: default_host(),
            port: DEFAULT_CONSOLE_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_read_timeouts: DEFAULT_MAX_READ_TIMEOUTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            startup_grace_ms: DEFAULT_STARTUP_GRACE_MS,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            echo_commands: DEFAULT_ECHO_COMMANDS,
            autoscroll: DEFAULT_AUTOSCROLL,
        }
    }
}

impl ConsoleConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

// ============================================
// ONE-SHOT WORKERS
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(default = "default_reply_exit_grace_ms")]
    pub reply_exit_grace_ms: u64,
}

fn default_reply_exit_grace_ms() -> u64 {
    DEFAULT_REPLY_EXIT_GRACE_MS
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            reply_exit_grace_ms: DEFAULT_REPLY_EXIT_GRACE_MS,
        }
    }
}

impl WorkerConfig {
    pub fn reply_exit_grace(&self) -> Duration {
        Duration::from_millis(self.reply_exit_grace_ms)
    }
}

// ============================================
// LOGGING
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log directory override (None = ~/.script-bridge/logs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            dir: None,
        }
    }
}

// ============================================
// MAIN CONFIG
// ============================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}
