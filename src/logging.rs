//! Structured JSONL logging plus human-readable stderr output.
//!
//! This module provides dual-output logging:
//! - **JSONL to file** (~/.script-bridge/logs/script-bridge.jsonl) - structured, one event per line
//! - **Pretty to stderr** - human-readable for developers
//!
//! # Usage
//!
//! ```rust,ignore
//! use script_bridge::logging;
//!
//! // Initialize logging - MUST keep guard alive for duration of program
//! let _guard = logging::init(&config.logging);
//!
//! // Use tracing macros directly
//! tracing::info!(event_type = "session", port = 1918, "Console attached");
//! ```

use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_NAME: &str = "script-bridge.jsonl";

/// Maximum length for raw payloads in logs (keeps worker replies from flooding the file)
const MAX_RAW_LOG_PREVIEW: usize = 200;

/// Guard that must be kept alive for the duration of the program.
/// Dropping this guard will flush and close the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the dual-output logging system.
///
/// Returns a guard that MUST be kept alive for the duration of the program.
/// If the log file cannot be opened, only the stderr layer is installed.
pub fn init(config: &LoggingConfig) -> LoggingGuard {
    let log_dir = config
        .dir
        .as_deref()
        .map(|dir| PathBuf::from(shellexpand::tilde(dir).as_ref()))
        .unwrap_or_else(default_log_dir);
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("[LOGGING] Failed to create log directory: {}", e);
    }
    let log_path = log_dir.join(LOG_FILE_NAME);

    // Environment filter - config level by default, RUST_LOG wins when set
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let pretty_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .compact();

    let file = OpenOptions::new().create(true).append(true).open(&log_path);

    // The JSON layer is optional so both outcomes share one subscriber type
    let (json_layer, file_guard) = match file {
        Ok(file) => {
            // Non-blocking writer so session threads never wait on disk
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file);
            let json_layer = fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_target(true)
                .with_level(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_span_events(FmtSpan::NONE);
            (Some(json_layer), Some(guard))
        }
        Err(e) => {
            eprintln!("[LOGGING] Failed to open log file {}: {}", log_path.display(), e);
            (None, None)
        }
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init();

    tracing::info!(
        event_type = "app_lifecycle",
        action = "started",
        log_path = %log_path.display(),
        "Logging initialized"
    );

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// Get the default log directory path (~/.script-bridge/logs/)
fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".script-bridge").join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("script-bridge-logs"))
}

/// Get a truncated preview of a raw payload for logging
///
/// Truncation happens on a char boundary so multi-byte output never panics.
pub fn log_preview(raw: &str) -> (&str, usize) {
    let len = raw.len();
    if len <= MAX_RAW_LOG_PREVIEW {
        return (raw, len);
    }
    let mut end = MAX_RAW_LOG_PREVIEW;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    (&raw[..end], len)
}

/// Category-tagged log line
///
/// Prefer tracing macros with structured fields for anything new.
pub fn log(category: &str, message: &str) {
    tracing::info!(category = category, "{}", message);
}

/// Log a script lifecycle event with structured fields
pub fn log_script_event(script: &str, action: &str, exit_code: Option<i32>) {
    match exit_code {
        Some(code) => {
            tracing::info!(
                event_type = "script_event",
                script = script,
                action = action,
                exit_code = code,
                "Script {} {}", action, script
            );
        }
        None => {
            tracing::info!(
                event_type = "script_event",
                script = script,
                action = action,
                "Script {} {}", action, script
            );
        }
    }
}
