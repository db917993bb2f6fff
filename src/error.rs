use thiserror::Error;
use tracing::{error, warn};

/// Error severity for UI display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,     // Blue - informational
    Warning,  // Yellow - recoverable
    Error,    // Red - operation failed
    Critical, // Red + modal - requires user action
}

/// Mistakes a frontend can make when driving the bridge.
///
/// These are rejected before anything reaches a worker, so they are always
/// safe to show to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserError {
    #[error("no active session")]
    NoActiveSession,

    #[error("empty command")]
    EmptyCommand,

    #[error("a script is already running")]
    SessionActive,

    #[error("console session was already started")]
    SessionAlreadyStarted,
}

/// Domain-specific errors for the worker bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to launch worker '{executable}': {source}")]
    Launch {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection refused by {addr}")]
    ConnectionRefused { addr: String },

    #[error("Timed out connecting to {addr}")]
    ConnectTimeout { addr: String },

    #[error("No data received after {timeouts} read timeouts on port {port}")]
    ReadTimeoutEscalation { port: u16, timeouts: u32 },

    #[error("Connection reset by worker")]
    ConnectionReset,

    #[error("Worker reply is not valid JSON: {source}")]
    ParseFailure {
        /// Truncated reply line
        raw: String,
        /// Whatever the worker wrote to stderr before exiting
        stderr: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    User(#[from] UserError),

    #[error("Worker I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode worker message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Launch { .. } => ErrorSeverity::Critical,
            Self::ConnectionRefused { .. } => ErrorSeverity::Error,
            Self::ConnectTimeout { .. } => ErrorSeverity::Warning,
            Self::ReadTimeoutEscalation { .. } => ErrorSeverity::Error,
            Self::ConnectionReset => ErrorSeverity::Warning,
            Self::ParseFailure { .. } => ErrorSeverity::Warning,
            Self::User(_) => ErrorSeverity::Info,
            Self::Io(_) => ErrorSeverity::Error,
            Self::Encode(_) => ErrorSeverity::Error,
            Self::Config(_) => ErrorSeverity::Warning,
        }
    }

    /// Whether the failure means "the operation did not succeed" rather than
    /// something the user has to fix before trying again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.severity(), ErrorSeverity::Critical)
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Launch { executable, .. } => format!(
                "Could not start the worker ({}). Check the Java path in settings.",
                executable
            ),
            Self::ConnectionRefused { addr } => {
                format!("Could not connect to the worker console at {}", addr)
            }
            Self::ConnectTimeout { addr } => {
                format!("Timed out connecting to the worker console at {}", addr)
            }
            Self::ReadTimeoutEscalation { port, .. } => format!(
                "The worker stopped responding. Check whether another program is listening on port {}.",
                port
            ),
            Self::ConnectionReset => "The worker console was closed".to_string(),
            Self::ParseFailure { .. } => "The worker returned an unreadable reply".to_string(),
            Self::User(e) => e.to_string(),
            Self::Io(e) => format!("Worker communication failed: {}", e),
            Self::Encode(e) => format!("Invalid request: {}", e),
            Self::Config(msg) => format!("Configuration issue: {}", msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and user doesn't need to know.
///
/// # Examples
///
/// ```ignore
/// use script_bridge::error::ResultExt;
///
/// // Log and keep going if the worker reply could not be read
/// let infos = ops.add_files(&paths).log_err().unwrap_or_default();
/// ```
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_render_short_messages() {
        assert_eq!(UserError::NoActiveSession.to_string(), "no active session");
        assert_eq!(UserError::EmptyCommand.to_string(), "empty command");
        let wrapped: BridgeError = UserError::SessionActive.into();
        assert_eq!(wrapped.user_message(), "a script is already running");
        assert_eq!(wrapped.severity(), ErrorSeverity::Info);
    }

    #[test]
    fn test_read_timeout_message_mentions_port() {
        let err = BridgeError::ReadTimeoutEscalation {
            port: 1918,
            timeouts: 5,
        };
        assert!(err.user_message().contains("1918"));
        assert!(err.to_string().contains("1918"));
    }

    #[test]
    fn test_parse_failure_is_recoverable() {
        let source = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = BridgeError::ParseFailure {
            raw: "not json".to_string(),
            stderr: String::new(),
            source,
        };
        assert!(err.is_recoverable());
        assert_eq!(err.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_launch_failure_is_critical() {
        let err = BridgeError::Launch {
            executable: "/missing/java".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(!err.is_recoverable());
        assert!(err.user_message().contains("/missing/java"));
    }

    #[test]
    fn test_result_ext_returns_value_or_none() {
        let ok: std::result::Result<u8, String> = Ok(7);
        assert_eq!(ok.log_err(), Some(7));
        let err: std::result::Result<u8, String> = Err("boom".to_string());
        assert_eq!(err.warn_on_err(), None);
    }
}
