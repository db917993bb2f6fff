//! Default configuration values
//!
//! All constants used throughout the config module are defined here.

/// Java runtime used when no override is configured and nothing better is found
pub const DEFAULT_JAVA_COMMAND: &str = "java";

/// Directory holding the bundled worker programs
pub const DEFAULT_BACKEND_DIR: &str = "./backend";

/// Console bridge endpoint (historically 8080, moved to avoid third-party conflicts)
pub const DEFAULT_CONSOLE_HOST: &str = "127.0.0.1";
pub const DEFAULT_CONSOLE_PORT: u16 = 1918;

/// Console session timing
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_MAX_READ_TIMEOUTS: u32 = 4;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 3000;

/// Bytes requested per socket read
pub const DEFAULT_READ_CHUNK_BYTES: usize = 1024;

/// Console display behavior
pub const DEFAULT_ECHO_COMMANDS: bool = true;
pub const DEFAULT_AUTOSCROLL: bool = true;

/// How long a one-shot worker may linger after replying before it is killed
pub const DEFAULT_REPLY_EXIT_GRACE_MS: u64 = 2000;

/// Default log filter when RUST_LOG is unset
pub const DEFAULT_LOG_LEVEL: &str = "info";
