//! Console attachment to a running worker
//!
//! The file-runner worker exposes its script's console on a local TCP port.
//! A [`ConsoleSession`] connects to it, forwards queued commands as lines,
//! streams decoded output to [`SessionObserver`]s in batches, and closes when
//! the worker prints its completion line, hangs up, or stays silent too long.
//!
//! # Module Structure
//!
//! - `session` - state machine and the send/receive/flush threads
//! - `observer` - frontend callbacks, notices, async-channel observer
//! - `decoder` - UTF-8 decoding across chunk boundaries
//! - `sentinel` - completion line detection and exit code parsing

mod decoder;
mod observer;
mod sentinel;
mod session;

pub use decoder::Utf8ChunkDecoder;
pub use observer::{ChannelObserver, SessionEvent, SessionNotice, SessionObserver};
pub use sentinel::{parse_exit_code, ExitSignal, SentinelScanner};
pub use session::{ConsoleSession, SessionState, TERMINATION_COMMAND};
