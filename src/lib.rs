//! Script Bridge - worker bridge for a script launcher frontend
//!
//! This library connects a frontend to the bundled Java workers: one-shot
//! JSONL request/reply exchanges over a worker's stdio, and a TCP console
//! session attached to a running script.

pub mod config;
pub mod console;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod protocol;
pub mod worker;

pub use console::{ConsoleSession, SessionObserver, SessionState};
pub use error::{BridgeError, Result, UserError};
pub use launcher::ScriptLauncher;
pub use protocol::{RequestReplyChannel, WorkerOps};
