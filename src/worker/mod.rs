//! Worker process management
//!
//! This module handles everything below the wire protocols:
//! - Finding the worker runtime and building launch commands
//! - Spawning workers with piped stdio and no console window
//! - Process-group teardown and stderr capture

mod launcher;
mod process;
mod stderr_buffer;

pub use launcher::{find_executable, resolve_java, WorkerLauncher, WorkerProgram};
pub use process::{ProcessHandle, WorkerProcess};
pub use stderr_buffer::{spawn_stderr_reader, StderrBuffer, StderrCapture};
