//! JSONL request/reply protocol with the bundled workers
//!
//! Every exchange is one worker process: the bridge writes one JSON value per
//! line on the worker's stdin, closes it, and reads a single JSON line back.
//!
//! # Module Structure
//!
//! - `io`: line encoding and tolerant reply parsing
//! - `channel`: the one-shot exchange itself
//! - `ops`: typed wrappers for each worker program

mod channel;
mod io;
mod ops;

pub use channel::RequestReplyChannel;
pub use io::{encode_message, parse_reply};
pub use ops::{FileInfo, FileStat, JsonLoad, WorkerOps};
