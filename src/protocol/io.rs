//! Line-level encoding for the request/reply protocol
//!
//! Every message is one JSON value on one line; the reply is one JSON value on
//! one line. Nothing else frames the exchange.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::logging::log_preview;

/// Serialize a message to a single JSONL line (without the newline)
///
/// `serde_json` never emits raw newlines, so the result is always one line.
pub fn encode_message<T: Serialize + ?Sized>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(BridgeError::Encode)
}

/// Parse one reply line from a worker
///
/// An empty or non-JSON line becomes a `ParseFailure` carrying a truncated
/// preview of the line and the worker's stderr.
pub fn parse_reply(line: &str, stderr: impl FnOnce() -> String) -> Result<Value> {
    serde_json::from_str(line.trim()).map_err(|source| {
        let (preview, raw_len) = log_preview(line);
        let stderr = stderr();
        warn!(
            raw_input = %preview,
            raw_len,
            error = %source,
            stderr = %stderr,
            "Worker reply is not valid JSON"
        );
        BridgeError::ParseFailure {
            raw: preview.to_string(),
            stderr,
            source,
        }
    })
}
