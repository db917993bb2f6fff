//! Typed operations over the bundled worker programs

use std::path::Path;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::channel::RequestReplyChannel;
use crate::error::{BridgeError, Result};
use crate::logging::log_preview;
use crate::worker::WorkerProgram;

/// One row of the file table, as reported by the file-adder worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String, String, String)")]
pub struct FileInfo {
    pub name: String,
    /// Last-modified timestamp, already formatted by the worker
    pub modified: String,
    pub extension: String,
    /// Human-readable size
    pub size: String,
}

impl From<(String, String, String, String)> for FileInfo {
    fn from((name, modified, extension, size): (String, String, String, String)) -> Self {
        Self {
            name,
            modified,
            extension,
            size,
        }
    }
}

/// Refreshed modification date and size of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)")]
pub struct FileStat {
    pub modified: String,
    pub size: String,
}

impl From<(String, String)> for FileStat {
    fn from((modified, size): (String, String)) -> Self {
        Self { modified, size }
    }
}

/// Outcome of reading a JSON document through the reader worker
#[derive(Debug, Clone, PartialEq)]
pub enum JsonLoad {
    Data(Vec<Value>),
    Empty,
    Missing,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReaderReply {
    Data(Vec<Value>),
    Flag(i64),
}

/// Convenience wrapper that knows each worker's request and reply shape
#[derive(Debug, Clone)]
pub struct WorkerOps {
    channel: RequestReplyChannel,
}

impl WorkerOps {
    pub fn new(channel: RequestReplyChannel) -> Self {
        Self { channel }
    }

    /// Collect file-table rows for `paths`, in the same order
    pub fn add_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<FileInfo>> {
        if paths.is_empty() {
            // The worker prints nothing for an empty list
            return Ok(Vec::new());
        }
        let reply = self.channel.call(WorkerProgram::FileAdder, &[path_list(paths)])?;
        decode(reply)
    }

    /// Refresh modification date and size for `paths`
    pub fn file_stats<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<FileStat>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let reply = self
            .channel
            .call(WorkerProgram::DateAndSizeGetter, &[path_list(paths)])?;
        decode(reply)
    }

    pub fn load_json(&self, path: &Path) -> Result<JsonLoad> {
        let reply = self.channel.call(WorkerProgram::JsonReader, &[path_list(&[path])])?;
        let raw = reply.to_string();
        match decode::<ReaderReply>(reply)? {
            ReaderReply::Data(items) => Ok(JsonLoad::Data(items)),
            ReaderReply::Flag(0) => Ok(JsonLoad::Empty),
            ReaderReply::Flag(-1) => Ok(JsonLoad::Missing),
            ReaderReply::Flag(other) => Err(BridgeError::ParseFailure {
                raw,
                stderr: String::new(),
                source: serde_json::Error::custom(format!("unknown reader flag {}", other)),
            }),
        }
    }

    /// Write `data` to `path` as a JSON array; false when the worker reports failure
    pub fn save_json(&self, path: &Path, data: &[Value]) -> Result<bool> {
        let messages = [path_list(&[path]), Value::Array(data.to_vec())];
        let reply = self.channel.call(WorkerProgram::JsonWriter, &messages)?;
        let saved = decode::<i64>(reply)? == 1;
        if !saved {
            warn!(path = %path.display(), "Worker failed to save JSON");
        }
        Ok(saved)
    }
}

fn path_list<P: AsRef<Path>>(paths: &[P]) -> Value {
    json!(paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>())
}

/// Reshape a parsed reply, reporting a mismatch like any other bad reply
fn decode<T: DeserializeOwned>(reply: Value) -> Result<T> {
    let raw = reply.to_string();
    serde_json::from_value(reply).map_err(|source| {
        let (preview, len) = log_preview(&raw);
        debug!(reply = %preview, len, error = %source, "Unexpected reply shape");
        BridgeError::ParseFailure {
            raw: preview.to_string(),
            stderr: String::new(),
            source,
        }
    })
}
