//! One-shot request/reply exchanges with a worker
//!
//! Each `call` spawns its own worker, writes every message as one JSON line,
//! closes the worker's input, reads exactly one reply line and parses it.
//! Nothing is reused between calls, so concurrent calls need no coordination.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::io::{encode_message, parse_reply};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::logging::log_preview;
use crate::worker::{WorkerLauncher, WorkerProcess, WorkerProgram};

/// How long to wait for stderr to drain before reporting a bad reply
const STDERR_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RequestReplyChannel {
    launcher: WorkerLauncher,
    exit_grace: Duration,
}

impl RequestReplyChannel {
    pub fn new(launcher: WorkerLauncher, config: &WorkerConfig) -> Self {
        Self {
            launcher,
            exit_grace: config.reply_exit_grace(),
        }
    }

    /// Run one exchange with a fresh `program` worker
    ///
    /// Returns the parsed reply, or `BridgeError::ParseFailure` when the
    /// worker replied with something that is not JSON (or nothing at all).
    #[instrument(skip_all, fields(program = ?program, messages = messages.len()))]
    pub fn call(&self, program: WorkerProgram, messages: &[Value]) -> Result<Value> {
        let start = Instant::now();
        let lines = messages
            .iter()
            .map(encode_message)
            .collect::<Result<Vec<_>>>()?;

        let mut worker = self.launcher.spawn(program)?;
        let reply = exchange(&mut worker, &lines, self.exit_grace);

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            ok = reply.is_ok(),
            "Worker call finished"
        );
        reply
    }
}

/// Write all lines, close input, read one reply, reap the worker
pub(crate) fn exchange(worker: &mut WorkerProcess, lines: &[String], exit_grace: Duration) -> Result<Value> {
    for line in lines {
        let (preview, len) = log_preview(line);
        debug!(pid = worker.pid(), payload = %preview, len, "Sending worker message");
        if let Err(e) = worker.write_line(line) {
            // The worker stopped reading; whatever it printed is still its reply
            warn!(pid = worker.pid(), error = %e, "Worker stopped accepting input");
            break;
        }
    }
    worker.close_input();

    let line = worker.read_line();
    reap(worker, exit_grace);
    let line = line?.unwrap_or_default();

    parse_reply(&line, || worker.stderr_contents(STDERR_SETTLE))
}

/// Wait briefly for the worker to exit on its own, then kill it
fn reap(worker: &mut WorkerProcess, exit_grace: Duration) {
    match worker.wait_timeout(exit_grace) {
        Ok(Some(code)) => debug!(pid = worker.pid(), code, "Worker exited after reply"),
        Ok(None) => {
            warn!(pid = worker.pid(), "Worker still running after reply, killing it");
            worker.kill();
        }
        Err(e) => {
            warn!(pid = worker.pid(), error = %e, "Could not wait for worker, killing it");
            worker.kill();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use serde_json::json;

    /// Channel whose "runtime" is `sh -c <script>`, program path ends up as $0
    fn sh_channel(script: &str) -> RequestReplyChannel {
        let launcher = WorkerLauncher::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            std::env::temp_dir(),
        );
        RequestReplyChannel::new(
            launcher,
            &WorkerConfig {
                reply_exit_grace_ms: 500,
            },
        )
    }

    #[test]
    fn test_call_returns_parsed_reply() {
        let channel = sh_channel(r#"read paths; echo '[["a.bat","2024-05-01","bat","10B"]]'"#);
        let reply = channel
            .call(WorkerProgram::FileAdder, &[json!(["/tmp/a.bat"])])
            .unwrap();
        assert_eq!(reply, json!([["a.bat", "2024-05-01", "bat", "10B"]]));
    }

    #[test]
    fn test_call_writes_messages_in_order_as_lines() {
        // Echo both request lines back inside one JSON array
        let channel = sh_channel(r#"read first; read second; echo "[$first,$second]""#);
        let reply = channel
            .call(
                WorkerProgram::JsonWriter,
                &[json!(["/tmp/presets.json"]), json!([{"name": "build"}])],
            )
            .unwrap();
        assert_eq!(reply, json!([["/tmp/presets.json"], [{"name": "build"}]]));
    }

    #[test]
    fn test_call_closes_input_after_messages() {
        // `cat` only finishes once stdin is closed; the count proves one line per message
        let channel = sh_channel(r#"n=$(cat | wc -l); echo $n"#);
        let reply = channel
            .call(WorkerProgram::FileAdder, &[json!(1), json!(2), json!(3)])
            .unwrap();
        assert_eq!(reply, json!(3));
    }

    #[test]
    fn test_invalid_reply_is_parse_failure_not_panic() {
        let channel = sh_channel(r#"read x; echo 'Exception in thread main' >&2; echo 'not json at all'"#);
        let err = channel
            .call(WorkerProgram::FileAdder, &[json!(["ping"])])
            .unwrap_err();
        match err {
            BridgeError::ParseFailure { raw, stderr, .. } => {
                assert_eq!(raw, "not json at all");
                assert!(stderr.contains("Exception in thread main"));
            }
            other => panic!("Expected ParseFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_non_utf8_reply_is_parse_failure() {
        // GBK bytes, as a worker on a Chinese-locale system would print them
        let channel = sh_channel(r"read x; printf '\325\322\262\273\n'");
        let err = channel.call(WorkerProgram::JsonReader, &[json!(["x"])]).unwrap_err();
        match err {
            BridgeError::ParseFailure { raw, .. } => assert!(raw.contains('\u{FFFD}')),
            other => panic!("Expected ParseFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_worker_that_replies_nothing_is_parse_failure() {
        let channel = sh_channel("exit 1");
        let err = channel.call(WorkerProgram::JsonReader, &[json!(["x"])]).unwrap_err();
        assert!(matches!(err, BridgeError::ParseFailure { .. }));
    }

    #[test]
    fn test_lingering_worker_is_killed_after_reply() {
        let channel = sh_channel("read x; echo 1; sleep 30");
        let start = Instant::now();
        let reply = channel.call(WorkerProgram::JsonWriter, &[json!(["x"])]).unwrap();
        assert_eq!(reply, json!(1));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_concurrent_calls_are_independent() {
        let channel = sh_channel(r#"read x; echo "$x""#);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let channel = channel.clone();
                std::thread::spawn(move || channel.call(WorkerProgram::FileAdder, &[json!([i])]))
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap().unwrap(), json!([i]));
        }
    }

    #[test]
    fn test_missing_runtime_is_launch_error() {
        let launcher = WorkerLauncher::new("/no/such/runtime", vec![], "/tmp");
        let channel = RequestReplyChannel::new(launcher, &WorkerConfig::default());
        let err = channel.call(WorkerProgram::FileAdder, &[json!([])]).unwrap_err();
        assert!(matches!(err, BridgeError::Launch { .. }));
    }
}
