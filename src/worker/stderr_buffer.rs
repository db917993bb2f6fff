//! Stderr ring buffer for worker diagnostics
//!
//! Workers report crashes (missing runtime classes, stack traces) on stderr
//! while their stdout carries the reply. A background thread drains stderr so
//! the pipe never fills up, forwards each line to the log, and keeps the most
//! recent lines for error reports such as a `ParseFailure`.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Default maximum number of lines to buffer
pub const DEFAULT_MAX_LINES: usize = 200;

/// Default maximum total bytes to buffer (4KB)
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024;

#[derive(Debug, Default)]
struct Lines {
    lines: VecDeque<String>,
    bytes: usize,
}

/// A thread-safe ring buffer for stderr lines
#[derive(Debug, Clone)]
pub struct StderrBuffer {
    inner: Arc<Mutex<Lines>>,
    max_lines: usize,
    max_bytes: usize,
}

impl Default for StderrBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES, DEFAULT_MAX_BYTES)
    }
}

impl StderrBuffer {
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Lines::default())),
            max_lines,
            max_bytes,
        }
    }

    /// Add a line, evicting the oldest lines past either limit
    pub fn push_line(&self, line: String) {
        let mut inner = self.inner.lock();

        while inner.bytes + line.len() > self.max_bytes && !inner.lines.is_empty() {
            if let Some(old) = inner.lines.pop_front() {
                inner.bytes = inner.bytes.saturating_sub(old.len());
            }
        }
        while inner.lines.len() >= self.max_lines {
            match inner.lines.pop_front() {
                Some(old) => inner.bytes = inner.bytes.saturating_sub(old.len()),
                None => break,
            }
        }

        inner.bytes += line.len();
        inner.lines.push_back(line);
    }

    /// All buffered lines joined with newlines
    pub fn get_contents(&self) -> String {
        let inner = self.inner.lock();
        inner.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lines.is_empty()
    }
}

/// Stderr buffer plus the reader thread that fills it
#[derive(Debug)]
pub struct StderrCapture {
    pub buffer: StderrBuffer,
    join_handle: JoinHandle<()>,
}

impl StderrCapture {
    /// Wait for the reader thread to reach end of stream, with timeout
    ///
    /// Returns true if the thread completed within the timeout.
    pub fn wait_with_timeout(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(10);

        while start.elapsed() < timeout {
            if self.join_handle.is_finished() {
                return true;
            }
            thread::sleep(poll_interval);
        }

        self.join_handle.is_finished()
    }

    /// Buffer contents after giving the reader up to `timeout` to finish
    pub fn get_contents_with_timeout(&self, timeout: Duration) -> String {
        self.wait_with_timeout(timeout);
        self.buffer.get_contents()
    }
}

/// Spawn a reader thread that tees worker stderr to the log and a buffer
pub fn spawn_stderr_reader<R: Read + Send + 'static>(stderr: R, label: String) -> StderrCapture {
    let buffer = StderrBuffer::default();
    let buffer_clone = buffer.clone();

    let join_handle = thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line_result in reader.lines() {
            match line_result {
                Ok(line) => {
                    debug!(target: "WORKER", worker = %label, "{}", line);
                    buffer_clone.push_line(line);
                }
                Err(e) => {
                    warn!(target: "WORKER", worker = %label, error = %e, "stderr read error");
                    break;
                }
            }
        }
        debug!(target: "WORKER", worker = %label, "stderr reader exiting");
    });

    StderrCapture {
        buffer,
        join_handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_buffer_basic_operations() {
        let buffer = StderrBuffer::new(10, 1024);
        assert!(buffer.is_empty());
        assert_eq!(buffer.get_contents(), "");

        buffer.push_line("line 1".to_string());
        buffer.push_line("line 2".to_string());

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get_contents(), "line 1\nline 2");
    }

    #[test]
    fn test_buffer_line_limit() {
        let buffer = StderrBuffer::new(3, 1024);
        for i in 1..=4 {
            buffer.push_line(format!("line {}", i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get_contents(), "line 2\nline 3\nline 4");
    }

    #[test]
    fn test_buffer_byte_limit() {
        // Each "line X" is 6 bytes, limit is 15
        let buffer = StderrBuffer::new(100, 15);
        buffer.push_line("line 1".to_string());
        buffer.push_line("line 2".to_string());
        buffer.push_line("line 3".to_string());

        assert_eq!(buffer.len(), 2);
        assert!(!buffer.get_contents().contains("line 1"));
    }

    #[test]
    fn test_buffer_clone_shares_data() {
        let a = StderrBuffer::new(10, 1024);
        let b = a.clone();
        a.push_line("from a".to_string());
        b.push_line("from b".to_string());
        assert_eq!(a.len(), 2);
        assert_eq!(a.get_contents(), b.get_contents());
    }

    #[test]
    fn test_spawn_stderr_reader_captures_stack_trace() {
        let stderr = Cursor::new(
            b"Exception in thread \"main\" java.lang.NoClassDefFoundError\n\tat Main.main\n".to_vec(),
        );
        let capture = spawn_stderr_reader(stderr, "fileAdder".to_string());

        assert!(capture.wait_with_timeout(Duration::from_millis(500)));
        let contents = capture.buffer.get_contents();
        assert!(contents.contains("NoClassDefFoundError"));
        assert!(contents.contains("at Main.main"));
    }

    #[test]
    fn test_stderr_capture_empty_stream() {
        let capture = spawn_stderr_reader(Cursor::new(Vec::<u8>::new()), "empty".to_string());
        assert_eq!(capture.get_contents_with_timeout(Duration::from_millis(200)), "");
    }
}
