//! Detection of the worker's completion line
//!
//! The file runner ends a task by printing a line that starts with `#` and
//! ends with the script's exit code, e.g. `#进程已退出，代码：0`.

/// A complete completion line was seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSignal {
    pub code: Option<i32>,
}

/// Watches decoded output for a line beginning with `#`
///
/// Chunks may end mid-line, so the scanner tracks whether the next chunk
/// starts a new line and collects a completion line until its newline.
#[derive(Debug)]
pub struct SentinelScanner {
    at_line_start: bool,
    pending: Option<String>,
}

impl Default for SentinelScanner {
    fn default() -> Self {
        Self {
            at_line_start: true,
            pending: None,
        }
    }
}

impl SentinelScanner {
    pub fn feed(&mut self, text: &str) -> Option<ExitSignal> {
        for segment in text.split_inclusive('\n') {
            if let Some(line) = self.pending.as_mut() {
                line.push_str(segment);
            } else if self.at_line_start && segment.starts_with('#') {
                self.pending = Some(segment.to_string());
            }

            self.at_line_start = segment.ends_with('\n');
            if self.at_line_start {
                if let Some(line) = self.pending.take() {
                    return Some(ExitSignal {
                        code: parse_exit_code(&line),
                    });
                }
            }
        }
        None
    }

    /// End of stream: an unterminated completion line still counts
    pub fn finish(&mut self) -> Option<ExitSignal> {
        self.pending.take().map(|line| ExitSignal {
            code: parse_exit_code(&line),
        })
    }
}

/// Trailing integer of a completion line
pub fn parse_exit_code(line: &str) -> Option<i32> {
    let trimmed = line.trim_end();
    let head = trimmed.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &trimmed[head.len()..];
    if digits.is_empty() {
        return None;
    }
    let code: i32 = digits.parse().ok()?;
    if head.ends_with('-') {
        Some(-code)
    } else {
        Some(code)
    }
}
