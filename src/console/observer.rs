//! Frontend boundary of a console session
//!
//! A session never touches widgets. It reports decoded output, running-state
//! changes and notices to every subscribed [`SessionObserver`], and asks each
//! observer whether it wants to be scrolled to the end after new output.

use std::fmt;

use tracing::trace;

use crate::error::{BridgeError, ErrorSeverity};

/// Something the frontend should tell the user about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Connected { addr: String },
    ConnectionRefused { addr: String },
    ConnectTimeout { addr: String },
    /// A read timed out; `count` consecutive timeouts so far
    ReceiveTimedOut { count: u32 },
    /// Too many consecutive timeouts; the session was closed
    ReadTimeoutEscalation { port: u16, timeouts: u32 },
    ConnectionReset,
    TransportError { message: String },
    SendFailed { message: String },
    /// The worker reported completion; `code` is None when the line had no number
    WorkerExited { code: Option<i32> },
}

impl SessionNotice {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connected { .. } | Self::WorkerExited { .. } => ErrorSeverity::Info,
            Self::ReceiveTimedOut { .. } | Self::ConnectTimeout { .. } | Self::ConnectionReset => {
                ErrorSeverity::Warning
            }
            Self::ConnectionRefused { .. }
            | Self::ReadTimeoutEscalation { .. }
            | Self::TransportError { .. }
            | Self::SendFailed { .. } => ErrorSeverity::Error,
        }
    }
}

impl fmt::Display for SessionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { addr } => write!(f, "Connected to {}", addr),
            Self::ConnectionRefused { addr } => {
                f.write_str(&BridgeError::ConnectionRefused { addr: addr.clone() }.user_message())
            }
            Self::ConnectTimeout { addr } => {
                f.write_str(&BridgeError::ConnectTimeout { addr: addr.clone() }.user_message())
            }
            Self::ReceiveTimedOut { count } => {
                write!(f, "No output from the worker yet (timeout #{})", count)
            }
            Self::ReadTimeoutEscalation { port, timeouts } => f.write_str(
                &BridgeError::ReadTimeoutEscalation {
                    port: *port,
                    timeouts: *timeouts,
                }
                .user_message(),
            ),
            Self::ConnectionReset => f.write_str(&BridgeError::ConnectionReset.user_message()),
            Self::TransportError { message } => write!(f, "Console connection failed: {}", message),
            Self::SendFailed { message } => write!(f, "Could not send command: {}", message),
            Self::WorkerExited { code: Some(code) } => write!(f, "Process exited with code {}", code),
            Self::WorkerExited { code: None } => f.write_str("Process exited"),
        }
    }
}

/// Receives everything a console session reports
///
/// Callbacks run on session threads. They must not call
/// [`ConsoleSession::close`](super::ConsoleSession::close) synchronously;
/// hand the request to another thread instead.
pub trait SessionObserver: Send + Sync {
    /// Decoded output, in arrival order
    fn append_output(&self, text: &str);

    fn scroll_to_end(&self) {}

    /// Whether the session should call `scroll_to_end` after delivering output
    fn autoscroll(&self) -> bool {
        false
    }

    fn running_changed(&self, running: bool);

    fn notice(&self, _notice: &SessionNotice) {}
}

/// Observer callbacks as messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Output(String),
    ScrollToEnd,
    RunningChanged(bool),
    Notice(SessionNotice),
}

/// Forwards every callback into an async channel
///
/// The receiver can be awaited from an async frontend or drained with
/// `recv_blocking` from a plain thread.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: async_channel::Sender<SessionEvent>,
    autoscroll: bool,
}

impl ChannelObserver {
    pub fn new(autoscroll: bool) -> (Self, async_channel::Receiver<SessionEvent>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx, autoscroll }, rx)
    }

    fn send(&self, event: SessionEvent) {
        // try_send on an unbounded channel only fails once the receiver is gone
        if self.tx.try_send(event).is_err() {
            trace!("Session event receiver dropped");
        }
    }
}

impl SessionObserver for ChannelObserver {
    fn append_output(&self, text: &str) {
        self.send(SessionEvent::Output(text.to_string()));
    }

    fn scroll_to_end(&self) {
        self.send(SessionEvent::ScrollToEnd);
    }

    fn autoscroll(&self) -> bool {
        self.autoscroll
    }

    fn running_changed(&self, running: bool) {
        self.send(SessionEvent::RunningChanged(running));
    }

    fn notice(&self, notice: &SessionNotice) {
        self.send(SessionEvent::Notice(notice.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_notice_names_port() {
        let notice = SessionNotice::ReadTimeoutEscalation {
            port: 1918,
            timeouts: 5,
        };
        assert!(notice.to_string().contains("1918"));
        assert_eq!(notice.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_exit_notice_text() {
        assert_eq!(
            SessionNotice::WorkerExited { code: Some(0) }.to_string(),
            "Process exited with code 0"
        );
        assert_eq!(SessionNotice::WorkerExited { code: None }.to_string(), "Process exited");
    }

    #[test]
    fn test_channel_observer_forwards_events_in_order() {
        let (observer, rx) = ChannelObserver::new(true);
        observer.running_changed(true);
        observer.append_output("hello\n");
        if observer.autoscroll() {
            observer.scroll_to_end();
        }
        observer.notice(&SessionNotice::ConnectionReset);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::RunningChanged(true),
                SessionEvent::Output("hello\n".into()),
                SessionEvent::ScrollToEnd,
                SessionEvent::Notice(SessionNotice::ConnectionReset),
            ]
        );
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (observer, rx) = ChannelObserver::new(false);
        drop(rx);
        observer.append_output("ignored");
        assert!(!observer.autoscroll());
    }
}
