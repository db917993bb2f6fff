//! TCP console session with a running worker
//!
//! `setup` connects to the worker's console port and starts three threads:
//!
//! - send: pops queued commands and writes each as one line
//! - receive: reads output chunks with a read timeout, watches for the
//!   completion line and counts consecutive timeouts
//! - flush: every flush interval, drains the output buffer and hands the text
//!   to observers in one piece
//!
//! `close` is the only way out of `Active` and can be called from any thread,
//! any number of times. It drops the command sender and the flush timer
//! sender, shuts the socket down, delivers what is still buffered and tells
//! observers the session stopped running.

use std::io::{ErrorKind, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, instrument, trace, warn};

use super::decoder::Utf8ChunkDecoder;
use super::observer::{SessionNotice, SessionObserver};
use super::sentinel::{ExitSignal, SentinelScanner};
use crate::config::ConsoleConfig;
use crate::error::{BridgeError, ErrorSeverity, Result, ResultExt, UserError};
use crate::logging::log_preview;

/// Reserved command asking the worker to kill the running script
pub const TERMINATION_COMMAND: &str = "#TERMINATE#";

/// Back-off after a spurious would-block before the read timeout elapsed
const SPURIOUS_WAKE_SLEEP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Active,
    Closed,
}

/// One console attachment to a worker. Single-use: once closed, create a new one.
pub struct ConsoleSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConsoleConfig,
    state: Mutex<SessionState>,
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
    commands: Mutex<Option<Sender<String>>>,
    flush_stop: Mutex<Option<Sender<()>>>,
    /// Handle kept only so `close` can shut the socket down
    stream: Mutex<Option<TcpStream>>,
    buffer: Mutex<Vec<String>>,
    /// Held for a whole drain-and-deliver so flushes never interleave
    flush_lock: Mutex<()>,
    read_timeouts: AtomicU32,
    exit_code: Mutex<Option<i32>>,
    finished: Mutex<bool>,
    finished_cv: Condvar,
}

impl ConsoleSession {
    pub fn new(config: ConsoleConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(SessionState::Disconnected),
                observers: RwLock::new(Vec::new()),
                commands: Mutex::new(None),
                flush_stop: Mutex::new(None),
                stream: Mutex::new(None),
                buffer: Mutex::new(Vec::new()),
                flush_lock: Mutex::new(()),
                read_timeouts: AtomicU32::new(0),
                exit_code: Mutex::new(None),
                finished: Mutex::new(false),
                finished_cv: Condvar::new(),
            }),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Connect once to `host:port` and start the session loops
    pub fn setup(&self, host: &str, port: u16) -> Result<()> {
        self.setup_with_grace(host, port, Duration::ZERO)
    }

    /// Like `setup`, but keeps retrying refused connections until `grace`
    /// has elapsed, for workers that are still binding their port
    #[instrument(skip(self))]
    pub fn setup_with_grace(&self, host: &str, port: u16, grace: Duration) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != SessionState::Disconnected {
                return Err(UserError::SessionAlreadyStarted.into());
            }
            *state = SessionState::Connecting;
        }

        let start = Instant::now();
        let mut attempts = 0u32;
        let connected = loop {
            attempts += 1;
            match connect(host, port, self.inner.config.connect_timeout()) {
                Err(BridgeError::ConnectionRefused { .. })
                    if start.elapsed() < grace && self.inner.state() == SessionState::Connecting =>
                {
                    trace!(attempts, "Console not accepting yet, retrying");
                    thread::sleep(self.inner.config.poll_interval());
                }
                other => break other,
            }
        };

        if self.inner.state() != SessionState::Connecting {
            debug!(attempts, "Session closed while connecting");
            return Err(UserError::NoActiveSession.into());
        }

        match connected {
            Ok(stream) => {
                debug!(attempts, "Console connected");
                self.inner.start(stream, port)
            }
            Err(err) => {
                warn!(attempts, error = %err, "Console connect failed");
                self.inner.fail_connect(&err);
                Err(err)
            }
        }
    }

    /// Queue a command for the worker
    ///
    /// Accepted commands are echoed to the output as `>cmd` when echo is on.
    pub fn enqueue_command(&self, command: &str) -> Result<()> {
        if self.inner.state() != SessionState::Active {
            return Err(UserError::NoActiveSession.into());
        }
        if command.is_empty() {
            return Err(UserError::EmptyCommand.into());
        }

        let Some(tx) = self.inner.commands.lock().clone() else {
            return Err(UserError::NoActiveSession.into());
        };
        if self.inner.config.echo_commands {
            self.inner.push_output(format!(">{}\n", command));
        }
        tx.send(command.to_string())
            .map_err(|_| BridgeError::from(UserError::NoActiveSession))?;

        let (preview, len) = log_preview(command);
        debug!(command = %preview, len, "Command queued");
        Ok(())
    }

    /// Ask the worker to kill the running script
    pub fn request_termination(&self) -> Result<()> {
        info!("Termination requested");
        self.enqueue_command(TERMINATION_COMMAND)
    }

    pub fn close(&self) {
        self.inner.close();
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Exit code from the worker's completion line, once seen
    pub fn exit_code(&self) -> Option<i32> {
        *self.inner.exit_code.lock()
    }

    /// Consecutive read timeouts since the last successful read
    pub fn read_timeouts(&self) -> u32 {
        self.inner.read_timeouts.load(Ordering::SeqCst)
    }

    /// Block until the session is closed and observers were told, or `timeout` elapses
    ///
    /// Returns true when the session finished.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut finished = self.inner.finished.lock();
        while !*finished {
            if self
                .inner
                .finished_cv
                .wait_until(&mut finished, deadline)
                .timed_out()
            {
                return *finished;
            }
        }
        true
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for ConsoleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSession")
            .field("state", &self.state())
            .field("read_timeouts", &self.read_timeouts())
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

/// Connect with a bounded timeout, trying every resolved address
fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let display = format!("{}:{}", host, port);
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(addr = %addr, error = %e, "Connect attempt failed");
                last_err = Some(connect_error(e, &display));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        BridgeError::Io(std::io::Error::new(
            ErrorKind::AddrNotAvailable,
            format!("{} did not resolve to any address", display),
        ))
    }))
}

fn connect_error(e: std::io::Error, addr: &str) -> BridgeError {
    match e.kind() {
        ErrorKind::ConnectionRefused => BridgeError::ConnectionRefused {
            addr: addr.to_string(),
        },
        ErrorKind::TimedOut | ErrorKind::WouldBlock => BridgeError::ConnectTimeout {
            addr: addr.to_string(),
        },
        _ => BridgeError::Io(e),
    }
}

impl Inner {
    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn observers(&self) -> Vec<Arc<dyn SessionObserver>> {
        self.observers.read().clone()
    }

    fn notice(&self, notice: SessionNotice) {
        match notice.severity() {
            ErrorSeverity::Info => info!(notice = %notice, "Session notice"),
            ErrorSeverity::Warning => warn!(notice = %notice, "Session notice"),
            _ => error!(notice = %notice, "Session notice"),
        }
        for observer in self.observers() {
            observer.notice(&notice);
        }
    }

    fn fail_connect(&self, err: &BridgeError) {
        *self.state.lock() = SessionState::Closed;
        let notice = match err {
            BridgeError::ConnectionRefused { addr } => SessionNotice::ConnectionRefused { addr: addr.clone() },
            BridgeError::ConnectTimeout { addr } => SessionNotice::ConnectTimeout { addr: addr.clone() },
            other => SessionNotice::TransportError {
                message: other.to_string(),
            },
        };
        self.notice(notice);
        self.mark_finished();
    }

    fn start(self: &Arc<Self>, stream: TcpStream, port: u16) -> Result<()> {
        let addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| format!("port {}", port));

        let prepared = (|| -> std::io::Result<(TcpStream, TcpStream)> {
            stream.set_read_timeout(Some(self.config.read_timeout()))?;
            stream.set_nodelay(true)?;
            Ok((stream.try_clone()?, stream.try_clone()?))
        })();
        let (reader, writer) = match prepared {
            Ok(pair) => pair,
            Err(e) => {
                let err = BridgeError::Io(e);
                self.fail_connect(&err);
                return Err(err);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        {
            let mut state = self.state.lock();
            if *state != SessionState::Connecting {
                debug!("Session closed during connect, dropping stream");
                return Err(UserError::NoActiveSession.into());
            }
            *self.commands.lock() = Some(cmd_tx);
            *self.flush_stop.lock() = Some(stop_tx);
            *self.stream.lock() = Some(stream);
            *state = SessionState::Active;
        }

        self.notice(SessionNotice::Connected { addr });
        for observer in self.observers() {
            observer.running_changed(true);
        }

        let spawned = self
            .spawn_loop("console-send", move |inner| inner.send_loop(writer, cmd_rx))
            .and_then(|_| {
                self.spawn_loop("console-receive", move |inner| inner.receive_loop(reader, port))
            })
            .and_then(|_| self.spawn_loop("console-flush", move |inner| inner.flush_loop(stop_rx)));

        if let Err(e) = spawned {
            error!(error = %e, "Failed to start session threads");
            self.close();
            return Err(BridgeError::Io(e));
        }
        Ok(())
    }

    fn spawn_loop<F>(self: &Arc<Self>, name: &str, body: F) -> std::io::Result<()>
    where
        F: FnOnce(Arc<Inner>) + Send + 'static,
    {
        let inner = Arc::clone(self);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(inner))
            .map(|_| ())
    }

    fn send_loop<W: Write>(&self, mut writer: W, commands: Receiver<String>) {
        let poll = self.config.poll_interval();
        loop {
            match commands.recv_timeout(poll) {
                Ok(command) => {
                    if self.state() != SessionState::Active {
                        break;
                    }
                    let line = format!("{}\n", command);
                    if let Err(e) = writer.write_all(line.as_bytes()).and_then(|_| writer.flush()) {
                        if self.state() == SessionState::Active {
                            self.notice(SessionNotice::SendFailed {
                                message: e.to_string(),
                            });
                            self.close();
                        }
                        break;
                    }
                    trace!(bytes = line.len(), "Command sent");
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.state() != SessionState::Active {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Send loop exited");
    }

    fn receive_loop(&self, mut reader: TcpStream, port: u16) {
        let read_timeout = self.config.read_timeout();
        let max_timeouts = self.config.max_read_timeouts;
        let mut chunk = vec![0u8; self.config.read_chunk_bytes.max(1)];
        let mut decoder = Utf8ChunkDecoder::default();
        let mut scanner = SentinelScanner::default();

        while self.state() == SessionState::Active {
            let started = Instant::now();
            match reader.read(&mut chunk) {
                Ok(0) => {
                    if self.state() != SessionState::Active {
                        break;
                    }
                    let rest = decoder.finish();
                    let signal = scanner.feed(&rest).or_else(|| scanner.finish());
                    if !rest.is_empty() {
                        self.push_output(rest);
                    }
                    match signal {
                        Some(signal) => self.finish_task(signal),
                        None => {
                            info!("Worker closed the console connection");
                            self.close();
                        }
                    }
                    break;
                }
                Ok(n) => {
                    self.read_timeouts.store(0, Ordering::SeqCst);
                    let text = decoder.decode(&chunk[..n]);
                    let signal = scanner.feed(&text);
                    if !text.is_empty() {
                        self.push_output(text);
                    }
                    if let Some(signal) = signal {
                        self.finish_task(signal);
                        break;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if started.elapsed() < read_timeout / 2 {
                        thread::sleep(SPURIOUS_WAKE_SLEEP);
                        continue;
                    }
                    if self.state() != SessionState::Active {
                        break;
                    }
                    let count = self.read_timeouts.fetch_add(1, Ordering::SeqCst) + 1;
                    if count > max_timeouts {
                        warn!(port, count, "Console silent for too long, closing");
                        self.notice(SessionNotice::ReadTimeoutEscalation {
                            port,
                            timeouts: count,
                        });
                        self.close();
                        break;
                    }
                    self.notice(SessionNotice::ReceiveTimedOut { count });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if self.state() != SessionState::Active {
                        break;
                    }
                    if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted) {
                        self.notice(SessionNotice::ConnectionReset);
                    } else {
                        self.notice(SessionNotice::TransportError {
                            message: e.to_string(),
                        });
                    }
                    self.close();
                    break;
                }
            }
        }
        debug!("Receive loop exited");
    }

    fn flush_loop(&self, stop: Receiver<()>) {
        let interval = self.config.flush_interval();
        while let Err(RecvTimeoutError::Timeout) = stop.recv_timeout(interval) {
            self.flush();
        }
        debug!("Flush timer stopped");
    }

    fn finish_task(&self, signal: ExitSignal) {
        *self.exit_code.lock() = signal.code;
        self.notice(SessionNotice::WorkerExited { code: signal.code });
        self.close();
    }

    /// Buffer output unless the session already closed
    ///
    /// The state is checked under the buffer lock, so anything pushed here
    /// is picked up by `close`'s final flush.
    fn push_output(&self, text: String) {
        let mut buffer = self.buffer.lock();
        if self.state() == SessionState::Closed {
            trace!(len = text.len(), "Output after close dropped");
            return;
        }
        buffer.push(text);
    }

    fn flush(&self) {
        let _serial = self.flush_lock.lock();
        let chunks = mem::take(&mut *self.buffer.lock());
        if chunks.is_empty() {
            return;
        }
        let text = chunks.concat();
        for observer in self.observers() {
            observer.append_output(&text);
            if observer.autoscroll() {
                observer.scroll_to_end();
            }
        }
    }

    fn close(&self) {
        let previous = mem::replace(&mut *self.state.lock(), SessionState::Closed);
        match previous {
            SessionState::Closed => return,
            SessionState::Disconnected | SessionState::Connecting => {
                self.mark_finished();
                return;
            }
            SessionState::Active => {}
        }

        self.commands.lock().take();
        self.flush_stop.lock().take();
        if let Some(stream) = self.stream.lock().take() {
            stream
                .shutdown(Shutdown::Both)
                .or_else(|e| if e.kind() == ErrorKind::NotConnected { Ok(()) } else { Err(e) })
                .warn_on_err();
        }

        self.flush();
        self.read_timeouts.store(0, Ordering::SeqCst);
        info!(exit_code = ?*self.exit_code.lock(), "Console session closed");

        for observer in self.observers() {
            observer.running_changed(false);
        }
        self.mark_finished();
    }

    fn mark_finished(&self) {
        *self.finished.lock() = true;
        self.finished_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ChannelObserver, SessionEvent};
    use std::net::TcpListener;

    /// Socket stand-in whose peer is gone
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "peer went away"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn fast_config() -> ConsoleConfig {
        ConsoleConfig {
            poll_interval_ms: 10,
            flush_interval_ms: 10,
            ..ConsoleConfig::default()
        }
    }

    fn observed() -> (ConsoleSession, async_channel::Receiver<SessionEvent>) {
        let session = ConsoleSession::new(fast_config());
        let (observer, rx) = ChannelObserver::new(false);
        session.subscribe(Arc::new(observer));
        (session, rx)
    }

    fn drain(rx: &async_channel::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn test_connect_error_classification() {
        let addr = "127.0.0.1:1918";
        assert!(matches!(
            connect_error(ErrorKind::TimedOut.into(), addr),
            BridgeError::ConnectTimeout { .. }
        ));
        assert!(matches!(
            connect_error(ErrorKind::ConnectionRefused.into(), addr),
            BridgeError::ConnectionRefused { .. }
        ));
        assert!(matches!(
            connect_error(ErrorKind::PermissionDenied.into(), addr),
            BridgeError::Io(_)
        ));
    }

    #[test]
    fn test_connect_timeout_is_reported_without_running() {
        let (session, rx) = observed();
        *session.inner.state.lock() = SessionState::Connecting;

        let err = connect_error(ErrorKind::TimedOut.into(), "10.0.0.1:1918");
        session.inner.fail_connect(&err);

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.wait_closed(Duration::ZERO));
        assert_eq!(
            drain(&rx),
            vec![SessionEvent::Notice(SessionNotice::ConnectTimeout {
                addr: "10.0.0.1:1918".to_string()
            })]
        );
    }

    #[test]
    fn test_send_failure_closes_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (session, rx) = observed();
        session.setup("127.0.0.1", port).unwrap();
        let _peer = listener.accept().unwrap();

        let (tx, commands) = mpsc::channel();
        tx.send("dir".to_string()).unwrap();
        session.inner.send_loop(BrokenPipe, commands);

        assert!(!session.is_running());
        assert!(session.wait_closed(Duration::from_secs(5)));
        let events = drain(&rx);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Notice(SessionNotice::SendFailed { .. })
        )));
        let running: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::RunningChanged(_)))
            .collect();
        assert_eq!(
            running,
            vec![&SessionEvent::RunningChanged(true), &SessionEvent::RunningChanged(false)]
        );
    }

    #[test]
    fn test_connect_finishing_after_close_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (session, rx) = observed();

        *session.inner.state.lock() = SessionState::Connecting;
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.wait_closed(Duration::ZERO));

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let err = session.inner.start(stream, port).unwrap_err();
        assert!(matches!(err, BridgeError::User(UserError::NoActiveSession)));
        assert!(!session.is_running());
        assert!(drain(&rx).is_empty());
    }
}
