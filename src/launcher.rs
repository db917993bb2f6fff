//! Running a script through the file-runner worker
//!
//! The file runner reads the script path from stdin, starts the script, and
//! serves its console on the configured port. `ScriptLauncher` ties that
//! worker to a fresh [`ConsoleSession`] and allows one running script at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::config::{Config, ConsoleConfig};
use crate::console::{ConsoleSession, SessionObserver};
use crate::error::{Result, UserError};
use crate::logging::log_script_event;
use crate::protocol::encode_message;
use crate::worker::{WorkerLauncher, WorkerProcess, WorkerProgram};

/// How long the file runner gets to exit on its own after its console closed
const WORKER_EXIT_GRACE: Duration = Duration::from_secs(2);

struct ActiveScript {
    script: PathBuf,
    worker: WorkerProcess,
    session: ConsoleSession,
}

pub struct ScriptLauncher {
    launcher: WorkerLauncher,
    console: ConsoleConfig,
    observers: Vec<Arc<dyn SessionObserver>>,
    active: Option<ActiveScript>,
    last_exit_code: Option<i32>,
}

impl ScriptLauncher {
    pub fn new(launcher: WorkerLauncher, console: ConsoleConfig) -> Self {
        Self {
            launcher,
            console,
            observers: Vec::new(),
            active: None,
            last_exit_code: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            WorkerLauncher::from_config(&config.environment),
            config.console.clone(),
        )
    }

    /// Observers attached to every session started from now on
    pub fn subscribe(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    /// Start `script` and attach to its console
    #[instrument(skip_all, fields(script = %script.display()))]
    pub fn run_script(&mut self, script: &Path) -> Result<()> {
        if self.is_running() {
            return Err(UserError::SessionActive.into());
        }
        self.reap();

        let script_name = script.display().to_string();
        let mut worker = self.launcher.spawn(WorkerProgram::FileRunner)?;
        let request = encode_message(&[script.to_string_lossy()])?;
        worker.write_line(&request)?;
        worker.close_input();
        worker.drain_stdout_to_log();

        let session = ConsoleSession::new(self.console.clone());
        for observer in &self.observers {
            session.subscribe(Arc::clone(observer));
        }

        if let Err(err) =
            session.setup_with_grace(&self.console.host, self.console.port, self.console.startup_grace())
        {
            warn!(error = %err, "Could not attach to the script console");
            worker.kill();
            log_script_event(&script_name, "failed", None);
            return Err(err);
        }

        log_script_event(&script_name, "started", None);
        self.last_exit_code = None;
        self.active = Some(ActiveScript {
            script: script.to_path_buf(),
            worker,
            session,
        });
        Ok(())
    }

    pub fn send_command(&self, command: &str) -> Result<()> {
        match &self.active {
            Some(active) => active.session.enqueue_command(command),
            None => Err(UserError::NoActiveSession.into()),
        }
    }

    /// Ask the file runner to kill the script; the session closes once it confirms
    pub fn terminate(&self) -> Result<()> {
        match &self.active {
            Some(active) => active.session.request_termination(),
            None => Err(UserError::NoActiveSession.into()),
        }
    }

    /// Close the console and kill the worker without waiting for it
    pub fn kill(&mut self) {
        if let Some(mut active) = self.active.take() {
            info!(script = %active.script.display(), "Killing script");
            active.session.close();
            active.worker.kill();
            self.last_exit_code = active.session.exit_code();
            log_script_event(&active.script.display().to_string(), "killed", None);
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| active.session.is_running())
            .unwrap_or(false)
    }

    /// Wait up to `timeout` for the running script's session to close
    ///
    /// Returns true once nothing is running; the exit code is then available
    /// from `last_exit_code`.
    pub fn wait_finished(&mut self, timeout: Duration) -> bool {
        let finished = match &self.active {
            Some(active) => active.session.wait_closed(timeout),
            None => true,
        };
        if finished {
            self.reap();
        }
        finished
    }

    /// Exit code reported by the most recently finished script
    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    pub fn current_script(&self) -> Option<&Path> {
        self.active.as_ref().map(|active| active.script.as_path())
    }

    /// Collect a script whose session already closed
    fn reap(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        if active.session.is_running() {
            self.active = Some(active);
            return;
        }

        match active.worker.wait_timeout(WORKER_EXIT_GRACE) {
            Ok(Some(code)) => info!(worker_exit = code, "File runner exited"),
            Ok(None) => {
                warn!("File runner still alive after its console closed, killing it");
                active.worker.kill();
            }
            Err(e) => {
                warn!(error = %e, "Could not reap file runner");
                active.worker.kill();
            }
        }

        self.last_exit_code = active.session.exit_code();
        log_script_event(
            &active.script.display().to_string(),
            "finished",
            self.last_exit_code,
        );
    }
}

impl Drop for ScriptLauncher {
    fn drop(&mut self) {
        self.kill();
    }
}

impl std::fmt::Debug for ScriptLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptLauncher")
            .field("runtime", &self.launcher.runtime())
            .field("script", &self.current_script())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::console::{ChannelObserver, SessionEvent};
    use crate::error::BridgeError;
    use std::net::TcpListener;
    use std::thread;

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn console(port: u16) -> ConsoleConfig {
        ConsoleConfig {
            port,
            read_timeout_ms: 1000,
            poll_interval_ms: 10,
            flush_interval_ms: 10,
            startup_grace_ms: 2000,
            ..ConsoleConfig::default()
        }
    }

    /// File runner stand-in: the console is served by the test, the worker
    /// just reads the script path and stays alive
    fn sleeping_runner() -> WorkerLauncher {
        WorkerLauncher::new(
            "sh",
            vec!["-c".to_string(), "read path; sleep 30".to_string()],
            std::env::temp_dir(),
        )
    }

    fn fake_console(port: u16, reply: &'static [u8]) -> thread::JoinHandle<std::net::TcpStream> {
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            std::io::Write::write_all(&mut stream, reply).unwrap();
            stream
        })
    }

    #[test]
    fn test_run_script_streams_until_completion() {
        let port = free_port();
        let server = fake_console(port, b"hello from script\n#0\n");
        let mut launcher = ScriptLauncher::new(sleeping_runner(), console(port));
        let (observer, rx) = ChannelObserver::new(false);
        launcher.subscribe(Arc::new(observer));

        launcher.run_script(Path::new("/scripts/build.bat")).unwrap();
        assert!(launcher.wait_finished(Duration::from_secs(10)));
        let _peer = server.join().unwrap();

        assert!(!launcher.is_running());
        assert_eq!(launcher.last_exit_code(), Some(0));
        assert!(launcher.current_script().is_none());
        let output: String = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                SessionEvent::Output(text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(output, "hello from script\n#0\n");
    }

    #[test]
    fn test_second_script_rejected_while_running() {
        let port = free_port();
        let server = fake_console(port, b"");
        let mut launcher = ScriptLauncher::new(sleeping_runner(), console(port));

        launcher.run_script(Path::new("/scripts/a.bat")).unwrap();
        let _peer = server.join().unwrap();
        let err = launcher.run_script(Path::new("/scripts/b.bat")).unwrap_err();
        assert!(matches!(err, BridgeError::User(UserError::SessionActive)));

        launcher.kill();
        assert!(!launcher.is_running());
    }

    #[test]
    fn test_commands_without_script_are_rejected() {
        let launcher = ScriptLauncher::new(sleeping_runner(), console(free_port()));
        assert!(matches!(
            launcher.send_command("dir"),
            Err(BridgeError::User(UserError::NoActiveSession))
        ));
        assert!(launcher.terminate().is_err());
    }

    #[test]
    fn test_attach_failure_kills_worker() {
        let config = ConsoleConfig {
            startup_grace_ms: 100,
            ..console(free_port())
        };
        let mut launcher = ScriptLauncher::new(sleeping_runner(), config);
        let err = launcher.run_script(Path::new("/scripts/a.bat")).unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionRefused { .. }));
        assert!(!launcher.is_running());
        assert!(launcher.current_script().is_none());
    }
}
