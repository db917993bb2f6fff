//! script-bridge - drive the bundled workers from a terminal

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info};

use script_bridge::config::{default_config_path, load_config, read_config, Config};
use script_bridge::console::{SessionNotice, SessionObserver};
use script_bridge::error::ResultExt;
use script_bridge::logging;
use script_bridge::protocol::{JsonLoad, RequestReplyChannel, WorkerOps};
use script_bridge::worker::WorkerLauncher;
use script_bridge::ScriptLauncher;

/// Input line that asks the running script to stop
const STOP_COMMAND: &str = ":stop";

const INPUT_POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "script-bridge")]
#[command(about = "Run scripts and query files through the bundled workers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.script-bridge/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Java executable (overrides environment.javaPath)
    #[arg(long)]
    java: Option<String>,

    /// Directory holding the worker jars (overrides environment.backendDir)
    #[arg(long)]
    backend_dir: Option<String>,

    /// Console port (overrides console.port)
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scripts one after another, attached to their console
    ///
    /// Lines typed on stdin are sent to the running script; `:stop` asks the
    /// worker to terminate it.
    Run {
        #[arg(required = true)]
        scripts: Vec<PathBuf>,
    },

    /// Print name, modification date, extension and size for files
    Info {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print refreshed modification date and size for files
    Stats {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Read a JSON array file through the reader worker
    Load { path: PathBuf },

    /// Write a JSON array to a file through the writer worker
    Save {
        path: PathBuf,
        /// JSON array to store
        json: String,
    },
}

/// Writes session output to the terminal; "scrolling" flushes stdout
struct TerminalObserver {
    autoscroll: bool,
}

impl SessionObserver for TerminalObserver {
    fn append_output(&self, text: &str) {
        let _ = std::io::stdout().lock().write_all(text.as_bytes());
    }

    fn scroll_to_end(&self) {
        let _ = std::io::stdout().flush();
    }

    fn autoscroll(&self) -> bool {
        self.autoscroll
    }

    fn running_changed(&self, running: bool) {
        debug!(running, "Console running state changed");
    }

    fn notice(&self, notice: &SessionNotice) {
        if !matches!(notice, SessionNotice::Connected { .. }) {
            eprintln!("[{}]", notice);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // An explicitly named config must be valid; the default one may be absent
    let (config_path, mut config) = match &cli.config {
        Some(path) => (path.clone(), read_config(path)?),
        None => {
            let path = default_config_path();
            let config = load_config(&path);
            (path, config)
        }
    };
    apply_overrides(&mut config, &cli);

    let _guard = logging::init(&config.logging);
    info!(config = %config_path.display(), "script-bridge starting");

    match cli.command {
        Commands::Run { scripts } => run_scripts(&config, &scripts),
        Commands::Info { paths } => {
            for row in worker_ops(&config).add_files(&paths)? {
                println!("{}\t{}\t{}\t{}", row.name, row.modified, row.extension, row.size);
            }
            Ok(())
        }
        Commands::Stats { paths } => {
            for stat in worker_ops(&config).file_stats(&paths)? {
                println!("{}\t{}", stat.modified, stat.size);
            }
            Ok(())
        }
        Commands::Load { path } => {
            match worker_ops(&config).load_json(&path)? {
                JsonLoad::Data(items) => {
                    println!("{}", serde_json::to_string_pretty(&Value::Array(items))?)
                }
                JsonLoad::Empty => println!("[]"),
                JsonLoad::Missing => bail!("{} does not exist", path.display()),
            }
            Ok(())
        }
        Commands::Save { path, json } => {
            let data: Vec<Value> =
                serde_json::from_str(&json).context("Data to save must be a JSON array")?;
            if !worker_ops(&config).save_json(&path, &data)? {
                bail!("Worker could not write {}", path.display());
            }
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(java) = &cli.java {
        config.environment.java_path = Some(java.clone());
    }
    if let Some(dir) = &cli.backend_dir {
        config.environment.backend_dir = dir.clone();
    }
    if let Some(port) = cli.port {
        config.console.port = port;
    }
}

fn worker_ops(config: &Config) -> WorkerOps {
    let launcher = WorkerLauncher::from_config(&config.environment);
    WorkerOps::new(RequestReplyChannel::new(launcher, &config.worker))
}

fn run_scripts(config: &Config, scripts: &[PathBuf]) -> Result<()> {
    let mut launcher = ScriptLauncher::from_config(config);
    launcher.subscribe(Arc::new(TerminalObserver {
        autoscroll: config.console.autoscroll,
    }));
    let input = start_input_forwarder();
    let mut input_open = true;

    for script in scripts {
        match launcher.run_script(script) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                eprintln!("[{}] {}", script.display(), e.user_message());
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to run {}", script.display()))
            }
        }

        while !launcher.wait_finished(Duration::ZERO) {
            if !input_open {
                launcher.wait_finished(INPUT_POLL);
                continue;
            }
            match input.recv_timeout(INPUT_POLL) {
                Ok(line) if line.trim() == STOP_COMMAND => {
                    launcher.terminate().warn_on_err();
                }
                Ok(line) => {
                    launcher.send_command(&line).warn_on_err();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => input_open = false,
            }
        }

        info!(script = %script.display(), exit_code = ?launcher.last_exit_code(), "Script finished");
    }
    Ok(())
}

/// Forward terminal input lines from a background thread
fn start_input_forwarder() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    logging::log("STDIN", &format!("Error reading stdin: {}", e));
                    break;
                }
            }
        }
    });
    rx
}
