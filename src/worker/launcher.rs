//! Worker runtime discovery and launch commands
//!
//! Every worker is a bundled program run by an external runtime:
//! `<runtime> [runtime args] <backend_dir>/<program>`. For the stock backend
//! that is `java -jar ./backend/fileAdder.jar`.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::process::WorkerProcess;
use crate::config::{EnvironmentConfig, DEFAULT_JAVA_COMMAND};
use crate::error::Result;

/// Bundled worker programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerProgram {
    /// Replies with `[name, modified, extension, size]` per input path
    FileAdder,
    /// Replies with `[modified, size]` per input path
    DateAndSizeGetter,
    /// Replies with the JSON array stored in a file, `0` if empty, `-1` if missing
    JsonReader,
    /// Stores a JSON array into a file, replies `1` on success and `0` on failure
    JsonWriter,
    /// Runs a script and serves its console on the console port
    FileRunner,
}

impl WorkerProgram {
    pub const ALL: [WorkerProgram; 5] = [
        WorkerProgram::FileAdder,
        WorkerProgram::DateAndSizeGetter,
        WorkerProgram::JsonReader,
        WorkerProgram::JsonWriter,
        WorkerProgram::FileRunner,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            WorkerProgram::FileAdder => "fileAdder.jar",
            WorkerProgram::DateAndSizeGetter => "dateAndSizeGetter.jar",
            WorkerProgram::JsonReader => "jsonReader.jar",
            WorkerProgram::JsonWriter => "jsonWriter.jar",
            WorkerProgram::FileRunner => "fileRunner.jar",
        }
    }
}

/// Find an executable, checking common locations that GUI apps might miss
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let java_home = std::env::var_os("JAVA_HOME").map(|home| PathBuf::from(home).join("bin"));
    let common_paths = [
        java_home,
        dirs::home_dir().map(|h| h.join(".sdkman/candidates/java/current/bin")),
        dirs::home_dir().map(|h| h.join(".local/bin")),
        Some(PathBuf::from("/opt/homebrew/opt/openjdk/bin")),
        Some(PathBuf::from("/usr/local/opt/openjdk/bin")),
        Some(PathBuf::from("/usr/lib/jvm/default/bin")),
        Some(PathBuf::from("/usr/local/bin")),
        Some(PathBuf::from("/usr/bin")),
    ];

    for dir in common_paths.iter().flatten() {
        let candidate = dir.join(name);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Found executable in common location");
            return Some(candidate);
        }
    }

    which::which(name).ok()
}

/// Pick the Java runtime: explicit override, then discovery, then bare `java`
pub fn resolve_java(java_path: Option<&str>) -> PathBuf {
    if let Some(path) = java_path.filter(|p| !p.trim().is_empty()) {
        return PathBuf::from(shellexpand::tilde(path).as_ref());
    }
    find_executable(DEFAULT_JAVA_COMMAND).unwrap_or_else(|| PathBuf::from(DEFAULT_JAVA_COMMAND))
}

/// Builds and spawns worker commands
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    runtime: PathBuf,
    runtime_args: Vec<String>,
    backend_dir: PathBuf,
}

impl WorkerLauncher {
    /// Java launcher for the configured environment
    pub fn from_config(env: &EnvironmentConfig) -> Self {
        let runtime = resolve_java(env.java_path.as_deref());
        info!(runtime = %runtime.display(), backend = %env.backend_dir, "Worker runtime resolved");
        Self::new(runtime, vec!["-jar".to_string()], env.backend_path())
    }

    /// Launcher for an arbitrary runtime; the program path is always the last argument
    pub fn new(runtime: impl Into<PathBuf>, runtime_args: Vec<String>, backend_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            runtime_args,
            backend_dir: backend_dir.into(),
        }
    }

    pub fn runtime(&self) -> &Path {
        &self.runtime
    }

    pub fn program_path(&self, program: WorkerProgram) -> PathBuf {
        self.backend_dir.join(program.file_name())
    }

    /// Full argument list for `program`
    pub fn args_for(&self, program: WorkerProgram) -> Vec<String> {
        let mut args = self.runtime_args.clone();
        args.push(self.program_path(program).to_string_lossy().into_owned());
        args
    }

    pub fn spawn(&self, program: WorkerProgram) -> Result<WorkerProcess> {
        WorkerProcess::spawn(&self.runtime, &self.args_for(program))
    }
}
