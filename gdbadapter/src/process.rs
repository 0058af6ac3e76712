/// Process management for GDB
///
/// Spawns GDB with its machine interface on piped stdio.

use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start GDB process '{path}': {source}")]
    StartError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("GDB process has no {0} pipe")]
    MissingPipe(&'static str),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Pipes connected to a running GDB
pub struct GdbPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

pub struct GdbProcess {
    child: Child,
}

impl GdbProcess {
    /// Start a new GDB process with MI interface. Must be called from within
    /// a tokio runtime.
    pub fn start(gdb_path: &str) -> Result<(Self, GdbPipes)> {
        log::debug!("Starting GDB process: {}", gdb_path);

        let mut child = Command::new(gdb_path)
            .arg("--interpreter=mi3")
            .arg("-q")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::StartError {
                path: gdb_path.to_string(),
                source,
            })?;

        log::debug!("GDB process started with PID: {:?}", child.id());

        let pipes = GdbPipes {
            stdin: child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?,
            stdout: child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?,
            stderr: child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?,
        };

        Ok((GdbProcess { child }, pipes))
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Ask the OS to kill GDB without waiting for it to exit
    pub fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("GDB process already gone: {}", e);
        }
    }
}
