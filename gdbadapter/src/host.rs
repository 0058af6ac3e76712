/// Synchronous debugger host backed by GDB
///
/// GDB answers on its machine interface asynchronously. `GdbHost` owns a
/// tokio runtime and blocks on each command, so the extension sees the plain
/// request/response client it expects.

use std::io::Write;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::{Builder, Runtime};
use uefiext::host::{
    DebugClient, DebugHost, DebuggeeClass, DebuggeeQualifier, DebuggeeType, ExecuteFlags,
    HostError, OutputCallbacks, OutputControl, OutputMask, Session,
};

use crate::communication::{CommunicationError, GdbCommunication};
use crate::parser::quote_c_string;
use crate::process::GdbProcess;
use crate::types::{CommandResponse, GdbResult, ResultClass, StreamType};
use crate::{GdbError, Result};

/// Prints debugger output on the terminal
#[derive(Debug, Default)]
pub struct ConsoleCallbacks;

impl OutputCallbacks for ConsoleCallbacks {
    fn output(&mut self, mask: OutputMask, text: &str) {
        if mask.contains(OutputMask::ERROR) {
            eprint!("{}", text);
        } else {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
    }
}

pub struct GdbHost {
    comm: GdbCommunication,
    process: Option<GdbProcess>,
    callbacks: Option<Box<dyn OutputCallbacks>>,
    mask: OutputMask,
    debuggee: DebuggeeType,
    // Declared last: the pipes above deregister from it when dropped.
    runtime: Runtime,
}

impl GdbHost {
    /// Launch GDB and print its output on the terminal.
    pub fn launch(gdb_path: &str) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(GdbError::Runtime)?;

        let (process, pipes) = {
            let _guard = runtime.enter();
            GdbProcess::start(gdb_path)?
        };

        let pid = process.id();
        let mut host = Self::from_streams(runtime, pipes.stdin, pipes.stdout);
        {
            let _guard = host.runtime.enter();
            host.comm.watch_stderr(pipes.stderr);
        }
        host.process = Some(process);
        host.callbacks = Some(Box::new(ConsoleCallbacks));

        log::info!("GDB session started (pid {:?})", pid);
        Ok(host)
    }

    /// Build a host talking MI over arbitrary streams. Output is discarded
    /// until callbacks are installed.
    pub fn from_streams<W, R>(runtime: Runtime, stdin: W, stdout: R) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut comm = GdbCommunication::new();
        {
            let _guard = runtime.enter();
            comm.setup(stdin, stdout);
        }

        Self {
            comm,
            process: None,
            callbacks: None,
            mask: OutputMask::default(),
            debuggee: DebuggeeType::uninitialized(),
            runtime,
        }
    }

    pub fn is_running(&self) -> bool {
        self.comm.is_running()
    }

    /// Connect GDB to a remote stub such as the UEFI Rust debugger.
    pub fn connect_remote(&mut self, address: &str) -> Result<()> {
        let response = self.send_mi(&format!("target-select remote {}", address))?;
        self.forward_streams(&response, None);

        if let Some(message) = response.result.error_message() {
            return Err(GdbError::CommandError(message.to_string()));
        }

        log::info!("Connected to remote target {}", address);
        self.debuggee = DebuggeeType::new(DebuggeeClass::Kernel, DebuggeeQualifier::GdbRemote);
        Ok(())
    }

    /// Ask GDB to exit and stop listening to it.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.comm.is_running() {
            return Ok(());
        }

        match self.send_mi("gdb-exit") {
            Ok(_) | Err(GdbError::Communication(CommunicationError::ChannelClosed)) => {}
            Err(e) => return Err(e),
        }
        self.comm.stop();
        log::info!("GDB session stopped");
        Ok(())
    }

    fn send_mi(&mut self, command: &str) -> Result<CommandResponse> {
        Ok(self.runtime.block_on(self.comm.send_command(command))?)
    }

    fn deliver(&mut self, mask: OutputMask, text: &str) {
        if !self.mask.intersects(mask) {
            return;
        }
        if let Some(callbacks) = self.callbacks.as_mut() {
            callbacks.output(mask, text);
        }
    }

    /// Hand GDB's stream output to the current sink. The log stream echo of
    /// the console command itself is dropped.
    fn forward_streams(&mut self, response: &CommandResponse, echoed: Option<&str>) {
        for stream in &response.output {
            let mask = match stream.stream_type {
                StreamType::Console | StreamType::Target => OutputMask::NORMAL,
                StreamType::Log => {
                    if echoed.is_some_and(|cmd| stream.content.trim_end() == cmd) {
                        continue;
                    }
                    OutputMask::VERBOSE
                }
            };
            self.deliver(mask, &stream.content);
        }
    }

    /// Track connects and disconnects issued as console commands.
    fn track_debuggee(&mut self, command: &str, result: &GdbResult) {
        if result.class == ResultClass::Error {
            return;
        }

        let mut words = command.split_whitespace();
        match (words.next(), words.next()) {
            (Some("target"), Some("remote" | "extended-remote")) => {
                self.debuggee = DebuggeeType::new(DebuggeeClass::Kernel, DebuggeeQualifier::GdbRemote);
            }
            (Some("detach" | "disconnect" | "kill"), _) => {
                self.debuggee = DebuggeeType::uninitialized();
            }
            _ => {}
        }
    }
}

fn host_error(call: &'static str, error: GdbError) -> HostError {
    match error {
        GdbError::Communication(CommunicationError::ChannelClosed) => HostError::Disconnected,
        other => HostError::Api {
            call,
            message: other.to_string(),
        },
    }
}

impl DebugClient for GdbHost {
    fn set_output_callbacks(
        &mut self,
        callbacks: Option<Box<dyn OutputCallbacks>>,
    ) -> std::result::Result<Option<Box<dyn OutputCallbacks>>, HostError> {
        Ok(std::mem::replace(&mut self.callbacks, callbacks))
    }

    fn output_mask(&self) -> std::result::Result<OutputMask, HostError> {
        Ok(self.mask)
    }

    fn set_output_mask(&mut self, mask: OutputMask) -> std::result::Result<(), HostError> {
        self.mask = mask;
        Ok(())
    }

    fn execute(
        &mut self,
        _control: OutputControl,
        command: &str,
        flags: ExecuteFlags,
    ) -> std::result::Result<(), HostError> {
        let command = command.trim();
        if flags.contains(ExecuteFlags::ECHO) {
            self.deliver(OutputMask::NORMAL, &format!("{}\n", command));
        }

        // `!` is GDB's shell escape; extension commands must never reach it.
        if command.starts_with('!') {
            log::warn!("Extension command '{}' is not available through GDB", command);
            self.deliver(
                OutputMask::ERROR,
                &format!("No extension command '{}' on this debugger\n", command),
            );
            return Ok(());
        }

        let mi_command = format!("interpreter-exec console {}", quote_c_string(command));
        let response = self.send_mi(&mi_command).map_err(|e| host_error("Execute", e))?;

        self.forward_streams(&response, Some(command));
        if let Some(message) = response.result.error_message() {
            let text = format!("{}\n", message);
            self.deliver(OutputMask::ERROR, &text);
        }
        self.track_debuggee(command, &response.result);
        Ok(())
    }

    fn debuggee_type(&self) -> std::result::Result<DebuggeeType, HostError> {
        Ok(self.debuggee)
    }

    fn output(&mut self, mask: OutputMask, text: &str) -> std::result::Result<(), HostError> {
        self.deliver(mask, text);
        Ok(())
    }
}

impl DebugHost for GdbHost {
    fn open_session(&mut self) -> std::result::Result<Session<'_>, HostError> {
        if !self.comm.is_running() {
            return Err(HostError::SessionUnavailable("GDB is not running".into()));
        }
        Ok(Session::new(self))
    }
}

impl Drop for GdbHost {
    fn drop(&mut self) {
        self.comm.stop();
        if let Some(mut process) = self.process.take() {
            process.start_kill();
        }
    }
}
