/// Extension command dispatch
///
/// Every command runs inside its own debugger session: the session is opened
/// on entry, used for one unit of work and released before the status is
/// handed back to the host.

use std::str::FromStr;
use thiserror::Error;

use crate::detect::{self, DetectionOutcome, PROBE_COMMAND};
use crate::dprintln;
use crate::environment::Environment;
use crate::host::{DebugClient, DebugHost, HostError, OutputMask};
use crate::monitor::MonitorBridge;

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("No export {0} found")]
    UnknownCommand(String),
}

pub type Result<T> = std::result::Result<T, ExtensionError>;

/// Prefix under which the host addresses this extension's commands
pub const EXTENSION_NAME: &str = "uefiext";

pub const HELP_TEXT: &str = "Help for the uefiext commands (prefix with '!' at the uefidbg prompt)

Basic Commands:
  help                - Shows this help
  init                - Detects the UEFI environment and starts image discovery.
  setenv              - Set the extensions environment mode

Module Discovery:
  findall             - Attempts to detect environment and load all modules
  findmodule          - Find the currently running module
  loadmodules         - Find and loads symbols for all modules in the debug list
  elf                 - Dumps the headers of an ELF image

Data Parsing:
  memorymap           - Prints the current memory map
  hobs                - Enumerates the hand off blocks
  protocols           - Lists the protocols from the protocol list.
  handles             - Prints the handles list.
  linkedlist          - Parses a UEFI style linked list of entries.
  efierror            - Translates an EFI error code.
  advlog              - Prints the advanced logger memory log.

UEFI Debugger:
  info                - Queries information about the UEFI debugger
  monitor             - Sends direct monitor commands
  modulebreak         - Sets a break on load for the provided module. e.g. 'shell'
  readmsr             - Reads a MSR value (x86 only)
  readvar             - Reads a UEFI variable
  reboot              - Reboots the system
";

/// Commands implemented by this extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionCommand {
    SetEnv,
    Help,
    Init,
    Info,
    Monitor,
}

impl ExtensionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ExtensionCommand::SetEnv => "setenv",
            ExtensionCommand::Help => "help",
            ExtensionCommand::Init => "init",
            ExtensionCommand::Info => "info",
            ExtensionCommand::Monitor => "monitor",
        }
    }
}

impl FromStr for ExtensionCommand {
    type Err = ExtensionError;

    /// Accepts `name` as well as the qualified `uefiext.name`.
    fn from_str(s: &str) -> Result<Self> {
        let name = s
            .strip_prefix(EXTENSION_NAME)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(s);

        match name {
            "setenv" => Ok(ExtensionCommand::SetEnv),
            "help" => Ok(ExtensionCommand::Help),
            "init" => Ok(ExtensionCommand::Init),
            "info" => Ok(ExtensionCommand::Info),
            "monitor" => Ok(ExtensionCommand::Monitor),
            _ => Err(ExtensionError::UnknownCommand(s.to_string())),
        }
    }
}

/// Extension instance holding the per-debugger session context
#[derive(Debug, Default)]
pub struct UefiExtension {
    environment: Environment,
}

impl UefiExtension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn set_environment(&mut self, environment: Environment) {
        if self.environment != environment {
            log::debug!("Environment {} -> {}", self.environment, environment);
        }
        self.environment = environment;
    }

    /// Run the command named `name` with its argument string.
    pub fn dispatch(&mut self, host: &mut dyn DebugHost, name: &str, args: &str) -> Result<()> {
        let command: ExtensionCommand = name.parse()?;
        log::debug!("DISPATCH: {} '{}'", command.name(), args);

        match command {
            ExtensionCommand::SetEnv => self.setenv(host, args),
            ExtensionCommand::Help => self.help(host),
            ExtensionCommand::Init => self.init(host).map(|_| ()),
            ExtensionCommand::Info => self.info(host),
            ExtensionCommand::Monitor => self.monitor(host, args),
        }
    }

    /// `setenv <PEI|DXE|MM|rust>`. An unknown name is reported to the user and
    /// leaves the environment unchanged.
    pub fn setenv(&mut self, host: &mut dyn DebugHost, args: &str) -> Result<()> {
        let mut session = host.open_session()?;

        match args.parse::<Environment>() {
            Ok(environment) => self.set_environment(environment),
            Err(e) => dprintln!(session, "{}", e)?,
        }

        Ok(())
    }

    pub fn help(&mut self, host: &mut dyn DebugHost) -> Result<()> {
        let mut session = host.open_session()?;
        session.output(OutputMask::NORMAL, HELP_TEXT)?;
        Ok(())
    }

    /// Detect the target environment and kick off image discovery.
    pub fn init(&mut self, host: &mut dyn DebugHost) -> Result<DetectionOutcome> {
        let mut session = host.open_session()?;

        dprintln!(session, "Initializing UEFI Debugger Extension")?;
        let outcome = detect::detect_and_initialize(&mut *session, &mut self.environment)?;
        Ok(outcome)
    }

    /// Ask the target debugger to describe itself.
    pub fn info(&mut self, host: &mut dyn DebugHost) -> Result<()> {
        let mut session = host.open_session()?;
        send_monitor_command(&mut *session, PROBE_COMMAND)?;
        Ok(())
    }

    /// `monitor <command>` passes `command` straight to the target monitor.
    pub fn monitor(&mut self, host: &mut dyn DebugHost, args: &str) -> Result<()> {
        let mut session = host.open_session()?;

        let command = args.trim();
        if command.is_empty() {
            dprintln!(session, "Usage: monitor <command>")?;
            return Ok(());
        }

        send_monitor_command(&mut *session, command)?;
        Ok(())
    }
}

fn send_monitor_command(client: &mut dyn DebugClient, command: &str) -> Result<()> {
    let debuggee = client.debuggee_type()?;
    let Some(bridge) = MonitorBridge::for_debuggee(&debuggee) else {
        dprintln!(client, "Monitor commands are not supported for this debuggee.")?;
        return Ok(());
    };

    let response = bridge.send(client, command)?;
    let text = response.text().trim_end();
    dprintln!(client, "{}", text)?;
    Ok(())
}
