/// Monitor command bridge
///
/// Monitor commands are raw text handed to the debug transport (an EXDI
/// driver or a GDB remote stub) instead of the debugger engine. The
/// transport's reply comes back inside the engine's own output, wrapped in
/// framing text which is stripped here.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::host::{DebugClient, DebuggeeClass, DebuggeeQualifier, DebuggeeType, OutputMask, Result};
use crate::transport::execute_with_output;

/// Text preceding the payload of an EXDI target command response
pub const RESPONSE_PREAMBLE: &str = "Target command response: ";
/// Text following the payload of an EXDI target command response
pub const RESPONSE_TERMINATOR: &str = "exdiCmd:";

/// How a raw monitor command is wrapped into a debugger command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorDialect {
    /// `.exdicmd` addressed to target device 0
    #[default]
    Exdi,
    /// GDB `monitor` passthrough to a remote stub
    Gdb,
}

impl MonitorDialect {
    /// Picks the dialect for a debuggee, or `None` when its transport cannot
    /// carry monitor commands.
    pub fn for_debuggee(debuggee: &DebuggeeType) -> Option<Self> {
        match (debuggee.class, debuggee.qualifier) {
            (DebuggeeClass::Kernel, DebuggeeQualifier::ExdiDriver) => Some(MonitorDialect::Exdi),
            (DebuggeeClass::Kernel, DebuggeeQualifier::GdbRemote) => Some(MonitorDialect::Gdb),
            _ => None,
        }
    }

    pub fn command(&self, inner: &str) -> String {
        match self {
            MonitorDialect::Exdi => format!(".exdicmd target:0:{}", inner),
            MonitorDialect::Gdb => format!("monitor {}", inner),
        }
    }
}

/// Cleaned reply to a monitor command.
///
/// The text is best effort: when a framing marker was missing the reply may
/// be partial, and callers must validate the content they rely on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorResponse {
    text: String,
    preamble_found: bool,
    terminator_found: bool,
}

impl MonitorResponse {
    /// Strips the response framing from raw captured output.
    pub fn from_raw(raw: &str) -> Self {
        let (payload, preamble_found) = match raw.find(RESPONSE_PREAMBLE) {
            Some(pos) => (&raw[pos + RESPONSE_PREAMBLE.len()..], true),
            None => (raw, false),
        };

        let (payload, terminator_found) = match payload.find(RESPONSE_TERMINATOR) {
            Some(pos) => (&payload[..pos], true),
            None => (payload, false),
        };

        MonitorResponse {
            text: payload.to_string(),
            preamble_found,
            terminator_found,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Both framing markers were present.
    pub fn is_framed(&self) -> bool {
        self.preamble_found && self.terminator_found
    }

    /// A preamble without its terminator usually means the reply was cut short.
    pub fn may_be_truncated(&self) -> bool {
        self.preamble_found && !self.terminator_found
    }
}

impl fmt::Display for MonitorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Raises VERBOSE on the client's output mask and restores the saved mask on drop.
pub(crate) struct VerboseOutput<'a> {
    client: &'a mut dyn DebugClient,
    saved: OutputMask,
}

impl<'a> VerboseOutput<'a> {
    pub(crate) fn raise(client: &'a mut dyn DebugClient) -> Result<Self> {
        let saved = client.output_mask()?;
        client.set_output_mask(saved | OutputMask::VERBOSE)?;
        Ok(Self { client, saved })
    }
}

impl<'a> Deref for VerboseOutput<'a> {
    type Target = dyn DebugClient + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.client
    }
}

impl<'a> DerefMut for VerboseOutput<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.client
    }
}

impl Drop for VerboseOutput<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.client.set_output_mask(self.saved) {
            log::error!("Failed to restore output mask {:#x}: {}", self.saved.bits(), e);
        }
    }
}

/// Sends raw commands to the target monitor
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorBridge {
    dialect: MonitorDialect,
}

impl MonitorBridge {
    pub fn new(dialect: MonitorDialect) -> Self {
        Self { dialect }
    }

    pub fn for_debuggee(debuggee: &DebuggeeType) -> Option<Self> {
        MonitorDialect::for_debuggee(debuggee).map(Self::new)
    }

    /// Send `inner` to the monitor and return its cleaned reply.
    ///
    /// The transport only reports replies at verbose level, so VERBOSE is
    /// raised for the duration of the call.
    pub fn send(&self, client: &mut dyn DebugClient, inner: &str) -> Result<MonitorResponse> {
        let command = self.dialect.command(inner);

        let raw = {
            let mut verbose = VerboseOutput::raise(client)?;
            execute_with_output(&mut *verbose, &command)?
        };

        let response = MonitorResponse::from_raw(&raw);
        if response.may_be_truncated() {
            log::debug!("Monitor reply to '{}' has no terminator, it may be truncated", inner);
        }
        Ok(response)
    }
}

/// Send `inner` through the default EXDI bridge.
pub fn send_to_monitor(client: &mut dyn DebugClient, inner: &str) -> Result<MonitorResponse> {
    MonitorBridge::default().send(client, inner)
}
