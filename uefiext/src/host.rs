/// Host debugger interface
///
/// This module describes the facilities the extension consumes from the
/// debugger it is loaded into: output redirection, output verbosity,
/// command execution and debuggee classification.

use std::ops::{BitOr, Deref, DerefMut};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to acquire debugger session: {0}")]
    SessionUnavailable(String),
    #[error("{call} failed: {message}")]
    Api { call: &'static str, message: String },
    #[error("Debugger is no longer connected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Output class bits attached to every piece of debugger output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputMask(u32);

impl OutputMask {
    pub const NONE: OutputMask = OutputMask(0);
    pub const NORMAL: OutputMask = OutputMask(0x1);
    pub const ERROR: OutputMask = OutputMask(0x2);
    pub const WARNING: OutputMask = OutputMask(0x4);
    pub const VERBOSE: OutputMask = OutputMask(0x8);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set in `self`
    pub const fn contains(self, other: OutputMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when `self` and `other` share at least one bit
    pub const fn intersects(self, other: OutputMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for OutputMask {
    fn default() -> Self {
        OutputMask::NORMAL | OutputMask::ERROR | OutputMask::WARNING
    }
}

impl BitOr for OutputMask {
    type Output = OutputMask;

    fn bitor(self, rhs: OutputMask) -> OutputMask {
        OutputMask(self.0 | rhs.0)
    }
}

/// Which clients receive the output of an executed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputControl {
    ThisClient,
    AllClients,
}

/// Flags passed along with an executed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteFlags(u32);

impl ExecuteFlags {
    pub const DEFAULT: ExecuteFlags = ExecuteFlags(0);
    pub const ECHO: ExecuteFlags = ExecuteFlags(0x1);

    pub const fn contains(self, other: ExecuteFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggeeClass {
    Uninitialized,
    Kernel,
    User,
}

/// How the debugger reaches the debuggee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggeeQualifier {
    Local,
    Connection,
    Dump,
    /// Hardware or emulated target behind an EXDI driver
    ExdiDriver,
    /// Remote target speaking the GDB remote serial protocol
    GdbRemote,
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebuggeeType {
    pub class: DebuggeeClass,
    pub qualifier: DebuggeeQualifier,
}

impl DebuggeeType {
    pub const fn new(class: DebuggeeClass, qualifier: DebuggeeQualifier) -> Self {
        Self { class, qualifier }
    }

    pub const fn uninitialized() -> Self {
        Self::new(DebuggeeClass::Uninitialized, DebuggeeQualifier::Other(0))
    }
}

/// Sink receiving debugger output chunks
pub trait OutputCallbacks: Send {
    fn output(&mut self, mask: OutputMask, text: &str);

    /// Hands back the text a capturing sink accumulated. Sinks that forward
    /// output elsewhere have nothing to return.
    fn into_text(self: Box<Self>) -> Option<String> {
        None
    }
}

/// Control and output-redirection facilities of one debugger client
pub trait DebugClient {
    /// Installs `callbacks` as the output sink and returns the sink it replaced.
    fn set_output_callbacks(
        &mut self,
        callbacks: Option<Box<dyn OutputCallbacks>>,
    ) -> Result<Option<Box<dyn OutputCallbacks>>>;

    fn output_mask(&self) -> Result<OutputMask>;

    fn set_output_mask(&mut self, mask: OutputMask) -> Result<()>;

    /// Runs `command` synchronously. Commands the engine does not recognize
    /// still succeed; the engine's complaint is delivered as output.
    fn execute(&mut self, control: OutputControl, command: &str, flags: ExecuteFlags) -> Result<()>;

    fn debuggee_type(&self) -> Result<DebuggeeType>;

    /// Writes user-facing text through the client's current output sink.
    fn output(&mut self, mask: OutputMask, text: &str) -> Result<()>;
}

impl<T: DebugClient + ?Sized> DebugClient for &mut T {
    fn set_output_callbacks(
        &mut self,
        callbacks: Option<Box<dyn OutputCallbacks>>,
    ) -> Result<Option<Box<dyn OutputCallbacks>>> {
        (**self).set_output_callbacks(callbacks)
    }

    fn output_mask(&self) -> Result<OutputMask> {
        (**self).output_mask()
    }

    fn set_output_mask(&mut self, mask: OutputMask) -> Result<()> {
        (**self).set_output_mask(mask)
    }

    fn execute(&mut self, control: OutputControl, command: &str, flags: ExecuteFlags) -> Result<()> {
        (**self).execute(control, command, flags)
    }

    fn debuggee_type(&self) -> Result<DebuggeeType> {
        (**self).debuggee_type()
    }

    fn output(&mut self, mask: OutputMask, text: &str) -> Result<()> {
        (**self).output(mask, text)
    }
}

/// A debugger able to hand out a session for one command invocation
pub trait DebugHost {
    fn open_session(&mut self) -> Result<Session<'_>>;
}

/// Debugger session handle, released when dropped
pub struct Session<'a> {
    client: Box<dyn DebugClient + 'a>,
}

impl<'a> Session<'a> {
    pub fn new(client: impl DebugClient + 'a) -> Self {
        log::trace!("Debugger session acquired");
        Self {
            client: Box::new(client),
        }
    }
}

impl<'a> Deref for Session<'a> {
    type Target = dyn DebugClient + 'a;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl<'a> DerefMut for Session<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client.as_mut()
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        log::trace!("Debugger session released");
    }
}

/// Writes a formatted line to the client's user-facing output
#[macro_export]
macro_rules! dprintln {
    ($client:expr) => {
        $client.output($crate::host::OutputMask::NORMAL, "\n")
    };
    ($client:expr, $($arg:tt)*) => {
        $client.output($crate::host::OutputMask::NORMAL, &format!("{}\n", format_args!($($arg)*)))
    };
}
