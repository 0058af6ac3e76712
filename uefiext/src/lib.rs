/// UEFI debugger extension core
///
/// Teaches a host debugger about UEFI firmware targets: which execution
/// environment (PEI, DXE, MM or the Rust debugger) the target is in, and how
/// to reach the target's own monitor through the debugger's transport.

pub mod commands;
pub mod detect;
pub mod environment;
pub mod host;
pub mod monitor;
pub mod transport;

pub use commands::{ExtensionCommand, ExtensionError, UefiExtension, HELP_TEXT};
pub use detect::{classify, detect_and_initialize, Classification, DetectionOutcome};
pub use environment::{Environment, UnknownEnvironment};
pub use host::{
    DebugClient, DebugHost, DebuggeeClass, DebuggeeQualifier, DebuggeeType, ExecuteFlags,
    HostError, OutputCallbacks, OutputControl, OutputMask, Session,
};
pub use monitor::{send_to_monitor, MonitorBridge, MonitorDialect, MonitorResponse};
pub use transport::{execute_with_output, OutputCapture};
