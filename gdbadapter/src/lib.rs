/// GDB adapter
///
/// Drives GDB through its machine interface (GDB/MI) and exposes it as a
/// synchronous host debugger for the UEFI extension.

use thiserror::Error;

pub mod communication;
pub mod host;
pub mod parser;
pub mod process;
pub mod types;

pub use communication::{CommunicationError, GdbCommunication};
pub use host::{ConsoleCallbacks, GdbHost};
pub use parser::{parse_gdb_output, quote_c_string, ParseError};
pub use process::{GdbProcess, ProcessError};
pub use types::*;

#[derive(Error, Debug)]
pub enum GdbError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Communication(#[from] CommunicationError),
    #[error("GDB command failed: {0}")]
    CommandError(String),
    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GdbError>;
