/// GDB/MI types and data structures
///
/// This module defines the records GDB emits on its machine interface.

use std::collections::HashMap;

/// One parsed line of GDB/MI output
#[derive(Debug, Clone, PartialEq)]
pub enum GdbOutput {
    Result(GdbResult),
    Async(AsyncRecord),
    Stream(StreamRecord),
}

/// Represents a GDB/MI result record
#[derive(Debug, Clone, PartialEq)]
pub struct GdbResult {
    pub token: Option<u32>,
    pub class: ResultClass,
    pub results: HashMap<String, Value>,
}

impl GdbResult {
    /// Message carried by an `^error` record
    pub fn error_message(&self) -> Option<&str> {
        match self.class {
            ResultClass::Error => Some(
                self.results
                    .get("msg")
                    .and_then(Value::as_string)
                    .unwrap_or("Unknown error"),
            ),
            _ => None,
        }
    }
}

/// GDB/MI result classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

/// Represents a GDB/MI async record
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncRecord {
    pub token: Option<u32>,
    pub kind: AsyncKind,
    pub class: String,
    pub results: HashMap<String, Value>,
}

/// Async record families, by prefix character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    Exec,   // * prefix
    Status, // + prefix
    Notify, // = prefix
}

/// Represents a GDB/MI stream record
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub stream_type: StreamType,
    pub content: String,
}

/// Types of GDB/MI streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Console, // ~ prefix
    Target,  // @ prefix
    Log,     // & prefix
}

/// Represents values in GDB/MI output
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    List(Vec<Value>),
    Tuple(HashMap<String, Value>),
}

impl Value {
    /// Get the value as a string, if possible
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as a list, if possible
    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Get the value as a tuple, if possible
    pub fn as_tuple(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Tuple(tuple) => Some(tuple),
            _ => None,
        }
    }
}

/// Everything GDB produced for one tokened command: the stream records
/// emitted while it ran, in arrival order, and its result record.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub output: Vec<StreamRecord>,
    pub result: GdbResult,
}
