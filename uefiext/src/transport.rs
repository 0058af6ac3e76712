/// Synchronous command execution with captured output
///
/// The debugger reports command output through whichever sink is installed
/// on the client. Executing a command "with output" means swapping in a
/// capturing sink for the duration of one call and swapping the original
/// back afterwards.

use crate::host::{DebugClient, ExecuteFlags, OutputCallbacks, OutputControl, OutputMask, Result};

/// Sink that accumulates every chunk delivered during one command
#[derive(Debug, Default)]
pub struct OutputCapture {
    text: String,
    chunks: usize,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }
}

impl OutputCallbacks for OutputCapture {
    fn output(&mut self, _mask: OutputMask, text: &str) {
        self.text.push_str(text);
        self.chunks += 1;
    }

    fn into_text(self: Box<Self>) -> Option<String> {
        log::trace!("Captured {} bytes in {} chunk(s)", self.text.len(), self.chunks);
        Some(self.text)
    }
}

/// Keeps a capturing sink installed and puts the previous sink back on drop.
struct CaptureGuard<'a> {
    client: &'a mut dyn DebugClient,
    previous: Option<Option<Box<dyn OutputCallbacks>>>,
}

impl<'a> CaptureGuard<'a> {
    fn install(client: &'a mut dyn DebugClient) -> Result<Self> {
        let previous = client.set_output_callbacks(Some(Box::new(OutputCapture::new())))?;
        Ok(Self {
            client,
            previous: Some(previous),
        })
    }

    fn client(&mut self) -> &mut dyn DebugClient {
        &mut *self.client
    }

    /// Restores the previous sink and returns what was captured.
    ///
    /// The previous sink is handed to the client by value, so a failed restore
    /// loses it; `Drop` has nothing left to retry with in that case.
    fn finish(mut self) -> Result<String> {
        let previous = self.previous.take().flatten();
        let capture = self.client.set_output_callbacks(previous).map_err(|e| {
            log::error!("Failed to restore output callbacks, previous sink lost: {}", e);
            e
        })?;
        Ok(capture.and_then(|sink| sink.into_text()).unwrap_or_default())
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(e) = self.client.set_output_callbacks(previous) {
                log::error!("Failed to restore output callbacks: {}", e);
            }
        }
    }
}

/// Execute `command` and return everything it printed.
///
/// The original output sink is restored whether or not execution succeeds.
/// Not reentrant: the capturing sink belongs to this call only, so issuing a
/// nested call through the same client would steal the outer call's output.
pub fn execute_with_output(client: &mut dyn DebugClient, command: &str) -> Result<String> {
    log::debug!("EXEC: {}", command);

    let mut guard = CaptureGuard::install(client)?;
    guard
        .client()
        .execute(OutputControl::AllClients, command, ExecuteFlags::DEFAULT)?;
    let output = guard.finish()?;

    log::debug!("EXEC: {} -> {} bytes", command, output.len());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{DebuggeeType, HostError};

    /// Client whose sink swaps start failing after `swaps_allowed` calls
    struct FlakyClient {
        sink: Option<Box<dyn OutputCallbacks>>,
        swaps_allowed: usize,
        swaps_attempted: usize,
    }

    impl DebugClient for FlakyClient {
        fn set_output_callbacks(
            &mut self,
            callbacks: Option<Box<dyn OutputCallbacks>>,
        ) -> Result<Option<Box<dyn OutputCallbacks>>> {
            self.swaps_attempted += 1;
            if self.swaps_attempted > self.swaps_allowed {
                return Err(HostError::Api {
                    call: "SetOutputCallbacks",
                    message: "rejected".into(),
                });
            }
            Ok(std::mem::replace(&mut self.sink, callbacks))
        }

        fn output_mask(&self) -> Result<OutputMask> {
            Ok(OutputMask::default())
        }

        fn set_output_mask(&mut self, _mask: OutputMask) -> Result<()> {
            Ok(())
        }

        fn execute(&mut self, _control: OutputControl, command: &str, _flags: ExecuteFlags) -> Result<()> {
            if let Some(sink) = self.sink.as_mut() {
                sink.output(OutputMask::NORMAL, command);
            }
            Ok(())
        }

        fn debuggee_type(&self) -> Result<DebuggeeType> {
            Ok(DebuggeeType::uninitialized())
        }

        fn output(&mut self, _mask: OutputMask, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_restore_is_reported_once() {
        let mut client = FlakyClient {
            sink: None,
            swaps_allowed: 1,
            swaps_attempted: 0,
        };

        let result = execute_with_output(&mut client, "version");

        assert!(matches!(result, Err(HostError::Api { call: "SetOutputCallbacks", .. })));
        // install + one restore attempt; the guard must not retry on drop
        assert_eq!(client.swaps_attempted, 2);
    }

    #[test]
    fn test_successful_restore_returns_capture() {
        let mut client = FlakyClient {
            sink: None,
            swaps_allowed: usize::MAX,
            swaps_attempted: 0,
        };

        let output = execute_with_output(&mut client, "version").unwrap();

        assert_eq!(output, "version");
        assert_eq!(client.swaps_attempted, 2);
        assert!(client.sink.is_none());
    }

    #[test]
    fn test_capture_accumulates_all_chunks() {
        let mut capture = OutputCapture::new();
        capture.output(OutputMask::NORMAL, "first ");
        capture.output(OutputMask::VERBOSE, "second\n");
        capture.output(OutputMask::ERROR, "third");

        assert_eq!(capture.chunks(), 3);
        assert_eq!(capture.text(), "first second\nthird");

        let text = Box::new(capture).into_text();
        assert_eq!(text.as_deref(), Some("first second\nthird"));
    }

    #[test]
    fn test_empty_capture_yields_empty_text() {
        let capture = Box::new(OutputCapture::new());
        assert_eq!(capture.into_text(), Some(String::new()));
    }
}
