/// Communication layer for GDB/MI protocol
///
/// Commands are written with a numeric token. A background task reads GDB's
/// output line by line; stream records emitted while a command is pending are
/// collected and handed to the waiting caller together with the result record
/// carrying its token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;

use crate::parser::{is_prompt, parse_gdb_output};
use crate::types::{CommandResponse, GdbOutput, StreamRecord};

#[derive(Error, Debug)]
pub enum CommunicationError {
    #[error("Failed to write command: {0}")]
    WriteError(#[from] std::io::Error),
    #[error("Command response channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, CommunicationError>;

type PendingTable = Arc<Mutex<HashMap<u32, oneshot::Sender<CommandResponse>>>>;

fn lock_pending(pending: &PendingTable) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<CommandResponse>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Manages communication with GDB process
pub struct GdbCommunication {
    stdin: Option<Box<dyn AsyncWrite + Unpin + Send>>,
    token_counter: AtomicU32,
    pending_commands: PendingTable,
    is_running: Arc<AtomicBool>,
}

impl Default for GdbCommunication {
    fn default() -> Self {
        Self::new()
    }
}

impl GdbCommunication {
    /// Create a new communication manager
    pub fn new() -> Self {
        Self {
            stdin: None,
            token_counter: AtomicU32::new(1),
            pending_commands: Arc::new(Mutex::new(HashMap::new())),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set up communication over GDB's stdin and stdout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn setup<W, R>(&mut self, stdin: W, stdout: R)
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.stdin = Some(Box::new(stdin));
        self.is_running.store(true, Ordering::SeqCst);
        self.start_stdout_reader(stdout);
    }

    /// Forward GDB's stderr to the log.
    pub fn watch_stderr<E>(&self, stderr: E)
    where
        E: AsyncRead + Unpin + Send + 'static,
    {
        let is_running = self.is_running.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while is_running.load(Ordering::SeqCst) {
                match lines.next_line().await {
                    Ok(Some(line)) if !line.trim().is_empty() => log::warn!("GDB stderr: {}", line.trim()),
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => break,
                }
            }
            log::debug!("GDB stderr reader finished");
        });
    }

    /// Send a command to GDB and wait for its output and result record.
    ///
    /// `^error` results are returned like any other result; deciding whether
    /// they are failures is up to the caller.
    pub async fn send_command(&mut self, command: &str) -> Result<CommandResponse> {
        if !self.is_running() {
            return Err(CommunicationError::ChannelClosed);
        }

        let token = self.token_counter.fetch_add(1, Ordering::SeqCst);
        let command_line = format!("{}-{}\n", token, command);

        log::debug!("SEND[{}]: {}", token, command);

        let stdin = self.stdin.as_mut().ok_or(CommunicationError::ChannelClosed)?;
        let (sender, receiver) = oneshot::channel();
        lock_pending(&self.pending_commands).insert(token, sender);

        if let Err(e) = write_line(stdin, &command_line).await {
            lock_pending(&self.pending_commands).remove(&token);
            return Err(e.into());
        }

        let response = receiver.await.map_err(|_| CommunicationError::ChannelClosed)?;

        log::debug!(
            "RECV[{}]: class={:?}, {} stream record(s)",
            token,
            response.result.class,
            response.output.len()
        );
        Ok(response)
    }

    /// Check if communication is active
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop communication
    pub fn stop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.stdin = None;
        lock_pending(&self.pending_commands).clear();
    }

    /// Start reading from GDB stdout
    fn start_stdout_reader<R>(&self, stdout: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pending_commands = self.pending_commands.clone();
        let is_running = self.is_running.clone();

        tokio::spawn(async move {
            log::debug!("GDB stdout reader started");
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = Vec::new();

            while is_running.load(Ordering::SeqCst) {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() && !is_prompt(trimmed) {
                            log::trace!("GDB_OUT: {}", trimmed);
                            process_line(trimmed, &mut collected, &pending_commands);
                        }
                    }
                    Ok(None) => {
                        log::debug!("GDB stdout: EOF reached");
                        break;
                    }
                    Err(e) => {
                        log::error!("GDB stdout read error: {}", e);
                        break;
                    }
                }
            }

            // Waiters see a closed channel instead of hanging forever.
            is_running.store(false, Ordering::SeqCst);
            lock_pending(&pending_commands).clear();
            log::debug!("GDB stdout reader finished");
        });
    }
}

async fn write_line(stdin: &mut Box<dyn AsyncWrite + Unpin + Send>, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Process a line of GDB output
fn process_line(line: &str, collected: &mut Vec<StreamRecord>, pending_commands: &PendingTable) {
    match parse_gdb_output(line) {
        Ok(GdbOutput::Stream(stream)) => {
            if lock_pending(pending_commands).is_empty() {
                log::debug!("STREAM (idle): {:?} {}", stream.stream_type, stream.content.trim_end());
            } else {
                collected.push(stream);
            }
        }
        Ok(GdbOutput::Async(record)) => {
            log::debug!("ASYNC: {:?} {} {:?}", record.kind, record.class, record.results);
        }
        Ok(GdbOutput::Result(result)) => {
            let output = std::mem::take(collected);
            let waiter = result.token.and_then(|token| lock_pending(pending_commands).remove(&token));

            match waiter {
                Some(sender) => {
                    let _ = sender.send(CommandResponse { output, result });
                }
                None => {
                    log::warn!(
                        "RECV[{:?}]: No pending command for result class={:?}, dropping {} stream record(s)",
                        result.token,
                        result.class,
                        output.len()
                    );
                }
            }
        }
        Err(e) => {
            log::warn!("GDB_PARSE_ERROR: '{}' -> {}", line, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResultClass, StreamType};
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio_test::{assert_err, assert_ok};

    /// Wires a communication manager to an in-memory GDB and returns the
    /// GDB side: its view of stdin as lines, and its stdout writer.
    fn connect(
        comm: &mut GdbCommunication,
    ) -> (
        tokio::io::Lines<BufReader<tokio::io::DuplexStream>>,
        tokio::io::DuplexStream,
    ) {
        let (stdin_ours, stdin_gdb) = duplex(4096);
        let (stdout_gdb, stdout_ours) = duplex(4096);
        comm.setup(stdin_ours, stdout_ours);
        (BufReader::new(stdin_gdb).lines(), stdout_gdb)
    }

    #[tokio::test]
    async fn test_streams_are_delivered_with_result() {
        let mut comm = GdbCommunication::new();
        let (mut requests, mut replies) = connect(&mut comm);

        let gdb = tokio::spawn(async move {
            let request = requests.next_line().await.unwrap().unwrap();
            assert_eq!(request, "1-interpreter-exec console \"monitor ?\"");
            replies
                .write_all(b"&\"monitor ?\\n\"\n~\"UEFI Rust Debugger.\\n\"\n~\"Exception Type: 3\\n\"\n1^done\n(gdb)\n")
                .await
                .unwrap();
            replies
        });

        let response = assert_ok!(comm.send_command("interpreter-exec console \"monitor ?\"").await);
        let _replies = gdb.await.unwrap();

        assert_eq!(response.result.class, ResultClass::Done);
        assert_eq!(response.result.token, Some(1));
        let contents: Vec<_> = response.output.iter().map(|s| (s.stream_type, s.content.as_str())).collect();
        assert_eq!(
            contents,
            vec![
                (StreamType::Log, "monitor ?\n"),
                (StreamType::Console, "UEFI Rust Debugger.\n"),
                (StreamType::Console, "Exception Type: 3\n"),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_result_is_not_a_communication_failure() {
        let mut comm = GdbCommunication::new();
        let (mut requests, mut replies) = connect(&mut comm);

        let gdb = tokio::spawn(async move {
            let _ = requests.next_line().await;
            replies
                .write_all(b"1^error,msg=\"Undefined command: \\\"bogus\\\".\"\n")
                .await
                .unwrap();
            replies
        });

        let response = assert_ok!(comm.send_command("interpreter-exec console \"bogus\"").await);
        let _replies = gdb.await.unwrap();

        assert_eq!(response.result.error_message(), Some("Undefined command: \"bogus\"."));
        assert!(response.output.is_empty());
    }

    #[tokio::test]
    async fn test_each_command_gets_its_own_output() {
        let mut comm = GdbCommunication::new();
        let (mut requests, mut replies) = connect(&mut comm);

        let gdb = tokio::spawn(async move {
            for expected in ["1-gdb-version", "2-gdb-version"] {
                let request = requests.next_line().await.unwrap().unwrap();
                assert_eq!(request, expected);
                let token = &request[..1];
                replies
                    .write_all(format!("~\"reply {}\\n\"\n{}^done\n", token, token).as_bytes())
                    .await
                    .unwrap();
            }
            replies
        });

        let first = assert_ok!(comm.send_command("gdb-version").await);
        let second = assert_ok!(comm.send_command("gdb-version").await);
        let _replies = gdb.await.unwrap();

        assert_eq!(first.output.len(), 1);
        assert_eq!(first.output[0].content, "reply 1\n");
        assert_eq!(second.output[0].content, "reply 2\n");
    }

    #[tokio::test]
    async fn test_eof_closes_pending_command() {
        let mut comm = GdbCommunication::new();
        let (mut requests, replies) = connect(&mut comm);

        let gdb = tokio::spawn(async move {
            let _ = requests.next_line().await;
            drop(replies);
        });

        let result = comm.send_command("gdb-exit").await;
        gdb.await.unwrap();

        assert!(matches!(assert_err!(result), CommunicationError::ChannelClosed));
        assert!(!comm.is_running());
    }

    #[tokio::test]
    async fn test_send_after_stop_fails() {
        let mut comm = GdbCommunication::new();
        let (_requests, _replies) = connect(&mut comm);

        comm.stop();

        assert!(!comm.is_running());
        assert!(matches!(
            comm.send_command("gdb-version").await,
            Err(CommunicationError::ChannelClosed)
        ));
    }
}
