// Process executor - spawn a tool, stream its merged output, return exit code
//
// stdout and stderr share one OS pipe so lines arrive in the order the tool
// wrote them. The read side is drained on a blocking worker; complete lines
// are handed back to the async side through a channel.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedSender};

use super::cancel::{CancelSession, KillSwitch};
use super::errors::ExecutionError;
use super::traits::ToolRunner;

const READ_CHUNK: usize = 4096;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Splits a byte stream into lines, keeping partial lines between reads.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete lines found after appending `chunk`, trailing `\r` removed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Blocking read loop; ends at EOF or on the first hard read error.
fn pump_lines(mut reader: impl Read, tx: UnboundedSender<String>) {
    let mut splitter = LineSplitter::new();
    let mut buffer = [0u8; READ_CHUNK];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                for line in splitter.push(&buffer[..read]) {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("[process] output read failed: {}", e);
                break;
            }
        }
    }

    if let Some(rest) = splitter.finish() {
        let _ = tx.send(rest);
    }
}

fn terminate(child: &mut Child, program: &str) {
    tracing::info!("[process] killing {}", program);
    if let Err(e) = child.start_kill() {
        // Already exited is the common case here
        tracing::debug!("[process] kill {} failed: {}", program, e);
    }
}

pub struct ProcessExecutor {
    session: Arc<CancelSession>,
}

impl ProcessExecutor {
    pub fn new(session: Arc<CancelSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<CancelSession> {
        &self.session
    }

    /// Runs `program` to completion, calling `on_line` for every output line.
    ///
    /// Blocks the calling task until the output is drained and the process has
    /// exited. With `cancellable`, the process is registered with the session
    /// for exactly the duration of this call.
    pub async fn execute<F>(
        &self,
        program: &Path,
        args: &[String],
        cancellable: bool,
        mut on_line: F,
    ) -> Result<i32, ExecutionError>
    where
        F: FnMut(&str) + Send,
    {
        let program_name = program.display().to_string();
        let switch = KillSwitch::new();
        // Dropped on every return path below, which releases the slot
        let _registration = cancellable.then(|| self.session.register(switch.clone()));

        let (reader, writer) = std::io::pipe().map_err(ExecutionError::PipeCreation)?;
        let writer_for_stderr = writer.try_clone().map_err(ExecutionError::PipeCreation)?;

        let mut child = {
            let mut command = Command::new(program);
            command
                .args(args)
                .stdin(Stdio::inherit())
                .stdout(writer)
                .stderr(writer_for_stderr)
                .kill_on_drop(true);
            #[cfg(windows)]
            command.creation_flags(CREATE_NO_WINDOW);

            command.spawn().map_err(|source| ExecutionError::Spawn {
                program: program_name.clone(),
                source,
            })?
            // `command` drops here and closes our copies of the write end,
            // so the reader sees EOF once the child is gone
        };

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let pump = tokio::task::spawn_blocking(move || pump_lines(reader, line_tx));

        let mut kill_sent = false;
        loop {
            tokio::select! {
                line = line_rx.recv() => match line {
                    Some(line) => on_line(line.as_str()),
                    None => break,
                },
                _ = switch.triggered(), if cancellable && !kill_sent => {
                    kill_sent = true;
                    terminate(&mut child, &program_name);
                }
            }
        }

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = switch.triggered(), if cancellable && !kill_sent => {
                    kill_sent = true;
                    terminate(&mut child, &program_name);
                }
            }
        }
        .map_err(|source| ExecutionError::Wait {
            program: program_name.clone(),
            source,
        })?;

        if let Err(e) = pump.await {
            tracing::warn!("[process] output reader for {} ended abnormally: {}", program_name, e);
        }

        // Killed by a signal has no code; report it as a plain failure
        Ok(status.code().unwrap_or(-1))
    }
}

#[async_trait]
impl ToolRunner for ProcessExecutor {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancellable: bool,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<i32, ExecutionError> {
        self.execute(program, args, cancellable, |line| on_line(line))
            .await
    }
}
