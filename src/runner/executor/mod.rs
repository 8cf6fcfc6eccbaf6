use super::launcher::{LaunchSpec, Launcher, ProcessLauncher};
use super::types::RunEvent;
use crate::protocol::EndStatus;
use async_stream::stream;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::oneshot;

/// Read size for each pipe
const READ_CHUNK: usize = 8 * 1024;

/// Stream of events for one run
pub type RunStream = Pin<Box<dyn Stream<Item = RunEvent> + Send + 'static>>;

/// Core script executor - usable without any transport
#[derive(Clone)]
pub struct ScriptExecutor {
    launcher: Arc<dyn Launcher>,
}

enum Step {
    Stdout(io::Result<usize>),
    Stderr(io::Result<usize>),
    Cancel(bool),
}

impl ScriptExecutor {
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(ProcessLauncher))
    }

    pub fn with_launcher(launcher: Arc<dyn Launcher>) -> Self {
        Self { launcher }
    }

    /// Launch `spec` and stream its output.
    ///
    /// Yields `Started`, then `Output` chunks from stdout and stderr as they
    /// arrive (one per pipe read, no line buffering), then exactly one `Finished`. A launch failure yields a single
    /// `Failed` instead. Firing `cancel` kills the child and finishes the run
    /// with `EndStatus::Cancelled`; dropping the sender leaves the run alone.
    pub fn execute(&self, spec: LaunchSpec, cancel: oneshot::Receiver<()>) -> RunStream {
        let launcher = self.launcher.clone();

        Box::pin(stream! {
            let command = spec.command_line();

            let mut child = match launcher.launch(&spec) {
                Ok(child) => child,
                Err(e) => {
                    tracing::warn!(command = %command, error = %e, "Failed to launch script");
                    yield RunEvent::Failed {
                        message: e.to_string(),
                        details: Some(format!("Failed to launch {}", command)),
                    };
                    return;
                }
            };

            yield RunEvent::Started { command: command.clone() };

            let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
                (Some(stdout), Some(stderr)) => (stdout, stderr),
                _ => {
                    let _ = child.start_kill();
                    yield RunEvent::Failed {
                        message: "Failed to capture process output".to_string(),
                        details: Some(command),
                    };
                    return;
                }
            };

            let mut stdout = stdout;
            let mut stderr = stderr;
            let mut out_buf = vec![0u8; READ_CHUNK];
            let mut err_buf = vec![0u8; READ_CHUNK];
            let mut out_text = Utf8Chunker::default();
            let mut err_text = Utf8Chunker::default();
            let mut stdout_open = true;
            let mut stderr_open = true;
            let mut cancel = cancel;
            let mut cancel_armed = true;
            let mut cancelled = false;

            // Both pipes are read concurrently so neither can fill up and
            // stall the child while the other is being drained.
            while (stdout_open || stderr_open) && !cancelled {
                let step = tokio::select! {
                    read = stdout.read(&mut out_buf), if stdout_open => Step::Stdout(read),
                    read = stderr.read(&mut err_buf), if stderr_open => Step::Stderr(read),
                    signal = &mut cancel, if cancel_armed => Step::Cancel(signal.is_ok()),
                };

                match step {
                    Step::Stdout(Ok(n)) if n > 0 => {
                        if let Some(text) = out_text.push(&out_buf[..n]) {
                            yield RunEvent::Output { text, is_error: false };
                        }
                    }
                    Step::Stdout(result) => {
                        if let Err(e) = result {
                            tracing::debug!(error = %e, "stdout read failed");
                        }
                        stdout_open = false;
                        if let Some(text) = out_text.finish() {
                            yield RunEvent::Output { text, is_error: false };
                        }
                    }
                    Step::Stderr(Ok(n)) if n > 0 => {
                        if let Some(text) = err_text.push(&err_buf[..n]) {
                            yield RunEvent::Output { text, is_error: true };
                        }
                    }
                    Step::Stderr(result) => {
                        if let Err(e) = result {
                            tracing::debug!(error = %e, "stderr read failed");
                        }
                        stderr_open = false;
                        if let Some(text) = err_text.finish() {
                            yield RunEvent::Output { text, is_error: true };
                        }
                    }
                    Step::Cancel(true) => cancelled = true,
                    Step::Cancel(false) => cancel_armed = false,
                }
            }

            let waited = if cancelled {
                kill_and_reap(&mut child).await
            } else {
                wait_for_exit(&mut child, &mut cancel, cancel_armed).await
            };

            match waited {
                Ok((status, was_cancelled)) => {
                    let exit_code = status.code().unwrap_or(-1);
                    let status = if was_cancelled {
                        EndStatus::Cancelled
                    } else {
                        EndStatus::Completed
                    };
                    yield RunEvent::Finished { command, exit_code, status };
                }
                Err(e) => {
                    tracing::warn!(command = %command, error = %e, "Failed to wait for script");
                    yield RunEvent::Failed {
                        message: format!("Failed to wait for process: {}", e),
                        details: Some(command),
                    };
                }
            }
        })
    }

    /// Run to completion and collect every event (convenience for tests and tooling)
    pub async fn execute_collect(&self, spec: LaunchSpec) -> Vec<RunEvent> {
        use futures::StreamExt;

        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let mut stream = self.execute(spec, cancel_rx);

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes raw pipe reads into text.
///
/// A multi-byte character split across two reads is held back (at most three
/// bytes) until the rest arrives; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // Truncated sequence at the end: keep it for the next read
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        if complete == 0 {
            return None;
        }
        let tail = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        Some(text)
    }

    /// Flush whatever is left once the pipe closes
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

async fn kill_and_reap(child: &mut Child) -> io::Result<(ExitStatus, bool)> {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "kill failed, process may have already exited");
    }
    child.wait().await.map(|status| (status, true))
}

async fn wait_for_exit(
    child: &mut Child,
    cancel: &mut oneshot::Receiver<()>,
    mut armed: bool,
) -> io::Result<(ExitStatus, bool)> {
    loop {
        tokio::select! {
            status = child.wait() => return status.map(|s| (s, false)),
            signal = &mut *cancel, if armed => match signal {
                Ok(()) => return kill_and_reap(child).await,
                Err(_) => armed = false,
            },
        }
    }
}
