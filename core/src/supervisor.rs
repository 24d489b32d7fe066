//! Subprocess supervision: one spawned process, one event stream.
//!
//! The supervisor multiplexes line-oriented stdout/stderr and the exit status
//! into a single channel and leaves all success/failure policy to the caller.
//! Nothing here retains full output; tunnel processes run indefinitely, so each
//! line is only inspected transiently downstream.
//!
//! Detached children never get a pipe: a pipe's read end dies with the
//! supervising invocation, and the child's next write would then raise
//! SIGPIPE. Their output goes to unlinked spool files instead, tailed only for
//! as long as a launch outcome is still undecided.

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use std::io;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::readiness::OutputStream;

// Backpressure bound; readers block on a full channel rather than buffer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const EXIT_CODE_SIGNAL_BASE: i32 = 128; // conventional shell: 128 + signal

// How often a spool file is re-polled for appended output.
const SPOOL_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum ProcessEvent {
    Line(OutputStream, String),
    Exited(i32),
}

/// Whether the subprocess should die with the supervising invocation or keep
/// running after it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimePolicy {
    Attached,
    Detached,
}

pub struct SupervisedProcess {
    pid: u32,
    events: mpsc::Receiver<ProcessEvent>,
}

impl SupervisedProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next multiplexed event. `None` once the process has exited and the
    /// exit event was consumed.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }
}

/// Launches `program` with stdin closed and both output streams observed.
///
/// `Attached` children are piped directly. `Detached` children run in their
/// own process group and write to anonymous spool files, so nothing they do
/// after this invocation exits can fail.
pub fn spawn_supervised(
    program: &str,
    args: &[String],
    lifetime: LifetimePolicy,
) -> io::Result<SupervisedProcess> {
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let exited = Arc::new(AtomicBool::new(false));

    let mut child = match lifetime {
        LifetimePolicy::Attached => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
            let mut child = command.spawn()?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| io::Error::other("stdout pipe was unexpectedly not available"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| io::Error::other("stderr pipe was unexpectedly not available"))?;
            tokio::spawn(forward_lines(
                BufReader::new(stdout),
                OutputStream::Stdout,
                tx.clone(),
            ));
            tokio::spawn(forward_lines(
                BufReader::new(stderr),
                OutputStream::Stderr,
                tx.clone(),
            ));
            child
        }
        LifetimePolicy::Detached => {
            let (stdout_sink, stdout_spool) = spool_file()?;
            let (stderr_sink, stderr_spool) = spool_file()?;
            command
                .stdout(Stdio::from(stdout_sink))
                .stderr(Stdio::from(stderr_sink));
            #[cfg(unix)]
            // Own process group so the tunnel survives the launch invocation.
            command.process_group(0);
            let child = command.spawn()?;
            tokio::spawn(tail_spool(
                stdout_spool,
                OutputStream::Stdout,
                tx.clone(),
                Arc::clone(&exited),
            ));
            tokio::spawn(tail_spool(
                stderr_spool,
                OutputStream::Stderr,
                tx.clone(),
                Arc::clone(&exited),
            ));
            child
        }
    };

    let pid = child
        .id()
        .ok_or_else(|| io::Error::other("child had no pid after spawn"))?;

    tokio::spawn(async move {
        let code = match child.wait().await {
            Ok(status) => exit_code_of(status),
            Err(err) => {
                tracing::warn!(pid, "failed to wait for supervised process: {err}");
                -1
            }
        };
        // Flag first so the spool tails stop once fully drained.
        exited.store(true, Ordering::SeqCst);
        let _ = tx.send(ProcessEvent::Exited(code)).await;
    });

    Ok(SupervisedProcess { pid, events: rx })
}

/// One write handle for the child, one independent read handle for the tail.
/// The path is unlinked before returning; both descriptors stay usable and the
/// spool disappears with its last holder.
fn spool_file() -> io::Result<(std::fs::File, std::fs::File)> {
    let spool = tempfile::NamedTempFile::new()?;
    let sink = spool.reopen()?;
    let tail = spool.reopen()?;
    Ok((sink, tail))
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<ProcessEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(ProcessEvent::Line(stream, line)).await.is_err() {
            // Receiver abandoned the launch; stop draining.
            break;
        }
    }
}

/// Follows appended output in a spool file, emitting only complete lines.
/// Stops once the receiver is gone, or once the child exited and everything
/// written before the exit has been drained.
async fn tail_spool(
    spool: std::fs::File,
    stream: OutputStream,
    tx: mpsc::Sender<ProcessEvent>,
    exited: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(tokio::fs::File::from_std(spool));
    let mut pending = String::new();
    loop {
        let mut chunk = String::new();
        match reader.read_line(&mut chunk).await {
            Ok(0) => {
                if exited.load(Ordering::SeqCst) || tx.is_closed() {
                    break;
                }
                tokio::time::sleep(SPOOL_POLL_INTERVAL).await;
            }
            Ok(_) => {
                pending.push_str(&chunk);
                // A chunk without the terminator is a partial line caught
                // mid-write; hold it until the rest arrives.
                if pending.ends_with('\n') {
                    let line = pending.trim_end_matches(['\r', '\n']).to_string();
                    pending.clear();
                    if tx.send(ProcessEvent::Line(stream, line)).await.is_err() {
                        break;
                    }
                }
            }
            Err(_) => break,
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| {
        #[cfg(unix)]
        if let Some(signal) = status.signal() {
            return EXIT_CODE_SIGNAL_BASE + signal;
        }
        -1
    })
}
