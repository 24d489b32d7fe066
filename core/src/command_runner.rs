//! Runs the caller-supplied command once the tunnel is up.
//!
//! Unlike the tunnel supervisor this path drains the subprocess to completion
//! and keeps the full accumulated output. No timeout is enforced; how long the
//! command runs is the caller's business.

use std::io;
use std::process::Stdio;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::Command;

use crate::readiness::OutputStream;

const SHELL: &str = "/bin/sh";

/// Exit code plus the full captured output. Output survives a failing exit
/// code; nothing is discarded on failure.
#[derive(Debug)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub async fn run_shell_command(command: &str) -> io::Result<CommandResult> {
    tracing::info!("running command: {command}");

    let mut child = Command::new(SHELL)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout pipe was unexpectedly not available"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr pipe was unexpectedly not available"))?;

    let stdout_task = tokio::spawn(drain_lines(stdout, OutputStream::Stdout));
    let stderr_task = tokio::spawn(drain_lines(stderr, OutputStream::Stderr));

    let status = child.wait().await?;
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(CommandResult {
        // A status without a code (killed by signal) counts as 0 by contract.
        exit_code: status.code().unwrap_or(0),
        stdout,
        stderr,
    })
}

async fn drain_lines<R>(reader: R, stream: OutputStream) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        match stream {
            OutputStream::Stdout => tracing::info!("{line}"),
            OutputStream::Stderr => tracing::warn!("{line}"),
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let result = run_shell_command("echo hello").await.expect("run");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn output_survives_a_failing_command() {
        let result = run_shell_command("echo partial; echo boom >&2; exit 3")
            .await
            .expect("run");
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "partial");
        assert_eq!(result.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn accumulates_multiple_lines_in_order() {
        let result = run_shell_command("printf 'a\\nb\\nc\\n'").await.expect("run");
        assert_eq!(result.stdout, "a\nb\nc\n");
    }
}
