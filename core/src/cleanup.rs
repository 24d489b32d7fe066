//! Best-effort teardown running in its own invocation.
//!
//! The coordinator never sees the objects the launch phase created; it works
//! purely from values recovered out of the [`StateChannel`]. Every step is
//! attempted regardless of earlier failures, and collaborator failures are
//! warnings. Only a failure to read the state store itself is fatal.

use std::io;

use crate::session_control::SessionControl;
use crate::state::STATE_PLUGIN_PID;
use crate::state::STATE_REGION;
use crate::state::STATE_SESSION_ID;
use crate::state::StateChannel;
use crate::state::StateError;

/// What the coordinator managed to do. Purely informational.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub process_signaled: bool,
    pub session_terminated: bool,
}

pub struct CleanupCoordinator<'a> {
    state: &'a dyn StateChannel,
    session_control: &'a dyn SessionControl,
}

impl<'a> CleanupCoordinator<'a> {
    pub fn new(state: &'a dyn StateChannel, session_control: &'a dyn SessionControl) -> Self {
        Self {
            state,
            session_control,
        }
    }

    pub async fn run(&self) -> Result<CleanupReport, StateError> {
        let mut report = CleanupReport::default();

        let pid = self.state.get(STATE_PLUGIN_PID)?;
        let session_id = self.state.get(STATE_SESSION_ID)?;
        let region = self.state.get(STATE_REGION)?;

        if pid.is_none() && session_id.is_none() {
            tracing::debug!("no tunnel state recorded; nothing to clean up");
            return Ok(report);
        }

        if let Some(pid) = pid {
            match pid.parse::<i32>() {
                Ok(pid) => match signal_terminate(pid) {
                    Ok(()) => {
                        tracing::info!(pid, "sent SIGTERM to tunnel process");
                        report.process_signaled = true;
                    }
                    // Typically "No such process": the plugin already exited.
                    Err(err) => tracing::warn!(pid, "could not signal tunnel process: {err}"),
                },
                Err(_) => tracing::warn!("persisted plugin pid is not numeric: {pid}"),
            }
        }

        match (session_id, region) {
            (Some(session_id), Some(region)) => {
                match self
                    .session_control
                    .terminate_session(&session_id, &region)
                    .await
                {
                    Ok(()) => {
                        tracing::info!(%session_id, "SSM session terminated");
                        report.session_terminated = true;
                    }
                    Err(err) => {
                        tracing::warn!(%session_id, "failed to terminate SSM session: {err}");
                    }
                }
            }
            (Some(session_id), None) => {
                tracing::warn!(
                    %session_id,
                    "session id persisted without a region; skipping remote termination"
                );
            }
            _ => {}
        }

        Ok(report)
    }
}

#[cfg(unix)]
fn signal_terminate(pid: i32) -> io::Result<()> {
    // SAFETY: plain signal delivery; the target pid comes from persisted state
    // and may no longer exist, which surfaces as ESRCH.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn signal_terminate(_pid: i32) -> io::Result<()> {
    Err(io::Error::other(
        "signaling by pid is only supported on unix",
    ))
}
