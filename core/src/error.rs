use std::time::Duration;

use thiserror::Error;

use crate::session_control::SessionControlError;
use crate::state::StateError;

pub type Result<T> = std::result::Result<T, TunnelErr>;

/// Fatal outcomes of the launch invocation.
///
/// Cleanup-phase collaborator failures are deliberately absent: they are
/// downgraded to warnings inside [`crate::cleanup::CleanupCoordinator`] so an
/// unattended teardown can never mask the primary job's outcome.
#[derive(Debug, Error)]
pub enum TunnelErr {
    #[error("invalid tunnel request: {reason}")]
    InvalidRequest { reason: String },

    #[error("session control response is missing required fields: {missing}")]
    MissingSessionFields { missing: String },

    #[error("tunnel did not become ready within {waited:?}")]
    ReadinessTimeout { waited: Duration },

    #[error("tunnel process reported an error: {line}")]
    ErrorPatternDetected { line: String },

    #[error("tunnel process exited with code {exit_code} before becoming ready")]
    ProcessExitedPrematurely { exit_code: i32 },

    #[error("command exited with code {exit_code}")]
    CommandFailed { exit_code: i32 },

    #[error(transparent)]
    SessionControl(#[from] SessionControlError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
