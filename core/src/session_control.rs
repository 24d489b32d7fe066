//! Port to the remote session-control collaborator.
//!
//! The launch and cleanup phases only ever see this trait; the production
//! implementation lives in [`crate::ssm`] and test doubles are plain structs.

use async_trait::async_trait;
use thiserror::Error;

use crate::request::TunnelRequest;

/// Response of a successful session start. Individual fields may still be
/// absent; the launcher decides which ones it cannot live without.
#[derive(Debug, Clone, Default)]
pub struct StartedSession {
    pub session_id: Option<String>,
    pub stream_url: Option<String>,
    pub token_value: Option<String>,
}

#[derive(Debug, Error)]
pub enum SessionControlError {
    #[error("{operation} request failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} rejected by the session control API (HTTP {status}): {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("AWS credentials are not configured: {reason}")]
    Credentials { reason: String },
}

#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Starts a remote port-forwarding session for `request`.
    async fn start_session(
        &self,
        request: &TunnelRequest,
    ) -> Result<StartedSession, SessionControlError>;

    /// Terminates a previously started session. Best-effort from the caller's
    /// perspective; an error here never has to abort anything.
    async fn terminate_session(
        &self,
        session_id: &str,
        region: &str,
    ) -> Result<(), SessionControlError>;
}
