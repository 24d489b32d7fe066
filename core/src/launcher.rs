//! Launch-phase orchestration.
//!
//! Composes the session-control client, the process supervisor, and the
//! readiness detector into one operation: start a tunnel and block until it is
//! ready, errored, exited, or timed out. Exactly one of those happens, enforced
//! by routing every signal through a single [`Settlement`].

use std::time::Duration;

use serde_json::json;

use crate::error::Result;
use crate::error::TunnelErr;
use crate::readiness::LineClass;
use crate::readiness::classify_line;
use crate::request::TunnelRequest;
use crate::session_control::SessionControl;
use crate::session_control::StartedSession;
use crate::settlement::Settlement;
use crate::ssm::SESSION_DOCUMENT_NAME;
use crate::ssm::endpoint;
use crate::state::STATE_PLUGIN_PID;
use crate::state::STATE_REGION;
use crate::state::STATE_SESSION_ID;
use crate::state::StateChannel;
use crate::supervisor::LifetimePolicy;
use crate::supervisor::ProcessEvent;
use crate::supervisor::SupervisedProcess;
use crate::supervisor::spawn_supervised;

pub const DEFAULT_PLUGIN_PROGRAM: &str = "session-manager-plugin";

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Executable establishing the tunnel; overridable for tests.
    pub plugin_program: String,
    pub ready_timeout: Duration,
    /// AWS profile name forwarded to the plugin; empty means default chain.
    pub profile: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            plugin_program: DEFAULT_PLUGIN_PROGRAM.to_string(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            profile: String::new(),
        }
    }
}

/// Successful launch. The plugin keeps running detached; only its pid and the
/// session id survive into the cleanup phase, via the state channel.
#[derive(Debug)]
pub struct LaunchedTunnel {
    pub session_id: String,
    pub pid: u32,
}

/// Terminal states of the launch race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LaunchOutcome {
    Ready,
    ErrorDetected { line: String },
    ProcessExited { exit_code: i32 },
    TimedOut,
}

pub struct TunnelLauncher<'a> {
    session_control: &'a dyn SessionControl,
    state: &'a dyn StateChannel,
    config: LaunchConfig,
}

impl<'a> TunnelLauncher<'a> {
    pub fn new(
        session_control: &'a dyn SessionControl,
        state: &'a dyn StateChannel,
        config: LaunchConfig,
    ) -> Self {
        Self {
            session_control,
            state,
            config,
        }
    }

    pub async fn launch(&self, request: &TunnelRequest) -> Result<LaunchedTunnel> {
        request.validate()?;

        // Precondition, not a Launching-phase outcome: without a session id
        // there is nothing to supervise and nothing to persist.
        let started = self.session_control.start_session(request).await?;
        let session_id = require_session_id(&started)?;
        tracing::info!(%session_id, "SSM session established");

        let args = plugin_args(request, &started, &self.config.profile);
        let process = spawn_supervised(
            &self.config.plugin_program,
            &args,
            LifetimePolicy::Detached,
        )?;
        let pid = process.pid();
        tracing::debug!(pid, "tunnel plugin spawned");

        let (outcome, _settlement) =
            race_launch_signals(process, self.config.ready_timeout).await;

        match outcome {
            LaunchOutcome::Ready => {
                self.state.set(STATE_SESSION_ID, &session_id)?;
                self.state.set(STATE_REGION, &request.region)?;
                self.state.set(STATE_PLUGIN_PID, &pid.to_string())?;
                tracing::info!(%session_id, pid, "port forwarding tunnel is ready");
                Ok(LaunchedTunnel { session_id, pid })
            }
            LaunchOutcome::ErrorDetected { line } => Err(TunnelErr::ErrorPatternDetected { line }),
            LaunchOutcome::ProcessExited { exit_code } => {
                Err(TunnelErr::ProcessExitedPrematurely { exit_code })
            }
            LaunchOutcome::TimedOut => Err(TunnelErr::ReadinessTimeout {
                waited: self.config.ready_timeout,
            }),
        }
    }
}

fn require_session_id(started: &StartedSession) -> Result<String> {
    match &started.session_id {
        Some(session_id) if !session_id.is_empty() => Ok(session_id.clone()),
        _ => Err(TunnelErr::MissingSessionFields {
            missing: "SessionId".to_string(),
        }),
    }
}

/// Argument contract of `session-manager-plugin`: the raw StartSession
/// response, the region, the operation, a profile, the original request
/// parameters, and the regional endpoint.
fn plugin_args(request: &TunnelRequest, started: &StartedSession, profile: &str) -> Vec<String> {
    let session_json = json!({
        "SessionId": started.session_id,
        "TokenValue": started.token_value,
        "StreamUrl": started.stream_url,
    })
    .to_string();
    let params_json = json!({
        "Target": request.target,
        "DocumentName": SESSION_DOCUMENT_NAME,
        "Parameters": {
            "host": [request.host],
            "portNumber": [request.remote_port],
            "localPortNumber": [request.local_port],
        },
    })
    .to_string();

    vec![
        session_json,
        request.region.clone(),
        "StartSession".to_string(),
        profile.to_string(),
        params_json,
        endpoint(&request.region),
    ]
}

/// Races line classification, process exit, and the deadline; the first
/// terminal signal settles the launch and everything after it is discarded.
/// The plugin is deliberately not killed on timeout: teardown belongs to the
/// cleanup phase.
pub(crate) async fn race_launch_signals(
    mut process: SupervisedProcess,
    timeout: Duration,
) -> (LaunchOutcome, Settlement<LaunchOutcome>) {
    let (settlement, outcome_rx) = Settlement::new();

    let watcher = settlement.clone();
    tokio::spawn(async move {
        while let Some(event) = process.next_event().await {
            let outcome = match event {
                ProcessEvent::Line(stream, line) => match classify_line(stream, &line) {
                    LineClass::Ready => Some(LaunchOutcome::Ready),
                    LineClass::Error { line } => Some(LaunchOutcome::ErrorDetected { line }),
                    LineClass::Ignorable => None,
                },
                ProcessEvent::Exited(exit_code) => {
                    Some(LaunchOutcome::ProcessExited { exit_code })
                }
            };
            if let Some(outcome) = outcome
                && !watcher.settle(outcome)
            {
                // The race is already decided; this signal was counted and
                // dropped, and no further ones can change anything.
                break;
            }
        }
    });

    let timer = settlement.clone();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        timer.settle(LaunchOutcome::TimedOut);
    });

    // The timer task keeps a sender alive until it fires, so the receiver can
    // only close after some settlement happened.
    let outcome = outcome_rx.await.unwrap_or(LaunchOutcome::TimedOut);
    (outcome, settlement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const READY_LINE: &str = "Port 8080 opened for sessionId sess-abc. Waiting for connections...";

    fn sh(script: &str) -> SupervisedProcess {
        spawn_supervised(
            "/bin/sh",
            &["-c".to_string(), script.to_string()],
            LifetimePolicy::Attached,
        )
        .expect("spawn shell")
    }

    #[tokio::test]
    async fn ready_line_settles_the_race() {
        let process = sh(&format!("echo '{READY_LINE}'; sleep 1"));
        let (outcome, _) = race_launch_signals(process, Duration::from_secs(5)).await;
        assert_eq!(outcome, LaunchOutcome::Ready);
    }

    #[tokio::test]
    async fn stderr_error_settles_the_race() {
        let process = sh("echo 'Error: could not open port' >&2; sleep 1");
        let (outcome, _) = race_launch_signals(process, Duration::from_secs(5)).await;
        assert_matches!(
            outcome,
            LaunchOutcome::ErrorDetected { line } if line.contains("could not open port")
        );
    }

    #[tokio::test]
    async fn premature_exit_carries_the_code() {
        let process = sh("exit 137");
        let (outcome, _) = race_launch_signals(process, Duration::from_secs(5)).await;
        assert_eq!(outcome, LaunchOutcome::ProcessExited { exit_code: 137 });
    }

    #[tokio::test]
    async fn silent_process_times_out_instead_of_hanging() {
        let process = sh("sleep 2");
        let (outcome, _) = race_launch_signals(process, Duration::from_millis(200)).await;
        assert_eq!(outcome, LaunchOutcome::TimedOut);
    }

    #[tokio::test]
    async fn ignorable_lines_do_not_settle() {
        let process = sh("echo 'Starting session...'; echo 'Port 8080 opened'; exit 0");
        let (outcome, _) = race_launch_signals(process, Duration::from_secs(5)).await;
        // Neither line carries both readiness markers, so exit wins.
        assert_eq!(outcome, LaunchOutcome::ProcessExited { exit_code: 0 });
    }

    #[tokio::test]
    async fn competing_signals_settle_exactly_once() {
        // Ready on stdout and an error on stderr in the same breath: whichever
        // is processed first wins, the rest is provably discarded.
        let process = sh(&format!("echo '{READY_LINE}'; echo 'Error: boom' >&2"));
        let (outcome, settlement) = race_launch_signals(process, Duration::from_secs(5)).await;
        assert!(matches!(
            outcome,
            LaunchOutcome::Ready | LaunchOutcome::ErrorDetected { .. }
        ));
        // The losing signal lands asynchronously; wait for the counter.
        for _ in 0..100 {
            if settlement.discarded() >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(settlement.discarded() >= 1);
    }

    #[test]
    fn plugin_args_follow_the_documented_contract() {
        let request = TunnelRequest {
            target: "i-123".to_string(),
            host: "db.internal".to_string(),
            local_port: "8080".to_string(),
            remote_port: "5432".to_string(),
            region: "us-east-1".to_string(),
            command: None,
        };
        let started = StartedSession {
            session_id: Some("sess-abc".to_string()),
            stream_url: Some("wss://example".to_string()),
            token_value: Some("tok".to_string()),
        };

        let args = plugin_args(&request, &started, "");
        assert_eq!(args.len(), 6);
        assert!(args[0].contains("\"SessionId\":\"sess-abc\""));
        assert_eq!(args[1], "us-east-1");
        assert_eq!(args[2], "StartSession");
        assert!(args[4].contains("AWS-StartPortForwardingSessionToRemoteHost"));
        assert!(args[4].contains("\"localPortNumber\":[\"8080\"]"));
        assert!(args[4].contains("\"portNumber\":[\"5432\"]"));
        assert_eq!(args[5], "https://ssm.us-east-1.amazonaws.com");
    }

    #[test]
    fn missing_session_id_is_a_precondition_failure() {
        let started = StartedSession::default();
        assert_matches!(
            require_session_id(&started),
            Err(TunnelErr::MissingSessionFields { missing }) if missing == "SessionId"
        );
    }
}
