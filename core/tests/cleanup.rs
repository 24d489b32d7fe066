//! Cleanup-phase scenarios: best-effort, idempotent, tolerant of missing state.

use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use ssmtun_core::cleanup::CleanupCoordinator;
use ssmtun_core::cleanup::CleanupReport;
use ssmtun_core::request::TunnelRequest;
use ssmtun_core::session_control::SessionControl;
use ssmtun_core::session_control::SessionControlError;
use ssmtun_core::session_control::StartedSession;
use ssmtun_core::state::MemoryStateChannel;
use ssmtun_core::state::STATE_PLUGIN_PID;
use ssmtun_core::state::STATE_REGION;
use ssmtun_core::state::STATE_SESSION_ID;
use ssmtun_core::state::StateChannel;

#[derive(Default)]
struct RecordingSessionControl {
    fail_terminate: bool,
    terminate_calls: AtomicUsize,
    terminated: Mutex<Vec<(String, String)>>,
}

impl RecordingSessionControl {
    fn failing() -> Self {
        Self {
            fail_terminate: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SessionControl for RecordingSessionControl {
    async fn start_session(
        &self,
        _request: &TunnelRequest,
    ) -> Result<StartedSession, SessionControlError> {
        Ok(StartedSession::default())
    }

    async fn terminate_session(
        &self,
        session_id: &str,
        region: &str,
    ) -> Result<(), SessionControlError> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_terminate {
            return Err(SessionControlError::Api {
                operation: "TerminateSession",
                status: 400,
                message: "session already terminated".to_string(),
            });
        }
        if let Ok(mut guard) = self.terminated.lock() {
            guard.push((session_id.to_string(), region.to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn empty_state_is_a_valid_no_op() {
    let state = MemoryStateChannel::new();
    let control = RecordingSessionControl::default();

    let report = CleanupCoordinator::new(&state, &control)
        .run()
        .await
        .expect("cleanup");

    assert_eq!(report, CleanupReport::default());
    assert_eq!(control.terminate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn signals_the_process_and_terminates_the_session() {
    let mut child = tokio::process::Command::new("sleep")
        .arg("30")
        .stdin(Stdio::null())
        .spawn()
        .expect("spawn sleep");
    let pid = child.id().expect("pid");

    let state = MemoryStateChannel::new();
    state.set(STATE_PLUGIN_PID, &pid.to_string()).expect("set");
    state.set(STATE_SESSION_ID, "sess-abc").expect("set");
    state.set(STATE_REGION, "us-east-1").expect("set");
    let control = RecordingSessionControl::default();

    let report = CleanupCoordinator::new(&state, &control)
        .run()
        .await
        .expect("cleanup");

    assert!(report.process_signaled);
    assert!(report.session_terminated);
    let terminated = control.terminated.lock().expect("lock").clone();
    assert_eq!(
        terminated,
        vec![("sess-abc".to_string(), "us-east-1".to_string())]
    );

    // SIGTERM actually landed: the child dies well before its 30s sleep.
    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .expect("child must exit")
        .expect("wait");
    assert_eq!(status.code(), None);
}

#[tokio::test]
async fn running_cleanup_twice_is_not_fatal() {
    let mut child = tokio::process::Command::new("sleep")
        .arg("30")
        .stdin(Stdio::null())
        .spawn()
        .expect("spawn sleep");
    let pid = child.id().expect("pid");

    let state = MemoryStateChannel::new();
    state.set(STATE_PLUGIN_PID, &pid.to_string()).expect("set");
    state.set(STATE_SESSION_ID, "sess-abc").expect("set");
    state.set(STATE_REGION, "us-east-1").expect("set");
    let control = RecordingSessionControl::default();
    let coordinator = CleanupCoordinator::new(&state, &control);

    let first = coordinator.run().await.expect("first cleanup");
    assert!(first.process_signaled);

    // Reap the child so the pid is properly gone before the second pass.
    let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;

    let second = coordinator.run().await.expect("second cleanup");
    assert!(second.session_terminated);
    assert_eq!(control.terminate_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn terminate_failure_is_downgraded_to_a_warning() {
    let state = MemoryStateChannel::new();
    state.set(STATE_SESSION_ID, "sess-abc").expect("set");
    state.set(STATE_REGION, "us-east-1").expect("set");
    let control = RecordingSessionControl::failing();

    let report = CleanupCoordinator::new(&state, &control)
        .run()
        .await
        .expect("cleanup must not escalate");

    assert!(!report.session_terminated);
    assert_eq!(control.terminate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_id_without_region_skips_remote_termination() {
    let state = MemoryStateChannel::new();
    state.set(STATE_SESSION_ID, "sess-abc").expect("set");
    let control = RecordingSessionControl::default();

    let report = CleanupCoordinator::new(&state, &control)
        .run()
        .await
        .expect("cleanup");

    assert!(!report.session_terminated);
    assert_eq!(control.terminate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_pid_is_a_warning_not_an_error() {
    let state = MemoryStateChannel::new();
    // A freshly spawned and fully reaped child leaves a dangling pid behind.
    let mut child = tokio::process::Command::new("true")
        .stdin(Stdio::null())
        .spawn()
        .expect("spawn true");
    let pid = child.id().expect("pid");
    child.wait().await.expect("wait");
    state.set(STATE_PLUGIN_PID, &pid.to_string()).expect("set");
    let control = RecordingSessionControl::default();

    let report = CleanupCoordinator::new(&state, &control)
        .run()
        .await
        .expect("cleanup");

    assert!(!report.process_signaled);
}
