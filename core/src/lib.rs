//! Lifecycle orchestration for port-forwarding tunnels over AWS SSM.
//!
//! A tunnel lives across two independent program invocations: the launch phase
//! starts an SSM session, supervises the `session-manager-plugin` process until
//! it reports readiness, and records identifying values in a [`state::StateChannel`];
//! the cleanup phase later reads those values back and tears everything down
//! best-effort. The two phases share no memory, only the persisted state blob.

pub mod cleanup;
pub mod command_runner;
pub mod error;
pub mod launcher;
pub mod readiness;
pub mod request;
pub mod session_control;
pub mod settlement;
pub mod ssm;
pub mod state;
pub mod supervisor;

pub use error::Result;
pub use error::TunnelErr;
