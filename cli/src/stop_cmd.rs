use std::path::PathBuf;

use clap::Parser;

use ssmtun_core::TunnelErr;
use ssmtun_core::cleanup::CleanupCoordinator;
use ssmtun_core::ssm::SsmClient;
use ssmtun_core::state::FileStateChannel;

use crate::start_cmd::default_state_file;

#[derive(Debug, Parser)]
pub struct StopCommand {
    /// State file written by the start subcommand.
    #[arg(long, default_value_os_t = default_state_file())]
    state_file: PathBuf,
}

impl StopCommand {
    /// Fails only when the state store itself is unreadable; everything else
    /// is best-effort.
    pub async fn run(self) -> Result<(), TunnelErr> {
        let state = FileStateChannel::new(self.state_file);
        let session_control = SsmClient::new()?;

        let report = CleanupCoordinator::new(&state, &session_control)
            .run()
            .await?;
        tracing::info!(
            process_signaled = report.process_signaled,
            session_terminated = report.session_terminated,
            "cleanup finished"
        );
        Ok(())
    }
}
