use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use ssmtun_core::TunnelErr;
use ssmtun_core::command_runner::run_shell_command;
use ssmtun_core::launcher::DEFAULT_PLUGIN_PROGRAM;
use ssmtun_core::launcher::LaunchConfig;
use ssmtun_core::launcher::TunnelLauncher;
use ssmtun_core::request::TunnelRequest;
use ssmtun_core::ssm::SsmClient;
use ssmtun_core::state::FileStateChannel;

#[derive(Debug, Parser)]
pub struct StartCommand {
    /// Managed instance id acting as the bastion, e.g. i-0123456789abcdef0.
    #[arg(long)]
    target: String,

    /// Remote host to forward to, resolved from the target instance.
    #[arg(long)]
    host: String,

    /// Local port the tunnel listens on.
    #[arg(long)]
    local_port: String,

    /// Port on the remote host.
    #[arg(long)]
    remote_port: String,

    /// AWS region hosting the target instance.
    #[arg(long)]
    region: String,

    /// Shell command to run once the tunnel is ready.
    #[arg(long)]
    command: Option<String>,

    /// Where tunnel state is persisted for the stop subcommand.
    #[arg(long, default_value_os_t = default_state_file())]
    state_file: PathBuf,

    /// Seconds to wait for the tunnel to report readiness.
    #[arg(long, default_value_t = 30)]
    ready_timeout_secs: u64,

    /// Tunnel plugin executable.
    #[arg(long, default_value = DEFAULT_PLUGIN_PROGRAM)]
    plugin: String,
}

pub fn default_state_file() -> PathBuf {
    std::env::temp_dir().join("ssmtun-state.json")
}

impl StartCommand {
    pub async fn run(self) -> Result<(), TunnelErr> {
        let request = TunnelRequest {
            target: self.target,
            host: self.host,
            local_port: self.local_port,
            remote_port: self.remote_port,
            region: self.region,
            command: self.command,
        };

        let state = FileStateChannel::new(self.state_file);
        let session_control = SsmClient::new()?;
        let config = LaunchConfig {
            plugin_program: self.plugin,
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            profile: String::new(),
        };

        let launcher = TunnelLauncher::new(&session_control, &state, config);
        let tunnel = launcher.launch(&request).await?;
        println!("tunnel ready: session {} (pid {})", tunnel.session_id, tunnel.pid);

        if let Some(command) = &request.command {
            let result = run_shell_command(command).await?;
            println!("command exit code: {}", result.exit_code);
            let stdout = result.stdout.trim();
            if !stdout.is_empty() {
                println!("{stdout}");
            }
            let stderr = result.stderr.trim();
            if !stderr.is_empty() {
                eprintln!("{stderr}");
            }
            if result.exit_code != 0 {
                return Err(TunnelErr::CommandFailed {
                    exit_code: result.exit_code,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_required_flags_and_defaults() {
        let cmd = StartCommand::parse_from([
            "start",
            "--target",
            "i-123",
            "--host",
            "db.internal",
            "--local-port",
            "8080",
            "--remote-port",
            "5432",
            "--region",
            "us-east-1",
        ]);
        assert_eq!(cmd.target, "i-123");
        assert_eq!(cmd.ready_timeout_secs, 30);
        assert_eq!(cmd.plugin, DEFAULT_PLUGIN_PROGRAM);
        assert_eq!(cmd.state_file, default_state_file());
        assert_eq!(cmd.command, None);
    }

    #[test]
    fn accepts_a_command_and_custom_state_file() {
        let cmd = StartCommand::parse_from([
            "start",
            "--target",
            "i-123",
            "--host",
            "db.internal",
            "--local-port",
            "8080",
            "--remote-port",
            "5432",
            "--region",
            "us-east-1",
            "--command",
            "psql -h localhost -p 8080",
            "--state-file",
            "/tmp/custom.json",
            "--ready-timeout-secs",
            "5",
        ]);
        assert_eq!(cmd.command.as_deref(), Some("psql -h localhost -p 8080"));
        assert_eq!(cmd.state_file, PathBuf::from("/tmp/custom.json"));
        assert_eq!(cmd.ready_timeout_secs, 5);
    }
}
