mod start_cmd;
mod stop_cmd;

use clap::Parser;
use clap::Subcommand;

use crate::start_cmd::StartCommand;
use crate::stop_cmd::StopCommand;

/// Launch and tear down AWS SSM port-forwarding tunnels.
#[derive(Debug, Parser)]
#[command(name = "ssmtun", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a tunnel, wait until it is ready, optionally run a command.
    Start(StartCommand),
    /// Tear down a previously started tunnel from its persisted state.
    Stop(StopCommand),
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();

    let cli = Cli::parse();
    match cli.command {
        Command::Start(cmd) => cmd.run().await?,
        Command::Stop(cmd) => cmd.run().await?,
    }
    Ok(())
}
