use clap::Parser;
use tracing_subscriber::EnvFilter;

use nyx_setup::SetupRuntimeConfig;
use nyx_setup::cli::{
    Cli, Command, run_doctor_command, run_preset_command, run_provision_command,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load env files before anything reads the environment.
    let config = SetupRuntimeConfig::from_env()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nyx_setup=info"));
    let json = std::env::var("NYX_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Command::Doctor { strict } => run_doctor_command(&config, strict).await,
        Command::Preset { name } => run_preset_command(&config, &name).await,
        Command::Provision {
            request,
            wait_docker,
        } => run_provision_command(&config, &request, wait_docker).await,
    }
}
