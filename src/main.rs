use anyhow::Result;
use clap::{CommandFactory, Parser};
use hotpod::{
    app::{self, SimulationOptions},
    cli::{handle_config_command, resolve_config_path, Cli, CliCommand, SimulateCliArgs},
    config::Config,
};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("Hotpod {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Config(args)) => handle_config_command(args, cli.config.as_deref()),
        Some(CliCommand::Simulate(args)) => simulate(args, cli.config.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

async fn simulate(args: SimulateCliArgs, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_from(&resolve_config_path(config_path)?)?;

    let options = SimulationOptions {
        room: args.room.unwrap_or_else(|| config.session.room.clone()),
        guests: args.guests,
        duration: Duration::from_secs(args.duration_secs),
        drop_rate: args.drop_rate,
        late_guest: args.late_guest,
        output_dir: match args.output {
            Some(dir) => dir,
            None => config.output_dir()?,
        },
        settle_timeout: Duration::from_secs(10),
    };

    let report = app::run_simulation(&config, options).await?;
    app::print_report(&report);
    Ok(())
}
