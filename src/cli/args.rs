use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hotpod")]
#[command(about = "Synchronized multi-peer podcast recording", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run a host and guests in-process over the loopback transport
    Simulate(SimulateCliArgs),
    /// Inspect the configuration
    Config(ConfigCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct SimulateCliArgs {
    /// Number of guests present before recording starts
    #[arg(short, long, default_value = "2")]
    pub guests: usize,
    /// How long to record, in seconds
    #[arg(short, long, default_value = "6")]
    pub duration_secs: u64,
    /// Probability of dropping each protocol message (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    pub drop_rate: f64,
    /// Add a guest halfway through the recording
    #[arg(long)]
    pub late_guest: bool,
    /// Room name (defaults to the configured room)
    #[arg(short, long)]
    pub room: Option<String>,
    /// Directory for exported files (defaults to the configured output dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigCliArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print where the configuration file lives
    Path,
}
