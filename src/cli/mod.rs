mod args;
pub mod config;

pub use args::{Cli, CliCommand, ConfigCliArgs, ConfigCommand, SimulateCliArgs};
pub use config::{handle_config_command, resolve_config_path};
