//! CLI handler for configuration inspection.

use crate::cli::{ConfigCliArgs, ConfigCommand};
use crate::config::Config;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub fn handle_config_command(args: ConfigCliArgs, config_path: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    match args.command {
        ConfigCommand::Show => handle_show(&path),
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

pub fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::config_path(),
    }
}

fn handle_show(path: &Path) -> Result<()> {
    let config = Config::load_from(path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;

    println!();
    println!("Hotpod Configuration");
    println!("====================");
    println!();
    println!("{}", rendered.trim_end());
    println!();
    println!("Output dir:   {}", config.output_dir()?.display());
    println!("Config file:  {}", path.display());
    println!();
    Ok(())
}
