//! Config file command.

use std::path::Path;

use anyhow::{Context, Result};

use hopper_core::config::HopperConfig;

pub fn cmd_config(config: &HopperConfig, explicit: Option<&Path>) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => HopperConfig::write_default_if_missing().context("failed to write default config")?,
    };
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config).context("failed to serialize config")?);
    Ok(())
}
