//! CLI command modules.

pub mod config;
pub mod io;
pub mod servers;
pub mod solve;

use std::sync::Arc;

use anyhow::{Context, Result};

use hopper_core::config::HopperConfig;
use hopper_services::{RemoteDefinition, SolveContext};

/// Context and definition for `definition`, resolved against the configured
/// base path. Starts the local worker first when one is configured.
pub async fn open_definition(
    config: &HopperConfig,
    definition: &str,
) -> Result<(SolveContext, Arc<RemoteDefinition>)> {
    let ctx = SolveContext::from_config(config).context("failed to create HTTP client")?;
    match ctx.backend.servers.warm_up().await {
        Ok(true) => tracing::info!("local compute worker ready"),
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "local compute worker failed to start"),
    }
    let path = config.definitions.resolve(definition);
    let def = ctx.definition(path);
    Ok((ctx, def))
}

pub fn rule() {
    println!("═══════════════════════════════════════");
}
