//! Definition description command.

use anyhow::{Context, Result};

use hopper_core::config::HopperConfig;

use super::{open_definition, rule};

pub async fn cmd_io(config: &HopperConfig, definition: &str) -> Result<()> {
    let (_ctx, def) = open_definition(config, definition).await?;
    let io = def
        .describe()
        .await
        .with_context(|| format!("failed to describe {definition}"))?;

    rule();
    println!("  {}", def.path().unwrap_or_else(|| definition.to_string()));
    rule();
    if !io.description.is_empty() {
        println!("  {}", io.description);
    }
    println!("  Kind      : {:?}", def.path_type().await);
    if let Some(key) = &io.cache_key {
        println!("  Cache key : {key}");
    }

    println!("\n  Inputs:");
    for input in &io.inputs {
        let at_most = if input.at_most < 0 {
            "∞".to_string()
        } else {
            input.at_most.to_string()
        };
        println!("  ┌─ {}", input.display_name());
        println!("  │  type    : {}", input.param_type);
        println!("  │  count   : {}..{}", input.at_least, at_most);
        if input.tree_access {
            println!("  │  access  : tree");
        }
        if let Some(min) = input.minimum {
            println!("  │  minimum : {min}");
        }
        if let Some(max) = input.maximum {
            println!("  │  maximum : {max}");
        }
        match &input.default {
            Some(default) => println!("  └─ default : {default}"),
            None => println!("  └─ default : none"),
        }
    }

    println!("\n  Outputs:");
    for output in &io.outputs {
        println!("  •  {} ({})", output.display_name(), output.param_type);
    }

    for warning in &io.warnings {
        println!("\n  warning: {warning}");
    }
    for error in &io.errors {
        println!("\n  error: {error}");
    }
    Ok(())
}
