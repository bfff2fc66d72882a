//! hopper-ctl — run definitions on compute from the command line.

mod cmd;

use std::path::PathBuf;

use anyhow::{Context, Result};

use hopper_core::config::HopperConfig;

fn print_usage() {
    println!("Usage: hopper-ctl [--config <path>] <command>");
    println!();
    println!("Commands:");
    println!("  solve <definition> [--input name=value ...] [--async] [--no-cache]");
    println!("                      Solve one iteration and print its outputs");
    println!("  io <definition>     Print a definition's inputs and outputs");
    println!("  servers             Show the next compute server in the rotation");
    println!("  config              Write the default config if missing and print it");
    println!();
    println!("Options:");
    println!("  --config <path>     Config file (default: $HOPPER_CONFIG or ~/.config/hopper/config.toml)");
    println!();
    println!("Repeat --input to pass a list. Points and vectors are written x,y,z.");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path: Option<PathBuf> = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" {
            i += 1;
            config_path = Some(PathBuf::from(
                args.get(i).context("--config requires a value")?,
            ));
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => HopperConfig::load_from(path),
        None => HopperConfig::load(),
    }
    .context("failed to load config")?;

    match remaining.as_slice() {
        ["solve", definition, rest @ ..] => cmd::solve::cmd_solve(&config, definition, rest).await,
        ["io", definition] => cmd::io::cmd_io(&config, definition).await,
        ["servers"] => cmd::servers::cmd_servers(&config).await,
        ["config"] => cmd::config::cmd_config(&config, config_path.as_deref()),
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
