//! Compute server rotation command.

use anyhow::Result;

use hopper_core::config::HopperConfig;
use hopper_services::SolveContext;

use super::rule;

pub async fn cmd_servers(config: &HopperConfig) -> Result<()> {
    let ctx = SolveContext::from_config(config)?;
    let pool = &ctx.backend.servers;

    rule();
    println!("  Compute Servers");
    rule();
    if config.servers.urls.is_empty() {
        println!("  No remote servers configured.");
    }
    for url in &config.servers.urls {
        println!("  •  {url}");
    }
    if let Some(exe) = &config.servers.local_executable {
        println!("  Local worker : {} (port {})", exe.display(), config.servers.local_port);
    }

    pool.warm_up().await?;
    let next = pool.resolve_base_url().await?;
    println!("\n  Next in rotation : {next}");
    println!("  In rotation      : {}", pool.len());

    if config.servers.local_worker_count > 1 {
        pool.launch_children(ctx.backend.transport.as_ref(), config.servers.local_worker_count - 1)
            .await?;
        println!(
            "  Requested {} child worker(s)",
            config.servers.local_worker_count - 1
        );
    }
    Ok(())
}
