//! gopad server binary.
//!
//! Brings the sandbox container up, then serves the playground HTTP
//! interface until SIGINT/SIGTERM. A sandbox that cannot be ensured is fatal
//! and exits non-zero; a dead container later surfaces through the health
//! endpoint, and the fix is restarting the process.

use anyhow::{Context, Result};
use clap::Parser;
use gopad_core::{config, Playground, Sandbox, SandboxConfig};
use gopad_server::{shutdown_signal, PlaygroundServer, ServerConfig};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[clap(name = "gopad", author, version, about = "Interactive Go playground server")]
struct Cli {
    #[clap(long, default_value = "127.0.0.1:8088")]
    bind_addr: String,

    #[clap(long, default_value = config::DEFAULT_IMAGE, help = "Toolchain image for the sandbox")]
    image: String,

    #[clap(long, default_value = config::DEFAULT_CONTAINER_NAME)]
    container_name: String,

    #[clap(long, default_value_t = 150, help = "Sandbox memory ceiling in MiB")]
    memory_mib: i64,

    #[clap(long, default_value_t = 500, help = "Per-client request budget")]
    requests_per_minute: u32,

    #[clap(long, help = "Disable permissive CORS headers")]
    no_cors: bool,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    log::info!("Starting gopad...");

    let sandbox_config = SandboxConfig::new()
        .with_name(cli.container_name)
        .with_image(cli.image)
        .with_memory_limit(cli.memory_mib * 1024 * 1024);

    let sandbox = Sandbox::new(sandbox_config).context("failed to create Docker client")?;
    sandbox
        .ensure()
        .await
        .context("failed to ensure sandbox container")?;

    let core = Playground::new(sandbox);

    let server_config = ServerConfig::new()
        .with_bind_addr_str(&cli.bind_addr)?
        .with_cors(!cli.no_cors)
        .with_requests_per_minute(cli.requests_per_minute);

    let server = PlaygroundServer::with_config(core, server_config);
    server.serve_with_shutdown(shutdown_signal()).await?;

    Ok(())
}
