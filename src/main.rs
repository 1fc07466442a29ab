//! mcp-pipe: bidirectional transport bridge for MCP
//!
//! Entry point wiring CLI parsing, configuration resolution, tracing setup,
//! and the Supervisor's reconnect loop. Ported from the `__main__` block and
//! `signal_handler` of `examples/original_source/mcp_pipe.py`.

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_pipe_rs::cli::Cli;
use mcp_pipe_rs::config::{stdio_config_from_cli, BridgeConfig};
use mcp_pipe_rs::Supervisor;

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "mcp_pipe_rs=debug,warn"
    } else {
        "mcp_pipe_rs=info,warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let (endpoint, mode) = if cli.target_is_config_file() {
        let config = BridgeConfig::load(std::path::Path::new(&cli.target))
            .context("failed to load configuration file")?;
        config.validate().map_err(anyhow::Error::from)?
    } else {
        let mcp_endpoint = std::env::var("MCP_ENDPOINT")
            .context("MCP_ENDPOINT environment variable is required for stdio mode")?;
        stdio_config_from_cli(cli.target.clone(), mcp_endpoint)
    };

    tracing::info!(?mode, "starting bridge");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received interrupt, shutting down");
                shutdown.cancel();
            }
        });
    }

    let mut supervisor = Supervisor::new(endpoint, mode);
    supervisor.run(shutdown).await.map_err(anyhow::Error::from)?;

    Ok(())
}
