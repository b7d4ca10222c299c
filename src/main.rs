//! RDT Hunt Server
//!
//! Loads configuration from `RDT_CONFIG` (JSON) and the environment, then
//! serves until Ctrl-C.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rdt_hunt::{GameServer, ServerConfig, TreasureHunt, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("RDT Hunt Server v{}", VERSION);

    let config = match std::env::var("RDT_CONFIG") {
        Ok(path) => ServerConfig::from_json_file(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => ServerConfig::default(),
    };
    let config = config.overlay_env().context("reading environment")?;

    info!(
        "ARQ: timeout {:?}, {} attempts, loss {:.2}",
        config.arq.timeout, config.arq.max_attempts, config.arq.loss_probability
    );
    info!(
        "Session: {} peers minimum, {:?} per round, {:?} mode",
        config.session.min_peers, config.session.round_timeout, config.session.round_mode
    );

    let rules = TreasureHunt::new(config.session.grid_size);
    let server = GameServer::bind(config, rules).await.context("starting server")?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
