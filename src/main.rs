//! safespeak-node daemon
//!
//! Keeps a device's incident reports durable and in sync with the shared
//! document store, and serves the staff API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use safespeak_node::api::{create_router, ApiState};
use safespeak_node::{Config, Node};

#[derive(Parser)]
#[command(name = "safespeak-node")]
#[command(about = "Offline-first incident report sync and urgent-alert runtime")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "safespeak-node.toml")]
    config: String,

    /// Data directory
    #[arg(short, long, env = "SAFESPEAK_DATA_DIR")]
    data_dir: Option<String>,

    /// Device ID (overrides config file)
    #[arg(long, env = "SAFESPEAK_DEVICE_ID")]
    device_id: Option<String>,

    /// Run without the shared document store
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("safespeak_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting safespeak-node");
    info!("Config file: {}", cli.config);

    let config_path = PathBuf::from(&cli.config);
    if !config_path.exists() {
        info!("Config file not found, using defaults");
    }
    let mut config = Config::load_or_default(&config_path)?;

    // Apply CLI overrides
    if let Some(device_id) = cli.device_id {
        config.node.device_id = device_id;
    }
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = PathBuf::from(data_dir);
    }
    if cli.offline {
        config.remote.enabled = false;
    }

    info!("Device ID: {}", config.node.device_id);
    info!("Data dir: {}", config.node.data_dir.display());

    let port = config.api.http_port;
    let node = Arc::new(Node::open(config)?);
    let handle = node.start();

    let app = create_router(Arc::new(ApiState::new(node)));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Staff API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    handle.shutdown().await;
    Ok(())
}
