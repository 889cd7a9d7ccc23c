//! Taixiu Server Binary
//!
//! Live big/small dice table: HTTP wagering API plus the WebSocket lobby.

use clap::Parser;
use taixiu::{
    api::ApiServer,
    api::server::init_tracing,
    config::{ConfigLoader, StorageBackend, TaixiuConfig},
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "taixiu-server")]
#[command(about = "Big/small dice wagering server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Listen host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Database directory (overrides config)
    #[arg(long)]
    db_path: Option<String>,

    /// Keep balances in memory only
    #[arg(long)]
    memory: bool,

    /// Start from the production preset when no config file is given
    #[arg(long)]
    production: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    if args.production {
        loader = loader.with_preset(TaixiuConfig::production());
    }
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_directory = db_path;
    }
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }
    config.validate()?;

    init_tracing(&config.monitoring.log_filter);
    info!("🚀 Starting taixiu-server v{}", env!("CARGO_PKG_VERSION"));

    let server = ApiServer::from_config(config)?;
    server.run().await?;

    Ok(())
}
