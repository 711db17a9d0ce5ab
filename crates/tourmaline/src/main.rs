// src/main.rs
use log::{info, Level};
use tourmaline_log::TourmalineLogger;

pub mod bedrock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod proxy;
pub mod raknet;

use proxy::{EventBus, ProxyServer};

#[derive(thiserror::Error, Debug)]
enum AppError {
    #[error("Proxy error: {0}")]
    Proxy(#[from] error::ProxyError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

type Result<T> = std::result::Result<T, AppError>;

#[tokio::main]
async fn main() -> Result<()> {
    TourmalineLogger::init(Level::Info).expect("logger is installed exactly once");

    let config = config::handle()?;
    let listen = config.listen_addr()?;
    let upstream = config.upstream_addr()?;

    info!("Starting Tourmaline proxy: {} <-> {}", listen, upstream);
    let server = ProxyServer::bind(listen, upstream, config.proxy.mtu_size, EventBus::new()).await?;
    server.run().await?;

    Ok(())
}
