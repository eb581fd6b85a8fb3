//! Storage process: answers news lookups on the bus.
//!
//! Run with: cargo run --example news_server --features transport_rumqttc
//!
//! Environment: `BUS_URI` (e.g. `mqtt://localhost:1883`), `SUBSCRIBE_SUBJECT`,
//! `NODE_ID`, `NEWS_SEED` (path to a JSON array of news).
mod common;

use std::time::Instant;

use news_rpc::{NewsServer, RpcConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    common::init_tracing();

    let config = RpcConfig::from_env()?;
    let storage = common::load_storage()?;

    tracing::info!(
        "serving {} news on {} via {}",
        storage.len().await,
        config.subject,
        config.bus_uri
    );

    let server = NewsServer::start(config, storage).await?;
    tracing::info!("started");

    common::shutdown_signal().await?;
    tracing::info!("got termination signal, stopping");

    let started = Instant::now();
    server.stop().await?;
    tracing::info!("stopped in {:?}", started.elapsed());

    Ok(())
}
