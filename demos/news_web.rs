//! Web process: serves `GET /news/{news_id}` by asking the storage process
//! over the bus.
//!
//! Run with: cargo run --example news_web --features transport_rumqttc
//!
//! Environment: `BIND_ADDR` (default `127.0.0.1:8080`), plus the bus
//! variables read by `RpcConfig::from_env`.
mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use news_rpc::{HttpFrontend, NewsClient, RpcConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    common::init_tracing();

    let bind_addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()
        .context("BIND_ADDR is not a socket address")?;

    let client = NewsClient::connect(RpcConfig::from_env()?).await?;
    let http = HttpFrontend::new(Arc::new(client.clone()))
        .start(bind_addr)
        .await?;
    tracing::info!("started on http://{}", http.local_addr());

    common::shutdown_signal().await?;
    tracing::info!("got termination signal, stopping");

    let started = Instant::now();
    http.stop().await;
    client.close().await?;
    tracing::info!("stopped in {:?}", started.elapsed());

    Ok(())
}
