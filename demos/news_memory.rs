//! Storage server, client and HTTP front end in one process on the
//! in-memory bus.
//!
//! Run with: cargo run --example news_memory
mod common;

use std::sync::Arc;
use std::time::Duration;

use news_rpc::{HttpFrontend, NewsClient, NewsServer, RpcConfig, RpcError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    common::init_tracing();

    let config = RpcConfig::memory("demo.news.get");

    let server = NewsServer::start(config.clone(), common::load_storage()?).await?;
    let client = NewsClient::connect(config.with_node_id("demo-web")).await?;

    for id in [123, 2, 404] {
        match client.fetch_news_within(id, Duration::from_secs(1)).await {
            Ok(news) => println!("{id}: {} ({})", news.header, news.date),
            Err(RpcError::NotFound) => println!("{id}: not found"),
            Err(err) => println!("{id}: {err}"),
        }
    }

    let http = HttpFrontend::new(Arc::new(client.clone()))
        .start("127.0.0.1:0".parse()?)
        .await?;
    println!("try: curl http://{}/news/123  (Ctrl-C to quit)", http.local_addr());

    common::shutdown_signal().await?;

    http.stop().await;
    client.close().await?;
    server.stop().await?;

    Ok(())
}
