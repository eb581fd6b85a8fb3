//! News lookup over a message bus.
//!
//! A storage-owning process runs a [`NewsServer`] that answers
//! `GetNewsRequest`s on a bus subject; web processes use a [`NewsClient`] to
//! fetch records with a bounded deadline and serve them over HTTP through
//! [`HttpFrontend`]. Requests and replies are protobuf messages (see
//! [`wire`]) matched by reply-to addressing plus a correlation id.
//!
//! Failures are reported through a typed taxonomy ([`RpcError`]): "not
//! found" stays distinguishable end to end, while storage error text never
//! leaves the server.
//!
//! # Example
//!
//! ```no_run
//! use news_rpc::{MemoryStorage, NewsClient, NewsServer, RpcConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> news_rpc::Result<()> {
//! let storage = Arc::new(MemoryStorage::from_json(
//!     r#"[{"id": 123, "header": "header", "date": "2006-01-02"}]"#,
//! )?);
//!
//! let server = NewsServer::start(RpcConfig::memory("news.get"), storage).await?;
//! let client = NewsClient::connect(RpcConfig::memory("news.get")).await?;
//!
//! let news = client.fetch_news_within(123, Duration::from_secs(1)).await?;
//! assert_eq!(news.header, "header");
//!
//! client.close().await?;
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod client;
mod domain;
mod http;
mod server;
mod storage;
mod transport;

mod rpc_config;
mod transport_builder;

mod correlation;
mod error;
mod macros;

pub mod wire;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::{NewsClient, NewsClientBuilder};
pub use server::{NewsServer, NewsServerBuilder};

pub use http::{HttpFrontend, HttpHandle, SHUTDOWN_TIMEOUT};
pub use storage::MemoryStorage;

pub use rpc_config::{RpcConfig, DEFAULT_SUBJECT, MEMORY_URI};
pub use transport_builder::TransportBuilder;

pub use correlation::CorrelationId;
pub use error::{Result, RpcError};

pub use transport::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};

#[cfg(feature = "transport_rumqttc")]
pub use transport::create_rumqttc_transport;

// --- public re-exports
pub use domain::{
    //
    Address,
    Envelope,
    News,
    NewsStorage,
    StorageError,
    StoragePtr,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
    CONTENT_TYPE_PROTOBUF,
};
