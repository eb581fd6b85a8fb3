//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API that picks the transport implementation from
//! the bus URI scheme.

use std::sync::Arc;
use std::time::Duration;

use crate::{MemoryHub, Result, RpcConfig, RpcError, TransportConfig, TransportPtr};

/// Builder for creating transport instances.
///
/// | URI scheme | Transport |
/// |---|---|
/// | `memory://` | in-process hub (global, or the one passed to [`hub`](Self::hub)) |
/// | `mqtt://`, `tcp://` | MQTT broker (feature `transport_rumqttc`) |
///
/// # Examples
///
/// ```no_run
/// use news_rpc::TransportBuilder;
///
/// # async fn example() -> news_rpc::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("mqtt://localhost:1883")
///     .node_id("news-web-1")
///     .keep_alive_secs(30)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct TransportBuilder {
    uri: Option<String>,
    node_id: Option<String>,
    keep_alive_secs: Option<u16>,
    connect_timeout: Duration,
    hub: Option<Arc<MemoryHub>>,
}

impl TransportBuilder {
    /// Create a new transport builder.
    pub fn new() -> Self {
        Self {
            uri: None,
            node_id: None,
            keep_alive_secs: None,
            connect_timeout: Duration::from_secs(5),
            hub: None,
        }
    }

    /// Seed the builder from an [`RpcConfig`].
    pub fn from_config(config: &RpcConfig) -> Self {
        // ---
        Self {
            uri: Some(config.bus_uri.clone()),
            node_id: Some(config.node_id.clone()),
            keep_alive_secs: config.keep_alive_secs,
            connect_timeout: config.connect_timeout,
            hub: None,
        }
    }

    /// Set the bus URI (required).
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the node ID (required).
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Set broker keep-alive interval in seconds.
    pub fn keep_alive_secs(mut self, secs: u16) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }

    /// Set how long to wait for the broker to accept the connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use an explicit hub for `memory://` URIs instead of the global one.
    ///
    /// Tests use this for isolation between parallel cases.
    pub fn hub(mut self, hub: Arc<MemoryHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Build the transport (consumes self).
    ///
    /// # Errors
    ///
    /// - [`RpcError::MissingConfig`] if `uri` or `node_id` is missing.
    /// - [`RpcError::InvalidConfig`] for an unknown URI scheme, or an
    ///   `mqtt://` URI without the `transport_rumqttc` feature.
    /// - [`RpcError::Connection`] if the broker cannot be reached.
    pub async fn build(self) -> Result<TransportPtr> {
        // ---
        let uri = self
            .uri
            .ok_or_else(|| RpcError::MissingConfig("uri".into()))?;
        let node_id = self
            .node_id
            .ok_or_else(|| RpcError::MissingConfig("node_id".into()))?;

        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| RpcError::InvalidConfig(format!("bus URI {uri:?} has no scheme")))?;

        let config = TransportConfig {
            uri,
            node_id,
            keep_alive_secs: self.keep_alive_secs,
            connect_timeout: self.connect_timeout,
        };

        match scheme.as_str() {
            "memory" => match self.hub {
                Some(hub) => crate::create_memory_transport_with_hub(config, hub).await,
                None => crate::create_memory_transport(config).await,
            },
            "mqtt" | "tcp" => create_broker_transport(config).await,
            other => Err(RpcError::InvalidConfig(format!(
                "unrecognized bus URI scheme: {other}, valid values: memory, mqtt, tcp"
            ))),
        }
    }
}

#[cfg(feature = "transport_rumqttc")]
async fn create_broker_transport(config: TransportConfig) -> Result<TransportPtr> {
    crate::create_rumqttc_transport(config).await
}

#[cfg(not(feature = "transport_rumqttc"))]
async fn create_broker_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    Err(RpcError::InvalidConfig(format!(
        "{} requires the transport_rumqttc feature",
        config.uri
    )))
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_missing_fields() {
        // ---
        let err = TransportBuilder::new().node_id("n").build().await.err().unwrap();
        assert!(matches!(err, RpcError::MissingConfig(ref f) if f == "uri"), "{err:?}");

        let err = TransportBuilder::new().uri("memory://").build().await.err().unwrap();
        assert!(matches!(err, RpcError::MissingConfig(ref f) if f == "node_id"), "{err:?}");
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        // ---
        let err = TransportBuilder::new()
            .uri("nats://localhost:4222")
            .node_id("n")
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RpcError::InvalidConfig(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_memory_with_hub() {
        // ---
        let transport = TransportBuilder::new()
            .uri("memory://")
            .node_id("storage-1")
            .hub(MemoryHub::new())
            .build()
            .await
            .unwrap();
        assert_eq!(transport.transport_id(), "storage-1");
    }
}
