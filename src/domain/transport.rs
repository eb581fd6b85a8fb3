// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the bus-level interface used by the news client and
//! server to exchange messages. It intentionally avoids any reference to
//! concrete protocols, brokers, or client libraries.
//!
//! The transport layer is responsible only for delivering opaque envelopes
//! to subscribed consumers. Higher-level semantics such as correlation,
//! deadlines and the news wire schema are handled elsewhere.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Shared base state for all transport implementations.
///
/// Each concrete transport embeds this as a field named `base` and returns it
/// from [`Transport::base`].
pub struct TransportBase {
    /// Unique identifier for this transport instance (the node_id).
    pub transport_id: String,
}

impl From<&TransportConfig> for TransportBase {
    fn from(config: &TransportConfig) -> Self {
        // ---
        Self {
            transport_id: config.node_id.clone(),
        }
    }
}

/// Configuration for creating a transport instance.
///
/// Passed to transport factory functions (`create_*_transport()`).
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Bus URI (e.g. `"memory://"`, `"mqtt://localhost:1883"`).
    pub uri: String,
    /// Node ID for this transport instance; doubles as the broker client id.
    pub node_id: String,
    /// Broker keep-alive interval in seconds.
    pub keep_alive_secs: Option<u16>,
    /// How long to wait for the broker to accept the connection.
    pub connect_timeout: Duration,
}

/// A transport address.
///
/// An `Address` is a destination to which messages may be published: the
/// request subject of a news server, or the private reply address of a
/// client. Its interpretation is transport-specific (MQTT topic, hub key),
/// but it is treated as an opaque identifier at the domain level.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // ---
        f.write_str(&self.0)
    }
}

/// A subscription identifier.
///
/// Matching is exact string equality in the in-memory transport, which
/// provides the reference semantics. No wildcard syntax is defined.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub Arc<str>);

impl From<Address> for Subscription {
    fn from(address: Address) -> Self {
        // ---
        Subscription(address.0)
    }
}

impl<T> From<T> for Subscription
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Subscription(value.into())
    }
}

/// An opaque message envelope.
///
/// The unit of transport between producers and consumers. It carries the
/// encoded wire message along with the metadata the RPC layer needs for
/// reply routing. The transport does not interpret any of it.
///
/// # Examples
///
/// ```
/// # use news_rpc::{Envelope, Address};
/// # use bytes::Bytes;
/// # use std::sync::Arc;
/// let request = Envelope::request(
///     Address::from("news.get"),
///     Bytes::from_static(b"\x08\x7b"),
///     Arc::from("correlation-123"),
///     Address::from("_reply/web-1"),
/// );
/// assert!(request.reply_to.is_some());
///
/// let reply = Envelope::response(
///     Address::from("_reply/web-1"),
///     Bytes::new(),
///     Arc::from("correlation-123"),
/// );
/// assert!(reply.reply_to.is_none());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    // ---
    /// Delivery address used by the transport.
    pub address: Address,

    /// Encoded wire message (`GetNewsRequest` or `GetNewsResponse`).
    pub payload: Bytes,

    /// Correlation identifier used to associate requests with replies.
    pub correlation_id: Option<Arc<str>>,

    /// Reply address. Present on requests; the server answers there.
    pub reply_to: Option<Address>,

    /// Content type metadata, informational only.
    pub content_type: Option<Arc<str>>,
}

/// Content type stamped on every envelope carrying a news wire message.
///
/// The `schema` parameter names the wire schema version; a new version gets
/// a new value.
pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf; schema=news.v1";

impl Envelope {
    // ---
    /// Create a request envelope.
    ///
    /// # Arguments
    ///
    /// * `address` - Request subject of the server
    /// * `payload` - Encoded `GetNewsRequest`
    /// * `correlation_id` - Unique identifier for matching the reply
    /// * `reply_to` - Address where the reply should be sent
    pub fn request(
        address: Address,
        payload: Bytes,
        correlation_id: Arc<str>,
        reply_to: Address,
    ) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            content_type: Some(Arc::from(CONTENT_TYPE_PROTOBUF)),
        }
    }

    /// Create a reply envelope.
    ///
    /// # Arguments
    ///
    /// * `address` - Destination address (from the request's reply_to field)
    /// * `payload` - Encoded `GetNewsResponse`
    /// * `correlation_id` - Correlation ID from the original request
    pub fn response(address: Address, payload: Bytes, correlation_id: Arc<str>) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: None,
            content_type: Some(Arc::from(CONTENT_TYPE_PROTOBUF)),
        }
    }
}

/// Handle returned from a successful subscription.
///
/// The subscription remains active until it is explicitly removed with
/// [`Transport::unsubscribe`], the handle is dropped, or the transport is
/// closed.
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for delivered envelopes matching this subscription.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Transport abstraction.
///
/// A `Transport` provides best-effort delivery of message envelopes between
/// producers and subscribers. Correlation and deadlines live in the client
/// and server layers.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, messages published *after* that
///   point and matching the subscription are deliverable.
/// - `publish()` is non-blocking with respect to subscribers.
/// - After `unsubscribe()` returns, no further envelopes are delivered to
///   inboxes registered for that subscription.
///
/// The in-memory transport serves as the reference implementation of these
/// semantics.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    /// Publish an envelope to its address.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Register a subscription and return a handle for receiving messages.
    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle>;

    /// Remove a subscription; its inboxes observe end-of-stream.
    async fn unsubscribe(&self, sub: &Subscription) -> Result<()>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// `.clone()` only increments a reference count; clones share the same
/// underlying connection.
pub type TransportPtr = Arc<dyn Transport>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_envelope_json_keeps_reply_metadata() {
        // ---
        let request = Envelope::request(
            Address::from("news.get"),
            Bytes::from_static(b"\x08\x7b"),
            Arc::from("correlation-123"),
            Address::from("_reply/web-1"),
        );

        let json = serde_json::to_vec(&request).unwrap();
        let decoded: Envelope = serde_json::from_slice(&json).unwrap();

        assert_eq!(decoded.address, Address::from("news.get"));
        assert_eq!(decoded.payload, request.payload);
        assert_eq!(decoded.correlation_id.as_deref(), Some("correlation-123"));
        assert_eq!(decoded.reply_to, Some(Address::from("_reply/web-1")));
        assert_eq!(decoded.content_type.as_deref(), Some(CONTENT_TYPE_PROTOBUF));
    }

    #[test]
    fn test_envelope_json_without_reply_to() {
        // ---
        let json = br#"{"address":"_reply/web-1","payload":[],"correlation_id":"c-1","reply_to":null,"content_type":null}"#;
        let decoded: Envelope = serde_json::from_slice(json).unwrap();

        assert_eq!(decoded.address, Address::from("_reply/web-1"));
        assert!(decoded.payload.is_empty());
        assert!(decoded.reply_to.is_none());
        assert!(decoded.content_type.is_none());
    }
}
