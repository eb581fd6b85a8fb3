//! Public, transport-agnostic RPC configuration.
//!
//! This type intentionally contains no transport-specific concepts
//! (e.g. MQTT client options). Transport layers are responsible for
//! interpreting this config into concrete connection settings.

use std::time::Duration;

use uuid::Uuid;

use crate::{Result, RpcError, TransportConfig};

/// Default request subject served by a news storage process.
pub const DEFAULT_SUBJECT: &str = "news.get";

/// Bus URI of the process-global in-memory hub.
pub const MEMORY_URI: &str = "memory://";

/// Connection and timing parameters shared by [`NewsServer`](crate::NewsServer)
/// and [`NewsClient`](crate::NewsClient).
///
/// The server lookup bound and the drain bound are independent values; one
/// is never derived from the other.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Bus URI: `memory://` or `mqtt://host:port`.
    pub bus_uri: String,

    /// Request subject the server subscribes to and the client publishes on.
    pub subject: String,

    /// Unique identifier of this node on the bus. Also names the client's
    /// private reply address and the broker client id.
    pub node_id: String,

    /// Broker connection keep-alive interval in seconds.
    pub keep_alive_secs: Option<u16>,

    /// How long `start`/`connect` wait for the bus to accept the connection.
    ///
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Upper bound on a single storage lookup inside the server.
    ///
    /// Default: 3 seconds
    pub server_timeout: Duration,

    /// Upper bound on unsubscribing and closing the bus connection during
    /// `stop`/`close`.
    ///
    /// Default: 5 seconds
    pub drain_timeout: Duration,

    /// Deadline applied by the client when the caller does not supply one
    /// (e.g. when the client is used through [`NewsStorage`](crate::NewsStorage)).
    ///
    /// Default: 5 seconds
    pub request_timeout: Duration,
}

impl RpcConfig {
    /// Create a config for the given bus URI and request subject.
    ///
    /// The node id is generated; override it with [`with_node_id`](Self::with_node_id).
    pub fn with_bus(bus_uri: impl Into<String>, subject: impl Into<String>) -> Self {
        // ---
        Self {
            bus_uri: bus_uri.into(),
            subject: subject.into(),
            node_id: generate_node_id(),
            keep_alive_secs: None,
            connect_timeout: Duration::from_secs(5),
            server_timeout: Duration::from_secs(3),
            drain_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Create a config for the process-global memory hub.
    pub fn memory(subject: impl Into<String>) -> Self {
        Self::with_bus(MEMORY_URI, subject)
    }

    /// Load the config from the process environment.
    ///
    /// | Variable | Meaning | Default |
    /// |---|---|---|
    /// | `BUS_URI` | bus URI | `memory://` |
    /// | `SUBSCRIBE_SUBJECT` | request subject | `news.get` |
    /// | `NODE_ID` | node id | generated |
    /// | `SERVER_TIMEOUT_MS` | storage lookup bound | 3000 |
    /// | `DRAIN_TIMEOUT_MS` | shutdown bound | 5000 |
    /// | `REQUEST_TIMEOUT_MS` | default client deadline | 5000 |
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] if a value is present but empty or
    /// not a number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // ---
        let bus_uri = non_empty(&lookup, "BUS_URI")?.unwrap_or_else(|| MEMORY_URI.to_string());
        let subject =
            non_empty(&lookup, "SUBSCRIBE_SUBJECT")?.unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

        let mut config = Self::with_bus(bus_uri, subject);

        if let Some(node_id) = non_empty(&lookup, "NODE_ID")? {
            config.node_id = node_id;
        }
        if let Some(timeout) = millis(&lookup, "SERVER_TIMEOUT_MS")? {
            config.server_timeout = timeout;
        }
        if let Some(timeout) = millis(&lookup, "DRAIN_TIMEOUT_MS")? {
            config.drain_timeout = timeout;
        }
        if let Some(timeout) = millis(&lookup, "REQUEST_TIMEOUT_MS")? {
            config.request_timeout = timeout;
        }

        Ok(config)
    }

    /// Set an explicit node id.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Set an explicit keep-alive interval.
    pub fn with_keep_alive_secs(mut self, secs: u16) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }

    /// Set the bus connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the server-side storage lookup bound.
    ///
    /// # Example
    ///
    /// ```
    /// use news_rpc::RpcConfig;
    /// use std::time::Duration;
    ///
    /// let config = RpcConfig::memory("news.get")
    ///     .with_server_timeout(Duration::from_millis(500));
    /// assert_eq!(config.drain_timeout, Duration::from_secs(5));
    /// ```
    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = timeout;
        self
    }

    /// Set the shutdown (unsubscribe + close) bound.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the client's default deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Transport-level view of this config.
    pub fn transport_config(&self) -> TransportConfig {
        // ---
        TransportConfig {
            uri: self.bus_uri.clone(),
            node_id: self.node_id.clone(),
            keep_alive_secs: self.keep_alive_secs,
            connect_timeout: self.connect_timeout,
        }
    }
}

fn generate_node_id() -> String {
    // ---
    let uuid = Uuid::new_v4().simple().to_string();
    format!("news-{}", &uuid[..12])
}

fn non_empty<F>(lookup: &F, key: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    match lookup(key) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => {
            Err(RpcError::InvalidConfig(format!("{key} is set but empty")))
        }
        Some(value) => Ok(Some(value.trim().to_string())),
    }
}

fn millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    non_empty(lookup, key)?
        .map(|value| {
            value
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| RpcError::InvalidConfig(format!("{key}={value:?} is not a number")))
        })
        .transpose()
}
