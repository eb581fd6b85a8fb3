//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended for tests, single-process deployments,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory transport defines the **reference behavior** for the transport
//! layer. The broker transports approximate it as closely as their underlying
//! systems allow:
//!
//! - Once `subscribe()` returns successfully, messages published *after* that
//!   point and matching the subscription are deliverable.
//! - A subscription matches an address when their strings are exactly equal.
//! - Message delivery is deterministic within a single process.
//! - After `unsubscribe()` returns, the removed inboxes see end-of-stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    Envelope,
    Result,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// Capacity of each subscriber inbox.
const INBOX_CAPACITY: usize = 64;
const SUBSYSTEM: &str = "transport_memory";

struct Subscriber {
    owner: u64,
    tx: mpsc::Sender<Envelope>,
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a message broker within a single process. All transports that
/// share a `MemoryHub` can publish and receive each other's messages, exactly
/// as nodes connected to a real broker would.
///
/// For tests that need isolation between parallel cases, construct a hub
/// explicitly and pass it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use news_rpc::{MemoryHub, TransportConfig};
/// # use std::time::Duration;
/// # async fn example() -> news_rpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let config = |node_id: &str| TransportConfig {
///     uri: "memory://".into(),
///     node_id: node_id.into(),
///     keep_alive_secs: None,
///     connect_timeout: Duration::from_secs(5),
/// };
///
/// let server = news_rpc::create_memory_transport_with_hub(config("storage"), hub.clone()).await?;
/// let client = news_rpc::create_memory_transport_with_hub(config("web"), hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    subscriptions: RwLock<HashMap<Subscription, Vec<Subscriber>>>,
    next_owner: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    async fn publish(&self, transport_id: &str, env: Envelope) -> Result<()> {
        // ---
        let sub = Subscription::from(env.address.clone());

        // Snapshot the senders so no lock is held while awaiting capacity.
        let senders: Vec<mpsc::Sender<Envelope>> = {
            let subs = self.subscriptions.read().await;
            match subs.get(&sub) {
                Some(list) => list.iter().map(|s| s.tx.clone()).collect(),
                None => Vec::new(),
            }
        };

        log_debug!(
            "{transport_id}: publish to {} ({} subscriber(s))",
            env.address,
            senders.len()
        );

        for sender in senders {
            // A closed channel indicates a dropped SubscriptionHandle.
            if sender.send(env.clone()).await.is_err() {
                log_debug!("{transport_id}: dropped delivery to closed inbox");
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        transport_id: &str,
        owner: u64,
        sub: Subscription,
    ) -> Result<SubscriptionHandle> {
        // ---
        log_debug!("{transport_id}: subscribe to {sub:?}");

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut subs = self.subscriptions.write().await;
        let list = subs.entry(sub).or_default();
        list.retain(|s| !s.tx.is_closed());
        list.push(Subscriber { owner, tx });

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn unsubscribe(&self, transport_id: &str, owner: u64, sub: &Subscription) {
        // ---
        log_debug!("{transport_id}: unsubscribe from {sub:?}");

        let mut subs = self.subscriptions.write().await;
        if let Some(list) = subs.get_mut(sub) {
            list.retain(|s| s.owner != owner);
            if list.is_empty() {
                subs.remove(sub);
            }
        }
    }

    /// Drop every subscription registered by `owner`.
    async fn close(&self, transport_id: &str, owner: u64) {
        // ---
        log_debug!("{transport_id}: closing transport...");

        let mut subs = self.subscriptions.write().await;
        subs.retain(|_, list| {
            list.retain(|s| s.owner != owner);
            !list.is_empty()
        });
    }

    /// Number of live subscribers for `sub`.
    pub async fn subscriber_count(&self, sub: &Subscription) -> usize {
        // ---
        let subs = self.subscriptions.read().await;
        subs.get(sub)
            .map(|list| list.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn next_owner(&self) -> u64 {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_owner: AtomicU64::new(1),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes messages through a shared [`MemoryHub`]. Closing a transport only
/// removes the subscriptions it registered itself.
struct MemoryTransport {
    // ---
    base: TransportBase,
    owner: u64,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.hub.publish(self.transport_id(), env).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        self.hub
            .subscribe(self.transport_id(), self.owner, sub)
            .await
    }

    async fn unsubscribe(&self, sub: &Subscription) -> Result<()> {
        self.hub
            .unsubscribe(self.transport_id(), self.owner, sub)
            .await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.hub.close(self.transport_id(), self.owner).await;
        Ok(())
    }
}

/// Create a new in-memory transport on the process-global hub.
///
/// All transports created with this function share a single bus, matching
/// the semantics of nodes connected to a real broker.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport on the provided hub.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create memory transport", config.node_id);

    let transport = MemoryTransport {
        base: TransportBase::from(&config),
        owner: hub.next_owner(),
        hub,
    };

    Ok(Arc::new(transport))
}
