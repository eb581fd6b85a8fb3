// src/client/mod.rs
//! News RPC client.
//!
//! The client subscribes to a private reply address (`_reply/{node_id}`) on
//! the configured transport and runs a background receive loop that matches
//! incoming replies with pending requests by correlation id.
//!
//! Each fetch generates a fresh correlation id and registers a oneshot
//! channel in the pending map. The caller's deadline is the only
//! cancellation mechanism: when it fires the pending entry is dropped and a
//! late reply is discarded by the receive loop. A request that was already
//! published cannot be retracted, and nothing is retried.

mod pending;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{Instrument, Span};

use crate::wire::{self, status, GetNewsRequest, Reply};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    CorrelationId,
    Envelope,
    MemoryHub,
    News,
    NewsStorage,
    Result,
    RpcConfig,
    RpcError,
    StorageError,
    Subscription,
    TransportBuilder,
    TransportPtr,
};

use pending::PendingRequests;

const SUBSYSTEM: &str = "news_client";

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The pending map holds no invariants spanning entries; the worst outcome
/// of a poisoned lock is an unmatched reply.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Builder for [`NewsClient`].
pub struct NewsClientBuilder {
    // ---
    config: RpcConfig,
    transport: Option<TransportPtr>,
    hub: Option<Arc<MemoryHub>>,
    span: Option<Span>,
}

impl NewsClientBuilder {
    // ---
    /// Send requests over an existing transport instead of opening a new one.
    ///
    /// A shared transport is not closed by [`NewsClient::close`].
    pub fn transport(mut self, transport: TransportPtr) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use an explicit hub for `memory://` bus URIs.
    pub fn hub(mut self, hub: Arc<MemoryHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Span every request is instrumented with.
    ///
    /// Defaults to an `info` span named `news_client` carrying the subject
    /// and node id.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Connect to the bus and subscribe to this client's reply address.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Connection`] if the bus cannot be reached.
    /// - [`RpcError::InvalidConfig`] / [`RpcError::MissingConfig`] for an
    ///   unusable bus URI.
    /// - [`RpcError::Transport`] if the reply subscription cannot be
    ///   established.
    pub async fn connect(self) -> Result<NewsClient> {
        // ---
        let span = self.span.unwrap_or_else(|| {
            tracing::info_span!(
                "news_client",
                subject = %self.config.subject,
                node_id = %self.config.node_id
            )
        });

        let (transport, owns_transport) = match self.transport {
            Some(transport) => (transport, false),
            None => {
                let mut builder = TransportBuilder::from_config(&self.config);
                if let Some(hub) = self.hub {
                    builder = builder.hub(hub);
                }
                (builder.build().await?, true)
            }
        };

        let reply_to = Address::from(format!("_reply/{}", self.config.node_id));
        let mut handle = match transport.subscribe(Subscription::from(reply_to.clone())).await {
            Ok(handle) => handle,
            Err(err) => {
                if owns_transport {
                    let _ = transport.close().await;
                }
                return Err(err);
            }
        };

        let subject = Address::from(self.config.subject.as_str());
        let config = self.config;
        let loop_span = span.clone();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            // ---
            let weak = weak.clone();

            let rx_task = tokio::spawn(
                async move {
                    // ---
                    while let Some(env) = handle.inbox.recv().await {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.handle_envelope(env);
                    }
                    log_debug!("reply subscription closed, receive loop exiting");
                }
                .instrument(loop_span),
            );

            Inner {
                // ---
                transport,
                owns_transport,
                subject,
                reply_to,
                pending: Mutex::new(PendingRequests::new()),
                closed: AtomicBool::new(false),
                config,
                span,
                rx_task,
            }
        });

        inner.span.in_scope(|| log_info!("news client connected"));

        Ok(NewsClient { inner })
    }
}

/// Connected news client.
///
/// Cheap to clone (internally `Arc`-backed); clones share the connection and
/// the pending-request map. Any number of fetches may be in flight at once.
///
/// # Example
///
/// ```no_run
/// use news_rpc::{NewsClient, RpcConfig, RpcError};
/// use std::time::Duration;
///
/// # async fn example() -> news_rpc::Result<()> {
/// let client = NewsClient::connect(RpcConfig::from_env()?).await?;
///
/// match client.fetch_news_within(123, Duration::from_secs(2)).await {
///     Ok(news) => println!("{}: {}", news.date, news.header),
///     Err(RpcError::NotFound) => println!("no such news"),
///     Err(err) => return Err(err),
/// }
///
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NewsClient {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    owns_transport: bool,
    subject: Address,
    reply_to: Address,
    pending: Mutex<PendingRequests>,
    closed: AtomicBool,
    config: RpcConfig,
    span: Span,

    /// Receive loop; exits when the reply subscription ends. Aborted when
    /// the last clone of the client is dropped.
    rx_task: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // ---
        self.rx_task.abort();

        if self.closed.load(Ordering::Acquire) {
            return;
        }

        // Dropped without close(): release the reply address in the background.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let transport = self.transport.clone();
        let reply = Subscription::from(self.reply_to.clone());
        let owns_transport = self.owns_transport;

        runtime.spawn(
            async move {
                // ---
                if let Err(_err) = transport.unsubscribe(&reply).await {
                    log_debug!("failed to release {reply:?} of a dropped client: {_err}");
                }
                if owns_transport {
                    let _ = transport.close().await;
                }
            }
            .instrument(self.span.clone()),
        );
    }
}

impl Inner {
    // ---
    fn handle_envelope(&self, env: Envelope) {
        // ---
        let Some(correlation_id) = env.correlation_id else {
            log_warn!("dropping reply on {} without correlation id", env.address);
            return;
        };

        let correlation_id = CorrelationId::from(&*correlation_id);
        let delivered = lock_ignore_poison(&self.pending).complete(&correlation_id, env.payload);

        if !delivered {
            log_debug!("reply arrived after request abandoned (correlation_id: {correlation_id})");
        }
    }
}

impl NewsClient {
    // ---
    /// Start configuring a client.
    pub fn builder(config: RpcConfig) -> NewsClientBuilder {
        // ---
        NewsClientBuilder {
            config,
            transport: None,
            hub: None,
            span: None,
        }
    }

    /// Connect with default settings.
    pub async fn connect(config: RpcConfig) -> Result<Self> {
        Self::builder(config).connect().await
    }

    /// The request subject this client publishes on.
    pub fn subject(&self) -> &str {
        &self.inner.config.subject
    }

    /// Fetch one news record, giving up at `deadline`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::NotFound`] if the server has no news with this id.
    /// - [`RpcError::Timeout`] if no reply arrived before `deadline`.
    /// - [`RpcError::Rpc`] carrying the server's message for any other
    ///   error reply.
    /// - [`RpcError::MalformedMessage`] / [`RpcError::ProtocolViolation`] if
    ///   the reply cannot be decoded.
    /// - [`RpcError::Transport`] if the request cannot be published or the
    ///   client is closed while waiting.
    /// - [`RpcError::InvalidState`] after [`close`](Self::close).
    pub async fn fetch_news(&self, id: i64, deadline: Instant) -> Result<News> {
        // ---
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RpcError::InvalidState("client is closed".into()));
        }

        let correlation_id = CorrelationId::generate();
        let span = tracing::debug_span!(
            parent: &self.inner.span,
            "fetch_news",
            id,
            correlation_id = %correlation_id
        );

        let outcome: Result<News> = async {
            // ---
            let exchange = self.exchange(id, correlation_id.clone());

            let reply = match time::timeout_at(deadline, exchange).await {
                Ok(reply) => reply,
                Err(_) => {
                    lock_ignore_poison(&self.inner.pending).remove(&correlation_id);
                    log_debug!("no reply for news {id} before the deadline");
                    return Err(RpcError::Timeout);
                }
            }?;

            match wire::decode_response(&reply)? {
                Reply::News(news) => Ok(news),
                Reply::Error(err) if err.code == status::NOT_FOUND => Err(RpcError::NotFound),
                Reply::Error(err) => Err(RpcError::Rpc(err.message)),
            }
        }
        .instrument(span)
        .await;

        outcome
    }

    /// Fetch one news record, giving up after `timeout`.
    pub async fn fetch_news_within(&self, id: i64, timeout: Duration) -> Result<News> {
        self.fetch_news(id, Instant::now() + timeout).await
    }

    /// Publish the request and wait for the matching reply payload.
    async fn exchange(&self, id: i64, correlation_id: CorrelationId) -> Result<Bytes> {
        // ---
        let payload = wire::encode_request(&GetNewsRequest { id });

        let rx = lock_ignore_poison(&self.inner.pending).register(correlation_id.clone());

        let env = Envelope::request(
            self.inner.subject.clone(),
            payload,
            correlation_id.clone().into(),
            self.inner.reply_to.clone(),
        );

        if let Err(err) = self.inner.transport.publish(env).await {
            lock_ignore_poison(&self.inner.pending).remove(&correlation_id);
            return Err(err);
        }

        rx.await
            .map_err(|_| RpcError::Transport("reply channel closed (client closed)".into()))
    }

    /// Close the client.
    ///
    /// Unsubscribes from the reply address and, when the client opened its
    /// own connection, closes it; each step is bounded by the configured
    /// drain timeout. Requests still waiting fail with
    /// [`RpcError::Transport`]; later fetches fail with
    /// [`RpcError::InvalidState`]. Closing twice is an error.
    pub async fn close(&self) -> Result<()> {
        // ---
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(RpcError::InvalidState("client is already closed".into()));
        }

        let span = self.inner.span.clone();
        self.shutdown().instrument(span).await
    }

    async fn shutdown(&self) -> Result<()> {
        // ---
        let drain = self.inner.config.drain_timeout;
        let mut first_err: Option<RpcError> = None;

        let sub = Subscription::from(self.inner.reply_to.clone());
        match time::timeout(drain, self.inner.transport.unsubscribe(&sub)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log_error!("failed to unsubscribe reply address: {err}");
                first_err.get_or_insert(err);
            }
            Err(_) => {
                log_error!("unsubscribe did not finish within {drain:?}");
                first_err.get_or_insert(RpcError::Timeout);
            }
        }

        if self.inner.owns_transport {
            match time::timeout(drain, self.inner.transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log_error!("failed to close transport: {err}");
                    first_err.get_or_insert(err);
                }
                Err(_) => {
                    log_error!("transport close did not finish within {drain:?}");
                    first_err.get_or_insert(RpcError::Timeout);
                }
            }
        }

        let _abandoned = lock_ignore_poison(&self.inner.pending).fail_all();
        log_info!("news client closed ({_abandoned} requests abandoned)");

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The client is itself a storage capability, so front ends can serve from
/// a remote storage process exactly as from a local adapter.
#[async_trait::async_trait]
impl NewsStorage for NewsClient {
    // ---
    async fn news(&self, id: i64) -> std::result::Result<News, StorageError> {
        // ---
        match self.fetch_news_within(id, self.inner.config.request_timeout).await {
            Ok(news) => Ok(news),
            Err(RpcError::NotFound) => Err(StorageError::NotFound),
            Err(RpcError::Timeout) => Err(StorageError::Timeout),
            Err(err) => Err(StorageError::backend(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::wire::{encode_response, WireError};
    use chrono::NaiveDate;

    /// Connect a client on a private hub and return the request inbox a
    /// hand-written responder can read from.
    async fn client_with_responder(
        subject: &str,
    ) -> (NewsClient, TransportPtr, crate::SubscriptionHandle) {
        // ---
        let hub = MemoryHub::new();

        let responder = TransportBuilder::new()
            .uri("memory://")
            .node_id("responder")
            .hub(hub.clone())
            .build()
            .await
            .unwrap();
        let inbox = responder.subscribe(Subscription::from(subject)).await.unwrap();

        let client = NewsClient::builder(RpcConfig::memory(subject).with_node_id("client"))
            .hub(hub)
            .connect()
            .await
            .unwrap();

        (client, responder, inbox)
    }

    /// Answer the next request with `payload`.
    async fn answer(responder: &TransportPtr, inbox: &mut crate::SubscriptionHandle, payload: Bytes) {
        // ---
        let req = inbox.inbox.recv().await.unwrap();
        let reply = Envelope::response(
            req.reply_to.unwrap(),
            payload,
            req.correlation_id.unwrap(),
        );
        responder.publish(reply).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_envelope_shape() {
        // ---
        let (client, _responder, mut inbox) = client_with_responder("news.shape").await;

        let fetch = tokio::spawn({
            let client = client.clone();
            async move { client.fetch_news_within(42, Duration::from_millis(100)).await }
        });

        let req = inbox.inbox.recv().await.unwrap();
        assert_eq!(&*req.address.0, "news.shape");
        assert_eq!(req.reply_to.as_ref().map(|a| &*a.0), Some("_reply/client"));
        assert!(req.correlation_id.is_some());
        assert_eq!(wire::decode_request(&req.payload).unwrap().id, 42);

        // Nobody answers.
        assert!(matches!(fetch.await.unwrap(), Err(RpcError::Timeout)));
        assert_eq!(lock_ignore_poison(&client.inner.pending).len(), 0);
    }

    #[tokio::test]
    async fn test_error_codes_map_to_typed_errors() {
        // ---
        let (client, responder, mut inbox) = client_with_responder("news.codes").await;

        let not_found = encode_response(&Reply::error(status::NOT_FOUND, "news not found")).unwrap();
        let fetch = tokio::spawn({
            let client = client.clone();
            async move { client.fetch_news_within(1, Duration::from_secs(2)).await }
        });
        answer(&responder, &mut inbox, not_found).await;
        assert!(fetch.await.unwrap().unwrap_err().is_not_found());

        let failure = encode_response(&Reply::Error(WireError {
            code: 503,
            message: "try later".into(),
        }))
        .unwrap();
        let fetch = tokio::spawn({
            let client = client.clone();
            async move { client.fetch_news_within(1, Duration::from_secs(2)).await }
        });
        answer(&responder, &mut inbox, failure).await;
        match fetch.await.unwrap() {
            Err(RpcError::Rpc(message)) => assert_eq!(message, "try later"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_reply_surfaces() {
        // ---
        let (client, responder, mut inbox) = client_with_responder("news.garbage").await;

        let fetch = tokio::spawn({
            let client = client.clone();
            async move { client.fetch_news_within(1, Duration::from_secs(2)).await }
        });
        answer(&responder, &mut inbox, Bytes::from_static(&[0xff, 0xff, 0xff])).await;

        assert!(matches!(
            fetch.await.unwrap(),
            Err(RpcError::MalformedMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_news_reply_decodes() {
        // ---
        let (client, responder, mut inbox) = client_with_responder("news.ok").await;

        let date = NaiveDate::from_ymd_opt(2006, 1, 2).unwrap();
        let payload = encode_response(&Reply::News(News::new(7, "header", date))).unwrap();

        let fetch = tokio::spawn({
            let client = client.clone();
            async move { client.fetch_news_within(7, Duration::from_secs(2)).await }
        });
        answer(&responder, &mut inbox, payload).await;

        assert_eq!(fetch.await.unwrap().unwrap(), News::new(7, "header", date));
    }

    #[tokio::test]
    async fn test_fetch_after_close() {
        // ---
        let (client, _responder, _inbox) = client_with_responder("news.closed").await;

        client.close().await.unwrap();

        let err = client
            .fetch_news_within(1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidState(_)), "{err:?}");
        assert!(matches!(client.close().await, Err(RpcError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_close_fails_waiting_requests() {
        // ---
        let (client, _responder, mut inbox) = client_with_responder("news.abandon").await;

        let fetch = tokio::spawn({
            let client = client.clone();
            async move { client.fetch_news_within(1, Duration::from_secs(10)).await }
        });
        // Wait until the request is on the bus, then close underneath it.
        inbox.inbox.recv().await.unwrap();
        client.close().await.unwrap();

        assert!(matches!(fetch.await.unwrap(), Err(RpcError::Transport(_))));
    }

    #[tokio::test]
    async fn test_drop_releases_reply_address() {
        // ---
        let hub = MemoryHub::new();
        let reply = Subscription::from("_reply/dropped");

        let client = NewsClient::builder(RpcConfig::memory("news.dropped").with_node_id("dropped"))
            .hub(hub.clone())
            .connect()
            .await
            .unwrap();
        let clone = client.clone();
        assert_eq!(hub.subscriber_count(&reply).await, 1);

        // One clone left keeps the client alive.
        drop(client);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.subscriber_count(&reply).await, 1);

        drop(clone);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.subscriber_count(&reply).await, 0);
    }

    #[tokio::test]
    async fn test_storage_view_maps_outcomes() {
        // ---
        let (client, responder, mut inbox) = client_with_responder("news.storage").await;

        let not_found = encode_response(&Reply::error(status::NOT_FOUND, "news not found")).unwrap();
        let lookup = tokio::spawn({
            let client = client.clone();
            async move { client.news(5).await }
        });
        answer(&responder, &mut inbox, not_found).await;
        assert!(matches!(lookup.await.unwrap(), Err(StorageError::NotFound)));

        let failure =
            encode_response(&Reply::error(status::INTERNAL_ERROR, "internal server error")).unwrap();
        let lookup = tokio::spawn({
            let client = client.clone();
            async move { client.news(5).await }
        });
        answer(&responder, &mut inbox, failure).await;
        assert!(matches!(lookup.await.unwrap(), Err(StorageError::Backend(_))));
    }
}
