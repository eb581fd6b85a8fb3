// tests/integration.rs
//
// End-to-end exchanges between a NewsClient and a NewsServer on a private
// memory hub per test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDate;
use tokio::time::{timeout, Instant};

use news_rpc::wire::{self, status, Reply};
use news_rpc::{
    // ---
    Address,
    CorrelationId,
    Envelope,
    MemoryHub,
    News,
    NewsClient,
    NewsServer,
    NewsStorage,
    RpcConfig,
    RpcError,
    StorageError,
    Subscription,
    TransportBuilder,
};

fn init_logging() {
    // ---
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn sample_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2006, 1, 2).unwrap()
}

/// How the test storage answers every lookup.
#[derive(Clone, Copy)]
enum Behavior {
    Found,
    NotFound,
    DiskFull,
}

/// Storage double that counts lookups and optionally sleeps first.
struct CountingStorage {
    // ---
    behavior: Behavior,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingStorage {
    // ---
    fn new(behavior: Behavior) -> Arc<Self> {
        Self::slow(behavior, Duration::ZERO)
    }

    fn slow(behavior: Behavior, delay: Duration) -> Arc<Self> {
        // ---
        Arc::new(Self {
            behavior,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NewsStorage for CountingStorage {
    // ---
    async fn news(&self, id: i64) -> Result<News, StorageError> {
        // ---
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        match self.behavior {
            Behavior::Found => Ok(News::new(id, "header", sample_date())),
            Behavior::NotFound => Err(StorageError::NotFound),
            Behavior::DiskFull => Err(StorageError::backend("disk full")),
        }
    }
}

/// Server and client sharing a private hub.
struct Fixture {
    // ---
    hub: Arc<MemoryHub>,
    subject: String,
    server: NewsServer,
    client: NewsClient,
}

impl Fixture {
    // ---
    async fn start(name: &str, storage: Arc<dyn NewsStorage>) -> Self {
        // ---
        init_logging();

        let hub = MemoryHub::new();
        let subject = format!("{name}.news.get");

        let server = NewsServer::builder(
            RpcConfig::memory(&subject).with_node_id(format!("{name}-storage")),
            storage,
        )
        .hub(hub.clone())
        .start()
        .await
        .expect("server start");

        let client = NewsClient::builder(
            RpcConfig::memory(&subject).with_node_id(format!("{name}-web")),
        )
        .hub(hub.clone())
        .connect()
        .await
        .expect("client connect");

        Self {
            hub,
            subject,
            server,
            client,
        }
    }

    async fn shutdown(self) {
        // ---
        self.client.close().await.expect("client close");
        self.server.stop().await.expect("server stop");
    }
}

#[tokio::test]
async fn test_fetch_found() {
    // ---
    let storage = CountingStorage::new(Behavior::Found);
    let fx = Fixture::start("found", storage.clone()).await;

    let news = fx
        .client
        .fetch_news_within(123, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(news, News::new(123, "header", sample_date()));
    assert_eq!(storage.calls(), 1);

    fx.shutdown().await;
}

#[tokio::test]
async fn test_fetch_not_found() {
    // ---
    let fx = Fixture::start("not_found", CountingStorage::new(Behavior::NotFound)).await;

    let err = fx
        .client
        .fetch_news_within(123, Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(err.is_not_found(), "{err:?}");

    fx.shutdown().await;
}

#[tokio::test]
async fn test_storage_failure_text_stays_on_server() {
    // ---
    let fx = Fixture::start("disk_full", CountingStorage::new(Behavior::DiskFull)).await;

    let err = fx
        .client
        .fetch_news_within(123, Duration::from_secs(2))
        .await
        .unwrap_err();

    match err {
        RpcError::Rpc(message) => {
            assert!(!message.contains("disk full"), "{message}");
            assert_eq!(message, "internal server error");
        }
        other => panic!("expected Rpc error, got {other:?}"),
    }

    fx.shutdown().await;
}

#[tokio::test]
async fn test_deadline_shorter_than_processing() {
    // ---
    let storage = CountingStorage::slow(Behavior::Found, Duration::from_secs(1));
    let fx = Fixture::start("deadline", storage).await;

    let deadline = Duration::from_millis(100);
    let started = Instant::now();
    let err = fx
        .client
        .fetch_news_within(123, deadline)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, RpcError::Timeout), "{err:?}");
    assert!(elapsed >= deadline, "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "returned late: {elapsed:?}");

    fx.shutdown().await;
}

#[tokio::test]
async fn test_late_reply_is_discarded() {
    // ---
    let storage = CountingStorage::slow(Behavior::Found, Duration::from_millis(200));
    let fx = Fixture::start("late", storage).await;

    let err = fx
        .client
        .fetch_news_within(1, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout), "{err:?}");

    // Let the first reply arrive after its requester gave up; the next
    // request must still get its own answer.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let news = fx
        .client
        .fetch_news_within(2, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(news.id, 2);

    fx.shutdown().await;
}

#[tokio::test]
async fn test_corrupted_request_gets_bad_request() {
    // ---
    let storage = CountingStorage::new(Behavior::Found);
    let fx = Fixture::start("corrupted", storage.clone()).await;

    let raw = TransportBuilder::new()
        .uri("memory://")
        .node_id("raw")
        .hub(fx.hub.clone())
        .build()
        .await
        .unwrap();

    let reply_to = Address::from("_reply/raw");
    let mut replies = raw
        .subscribe(Subscription::from(reply_to.clone()))
        .await
        .unwrap();

    let correlation_id = CorrelationId::generate();
    raw.publish(Envelope::request(
        Address::from(fx.subject.as_str()),
        Bytes::from_static(&[0xff, 0xff, 0xff]),
        correlation_id.clone().into(),
        reply_to,
    ))
    .await
    .unwrap();

    let reply = timeout(Duration::from_secs(2), replies.inbox.recv())
        .await
        .expect("timed out waiting for reply")
        .expect("reply inbox closed");

    assert_eq!(reply.correlation_id.as_deref(), Some(correlation_id.as_str()));
    match wire::decode_response(&reply.payload).unwrap() {
        Reply::Error(err) => {
            assert_eq!(err.code, status::BAD_REQUEST);
            assert!(err.message.starts_with("failed to decode request"), "{}", err.message);
        }
        other => panic!("expected error reply, got {other:?}"),
    }
    assert_eq!(storage.calls(), 0);

    raw.close().await.unwrap();
    fx.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_fetches_resolve_independently() {
    // ---
    struct ById;

    #[async_trait::async_trait]
    impl NewsStorage for ById {
        async fn news(&self, id: i64) -> Result<News, StorageError> {
            // Later ids answer sooner, so replies arrive out of request order.
            tokio::time::sleep(Duration::from_millis(10 * (20 - id as u64))).await;
            match id % 3 {
                0 => Err(StorageError::NotFound),
                _ => Ok(News::new(id, format!("header {id}"), sample_date())),
            }
        }
    }

    let fx = Fixture::start("concurrent", Arc::new(ById)).await;

    let mut handles = Vec::new();
    for id in 1..=20_i64 {
        // ---
        let client = fx.client.clone();
        handles.push(tokio::spawn(async move {
            (id, client.fetch_news_within(id, Duration::from_secs(5)).await)
        }));
    }

    for handle in handles {
        let (id, result) = handle.await.unwrap();
        if id % 3 == 0 {
            assert!(matches!(result, Err(RpcError::NotFound)), "{id}: {result:?}");
        } else {
            let news = result.unwrap();
            assert_eq!(news.id, id);
            assert_eq!(news.header, format!("header {id}"));
        }
    }

    fx.shutdown().await;
}

#[tokio::test]
async fn test_stop_unsubscribes_without_waiting_for_handlers() {
    // ---
    let storage = CountingStorage::slow(Behavior::Found, Duration::from_millis(500));
    let fx = Fixture::start("stop", storage.clone()).await;
    let subject = Subscription::from(fx.subject.as_str());

    assert_eq!(fx.hub.subscriber_count(&subject).await, 1);

    let in_flight = tokio::spawn({
        let client = fx.client.clone();
        async move { client.fetch_news_within(7, Duration::from_secs(3)).await }
    });

    while storage.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let started = Instant::now();
    fx.server.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(fx.hub.subscriber_count(&subject).await, 0);

    // The dispatched handler still answers.
    assert_eq!(in_flight.await.unwrap().unwrap().id, 7);

    // Nobody serves the subject any more.
    let err = fx
        .client
        .fetch_news_within(8, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout), "{err:?}");

    fx.client.close().await.unwrap();
}

#[tokio::test]
async fn test_shared_transport_survives_stop() {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let config = RpcConfig::memory("shared.news.get").with_node_id("shared");

    let transport = TransportBuilder::from_config(&config)
        .hub(hub.clone())
        .build()
        .await
        .unwrap();

    let server = NewsServer::builder(config.clone(), CountingStorage::new(Behavior::Found))
        .transport(transport.clone())
        .start()
        .await
        .unwrap();
    let client = NewsClient::builder(config)
        .transport(transport.clone())
        .connect()
        .await
        .unwrap();

    assert_eq!(
        client
            .fetch_news_within(5, Duration::from_secs(2))
            .await
            .unwrap()
            .id,
        5
    );

    server.stop().await.unwrap();
    client.close().await.unwrap();

    // Neither side closed the connection it was handed.
    let mut inbox = transport
        .subscribe(Subscription::from("shared.ping"))
        .await
        .unwrap();
    transport
        .publish(Envelope::response(
            Address::from("shared.ping"),
            Bytes::from_static(b"ping"),
            CorrelationId::generate().into(),
        ))
        .await
        .unwrap();
    assert!(inbox.inbox.recv().await.is_some());
}

#[tokio::test]
async fn test_client_as_storage() {
    // ---
    let fx = Fixture::start("as_storage", CountingStorage::new(Behavior::NotFound)).await;

    let storage: Arc<dyn NewsStorage> = Arc::new(fx.client.clone());
    assert!(matches!(storage.news(1).await, Err(StorageError::NotFound)));

    fx.shutdown().await;
}

#[tokio::test]
async fn test_unknown_bus_scheme_is_config_error() {
    // ---
    let err = NewsClient::connect(RpcConfig::with_bus("nats://localhost:4222", "news.get"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RpcError::InvalidConfig(_)), "{err:?}");
}

#[cfg(feature = "transport_rumqttc")]
#[tokio::test]
async fn test_unreachable_broker_is_connection_error() {
    // ---
    let config = RpcConfig::with_bus("mqtt://127.0.0.1:1", "news.get")
        .with_connect_timeout(Duration::from_millis(500));

    let err = NewsServer::start(config, CountingStorage::new(Behavior::Found))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RpcError::Connection(_)), "{err:?}");
}
