//! MQTT transport implementation using `rumqttc`.
//!
//! This module provides an implementation of the `Transport` trait backed by
//! an MQTT broker connection. It follows an **actor-based concurrency model**
//! to safely integrate with the underlying MQTT client.
//!
//! ## Concurrency model
//!
//! - An **event pump** task owns the MQTT `EventLoop` and does nothing but
//!   poll it: it fans incoming publishes out to local inboxes and forwards
//!   SUBACKs and reconnects to the actor.
//! - A background **actor task** owns the `AsyncClient`. It publishes
//!   outbound envelopes, registers and removes broker subscriptions, and
//!   disconnects on close.
//! - The pump never waits on the actor, so an `AsyncClient` call that waits
//!   for room in the client's request queue is always drained eventually.
//!
//! ## Connection behavior
//!
//! Unlike a bare `rumqttc` client, [`create_transport`] waits for the
//! broker's CONNACK (bounded by `connect_timeout`) so an unreachable broker
//! surfaces as [`RpcError::Connection`] at construction time. After that the
//! event loop reconnects on its own and the actor re-subscribes every known
//! topic.
//!
//! ## Message delivery semantics
//!
//! Envelopes travel as JSON documents on the MQTT topic named by their
//! address. Incoming publishes are demultiplexed by topic and fanned out to
//! all local inboxes registered for that topic, matching the memory transport
//! contract. Delivery is best-effort (QoS 0) and non-durable.
//!
//! ## Subscription confirmation
//!
//! Subscriptions wait for SUBACK before returning. SUBACK packets carry only
//! packet IDs, so subscribe requests are queued and sent to the broker one at
//! a time; each SUBACK completes the subscription in flight.

use rumqttc::{
    //
    AsyncClient,
    ConnectReturnCode,
    Event,
    EventLoop,
    MqttOptions,
    Outgoing,
    Packet,
    Publish,
    QoS,
};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Envelope,
    Result,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

const SUBSYSTEM: &str = "transport_mqtt";

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_PORT: u16 = 1883;

/// Capacity of the `AsyncClient` request queue drained by the event pump.
const REQUEST_CAPACITY: usize = 64;

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Envelope>>>>>;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        env: Envelope,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        topic: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        topic: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

/// Connection events the pump hands to the actor.
enum LinkEvent {
    //
    SubAck(rumqttc::SubAck),
    Reconnected,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor
    async fn handle(self, actor: &mut MqttActor) -> ActorStep {
        // ---
        match self {
            Cmd::Publish { env, resp } => {
                let result = actor.handle_publish(env).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Subscribe { topic, resp } => {
                actor.handle_subscribe(topic, resp).await;
                ActorStep::Continue
            }
            Cmd::Unsubscribe { topic, resp } => {
                let result = actor.handle_unsubscribe(topic).await;
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                actor.handle_close().await;
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

//
// Subscribe queue
//

struct QueuedSubscribe {
    topic: String,
    /// `None` for re-subscriptions after a reconnect.
    responder: Option<oneshot::Sender<Result<()>>>,
}

/// Subscriptions waiting for SUBACK, in the order they were requested.
///
/// At most one is in flight at the broker; the rest wait their turn.
#[derive(Default)]
struct SubscribeQueue {
    in_flight: Option<QueuedSubscribe>,
    waiting: VecDeque<QueuedSubscribe>,
}

impl SubscribeQueue {
    // ---
    fn push(&mut self, topic: String, responder: Option<oneshot::Sender<Result<()>>>) {
        self.waiting.push_back(QueuedSubscribe { topic, responder });
    }

    /// Moves the next waiting subscription in flight and returns its topic.
    ///
    /// Returns `None` while another one is in flight or nothing waits.
    fn start_next(&mut self) -> Option<String> {
        // ---
        if self.in_flight.is_some() {
            return None;
        }
        let next = self.waiting.pop_front()?;
        let topic = next.topic.clone();
        self.in_flight = Some(next);
        Some(topic)
    }

    fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|queued| queued.topic.as_str())
    }

    /// Completes the subscription in flight with `outcome`.
    fn finish(&mut self, outcome: Result<()>) -> Option<String> {
        // ---
        let done = self.in_flight.take()?;
        if let Some(responder) = done.responder {
            let _ = responder.send(outcome);
        }
        Some(done.topic)
    }

    /// Puts an unanswered subscription back at the head of the queue.
    fn requeue_in_flight(&mut self) {
        // ---
        if let Some(queued) = self.in_flight.take() {
            self.waiting.push_front(queued);
        }
    }

    fn contains(&self, topic: &str) -> bool {
        // ---
        self.in_flight() == Some(topic) || self.waiting.iter().any(|queued| queued.topic == topic)
    }
}

/// MQTT-based implementation of the `Transport` trait.
///
/// Represents a single broker connection.
struct RumqttcTransport {
    // ---
    base: TransportBase,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
    actor: Mutex<Option<JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

struct MqttActor {
    // ---
    transport_id: String, // for logging only
    client: AsyncClient,
    cmd_rx: mpsc::Receiver<Cmd>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    subscribers: SubscriberMap,
    subscribes: SubscribeQueue,
    pump: AbortHandle,
}

impl MqttActor {
    // ---

    async fn run(mut self) {
        // ---
        let closed = loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break true;
                            }
                        }
                        None => break false,
                    }
                }

                link = self.link_rx.recv() => {
                    match link {
                        Some(LinkEvent::SubAck(suback)) => self.handle_suback(suback).await,
                        Some(LinkEvent::Reconnected) => self.handle_reconnected().await,
                        None => break false,
                    }
                }
            }
        };

        // Dropped without close(), or the pump is gone: nothing will flush a
        // DISCONNECT, so stop polling right away.
        if !closed {
            self.pump.abort();
        }

        log_debug!("{}: mqtt actor stopped", self.transport_id);
    }

    /// Publishes an envelope to the broker as a JSON document (QoS 0).
    async fn handle_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        let topic = env.address.0.to_string();

        let payload = serde_json::to_vec(&env).map_err(|err| {
            RpcError::Transport(format!("failed to serialize envelope: {err}"))
        })?;

        self.client
            .publish(topic.as_str(), QoS::AtMostOnce, false, payload)
            .await
            .map_err(|err| RpcError::Transport(format!("publish to {topic} failed: {err}")))
    }

    /// Queues a broker subscription; the responder fires on SUBACK.
    async fn handle_subscribe(&mut self, topic: String, resp: oneshot::Sender<Result<()>>) {
        // ---
        self.subscribes.push(topic, Some(resp));
        self.send_next_subscribe().await;
    }

    /// Sends queued subscriptions until one is accepted by the client.
    async fn send_next_subscribe(&mut self) {
        // ---
        while let Some(topic) = self.subscribes.start_next() {
            match self.client.subscribe(topic.as_str(), QoS::AtMostOnce).await {
                Ok(()) => return,
                Err(err) => {
                    self.subscribes.finish(Err(RpcError::Transport(format!(
                        "failed to send subscribe for {topic}: {err}"
                    ))));
                }
            }
        }
    }

    async fn handle_unsubscribe(&mut self, topic: String) -> Result<()> {
        // ---
        // Dropping the local senders closes the inboxes right away.
        self.subscribers.write().await.remove(&topic);

        self.client
            .unsubscribe(topic.as_str())
            .await
            .map_err(|err| RpcError::Transport(format!("unsubscribe from {topic} failed: {err}")))
    }

    /// Completes the subscription in flight from the broker's SUBACK.
    async fn handle_suback(&mut self, suback: rumqttc::SubAck) {
        // ---
        let Some(topic) = self.subscribes.in_flight().map(str::to_owned) else {
            log_debug!("{}: SUBACK with no subscription in flight", self.transport_id);
            return;
        };

        let success = suback
            .return_codes
            .iter()
            .all(|code| !matches!(code, rumqttc::SubscribeReasonCode::Failure));

        if success {
            log_info!("{}: subscribed to topic {topic}", self.transport_id);
            self.subscribes.finish(Ok(()));
        } else {
            log_error!("{}: broker rejected subscription to {topic}", self.transport_id);
            self.subscribes.finish(Err(RpcError::Transport(format!(
                "broker rejected subscription to {topic}: {:?}",
                suback.return_codes
            ))));
        }

        self.send_next_subscribe().await;
    }

    /// Re-subscribes every known topic on a fresh broker session.
    async fn handle_reconnected(&mut self) {
        // ---
        // A subscription sent before the drop never gets its SUBACK.
        self.subscribes.requeue_in_flight();

        let topics: Vec<String> = self.subscribers.read().await.keys().cloned().collect();
        for topic in topics {
            if !self.subscribes.contains(&topic) {
                self.subscribes.push(topic, None);
            }
        }

        self.send_next_subscribe().await;
    }

    async fn handle_close(&mut self) {
        // ---
        log_debug!("{}: disconnecting mqtt client", self.transport_id);

        self.subscribers.write().await.clear();

        if let Err(_err) = self.client.disconnect().await {
            log_debug!("{}: mqtt disconnect failed: {_err}", self.transport_id);
        }
    }
} // MqttActor

/// Sole owner of the `EventLoop`.
struct EventPump {
    // ---
    transport_id: String, // for logging only
    event_loop: EventLoop,
    subscribers: SubscriberMap,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    /// Fired once with the outcome of the first connection attempt.
    ready: Option<oneshot::Sender<Result<()>>>,
}

impl EventPump {
    // ---

    async fn run(mut self) {
        // ---
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handle_incoming(&self.transport_id, &self.subscribers, publish).await;
                }
                Ok(Event::Incoming(Packet::SubAck(suback))) => {
                    if self.link_tx.send(LinkEvent::SubAck(suback)).is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    if !self.handle_connack(connack) {
                        break;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_event) => {
                    // Other events (PingResp, UnsubAck, ...) - ignore
                    log_debug!("{}: received mqtt event (ignored): {:?}",
                               self.transport_id, _event);
                }
                Err(err) => {
                    if let Some(ready) = self.ready.take() {
                        // Never connected: report and stop.
                        let _ = ready.send(Err(RpcError::Connection(err.to_string())));
                        break;
                    }
                    if is_disconnect(&err) {
                        log_error!("{}: broker disconnected: {err}", self.transport_id);
                    } else {
                        log_error!("{}: mqtt error: {err}", self.transport_id);
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }

        log_debug!("{}: mqtt event pump stopped", self.transport_id);
    }

    /// Reports the first connection outcome and announces reconnects.
    ///
    /// Returns `false` when the pump should stop.
    fn handle_connack(&mut self, connack: rumqttc::ConnAck) -> bool {
        // ---
        let accepted = connack.code == ConnectReturnCode::Success;

        if let Some(ready) = self.ready.take() {
            let outcome = if accepted {
                log_info!("{}: connected to broker", self.transport_id);
                Ok(())
            } else {
                log_error!("{}: connection refused: {:?}", self.transport_id, connack.code);
                Err(RpcError::Connection(format!(
                    "broker refused connection: {:?}",
                    connack.code
                )))
            };
            let _ = ready.send(outcome);
            return accepted;
        }

        if !accepted {
            log_error!("{}: reconnect refused: {:?}", self.transport_id, connack.code);
            return true;
        }

        log_info!("{}: reconnected to broker", self.transport_id);
        self.link_tx.send(LinkEvent::Reconnected).is_ok()
    }
} // EventPump

/// Decodes an incoming publish and fans it out to local subscribers.
///
/// Full or closed inboxes are evicted.
async fn handle_incoming(transport_id: &str, subscribers: &SubscriberMap, publish: Publish) {
    // ---
    let topic = publish.topic.clone();

    let env = match serde_json::from_slice::<Envelope>(&publish.payload) {
        Ok(env) => env,
        Err(_err) => {
            log_debug!("{transport_id}: invalid envelope on topic {topic}: {_err}");
            return;
        }
    };

    let Some(senders) = subscribers.read().await.get(&topic).cloned() else {
        return;
    };

    let original_len = senders.len();
    let survivors: Vec<_> = senders
        .into_iter()
        .filter(|tx| tx.try_send(env.clone()).is_ok())
        .collect();

    if survivors.len() != original_len {
        subscribers.write().await.insert(topic, survivors);
    }
}

fn is_disconnect(err: &rumqttc::ConnectionError) -> bool {
    // ---
    matches!(
        err,
        rumqttc::ConnectionError::Io(_) | rumqttc::ConnectionError::MqttState(_)
    )
}

impl RumqttcTransport {
    // ---

    async fn command<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Cmd,
    {
        // ---
        let (tx, rx) = oneshot::channel();

        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RpcError::Transport("mqtt actor is not running".into()))?;

        rx.await
            .map_err(|_| RpcError::Transport("mqtt actor dropped the command".into()))?
    }

    /// Removes one local inbox sender registered for `topic`.
    async fn remove_sender(&self, topic: &str, sender: &mpsc::Sender<Envelope>) {
        // ---
        let mut subscribers = self.subscribers.write().await;
        if let Some(senders) = subscribers.get_mut(topic) {
            senders.retain(|tx| !tx.same_channel(sender));
            if senders.is_empty() {
                subscribers.remove(topic);
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for RumqttcTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.command(|resp| Cmd::Publish { env, resp }).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let topic = sub.0.to_string();

        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .write()
            .await
            .entry(topic.clone())
            .or_default()
            .push(tx.clone());

        let requested = topic.clone();
        if let Err(err) = self
            .command(|resp| Cmd::Subscribe {
                topic: requested,
                resp,
            })
            .await
        {
            self.remove_sender(&topic, &tx).await;
            return Err(err);
        }

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn unsubscribe(&self, sub: &Subscription) -> Result<()> {
        // ---
        let topic = sub.0.to_string();
        self.command(|resp| Cmd::Unsubscribe { topic, resp }).await
    }

    async fn close(&self) -> Result<()> {
        // ---
        // A second close finds the actor gone; that is not an error.
        let _ = self.command(|resp| Cmd::Close { resp }).await;

        if let Some(handle) = self.actor.lock().await.take() {
            let _ = handle.await;
        }

        // The pump stops once the DISCONNECT is flushed.
        if let Some(mut pump) = self.pump.lock().await.take() {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut pump).await.is_err() {
                pump.abort();
            }
        }

        Ok(())
    }
}

/// Creates a rumqttc-based MQTT transport and waits for the broker to accept
/// the connection.
///
/// # Errors
///
/// - [`RpcError::MissingConfig`] if the URI cannot be parsed.
/// - [`RpcError::Connection`] if the broker is unreachable, refuses the
///   connection, or does not answer within `connect_timeout`.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    Ok(Arc::new(connect(config).await?))
}

async fn connect(config: TransportConfig) -> Result<RumqttcTransport> {
    // ---
    let (host, port) = parse_broker_uri(&config.uri)?;

    let mut mqtt_options = MqttOptions::new(config.node_id.clone(), host, port);

    if let Some(keep_alive_secs) = config.keep_alive_secs {
        mqtt_options.set_keep_alive(Duration::from_secs(keep_alive_secs as u64));
    }

    let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));

    let pump = tokio::spawn(
        EventPump {
            transport_id: config.node_id.clone(),
            event_loop,
            subscribers: Arc::clone(&subscribers),
            link_tx,
            ready: Some(ready_tx),
        }
        .run(),
    );

    let actor = tokio::spawn(
        MqttActor {
            transport_id: config.node_id.clone(),
            client,
            cmd_rx,
            link_rx,
            subscribers: Arc::clone(&subscribers),
            subscribes: SubscribeQueue::default(),
            pump: pump.abort_handle(),
        }
        .run(),
    );

    let connected = match tokio::time::timeout(config.connect_timeout, ready_rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => Err(RpcError::Connection("mqtt event loop exited before connecting".into())),
        Err(_) => Err(RpcError::Connection(format!(
            "no CONNACK from {} within {:?}",
            config.uri, config.connect_timeout
        ))),
    };

    if let Err(err) = connected {
        actor.abort();
        pump.abort();
        return Err(err);
    }

    Ok(RumqttcTransport {
        base: TransportBase::from(&config),
        cmd_tx,
        subscribers,
        actor: Mutex::new(Some(actor)),
        pump: Mutex::new(Some(pump)),
    })
}

/// Splits `mqtt://host:port` (or `tcp://`) into host and port.
fn parse_broker_uri(uri: &str) -> Result<(String, u16)> {
    // ---
    let rest = uri
        .strip_prefix("mqtt://")
        .or_else(|| uri.strip_prefix("tcp://"))
        .unwrap_or(uri);

    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(RpcError::MissingConfig(format!("broker host in {uri:?}")));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| {
                RpcError::InvalidConfig(format!("invalid port in broker URI {uri:?}"))
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), DEFAULT_PORT)),
    }
}
