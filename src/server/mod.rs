// src/server/mod.rs
//! News RPC server.
//!
//! The server subscribes to the configured request subject and runs a
//! background receive loop. Every inbound envelope is handled on its own
//! task: the payload is decoded, looked up in the injected storage under the
//! server-side timeout, and answered on the envelope's `reply_to` address
//! with the request's correlation id.
//!
//! Storage failures other than "not found" are logged with their concrete
//! text and answered with a generic internal-error reply.

mod handler;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{Instrument, Span};

use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Envelope,
    MemoryHub,
    Result,
    RpcConfig,
    RpcError,
    StoragePtr,
    Subscription,
    TransportBuilder,
    TransportPtr,
};

use handler::RequestHandler;

const SUBSYSTEM: &str = "news_server";

/// Builder for [`NewsServer`].
///
/// # Example
///
/// ```no_run
/// use news_rpc::{MemoryStorage, NewsServer, RpcConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> news_rpc::Result<()> {
/// let config = RpcConfig::from_env()?;
/// let storage = Arc::new(MemoryStorage::new());
///
/// let server = NewsServer::builder(config, storage).start().await?;
/// // ... serve until shutdown ...
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct NewsServerBuilder {
    // ---
    config: RpcConfig,
    storage: StoragePtr,
    transport: Option<TransportPtr>,
    hub: Option<Arc<MemoryHub>>,
    span: Option<Span>,
}

impl NewsServerBuilder {
    // ---
    /// Serve over an existing transport instead of opening a new one.
    ///
    /// A shared transport is not closed by [`NewsServer::stop`].
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
    /// Defaults to an `info` span named `news_server` carrying the subject
    /// and node id.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Connect to the bus, subscribe to the request subject and start
    /// serving.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Connection`] if the bus cannot be reached.
    /// - [`RpcError::InvalidConfig`] / [`RpcError::MissingConfig`] for an
    ///   unusable bus URI.
    /// - [`RpcError::Transport`] if the subscription cannot be established.
    pub async fn start(self) -> Result<NewsServer> {
        // ---
        let span = self.span.unwrap_or_else(|| {
            tracing::info_span!(
                "news_server",
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

        let subscription = Subscription::from(self.config.subject.as_str());
        let mut handle = match transport.subscribe(subscription.clone()).await {
            Ok(handle) => handle,
            Err(err) => {
                if owns_transport {
                    let _ = transport.close().await;
                }
                return Err(err);
            }
        };

        let handler = Arc::new(RequestHandler::new(
            self.storage,
            self.config.server_timeout,
        ));

        let loop_transport = transport.clone();
        let loop_span = span.clone();

        let rx_task = tokio::spawn(
            async move {
                // ---
                while let Some(env) = handle.inbox.recv().await {
                    dispatch(&loop_transport, &handler, &loop_span, env);
                }
                log_debug!("request subscription closed, receive loop exiting");
            }
            .instrument(span.clone()),
        );

        span.in_scope(|| log_info!("news server started"));

        Ok(NewsServer {
            transport,
            owns_transport,
            subscription,
            config: self.config,
            span,
            rx_task,
        })
    }
}

/// Spawn an independent task answering one request envelope.
fn dispatch(transport: &TransportPtr, handler: &Arc<RequestHandler>, span: &Span, env: Envelope) {
    // ---
    let (Some(reply_to), Some(correlation_id)) = (env.reply_to, env.correlation_id) else {
        log_warn!(
            "dropping request on {} without reply_to or correlation id",
            env.address
        );
        return;
    };

    let payload = env.payload;
    let transport = transport.clone();
    let handler = handler.clone();
    let request_span = tracing::debug_span!(parent: span, "request", correlation_id = %correlation_id);

    tokio::spawn(
        async move {
            // ---
            let Some(reply) = handler.handle(&payload).await else {
                return;
            };

            let reply = Envelope::response(reply_to, reply, correlation_id);
            if let Err(_err) = transport.publish(reply).await {
                log_error!("failed to send reply: {_err}");
            }
        }
        .instrument(request_span),
    );
}

/// Running news server.
///
/// Obtained from [`NewsServerBuilder::start`]; [`stop`](Self::stop) consumes
/// it, so a server can only be stopped once and only after it started.
pub struct NewsServer {
    // ---
    transport: TransportPtr,
    owns_transport: bool,
    subscription: Subscription,
    config: RpcConfig,
    span: Span,
    rx_task: JoinHandle<()>,
}

impl NewsServer {
    // ---
    /// Start configuring a server over `storage`.
    pub fn builder(config: RpcConfig, storage: StoragePtr) -> NewsServerBuilder {
        // ---
        NewsServerBuilder {
            config,
            storage,
            transport: None,
            hub: None,
            span: None,
        }
    }

    /// Connect and start serving with default settings.
    pub async fn start(config: RpcConfig, storage: StoragePtr) -> Result<Self> {
        Self::builder(config, storage).start().await
    }

    /// The request subject this server answers on.
    pub fn subject(&self) -> &str {
        &self.config.subject
    }

    /// Stop serving.
    ///
    /// Unsubscribes from the request subject and, when the server opened its
    /// own connection, closes it. Each step is bounded by the configured
    /// drain timeout. Requests already dispatched keep running to
    /// completion; their replies may fail to send once the connection is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns the first unsubscribe or close failure, or
    /// [`RpcError::Timeout`] if a step exceeded the drain timeout. The
    /// remaining steps still run.
    pub async fn stop(self) -> Result<()> {
        // ---
        let span = self.span.clone();
        self.shutdown().instrument(span).await
    }

    async fn shutdown(self) -> Result<()> {
        // ---
        let drain = self.config.drain_timeout;
        let mut first_err: Option<RpcError> = None;

        match time::timeout(drain, self.transport.unsubscribe(&self.subscription)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log_error!("failed to unsubscribe: {err}");
                first_err.get_or_insert(err);
            }
            Err(_) => {
                log_error!("unsubscribe did not finish within {drain:?}");
                first_err.get_or_insert(RpcError::Timeout);
            }
        }

        if self.owns_transport {
            match time::timeout(drain, self.transport.close()).await {
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
        } else {
            // The shared connection stays up; end the loop directly.
            self.rx_task.abort();
        }

        log_info!("news server stopped");

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
