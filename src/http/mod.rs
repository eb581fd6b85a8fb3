//! HTTP front end.
//!
//! Serves `GET /news/{news_id}` over hyper's HTTP/1.1 server on top of any
//! [`NewsStorage`](crate::NewsStorage): a local adapter, or a
//! [`NewsClient`](crate::NewsClient) reaching a storage process over the
//! bus.
//!
//! | Outcome | Status | Body |
//! |---|---|---|
//! | record found | 200 | JSON news, date as `YYYY-MM-DD` |
//! | id is not an integer | 400 | `failed to parse news_id: ...` |
//! | storage reports not found | 404 | `news not found` |
//! | any other failure | 500 | `Internal Server Error` |
//!
//! Every request is logged once with its method, path, status and latency;
//! the level follows the status class.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

use crate::{log_debug, log_error, log_info, log_warn, Result, RpcError, StorageError, StoragePtr};

/// How long [`HttpHandle::stop`] waits for open connections to finish.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const NEWS_PREFIX: &str = "/news/";

const SUBSYSTEM: &str = "web_server";

/// HTTP front end over a storage capability.
#[derive(Clone)]
pub struct HttpFrontend {
    // ---
    storage: StoragePtr,
    span: Span,
}

impl HttpFrontend {
    // ---
    pub fn new(storage: StoragePtr) -> Self {
        // ---
        Self {
            storage,
            span: tracing::info_span!("web_server"),
        }
    }

    /// Span every request is instrumented with.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Answer one request.
    ///
    /// Transport independent: tests and embedders can call it without a
    /// socket.
    pub async fn route(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        // ---
        let started = Instant::now();
        let response = self.dispatch(method, path).await;

        let status = response.status();
        let _latency = started.elapsed();
        if status.is_server_error() {
            log_error!("request handled: {method} {path} -> {status} in {_latency:?}");
        } else if status.is_client_error() {
            log_warn!("request handled: {method} {path} -> {status} in {_latency:?}");
        } else {
            log_info!("request handled: {method} {path} -> {status} in {_latency:?}");
        }

        response
    }

    async fn dispatch(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        // ---
        let Some(raw_id) = path.strip_prefix(NEWS_PREFIX) else {
            return text(StatusCode::NOT_FOUND, "Not Found");
        };
        if raw_id.is_empty() || raw_id.contains('/') {
            return text(StatusCode::NOT_FOUND, "Not Found");
        }

        if method != Method::GET {
            let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET"));
            return response;
        }

        let id = match raw_id.parse::<i64>() {
            Ok(id) => id,
            Err(err) => {
                return text(
                    StatusCode::BAD_REQUEST,
                    format!("failed to parse news_id: {err}"),
                )
            }
        };

        match self.storage.news(id).await {
            Ok(news) => match serde_json::to_vec(&news) {
                Ok(body) => {
                    let mut response = Response::new(Full::new(Bytes::from(body)));
                    response.headers_mut().insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("application/json"),
                    );
                    response
                }
                Err(_err) => {
                    log_error!("failed to encode news {id} as JSON: {_err}");
                    internal_error()
                }
            },
            Err(StorageError::NotFound) => text(StatusCode::NOT_FOUND, "news not found"),
            Err(_err) => {
                log_error!("failed to get news {id} from storage: {_err}");
                internal_error()
            }
        }
    }

    /// Bind `addr` and serve until [`HttpHandle::stop`].
    ///
    /// Binding happens before this returns, so a port of `0` can be read
    /// back from [`HttpHandle::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] if the address cannot be bound.
    pub async fn start(self, addr: SocketAddr) -> Result<HttpHandle> {
        // ---
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Connection(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RpcError::Connection(format!("failed to read local address: {e}")))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = self.span.clone();

        let task = tokio::spawn(self.accept_loop(listener, shutdown_rx).instrument(span.clone()));

        span.in_scope(|| log_info!("HTTP server listening on {local_addr}"));

        Ok(HttpHandle {
            local_addr,
            shutdown_tx,
            task,
            span,
        })
    }

    async fn accept_loop(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        // ---
        let mut connections = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    let (stream, _peer) = match accepted {
                        Ok(conn) => conn,
                        Err(_err) => {
                            log_warn!("failed to accept connection: {_err}");
                            continue;
                        }
                    };

                    log_debug!("accepted connection from {_peer}");
                    let frontend = self.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(frontend.serve_connection(stream, shutdown).in_current_span());
                }
            }
        }

        drop(listener);
        while connections.join_next().await.is_some() {}
        log_info!("HTTP server is closed");
    }

    async fn serve_connection(self, stream: tokio::net::TcpStream, mut shutdown: watch::Receiver<bool>) {
        // ---
        let io = TokioIo::new(stream);
        let service = service_fn(move |req: Request<Incoming>| {
            let frontend = self.clone();
            async move {
                let path = req.uri().path().to_string();
                Ok::<_, Infallible>(frontend.route(req.method(), &path).await)
            }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = shutdown.changed() => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        };

        if let Err(_err) = result {
            log_debug!("error serving connection: {_err}");
        }
    }
}

/// Handle to a running HTTP front end.
pub struct HttpHandle {
    // ---
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    span: Span,
}

impl HttpHandle {
    // ---
    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait, up to [`SHUTDOWN_TIMEOUT`], for
    /// open ones to finish.
    pub async fn stop(self) {
        // ---
        let _ = self.shutdown_tx.send(true);

        let mut task = self.task;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
            self.span
                .in_scope(|| log_error!("failed to gracefully shut down within {SHUTDOWN_TIMEOUT:?}"));
            task.abort();
        }
    }
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    // ---
    let mut response = Response::new(Full::new(Bytes::from(body.into())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn internal_error() -> Response<Full<Bytes>> {
    text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}
