//! Per-message request handling for the news server.
//!
//! Turns the bytes of one inbound request into the bytes of its reply:
//! decode, bounded storage lookup, outcome mapping, encode. Storage error
//! text is logged here and never copied into a reply.

use std::time::Duration;

use bytes::Bytes;

use crate::wire::{self, status, Reply};
use crate::{log_debug, log_error, log_warn, StorageError, StoragePtr};

use super::SUBSYSTEM;

/// Message sent for any server-side failure.
pub(super) const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// Message sent when storage reports no matching record.
pub(super) const NOT_FOUND_MESSAGE: &str = "news not found";

/// Stateless request handler shared by all in-flight messages.
pub(super) struct RequestHandler {
    // ---
    storage: StoragePtr,
    server_timeout: Duration,
}

impl RequestHandler {
    // ---
    pub(super) fn new(storage: StoragePtr, server_timeout: Duration) -> Self {
        Self {
            storage,
            server_timeout,
        }
    }

    /// Produce the encoded reply for one request.
    ///
    /// Returns `None` only if not even an error reply could be encoded; the
    /// caller's deadline then fires on its side.
    pub(super) async fn handle(&self, payload: &[u8]) -> Option<Bytes> {
        // ---
        let reply = self.reply_for(payload).await;

        match wire::encode_response(&reply) {
            Ok(bytes) => Some(bytes),
            Err(_err) => {
                log_error!("failed to encode response: {_err}");
                match wire::encode_response(&Reply::error(
                    status::INTERNAL_ERROR,
                    INTERNAL_ERROR_MESSAGE,
                )) {
                    Ok(bytes) => Some(bytes),
                    Err(_err) => {
                        log_error!("failed to encode error response: {_err}");
                        None
                    }
                }
            }
        }
    }

    async fn reply_for(&self, payload: &[u8]) -> Reply {
        // ---
        let req = match wire::decode_request(payload) {
            Ok(req) => req,
            Err(err) => {
                log_warn!("failed to decode request: {err}");
                return Reply::error(
                    status::BAD_REQUEST,
                    format!("failed to decode request: {err}"),
                );
            }
        };

        let id = req.id;
        log_debug!("looking up news {id}");

        let outcome = match tokio::time::timeout(self.server_timeout, self.storage.news(id)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(StorageError::Timeout),
        };

        match outcome {
            Ok(news) => Reply::News(news),
            Err(StorageError::NotFound) => {
                log_debug!("news {id} not found");
                Reply::error(status::NOT_FOUND, NOT_FOUND_MESSAGE)
            }
            Err(_err) => {
                log_error!("failed to get news {id} from storage: {_err}");
                Reply::error(status::INTERNAL_ERROR, INTERNAL_ERROR_MESSAGE)
            }
        }
    }
}
