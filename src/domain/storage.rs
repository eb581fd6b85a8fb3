// src/domain/storage.rs

//! Storage capability consumed by the news server and the HTTP front end.
//!
//! Neither consumer knows which persistence sits behind the trait; a concrete
//! adapter is injected at construction time as a [`StoragePtr`].

use std::sync::Arc;

use thiserror::Error;

use crate::News;

/// Outcome of a failed lookup.
///
/// `NotFound` is the expected "no such record" case and must stay
/// distinguishable from every other failure.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record matches the requested identifier.
    #[error("news not found")]
    NotFound,

    /// The lookup did not finish within the caller's bound.
    #[error("storage lookup timed out")]
    Timeout,

    /// Any other backend failure. The text is for local diagnostics only.
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    /// Wrap an arbitrary backend error (or message) as [`StorageError::Backend`].
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        // ---
        StorageError::Backend(err.into())
    }
}

/// Lookup of a single news record by identifier.
///
/// Implementations are shared across concurrently running request handlers
/// and must be safe for concurrent invocation.
#[async_trait::async_trait]
pub trait NewsStorage: Send + Sync {
    // ---
    /// Fetch the record with the given identifier.
    async fn news(&self, id: i64) -> std::result::Result<News, StorageError>;
}

/// Shared storage pointer, cheap to clone.
pub type StoragePtr = Arc<dyn NewsStorage>;
