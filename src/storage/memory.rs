//! In-process news storage.
//!
//! Backs the demos and tests in place of a relational store. The map is
//! shared by every request handler, so reads take a shared lock and inserts
//! an exclusive one.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::{News, NewsStorage, Result, RpcError, StorageError};

/// Concurrent in-memory [`NewsStorage`] adapter.
///
/// # Example
///
/// ```
/// use news_rpc::{MemoryStorage, NewsStorage};
///
/// # async fn example() -> news_rpc::Result<()> {
/// let storage = MemoryStorage::from_json(
///     r#"[{"id": 1, "header": "first", "date": "2006-01-02"}]"#,
/// )?;
/// assert_eq!(storage.news(1).await.unwrap().header, "first");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    // ---
    records: RwLock<HashMap<i64, News>>,
}

impl MemoryStorage {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a storage from a JSON array of news objects.
    ///
    /// Dates use the `YYYY-MM-DD` form. A later record with an id already
    /// seen replaces the earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] if the document is not an array
    /// of news objects.
    pub fn from_json(json: &str) -> Result<Self> {
        // ---
        let records: Vec<News> = serde_json::from_str(json)
            .map_err(|err| RpcError::InvalidConfig(format!("news seed data: {err}")))?;

        Ok(records.into_iter().collect())
    }

    /// Insert or replace a record, returning the one it replaced.
    pub async fn insert(&self, news: News) -> Option<News> {
        // ---
        self.records.write().await.insert(news.id, news)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl FromIterator<News> for MemoryStorage {
    fn from_iter<I: IntoIterator<Item = News>>(iter: I) -> Self {
        // ---
        let records = iter.into_iter().map(|news| (news.id, news)).collect();
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait::async_trait]
impl NewsStorage for MemoryStorage {
    // ---
    async fn news(&self, id: i64) -> std::result::Result<News, StorageError> {
        // ---
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }
}
