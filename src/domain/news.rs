// src/domain/news.rs

//! The news entity transported by the RPC layer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single news record.
///
/// The date carries no time-of-day; on the wire and in JSON it is rendered
/// as `YYYY-MM-DD`. The RPC layer never mutates a record, it only moves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct News {
    /// Externally assigned, unique identifier.
    pub id: i64,
    pub header: String,
    pub date: NaiveDate,
}

impl News {
    pub fn new(id: i64, header: impl Into<String>, date: NaiveDate) -> Self {
        // ---
        Self {
            id,
            header: header.into(),
            date,
        }
    }
}
