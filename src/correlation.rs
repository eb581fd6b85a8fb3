use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Correlation ID for matching replies to in-flight news requests.
///
/// Uses UUID v4 in standard 36-byte string format so replies can never be
/// confused across clients sharing a bus or across client restarts.
///
/// # Format
///
/// Standard UUID format: `550e8400-e29b-41d4-a9b6-446655440000`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    // ---

    /// Generate a new unique correlation ID
    pub fn generate() -> Self {
        // ---
        Self(Uuid::new_v4().to_string())
    }

    /// Get the correlation ID as a string slice
    pub fn as_str(&self) -> &str {
        // ---
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    // ---

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    // ---

    fn from(s: &str) -> Self {
        // ---
        Self(s.to_string())
    }
}

impl From<CorrelationId> for Arc<str> {
    // ---

    fn from(id: CorrelationId) -> Self {
        // ---
        Arc::from(id.0)
    }
}
