//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! transport implementations, the wire schema, or persistence.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod news;
mod storage;
mod transport;

// --- Entity re-exports ---

pub use news::News;

// --- Storage domain re-exports ---

pub use storage::{
    //
    NewsStorage,
    StorageError,
    StoragePtr,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    Address,
    Envelope,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
    CONTENT_TYPE_PROTOBUF,
};
