//! MQTT transport implementation based on rumqttc.
//!
//! This module adapts the rumqttc API to the domain-level `Transport` trait
//! without leaking MQTT concepts upward.
//!
//! # Features
//!
//! - Actor-based concurrency model; a dedicated pump task owns the EventLoop
//! - Connection confirmed (CONNACK) before the transport is returned
//! - SUBACK confirmation before returning from subscribe(); overlapping
//!   subscribes are queued
//! - Re-subscription of known topics after a reconnect
//!
//! # Usage
//!
//! Enable the `transport_rumqttc` feature and use an `mqtt://host:port` bus URI:
//!
//! ```toml
//! [dependencies]
//! news-rpc = { version = "0.1", features = ["transport_rumqttc"] }
//! ```

mod transport;
pub use transport::create_transport;
