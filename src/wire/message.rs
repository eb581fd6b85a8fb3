//! Protobuf message definitions for the news request/reply exchange.
//!
//! Field tags are the compatibility contract: a tag, once shipped, is never
//! renumbered or reused. Peers built from different revisions interoperate as
//! long as the tags below are unchanged; unknown fields are skipped on decode.
//!
//! ```text
//! message GetNewsRequest  { int64 id = 1; }
//! message GetNewsResponse { News news = 1; Error error = 2; }
//! message News            { int64 id = 1; string header = 2; string date = 3; }
//! message Error           { int64 code = 1; string message = 2; }
//! ```

/// Request for a single news record.
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetNewsRequest {
    #[prost(int64, tag = "1")]
    pub id: i64,
}

/// Raw reply as it appears on the wire.
///
/// Exactly one of `news` / `error` is set on a well-formed reply; the codec
/// enforces this when turning it into a [`Reply`](super::Reply).
#[derive(Clone, PartialEq, prost::Message)]
pub struct GetNewsResponse {
    #[prost(message, optional, tag = "1")]
    pub news: Option<WireNews>,
    #[prost(message, optional, tag = "2")]
    pub error: Option<WireError>,
}

/// News payload with the date in `YYYY-MM-DD` text form.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WireNews {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub header: String,
    #[prost(string, tag = "3")]
    pub date: String,
}

/// Application-level error carried in a reply.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WireError {
    /// One of the [`status`](super::status) codes.
    #[prost(int64, tag = "1")]
    pub code: i64,
    #[prost(string, tag = "2")]
    pub message: String,
}
