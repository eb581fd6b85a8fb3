//! Wire schema and codec for the news RPC exchange.
//!
//! This module defines the binary request/reply format shared by
//! [`NewsClient`](crate::NewsClient) and [`NewsServer`](crate::NewsServer),
//! and the validation that turns raw protobuf messages into typed values.

mod codec;
mod message;

pub use codec::{
    //
    decode_request,
    decode_response,
    encode_request,
    encode_response,
    format_date,
    parse_date,
    Reply,
    DATE_FORMAT,
};
pub use message::{GetNewsRequest, GetNewsResponse, WireError, WireNews};

/// Error codes carried in [`WireError::code`].
///
/// The values reuse the HTTP status vocabulary but are plain sentinels of
/// the schema; nothing here depends on HTTP.
pub mod status {
    /// The request bytes did not decode.
    pub const BAD_REQUEST: i64 = 400;
    /// No news matches the requested identifier.
    pub const NOT_FOUND: i64 = 404;
    /// Any server-side failure; details stay in the server log.
    pub const INTERNAL_ERROR: i64 = 500;
}
