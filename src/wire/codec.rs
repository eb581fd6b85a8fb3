//! Encoding and decoding of news wire messages.
//!
//! Decoding is two-stage: bytes that do not parse against the schema are a
//! [`RpcError::MalformedMessage`]; bytes that parse but break an invariant of
//! the reply (both or neither of news/error, non-canonical date) are a
//! [`RpcError::ProtocolViolation`]. Neither is ever turned into a default
//! value.

use bytes::{Bytes, BytesMut};
use chrono::NaiveDate;
use prost::Message;

use super::message::{GetNewsRequest, GetNewsResponse, WireError, WireNews};
use crate::{News, Result, RpcError};

/// Canonical textual form of a news date on the wire.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Validated reply: exactly one of a news payload or an application error.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    News(News),
    Error(WireError),
}

impl Reply {
    /// Build an error reply.
    pub fn error(code: i64, message: impl Into<String>) -> Self {
        // ---
        Reply::Error(WireError {
            code,
            message: message.into(),
        })
    }
}

/// Render a date in the canonical `YYYY-MM-DD` form.
pub fn format_date(date: NaiveDate) -> String {
    // ---
    date.format(DATE_FORMAT).to_string()
}

/// Parse a canonical `YYYY-MM-DD` date.
///
/// Anything that does not format back to the identical string (missing zero
/// padding, trailing text, out-of-range fields) is rejected.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    // ---
    let date = NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|err| {
        RpcError::ProtocolViolation(format!("failed to parse date {text:?}: {err}"))
    })?;

    if format_date(date) != text {
        return Err(RpcError::ProtocolViolation(format!(
            "date {text:?} is not in canonical YYYY-MM-DD form"
        )));
    }

    Ok(date)
}

/// Encode a request for the given identifier.
pub fn encode_request(req: &GetNewsRequest) -> Bytes {
    // ---
    Bytes::from(req.encode_to_vec())
}

/// Decode a request.
///
/// # Errors
///
/// [`RpcError::MalformedMessage`] if the bytes do not parse.
pub fn decode_request(bytes: &[u8]) -> Result<GetNewsRequest> {
    // ---
    GetNewsRequest::decode(bytes).map_err(|err| RpcError::MalformedMessage(err.to_string()))
}

/// Encode a reply.
///
/// The news date is rendered through [`format_date`].
///
/// # Errors
///
/// [`RpcError::Rpc`] if the message cannot be written to the buffer.
pub fn encode_response(reply: &Reply) -> Result<Bytes> {
    // ---
    let msg = match reply {
        Reply::News(news) => GetNewsResponse {
            news: Some(WireNews {
                id: news.id,
                header: news.header.clone(),
                date: format_date(news.date),
            }),
            error: None,
        },
        Reply::Error(err) => GetNewsResponse {
            news: None,
            error: Some(err.clone()),
        },
    };

    let mut buf = BytesMut::with_capacity(msg.encoded_len());
    msg.encode(&mut buf)
        .map_err(|err| RpcError::Rpc(format!("failed to encode response: {err}")))?;

    Ok(buf.freeze())
}

/// Decode and validate a reply.
///
/// # Errors
///
/// - [`RpcError::MalformedMessage`] if the bytes do not parse.
/// - [`RpcError::ProtocolViolation`] if both or neither of news/error are
///   present, or the news date is not a canonical `YYYY-MM-DD` date.
pub fn decode_response(bytes: &[u8]) -> Result<Reply> {
    // ---
    let msg =
        GetNewsResponse::decode(bytes).map_err(|err| RpcError::MalformedMessage(err.to_string()))?;

    match (msg.news, msg.error) {
        (Some(news), None) => Ok(Reply::News(News {
            id: news.id,
            date: parse_date(&news.date)?,
            header: news.header,
        })),
        (None, Some(err)) => Ok(Reply::Error(err)),
        (Some(_), Some(_)) => Err(RpcError::ProtocolViolation(
            "response carries both news and error".into(),
        )),
        (None, None) => Err(RpcError::ProtocolViolation(
            "response carries neither news nor error".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::wire::status;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_request_round_trip() {
        // ---
        for id in [0, 123, -1, i64::MIN, i64::MAX] {
            let bytes = encode_request(&GetNewsRequest { id });
            assert_eq!(decode_request(&bytes).unwrap().id, id);
        }
    }

    #[test]
    fn test_news_reply_round_trip() {
        // ---
        let news = News::new(123, "header", date(2006, 1, 2));
        let bytes = encode_response(&Reply::News(news.clone())).unwrap();
        assert_eq!(decode_response(&bytes).unwrap(), Reply::News(news));
    }

    #[test]
    fn test_error_reply_round_trip() {
        // ---
        let reply = Reply::error(status::NOT_FOUND, "news not found");
        let bytes = encode_response(&reply).unwrap();
        assert_eq!(decode_response(&bytes).unwrap(), reply);
    }

    #[test]
    fn test_news_date_is_canonical_on_wire() {
        // ---
        let bytes = encode_response(&Reply::News(News::new(1, "h", date(987, 3, 4)))).unwrap();
        let raw = GetNewsResponse::decode(bytes.as_ref()).unwrap();
        assert_eq!(raw.news.unwrap().date, "0987-03-04");
    }

    #[test]
    fn test_reply_with_both_is_protocol_violation() {
        // ---
        let raw = GetNewsResponse {
            news: Some(WireNews {
                id: 1,
                header: "h".into(),
                date: "2006-01-02".into(),
            }),
            error: Some(WireError {
                code: status::INTERNAL_ERROR,
                message: "boom".into(),
            }),
        };

        let err = decode_response(&raw.encode_to_vec()).unwrap_err();
        assert!(matches!(err, RpcError::ProtocolViolation(_)), "{err:?}");
    }

    #[test]
    fn test_reply_with_neither_is_protocol_violation() {
        // ---
        let err = decode_response(&GetNewsResponse::default().encode_to_vec()).unwrap_err();
        assert!(matches!(err, RpcError::ProtocolViolation(_)), "{err:?}");

        // An empty buffer is a valid, empty message and hits the same check.
        let err = decode_response(&[]).unwrap_err();
        assert!(matches!(err, RpcError::ProtocolViolation(_)), "{err:?}");
    }

    #[test]
    fn test_garbage_is_malformed() {
        // ---
        let garbage = [0xff, 0xff, 0xff];

        let err = decode_request(&garbage).unwrap_err();
        assert!(matches!(err, RpcError::MalformedMessage(_)), "{err:?}");

        let err = decode_response(&garbage).unwrap_err();
        assert!(matches!(err, RpcError::MalformedMessage(_)), "{err:?}");
    }

    #[test]
    fn test_wrong_wire_type_is_malformed() {
        // ---
        // Field 1 declared as length-delimited where the schema says varint.
        let err = decode_request(&[0x0a, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, RpcError::MalformedMessage(_)), "{err:?}");
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        // ---
        // id = 7, then an unknown varint field 15 = 1 from a newer peer.
        let req = decode_request(&[0x08, 0x07, 0x78, 0x01]).unwrap();
        assert_eq!(req.id, 7);
    }

    #[test]
    fn test_bad_date_is_protocol_violation() {
        // ---
        for text in ["", "2006-1-2", "2006-01-02T00:00:00Z", "02.01.2006", "2006-02-30"] {
            let raw = GetNewsResponse {
                news: Some(WireNews {
                    id: 1,
                    header: "h".into(),
                    date: text.into(),
                }),
                error: None,
            };
            let err = decode_response(&raw.encode_to_vec()).unwrap_err();
            assert!(matches!(err, RpcError::ProtocolViolation(_)), "{text}: {err:?}");
        }
    }
}
