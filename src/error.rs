use thiserror::Error;

/// Errors that can occur during news RPC operations.
///
/// `NotFound` is an expected outcome, not a failure: callers branch on it
/// (see [`RpcError::is_not_found`]) to report absence of the resource.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The bus could not be reached or the connection was refused.
    #[error("connection error: {0}")]
    Connection(String),

    /// Bytes did not parse against the wire schema.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Bytes parsed but broke a schema invariant (both or neither of
    /// news/error, unparseable date).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// No news matches the requested identifier.
    #[error("news not found")]
    NotFound,

    /// The caller's deadline elapsed before a reply arrived.
    #[error("request timed out")]
    Timeout,

    /// The server reported a failure; carries the server's message text.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Publishing, subscribing or closing on the bus failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not valid in the current lifecycle state (e.g. use after close).
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl RpcError {
    /// True for the well-known "no such news" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RpcError::NotFound)
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
