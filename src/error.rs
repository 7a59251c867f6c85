//! Crate-wide error type.

use thiserror::Error;

/// Result type for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Errors surfaced by the client, pool, agent, and codec layers.
///
/// Variants carry rendered messages rather than source errors so a failure
/// can be cloned into every consumer of a body stream.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// URL scheme is neither `http` nor `https`.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Request URL's origin differs from the agent's bound origin.
    #[error("origin mismatch: agent is bound to {expected}, request is for {requested}")]
    OriginMismatch {
        /// Origin the agent was created for.
        expected: String,
        /// Origin of the rejected request.
        requested: String,
    },

    /// A second send was attempted while a request is in flight.
    #[error("agent busy: a request is already in flight")]
    AgentBusy,

    /// The peer closed the connection before a response could be parsed.
    #[error("connection closed before response")]
    ConnectionClosed,

    /// EOF in the middle of a header block or body.
    #[error("unexpected eof: {0}")]
    UnexpectedEof(String),

    /// Invalid chunk size line or missing framing CRLF.
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    /// Status line or header block could not be parsed.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Second materialization of a response body.
    #[error("body stream already read")]
    BodyAlreadyRead,

    /// Unsupported content for the requested materialization.
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),

    /// Operation cancelled by the caller or the agent-local controller.
    #[error("operation aborted")]
    Aborted,

    /// The request descriptor itself is invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Establishing the TCP or TLS connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport I/O error after the connection was established.
    #[error("io error: {0}")]
    Io(String),

    /// Decompression or materialization decoding failed.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err.to_string())
    }
}
