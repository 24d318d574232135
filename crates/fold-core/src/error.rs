//! Envelope codec error types.

use thiserror::Error;

/// Errors that can occur while reading, decoding, or emitting an
/// invocation envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("failed to read the invocation payload: {0}")]
    Io(#[source] std::io::Error),

    #[error("failed to decode the invocation payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to write the response envelope: {0}")]
    Write(#[source] std::io::Error),
}

pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
