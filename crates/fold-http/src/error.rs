//! Contract errors for the streaming request/response views.

use fold_core::EnvelopeError;
use thiserror::Error;

/// Errors raised by the request/response views and the invocation
/// cycle.
///
/// The contract-violation variants (`RequestEnded`, `ResponseWritten`,
/// `MissingContentLength`) are programming errors in the application
/// handler; they propagate out of the offending call and are never
/// retried or swallowed.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request has already been read")]
    RequestEnded,

    #[error("response has already been written")]
    ResponseWritten,

    #[error(
        "Content-Length must be set to the total size of the message body \
         before writing data without chunked encoding"
    )]
    MissingContentLength,

    #[error("unsupported HTTP method: {0:?}")]
    UnsupportedMethod(String),

    #[error("{0} is not supported by the single-shot transport")]
    Unsupported(&'static str),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

pub type HttpResult<T> = Result<T, HttpError>;
