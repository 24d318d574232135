//! fold-core — invocation envelope model and codec.
//!
//! A single-shot invocation platform delivers the whole HTTP request as
//! one JSON envelope and expects the whole response back as one JSON
//! envelope. This crate owns both envelope shapes and nothing else; the
//! streaming request/response views that consume them live in
//! `fold-http`.

pub mod envelope;
pub mod error;

pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use error::{EnvelopeError, EnvelopeResult};
