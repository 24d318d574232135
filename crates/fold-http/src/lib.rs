//! fold-http — a streaming HTTP server contract over single-shot
//! invocations.
//!
//! Handler code written against a conventional streaming server (data
//! and end callbacks on the request, incremental writes on the
//! response) runs unmodified inside an invocation model that delivers
//! the whole request as one JSON envelope and expects the whole
//! response back as one JSON envelope.
//!
//! # Architecture
//!
//! ```text
//! raw input bytes
//!   │
//!   ▼
//! RequestEnvelope (fold-core)
//!   │
//!   ├── ServerRequest  — streaming request view, one-shot callbacks
//!   ├── ServerResponse — write-accumulating response view
//!   │
//!   ▼
//! application handler
//!   │
//!   ▼
//! ServerResponse::end → ResponseEnvelope → raw output bytes
//! ```
//!
//! `OnceServer` drives exactly one cycle per instance: decode, build
//! the paired views, invoke the handler, synthesize the data event,
//! synthesize the end event. Everything is synchronous and
//! single-threaded; callbacks fire in-line, each at most once.

pub mod error;
pub mod method;
pub mod multimap;
pub mod request;
pub mod response;
pub mod server;

pub use error::{HttpError, HttpResult};
pub use method::Method;
pub use multimap::MultiMap;
pub use request::ServerRequest;
pub use response::ServerResponse;
pub use server::{OnceServer, SocketAddress};
