//! Single-invocation server.
//!
//! `OnceServer` looks like a conventional HTTP server to the handler
//! code registered on it, but `listen` means "run one request/response
//! cycle, now": read the input to exhaustion, decode the envelope,
//! build the paired request/response views, invoke the handler, then
//! synthesize the data and end events. The server consumes itself on
//! `listen`, so a second invocation needs a fresh instance with fresh
//! views.

use std::io::{Read, Write};

use fold_core::{RequestEnvelope, ResponseEnvelope};
use tracing::{debug, error};

use crate::error::HttpResult;
use crate::request::ServerRequest;
use crate::response::ServerResponse;

/// Host/port pair reported by the request views. No socket is ever
/// bound; the values only shape what `host()` and `local_address()`
/// report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketAddress {
    pub host: String,
    pub port: u16,
}

/// Application handler invoked once per cycle with the request view.
pub type RequestHandler<W> = Box<dyn FnMut(&mut ServerRequest<W>) -> HttpResult<()>>;

/// A server that serves exactly one invocation.
pub struct OnceServer<R: Read, W: Write> {
    input: R,
    output: W,
    request_handler: Option<RequestHandler<W>>,
    local_host: String,
    local_port: u16,
}

impl<R: Read, W: Write> OnceServer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            request_handler: None,
            local_host: "0.0.0.0".to_string(),
            local_port: 0,
        }
    }

    /// Register the application handler. Must be called before
    /// `listen`; a server without a handler still delivers the data
    /// and end events into the void.
    pub fn request_handler(
        mut self,
        handler: impl FnMut(&mut ServerRequest<W>) -> HttpResult<()> + 'static,
    ) -> Self {
        self.request_handler = Some(Box::new(handler));
        self
    }

    /// The port the views will report. Nothing listens on it.
    pub fn actual_port(&self) -> u16 {
        self.local_port
    }

    /// Run the one request/response cycle.
    pub fn listen(self) -> HttpResult<()> {
        self.process()
    }

    /// Run the cycle reporting the given host/port to the views.
    pub fn listen_on(mut self, port: u16, host: impl Into<String>) -> HttpResult<()> {
        self.local_port = port;
        self.local_host = host.into();
        self.process()
    }

    /// Run the cycle, first notifying `on_listen`. The notification is
    /// synchronous and always succeeds: there is no socket to fail to
    /// bind.
    pub fn listen_with(
        self,
        on_listen: impl FnOnce(HttpResult<SocketAddress>),
    ) -> HttpResult<()> {
        on_listen(Ok(self.local_address()));
        self.process()
    }

    /// `listen_on` plus the synchronous `on_listen` notification.
    pub fn listen_on_with(
        mut self,
        port: u16,
        host: impl Into<String>,
        on_listen: impl FnOnce(HttpResult<SocketAddress>),
    ) -> HttpResult<()> {
        self.local_port = port;
        self.local_host = host.into();
        on_listen(Ok(self.local_address()));
        self.process()
    }

    /// Discard the server without serving. There is no persistent
    /// resource to release; the sink is dropped unwritten.
    pub fn close(self) {}

    fn local_address(&self) -> SocketAddress {
        SocketAddress {
            host: self.local_host.clone(),
            port: self.local_port,
        }
    }

    fn process(self) -> HttpResult<()> {
        let OnceServer {
            mut input,
            mut output,
            mut request_handler,
            local_host,
            local_port,
        } = self;

        let envelope = match RequestEnvelope::from_reader(&mut input) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = %err, "failed to decode the invocation payload");
                let diagnostic = ResponseEnvelope::diagnostic(&err.to_string());
                if let Err(write_err) = diagnostic.write_to(&mut output) {
                    // No further channel to report on.
                    error!(error = %write_err, "failed to write the diagnostic envelope");
                }
                return Ok(());
            }
        };
        debug!(
            method = %envelope.http_method,
            path = %envelope.path,
            "dispatching invocation"
        );

        let response = ServerResponse::new(output);
        let mut request =
            ServerRequest::new(local_host, local_port, envelope, response.clone());

        if let Some(handler) = request_handler.as_mut() {
            handler(&mut request)?;
        }
        request.deliver_data()?;
        request.deliver_end();
        Ok(())
    }
}
