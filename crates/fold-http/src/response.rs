//! Write-accumulating response view.
//!
//! Satisfies the streaming response contract while deferring all real
//! output to the single terminal `end` call, which serializes one
//! outbound envelope to the sink and closes it. The view is a cheaply
//! cloneable handle so handler code can stash it in callbacks, the way
//! streaming frameworks expect to.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::rc::Rc;

use bytes::BytesMut;
use fold_core::ResponseEnvelope;
use tracing::error;

use crate::error::{HttpError, HttpResult};
use crate::method::Method;
use crate::multimap::MultiMap;

const CONTENT_LENGTH: &str = "Content-Length";

type Callback = Box<dyn FnOnce()>;

struct ResponseState<W: Write> {
    // Taken exactly once at serialization time; dropping it closes
    // the sink.
    output: Option<W>,
    head_written: bool,
    written: bool,
    closed: bool,
    chunked: bool,
    status_code: u16,
    status_message: String,
    headers: MultiMap,
    trailers: MultiMap,
    body: BytesMut,
    headers_end_handler: Option<Callback>,
    body_end_handler: Option<Callback>,
    end_handler: Option<Callback>,
    exception_handler: Option<Box<dyn FnMut(&HttpError)>>,
}

impl<W: Write> ResponseState<W> {
    fn check_written(&self) -> HttpResult<()> {
        if self.written {
            Err(HttpError::ResponseWritten)
        } else {
            Ok(())
        }
    }

    fn content_length_set(&self) -> bool {
        self.headers.contains(CONTENT_LENGTH)
    }

    /// Mark the head written and hand back the headers-end callback so
    /// the caller can fire it outside the cell borrow.
    fn prepare_head(&mut self) -> Option<Callback> {
        if self.head_written {
            None
        } else {
            self.head_written = true;
            self.headers_end_handler.take()
        }
    }

    fn outbound_envelope(&self) -> ResponseEnvelope {
        let mut headers = BTreeMap::new();
        for (name, value) in self.headers.iter() {
            headers.insert(name.to_string(), value.to_string());
        }
        if self.chunked {
            // The envelope model cannot stream chunks; trailers fold
            // into the header map and a Content-Length for the fully
            // buffered body stands in for the chunked framing.
            for (name, value) in self.trailers.iter() {
                headers.insert(name.to_string(), value.to_string());
            }
            headers.insert(CONTENT_LENGTH.to_string(), self.body.len().to_string());
        }
        ResponseEnvelope::binary(self.status_code, headers, &self.body)
    }
}

/// A streaming HTTP response that buffers every write and emits one
/// outbound envelope on `end`.
///
/// State machine: open, then head-written on the first write, then
/// ended on the terminal call. `close` is a side terminal that marks
/// the response closed without ever serializing output or firing the
/// body-end/end callbacks. Every mutator fails with
/// [`HttpError::ResponseWritten`] once the response has ended.
pub struct ServerResponse<W: Write> {
    inner: Rc<RefCell<ResponseState<W>>>,
}

impl<W: Write> Clone for ServerResponse<W> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<W: Write> ServerResponse<W> {
    pub fn new(output: W) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ResponseState {
                output: Some(output),
                head_written: false,
                written: false,
                closed: false,
                chunked: false,
                status_code: 200,
                status_message: "OK".to_string(),
                headers: MultiMap::case_insensitive(),
                trailers: MultiMap::case_insensitive(),
                body: BytesMut::new(),
                headers_end_handler: None,
                body_end_handler: None,
                end_handler: None,
                exception_handler: None,
            })),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.inner.borrow().status_code
    }

    pub fn set_status_code(&self, status_code: u16) -> HttpResult<()> {
        let mut state = self.inner.borrow_mut();
        state.check_written()?;
        state.status_code = status_code;
        Ok(())
    }

    pub fn status_message(&self) -> String {
        self.inner.borrow().status_message.clone()
    }

    pub fn set_status_message(&self, message: impl Into<String>) -> HttpResult<()> {
        let mut state = self.inner.borrow_mut();
        state.check_written()?;
        state.status_message = message.into();
        Ok(())
    }

    pub fn is_chunked(&self) -> bool {
        self.inner.borrow().chunked
    }

    pub fn set_chunked(&self, chunked: bool) -> HttpResult<()> {
        let mut state = self.inner.borrow_mut();
        state.check_written()?;
        state.chunked = chunked;
        Ok(())
    }

    pub fn put_header(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> HttpResult<()> {
        let mut state = self.inner.borrow_mut();
        state.check_written()?;
        state.headers.set(name, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.inner.borrow().headers.get(name).map(str::to_string)
    }

    pub fn put_trailer(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> HttpResult<()> {
        let mut state = self.inner.borrow_mut();
        state.check_written()?;
        state.trailers.set(name, value);
        Ok(())
    }

    pub fn trailer(&self, name: &str) -> Option<String> {
        self.inner.borrow().trailers.get(name).map(str::to_string)
    }

    /// Buffer a body chunk.
    ///
    /// Without chunked encoding a Content-Length header must already be
    /// set before the first write; the check runs before any byte is
    /// buffered. The first legal write finalizes the head and fires the
    /// headers-end callback.
    pub fn write(&self, chunk: impl AsRef<[u8]>) -> HttpResult<()> {
        let fire_head = {
            let mut state = self.inner.borrow_mut();
            state.check_written()?;
            if !state.head_written && !state.chunked && !state.content_length_set() {
                return Err(HttpError::MissingContentLength);
            }
            let fire_head = state.prepare_head();
            state.body.extend_from_slice(chunk.as_ref());
            fire_head
        };
        if let Some(callback) = fire_head {
            callback();
        }
        Ok(())
    }

    /// Terminate the response with a final chunk.
    ///
    /// Computes Content-Length from the total accumulated body when
    /// absent (non-chunked), fires the headers-end callback if it has
    /// not fired yet, serializes the outbound envelope to the sink
    /// exactly once, closes the sink, then fires body-end and end in
    /// that order. A second `end`, like any mutation afterward, fails
    /// with [`HttpError::ResponseWritten`].
    pub fn end(&self, chunk: impl AsRef<[u8]>) -> HttpResult<()> {
        let fire_head = {
            let mut state = self.inner.borrow_mut();
            state.check_written()?;
            if !state.chunked && !state.content_length_set() {
                let total = state.body.len() + chunk.as_ref().len();
                state.headers.set(CONTENT_LENGTH, total.to_string());
            }
            state.body.extend_from_slice(chunk.as_ref());
            state.prepare_head()
        };
        // Fired outside the borrow: the callback may still add headers
        // before the envelope is built.
        if let Some(callback) = fire_head {
            callback();
        }

        let (write_error, fire_body_end, fire_end) = {
            let mut state = self.inner.borrow_mut();
            // A headers-end callback that ended the response itself is
            // a contract violation, not a second serialization.
            state.check_written()?;
            let envelope = state.outbound_envelope();
            let write_error = match state.output.take() {
                Some(mut output) => envelope.write_to(&mut output).err(),
                None => None,
            };
            state.closed = true;
            state.written = true;
            (
                write_error,
                state.body_end_handler.take(),
                state.end_handler.take(),
            )
        };

        if let Some(err) = write_error {
            self.dispatch_exception(HttpError::Envelope(err));
        }
        if let Some(callback) = fire_body_end {
            callback();
        }
        if let Some(callback) = fire_end {
            callback();
        }
        Ok(())
    }

    /// Terminate the response with no final chunk.
    pub fn end_empty(&self) -> HttpResult<()> {
        self.end("")
    }

    /// Mark the response closed without emitting any output.
    ///
    /// Distinct from `end`: nothing is serialized and the body-end/end
    /// callbacks never fire. This discards the response.
    pub fn close(&self) {
        self.inner.borrow_mut().closed = true;
    }

    pub fn head_written(&self) -> bool {
        self.inner.borrow().head_written
    }

    pub fn ended(&self) -> bool {
        self.inner.borrow().written
    }

    pub fn closed(&self) -> bool {
        self.inner.borrow().closed
    }

    pub fn bytes_written(&self) -> u64 {
        self.inner.borrow().body.len() as u64
    }

    /// Register the callback fired when the head is finalized (first
    /// write, or end time). It may still mutate headers.
    pub fn headers_end_handler(&self, handler: impl FnOnce() + 'static) {
        self.inner.borrow_mut().headers_end_handler = Some(Box::new(handler));
    }

    /// Register the callback fired after the body is serialized.
    pub fn body_end_handler(&self, handler: impl FnOnce() + 'static) {
        self.inner.borrow_mut().body_end_handler = Some(Box::new(handler));
    }

    /// Register the end callback. Fails once the response has ended.
    pub fn end_handler(&self, handler: impl FnOnce() + 'static) -> HttpResult<()> {
        let mut state = self.inner.borrow_mut();
        state.check_written()?;
        state.end_handler = Some(Box::new(handler));
        Ok(())
    }

    /// Register the callback receiving sink-write failures. Fails once
    /// the response has ended.
    pub fn exception_handler(
        &self,
        handler: impl FnMut(&HttpError) + 'static,
    ) -> HttpResult<()> {
        let mut state = self.inner.borrow_mut();
        state.check_written()?;
        state.exception_handler = Some(Box::new(handler));
        Ok(())
    }

    /// File streaming needs a real connection to stream over.
    pub fn send_file(&self, _path: &str) -> HttpResult<()> {
        Err(HttpError::Unsupported("file streaming"))
    }

    /// Push promises need HTTP/2; this transport synthesizes an
    /// immediate failure instead.
    pub fn push(&self, _method: Method, _path: &str) -> HttpResult<ServerResponse<W>> {
        Err(HttpError::Unsupported("HTTP/2 push promises"))
    }

    /// Accepted as a no-op: there is no frame channel to write to.
    pub fn write_custom_frame(&self, _frame_type: u16, _flags: u8, _payload: &[u8]) {}

    /// Accepted as a no-op: the whole request is already buffered.
    pub fn write_continue(&self) {}

    fn dispatch_exception(&self, err: HttpError) {
        let mut handler = self.inner.borrow_mut().exception_handler.take();
        match handler.as_mut() {
            Some(callback) => callback(&err),
            None => error!(error = %err, "response serialization failed"),
        }
        let mut state = self.inner.borrow_mut();
        if state.exception_handler.is_none() {
            state.exception_handler = handler;
        }
    }
}
