//! Streaming request view over a decoded invocation envelope.

use std::cell::{OnceCell, RefCell};
use std::io::Write;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use fold_core::RequestEnvelope;

use crate::error::{HttpError, HttpResult};
use crate::method::Method;
use crate::multimap::MultiMap;
use crate::response::ServerResponse;
use crate::server::SocketAddress;

/// A streaming HTTP request backed by a single decoded envelope.
///
/// Derived fields (uri, query string, header and parameter maps) are
/// computed lazily on first access and memoized for the life of the
/// view. The view transitions from open to ended exactly once, driven
/// by the orchestrator's `deliver_data`/`deliver_end` calls; handler
/// registration is rejected after that point.
pub struct ServerRequest<W: Write> {
    envelope: RequestEnvelope,
    response: ServerResponse<W>,
    local_host: String,
    local_port: u16,
    uri: OnceCell<String>,
    absolute_uri: OnceCell<String>,
    query: OnceCell<String>,
    headers: OnceCell<MultiMap>,
    params: OnceCell<MultiMap>,
    data_handler: Option<Box<dyn FnMut(Bytes)>>,
    end_handler: Option<Box<dyn FnOnce()>>,
    ended: bool,
}

impl<W: Write> ServerRequest<W> {
    pub fn new(
        local_host: impl Into<String>,
        local_port: u16,
        envelope: RequestEnvelope,
        response: ServerResponse<W>,
    ) -> Self {
        Self {
            envelope,
            response,
            local_host: local_host.into(),
            local_port,
            uri: OnceCell::new(),
            absolute_uri: OnceCell::new(),
            query: OnceCell::new(),
            headers: OnceCell::new(),
            params: OnceCell::new(),
            data_handler: None,
            end_handler: None,
            ended: false,
        }
    }

    /// The envelope's method string parsed into a canonical token.
    pub fn method(&self) -> HttpResult<Method> {
        self.envelope.http_method.parse()
    }

    /// The envelope's method string verbatim.
    pub fn raw_method(&self) -> &str {
        &self.envelope.http_method
    }

    pub fn version(&self) -> &'static str {
        "HTTP/1.1"
    }

    pub fn scheme(&self) -> &'static str {
        "http"
    }

    pub fn is_ssl(&self) -> bool {
        false
    }

    pub fn host(&self) -> &str {
        &self.local_host
    }

    pub fn path(&self) -> &str {
        &self.envelope.path
    }

    /// The query string re-serialized from the parameter map.
    ///
    /// The envelope carries parameters as an unordered map, so the
    /// round trip is lossy: pairs come out in map-iteration order with
    /// re-encoded keys and values (space as `%20`), not in the order or
    /// spelling the client originally sent.
    pub fn query(&self) -> &str {
        self.query.get_or_init(|| {
            let mut out = String::new();
            for (name, value) in self.params().iter() {
                if !out.is_empty() {
                    out.push('&');
                }
                out.push_str(&form_encode(name));
                out.push('=');
                out.push_str(&form_encode(value));
            }
            out
        })
    }

    /// `scheme://host:port` + path (omitted when `/`) + `?query`
    /// (omitted when empty), memoized on first access.
    pub fn uri(&self) -> &str {
        self.uri.get_or_init(|| {
            let path = if self.path() == "/" { "" } else { self.path() };
            let mut uri = format!(
                "{}://{}:{}{}",
                self.scheme(),
                self.local_host,
                self.local_port,
                path
            );
            if !self.query().is_empty() {
                uri.push('?');
                uri.push_str(self.query());
            }
            uri
        })
    }

    pub fn absolute_uri(&self) -> &str {
        self.absolute_uri
            .get_or_init(|| self.uri().to_string())
            .as_str()
    }

    /// Case-insensitive header map; empty when the envelope carried no
    /// headers member.
    pub fn headers(&self) -> &MultiMap {
        self.headers.get_or_init(|| {
            let mut map = MultiMap::case_insensitive();
            if let Some(headers) = &self.envelope.headers {
                for (name, value) in headers {
                    map.add(name.clone(), value.clone());
                }
            }
            map
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name)
    }

    /// Case-sensitive query parameter map. Parameter names are
    /// case-sensitive per the platform contract, unlike header names.
    pub fn params(&self) -> &MultiMap {
        self.params.get_or_init(|| {
            let mut map = MultiMap::case_sensitive();
            if let Some(params) = &self.envelope.query_string_parameters {
                for (name, value) in params {
                    map.add(name.clone(), value.clone());
                }
            }
            map
        })
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params().get(name)
    }

    /// The paired response view. Clone the handle to move it into a
    /// callback.
    pub fn response(&self) -> &ServerResponse<W> {
        &self.response
    }

    pub fn local_address(&self) -> SocketAddress {
        SocketAddress {
            host: self.local_host.clone(),
            port: self.local_port,
        }
    }

    /// The invocation model has no live transport; the peer is
    /// reported as the unspecified address.
    pub fn remote_address(&self) -> SocketAddress {
        SocketAddress { host: "0.0.0.0".to_string(), port: 0 }
    }

    pub fn peer_certificate_chain(&self) -> Option<&[u8]> {
        None
    }

    /// Flow control is meaningless for a fully buffered request.
    pub fn pause(&mut self) -> &mut Self {
        self
    }

    pub fn resume(&mut self) -> &mut Self {
        self
    }

    /// Register the data callback. Fails once the request has ended.
    pub fn data_handler(&mut self, handler: impl FnMut(Bytes) + 'static) -> HttpResult<()> {
        self.check_ended()?;
        self.data_handler = Some(Box::new(handler));
        Ok(())
    }

    /// Register the end callback. Fails once the request has ended.
    pub fn end_handler(&mut self, handler: impl FnOnce() + 'static) -> HttpResult<()> {
        self.check_ended()?;
        self.end_handler = Some(Box::new(handler));
        Ok(())
    }

    /// Register a callback receiving the fully accumulated body at end
    /// time. Composed from the data and end callbacks.
    pub fn body_handler(&mut self, handler: impl FnOnce(Bytes) + 'static) -> HttpResult<()> {
        let buffer = Rc::new(RefCell::new(BytesMut::new()));
        let accumulator = Rc::clone(&buffer);
        self.data_handler(move |chunk| {
            accumulator.borrow_mut().extend_from_slice(&chunk);
        })?;
        self.end_handler(move || handler(buffer.borrow_mut().split().freeze()))
    }

    pub fn expect_multipart(&mut self, expect: bool) -> HttpResult<()> {
        self.check_ended()?;
        if expect {
            return Err(HttpError::Unsupported("multipart form parsing"));
        }
        Ok(())
    }

    pub fn is_expect_multipart(&self) -> bool {
        false
    }

    pub fn upgrade(&mut self) -> HttpResult<()> {
        Err(HttpError::Unsupported("websocket upgrade"))
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Decode the body and deliver it to the data callback. Invoked
    /// exactly once by the orchestrator; no event fires when the body
    /// is absent or empty.
    pub fn deliver_data(&mut self) -> HttpResult<()> {
        if let Some(data) = self.envelope.body_bytes()? {
            if !data.is_empty() {
                if let Some(handler) = self.data_handler.as_mut() {
                    handler(data);
                }
            }
        }
        Ok(())
    }

    /// Flip the request to ended and fire the end callback. Invoked
    /// exactly once by the orchestrator, after `deliver_data`.
    pub fn deliver_end(&mut self) {
        self.ended = true;
        if let Some(handler) = self.end_handler.take() {
            handler();
        }
    }

    fn check_ended(&self) -> HttpResult<()> {
        if self.ended {
            Err(HttpError::RequestEnded)
        } else {
            Ok(())
        }
    }
}

/// Form-style URL encoding with spaces as `%20` rather than `+`.
fn form_encode(text: &str) -> String {
    url::form_urlencoded::byte_serialize(text.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn request_from(json: &str) -> ServerRequest<Vec<u8>> {
        let envelope: RequestEnvelope = serde_json::from_str(json).unwrap();
        let response = ServerResponse::new(Vec::new());
        ServerRequest::new("localhost", 8888, envelope, response)
    }

    const REQUEST_BASIC: &str = r#"{
        "httpMethod": "POST",
        "path": "/",
        "headers": { "X-H1": "val1" },
        "queryStringParameters": { "p1": "1", "p2": "2" },
        "isBase64Encoded": false
    }"#;

    #[test]
    fn method_parses_canonical_token() {
        let request = request_from(REQUEST_BASIC);
        assert_eq!(request.method().unwrap(), Method::Post);
        assert_eq!(request.raw_method(), "POST");
    }

    #[test]
    fn method_rejects_unknown_token() {
        let request = request_from(r#"{"httpMethod":"BREW","path":"/"}"#);
        assert!(matches!(
            request.method(),
            Err(HttpError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn transport_accessors_report_no_live_socket() {
        let request = request_from(REQUEST_BASIC);
        assert_eq!(request.version(), "HTTP/1.1");
        assert_eq!(request.scheme(), "http");
        assert!(!request.is_ssl());
        assert!(request.peer_certificate_chain().is_none());
        assert_eq!(
            request.local_address(),
            SocketAddress { host: "localhost".to_string(), port: 8888 }
        );
        assert_eq!(
            request.remote_address(),
            SocketAddress { host: "0.0.0.0".to_string(), port: 0 }
        );
    }

    #[test]
    fn query_is_rebuilt_from_params() {
        let request = request_from(REQUEST_BASIC);
        assert_eq!(request.query(), "p1=1&p2=2");
    }

    #[test]
    fn query_percent_encodes_with_space_as_percent_20() {
        let request = request_from(
            r#"{"httpMethod":"GET","path":"/","queryStringParameters":{"a b":"c&d"}}"#,
        );
        assert_eq!(request.query(), "a%20b=c%26d");
    }

    #[test]
    fn uri_omits_root_path_and_embeds_query() {
        let request = request_from(REQUEST_BASIC);
        assert_eq!(request.uri(), "http://localhost:8888?p1=1&p2=2");
        assert_eq!(request.absolute_uri(), "http://localhost:8888?p1=1&p2=2");
    }

    #[test]
    fn uri_with_path_and_no_query() {
        let request = request_from(r#"{"httpMethod":"GET","path":"/path1"}"#);
        assert_eq!(request.path(), "/path1");
        assert_eq!(request.query(), "");
        assert_eq!(request.absolute_uri(), "http://localhost:8888/path1");
        assert!(request.headers().is_empty());
    }

    #[test]
    fn headers_are_case_insensitive() {
        let request = request_from(REQUEST_BASIC);
        assert_eq!(request.header("x-h1"), Some("val1"));
        assert_eq!(request.headers().get("X-H1"), Some("val1"));
    }

    #[test]
    fn params_are_case_sensitive() {
        let request = request_from(REQUEST_BASIC);
        assert_eq!(request.params().len(), 2);
        assert_eq!(request.param("p1"), Some("1"));
        assert_eq!(request.param("P1"), None);
    }

    #[test]
    fn deliver_data_fires_once_with_body_bytes() {
        let mut request = request_from(
            r#"{"httpMethod":"POST","path":"/path1","body":"line 1\nline 2"}"#,
        );
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        request
            .data_handler(move |chunk| sink.borrow_mut().push(chunk))
            .unwrap();
        request.deliver_data().unwrap();
        request.deliver_end();
        assert_eq!(seen.borrow().as_slice(), &[Bytes::from("line 1\nline 2")]);
    }

    #[test]
    fn deliver_data_skips_absent_and_empty_bodies() {
        for json in [
            r#"{"httpMethod":"POST","path":"/"}"#,
            r#"{"httpMethod":"POST","path":"/","body":""}"#,
        ] {
            let mut request = request_from(json);
            let fired = Rc::new(Cell::new(false));
            let flag = Rc::clone(&fired);
            request.data_handler(move |_| flag.set(true)).unwrap();
            request.deliver_data().unwrap();
            assert!(!fired.get());
        }
    }

    #[test]
    fn deliver_data_decodes_base64_body() {
        let mut request = request_from(
            r#"{"httpMethod":"POST","path":"/","body":"aGVsbG8=","isBase64Encoded":true}"#,
        );
        let seen = Rc::new(RefCell::new(BytesMut::new()));
        let sink = Rc::clone(&seen);
        request
            .data_handler(move |chunk| sink.borrow_mut().extend_from_slice(&chunk))
            .unwrap();
        request.deliver_data().unwrap();
        assert_eq!(&seen.borrow()[..], b"hello");
    }

    #[test]
    fn body_handler_accumulates_whole_body() {
        let mut request = request_from(
            r#"{"httpMethod":"POST","path":"/path1","body":"request body"}"#,
        );
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        request
            .body_handler(move |body| *sink.borrow_mut() = Some(body))
            .unwrap();
        request.deliver_data().unwrap();
        request.deliver_end();
        assert_eq!(seen.borrow().clone().unwrap(), Bytes::from("request body"));
    }

    #[test]
    fn body_handler_observes_empty_body_at_end() {
        let mut request = request_from(r#"{"httpMethod":"POST","path":"/"}"#);
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        request
            .body_handler(move |body| *sink.borrow_mut() = Some(body))
            .unwrap();
        request.deliver_data().unwrap();
        request.deliver_end();
        assert_eq!(seen.borrow().clone().unwrap(), Bytes::new());
    }

    #[test]
    fn registration_is_rejected_after_end() {
        let mut request = request_from(REQUEST_BASIC);
        request.deliver_end();
        assert!(request.is_ended());
        assert!(matches!(
            request.data_handler(|_| {}),
            Err(HttpError::RequestEnded)
        ));
        assert!(matches!(
            request.end_handler(|| {}),
            Err(HttpError::RequestEnded)
        ));
        assert!(matches!(
            request.expect_multipart(false),
            Err(HttpError::RequestEnded)
        ));
    }

    #[test]
    fn end_handler_fires_exactly_once() {
        let mut request = request_from(REQUEST_BASIC);
        let count = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&count);
        request
            .end_handler(move || counter.set(counter.get() + 1))
            .unwrap();
        request.deliver_end();
        request.deliver_end();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn multipart_and_upgrade_fail_fast() {
        let mut request = request_from(REQUEST_BASIC);
        assert!(matches!(
            request.expect_multipart(true),
            Err(HttpError::Unsupported(_))
        ));
        assert!(request.expect_multipart(false).is_ok());
        assert!(!request.is_expect_multipart());
        assert!(matches!(request.upgrade(), Err(HttpError::Unsupported(_))));
    }

    #[test]
    fn response_handle_reaches_the_paired_view() {
        let request = request_from(REQUEST_BASIC);
        request.response().end("data").unwrap();
        assert!(request.response().ended());
    }

    #[test]
    fn end_handler_can_end_the_paired_response() {
        let mut request = request_from(REQUEST_BASIC);
        let response = request.response().clone();
        request
            .end_handler(move || response.end("data1").unwrap())
            .unwrap();
        request.deliver_end();
        assert!(request.response().ended());
    }

    #[test]
    fn form_encode_matches_platform_rules() {
        assert_eq!(form_encode("a b"), "a%20b");
        assert_eq!(form_encode("a+b"), "a%2Bb");
        assert_eq!(form_encode("safe-chars_1.2*"), "safe-chars_1.2*");
    }
}
