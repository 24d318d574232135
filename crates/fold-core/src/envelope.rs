//! Inbound and outbound invocation envelopes.
//!
//! The field renames reproduce the platform's JSON shape bit-exactly:
//! `httpMethod`, `queryStringParameters`, `isBase64Encoded`. Absent
//! `headers`/`queryStringParameters`/`body` members stay `None`; the
//! base64 flag defaults to false.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, EnvelopeResult};

/// The request half of an invocation, immutable once decoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    #[serde(default)]
    pub http_method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl RequestEnvelope {
    /// Read `input` to exhaustion and decode it as a request envelope.
    pub fn from_reader(input: &mut impl Read) -> EnvelopeResult<Self> {
        let mut raw = Vec::new();
        input.read_to_end(&mut raw).map_err(EnvelopeError::Io)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Decode the body into raw bytes per the `isBase64Encoded` flag.
    ///
    /// Returns `None` when the envelope carries no body member at all.
    pub fn body_bytes(&self) -> EnvelopeResult<Option<Bytes>> {
        match &self.body {
            None => Ok(None),
            Some(text) if self.is_base64_encoded => {
                Ok(Some(BASE64.decode(text)?.into()))
            }
            Some(text) => Ok(Some(Bytes::copy_from_slice(text.as_bytes()))),
        }
    }
}

/// The response half of an invocation, constructed exactly once.
///
/// On the success path the body is the base64 encoding of the raw
/// response bytes and `isBase64Encoded` is true. The decode/read-failure
/// path instead carries a plain-text diagnostic with the flag false so
/// the message stays readable in the platform's logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub headers: BTreeMap<String, String>,
    pub status_code: u16,
    pub is_base64_encoded: bool,
    pub body: String,
}

impl ResponseEnvelope {
    /// Success-path envelope wrapping raw response bytes.
    pub fn binary(
        status_code: u16,
        headers: BTreeMap<String, String>,
        body: &[u8],
    ) -> Self {
        Self {
            headers,
            status_code,
            is_base64_encoded: true,
            body: BASE64.encode(body),
        }
    }

    /// Diagnostic 500 envelope for decode/read failures.
    pub fn diagnostic(message: &str) -> Self {
        Self {
            headers: BTreeMap::new(),
            status_code: 500,
            is_base64_encoded: false,
            body: message.to_string(),
        }
    }

    /// Decode the body back into raw bytes per the base64 flag.
    pub fn body_bytes(&self) -> EnvelopeResult<Bytes> {
        if self.is_base64_encoded {
            Ok(BASE64.decode(&self.body)?.into())
        } else {
            Ok(Bytes::copy_from_slice(self.body.as_bytes()))
        }
    }

    /// Serialize the envelope to `output` and flush it.
    pub fn write_to(&self, output: &mut impl Write) -> EnvelopeResult<()> {
        let raw = serde_json::to_vec(self)?;
        output.write_all(&raw).map_err(EnvelopeError::Write)?;
        output.flush().map_err(EnvelopeError::Write)
    }
}
