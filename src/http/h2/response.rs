//! Response header validation
//!
//! Checks decoded response and trailer field lists against the HTTP/2
//! message rules (RFC 9113 Section 8.3.2): pseudo-headers first, exactly
//! one `:status`, no request pseudo-headers, consistent Content-Length.

use super::error::{Error, ErrorCode, Result};
use super::header_codec::HeaderField;
use crate::http::Headers;

const REQUEST_PSEUDO_HEADERS: [&str; 4] = [":method", ":scheme", ":authority", ":path"];

/// A validated response header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    status: u16,
    content_length: Option<u64>,
    headers: Headers,
}

impl ResponseHead {
    /// Response status code
    pub fn status_code(&self) -> u16 {
        self.status
    }

    /// Whether this is a 1xx interim response
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }

    /// Declared Content-Length; `None` when absent
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Ordinary (non-pseudo) header fields
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn into_headers(self) -> Headers {
        self.headers
    }
}

fn field_str(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Validate a decoded response header list
///
/// `end_stream` is the END_STREAM flag of the HEADERS frame that carried it.
/// A missing or non-numeric `:status` is an [`Error::InvalidResponse`]; every
/// other violation is a PROTOCOL_ERROR on `stream_id`.
pub fn process_response_headers(fields: &[HeaderField], stream_id: u32, end_stream: bool) -> Result<ResponseHead> {
    let mut headers = Headers::new();
    let mut status = None;
    let mut seen_regular = false;
    let mut content_length = None;

    for (name, value) in fields {
        let name = field_str(name);
        let value = field_str(value);

        if name.starts_with(':') {
            if seen_regular {
                return Err(Error::stream(
                    ErrorCode::ProtocolError,
                    stream_id,
                    format!("pseudo-header '{}' appears after regular header", name),
                ));
            }
            if name == ":status" {
                if status.is_some() {
                    return Err(Error::stream(
                        ErrorCode::ProtocolError,
                        stream_id,
                        "expected a single :status header",
                    ));
                }
                let code = value
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidResponse(format!("invalid :status value: {}", value)))?;
                status = Some(code);
            } else if REQUEST_PSEUDO_HEADERS.contains(&name.as_str()) {
                return Err(Error::stream(
                    ErrorCode::ProtocolError,
                    stream_id,
                    format!("request pseudo-header '{}' in response", name),
                ));
            } else {
                return Err(Error::stream(
                    ErrorCode::ProtocolError,
                    stream_id,
                    format!("unknown pseudo-header '{}' in response", name),
                ));
            }
            continue;
        }

        seen_regular = true;
        if name.eq_ignore_ascii_case("content-length") {
            let parsed = value.trim().parse::<u64>().map_err(|_| {
                Error::stream(
                    ErrorCode::ProtocolError,
                    stream_id,
                    format!("invalid Content-Length: {}", value),
                )
            })?;
            if content_length.is_some_and(|previous| previous != parsed) {
                return Err(Error::stream(
                    ErrorCode::ProtocolError,
                    stream_id,
                    "Multiple Content-Length values",
                ));
            }
            content_length = Some(parsed);
        }
        headers.insert(name, value);
    }

    let status = status.ok_or_else(|| Error::InvalidResponse("response missing :status pseudo-header".into()))?;

    if (100..200).contains(&status) && end_stream {
        return Err(Error::stream(
            ErrorCode::ProtocolError,
            stream_id,
            "1xx response must not have END_STREAM",
        ));
    }

    Ok(ResponseHead {
        status,
        content_length,
        headers,
    })
}

/// Validate a decoded trailer list; no pseudo-header is allowed
pub fn process_trailers(fields: &[HeaderField], stream_id: u32) -> Result<Headers> {
    let mut trailers = Headers::new();
    for (name, value) in fields {
        let name = field_str(name);
        if name.starts_with(':') {
            return Err(Error::stream(
                ErrorCode::ProtocolError,
                stream_id,
                format!("trailer contains pseudo-header '{}'", name),
            ));
        }
        trailers.insert(name, field_str(value));
    }
    Ok(trailers)
}

/// Check the body length against a declared Content-Length
pub fn validate_content_length(declared: Option<u64>, actual: u64, stream_id: u32) -> Result<()> {
    match declared {
        Some(expected) if expected != actual => Err(Error::stream(
            ErrorCode::ProtocolError,
            stream_id,
            format!(
                "Content-Length mismatch: expected {} bytes, received {} bytes",
                expected, actual
            ),
        )),
        _ => Ok(()),
    }
}
