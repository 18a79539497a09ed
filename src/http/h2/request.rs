//! Outbound request head
//!
//! An [`H2Request`] is turned into an HTTP/2 field list (RFC 9113
//! Section 8.3.1): pseudo-headers first, lowercase names, and none of the
//! HTTP/1 connection-specific fields.

use crate::http::Headers;

const CONNECTION_HEADERS: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// HTTP/2 request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Request {
    method: String,
    scheme: String,
    authority: String,
    path: String,
    headers: Headers,
}

impl H2Request {
    /// Create a request with no extra headers
    pub fn new(method: impl Into<String>, authority: impl Into<String>, path: impl Into<String>) -> Self {
        H2Request::builder().method(method).authority(authority).path(path).build()
    }

    /// Create a builder for constructing requests
    pub fn builder() -> H2RequestBuilder {
        H2RequestBuilder::default()
    }

    /// Request method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request scheme
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Request authority (host and optional port)
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Request path including any query
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get mutable headers
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// The field list sent on the wire, in order
    ///
    /// CONNECT requests carry only `:method` and `:authority`. The `te`
    /// field survives only with the value `trailers`.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let connect = self.is_connect();
        let mut fields = Vec::with_capacity(4 + self.headers.len());
        fields.push((":method".to_string(), self.method.clone()));
        if !connect {
            fields.push((":scheme".to_string(), self.scheme.clone()));
        }
        fields.push((":authority".to_string(), self.authority.clone()));
        if !connect {
            let path = if self.path.is_empty() { "/" } else { self.path.as_str() };
            fields.push((":path".to_string(), path.to_string()));
        }

        for (name, value) in self.headers.iter() {
            let name = name.to_ascii_lowercase();
            if CONNECTION_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if name == "te" && !value.eq_ignore_ascii_case("trailers") {
                continue;
            }
            fields.push((name, value.to_string()));
        }
        fields
    }
}

/// Builder for HTTP/2 requests
#[derive(Debug, Default)]
pub struct H2RequestBuilder {
    method: Option<String>,
    scheme: Option<String>,
    authority: Option<String>,
    path: Option<String>,
    headers: Headers,
}

impl H2RequestBuilder {
    /// Set the method (default GET)
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set the scheme (default https)
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Set the authority (default localhost)
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Set the path (default /)
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Build the request
    pub fn build(self) -> H2Request {
        H2Request {
            method: self.method.unwrap_or_else(|| "GET".to_string()),
            scheme: self.scheme.unwrap_or_else(|| "https".to_string()),
            authority: self.authority.unwrap_or_else(|| "localhost".to_string()),
            path: self.path.unwrap_or_else(|| "/".to_string()),
            headers: self.headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(fields: &[(String, String)]) -> Vec<&str> {
        fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn test_pseudo_headers_first() {
        let request = H2Request::builder()
            .method("POST")
            .authority("example.com:8443")
            .path("/upload?x=1")
            .header("Content-Type", "application/json")
            .build();
        let fields = request.to_fields();
        assert_eq!(
            names(&fields),
            vec![":method", ":scheme", ":authority", ":path", "content-type"]
        );
        assert_eq!(fields[2].1, "example.com:8443");
        assert_eq!(fields[3].1, "/upload?x=1");
    }

    #[test]
    fn test_connect_omits_scheme_and_path() {
        let request = H2Request::new("CONNECT", "proxy.example:443", "/ignored");
        assert_eq!(names(&request.to_fields()), vec![":method", ":authority"]);
    }

    #[test]
    fn test_connection_headers_dropped() {
        let request = H2Request::builder()
            .header("Connection", "keep-alive")
            .header("Keep-Alive", "5")
            .header("Transfer-Encoding", "chunked")
            .header("Upgrade", "h2c")
            .header("Host", "example.com")
            .header("Proxy-Connection", "close")
            .header("TE", "gzip")
            .header("te", "trailers")
            .header("X-Trace", "abc")
            .build();
        let fields = request.to_fields();
        assert_eq!(&fields[4..], &[
            ("te".to_string(), "trailers".to_string()),
            ("x-trace".to_string(), "abc".to_string()),
        ]);
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let request = H2Request::new("GET", "a", "");
        assert_eq!(request.to_fields()[3].1, "/");
    }
}
