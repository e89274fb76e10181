//! Request body and HTTP/1.1 request head serialization.

use bytes::Bytes;
use http::Method;
use std::io::Read;
use url::Url;

use crate::http::headers::HeaderMap;

/// Request body for methods that send data.
#[derive(Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes, sent with a Content-Length header.
    Bytes(Bytes),
    /// Body pulled incrementally from a reader, sent with chunked
    /// transfer encoding. The reader is polled only between socket
    /// writes, so it should not block for long.
    Stream(Box<dyn Read>),
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "RequestBody::Empty"),
            RequestBody::Bytes(b) => write!(f, "RequestBody::Bytes({} bytes)", b.len()),
            RequestBody::Stream(_) => write!(f, "RequestBody::Stream"),
        }
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Length in bytes, when known up front.
    pub fn len(&self) -> Option<usize> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len()),
            RequestBody::Stream(_) => None,
        }
    }
}

/// Serialize the request head (request line plus headers) for HTTP/1.1.
///
/// Caller-supplied headers win; `Host`, body framing, and `Connection:
/// close` are filled in only when absent. Connections are never reused,
/// so close-delimited responses stay unambiguous.
pub fn serialize_head(
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    body: &RequestBody,
) -> Vec<u8> {
    let mut target = url.path().to_owned();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut head = format!("{} {} HTTP/1.1\r\n", method, target).into_bytes();

    if headers.get("Host").is_none() {
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => head.extend_from_slice(format!("Host: {host}:{port}\r\n").as_bytes()),
            None => head.extend_from_slice(format!("Host: {host}\r\n").as_bytes()),
        }
    }

    for (name, value) in headers.iter() {
        head.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }

    if headers.get("Content-Length").is_none() && headers.get("Transfer-Encoding").is_none() {
        let body_expected =
            method == Method::POST || method == Method::PUT || method == Method::PATCH;
        match body.len() {
            Some(0) if !body_expected => {}
            Some(len) => head.extend_from_slice(format!("Content-Length: {len}\r\n").as_bytes()),
            None => head.extend_from_slice(b"Transfer-Encoding: chunked\r\n"),
        }
    }

    if headers.get("Connection").is_none() {
        head.extend_from_slice(b"Connection: close\r\n");
    }

    head.extend_from_slice(b"\r\n");
    head
}
