//! A single HTTP request/response exchange and its callbacks.
//!
//! A [`Transfer`] is a cheap shared handle: the caller keeps one, the
//! multiplexer's registry keeps another, and neither holds a reference
//! back to the multiplexer. Callbacks are a caller-supplied
//! [`TransferHandler`] object rather than ambient closures, which keeps
//! ownership of captured buffers explicit.

use bytes::{Bytes, BytesMut};
use http::Method;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::base::TransferError;
use crate::http::exchange::{EventSink, HttpExchange};
use crate::http::headers::HeaderMap;
use crate::http::request::RequestBody;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Registration lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Not owned by any multiplexer.
    #[default]
    Unregistered,
    /// Owned by exactly one multiplexer.
    Registered,
    /// Reached a terminal state; no further I/O callbacks will fire.
    Completed,
}

/// Caller-supplied callbacks for one transfer.
///
/// All methods run synchronously on the thread driving `perform` and must
/// not block; a slow callback stalls every other multiplexed transfer.
/// `on_header`/`on_body` return a consumed count — returning fewer bytes
/// than offered aborts the transfer with a user-abort failure. Exactly one
/// of `on_success`/`on_failure` fires for a transfer that reaches a
/// terminal state.
pub trait TransferHandler {
    /// One response header line, CRLF included.
    fn on_header(&mut self, line: &[u8]) -> usize {
        line.len()
    }

    /// One response body chunk, streamed as it arrives.
    fn on_body(&mut self, chunk: &[u8]) -> usize {
        chunk.len()
    }

    /// The transfer completed cleanly.
    fn on_success(&mut self, transfer: &Transfer) {
        let _ = transfer;
    }

    /// The transfer failed; `error` is the structured (kind, message) pair.
    fn on_failure(&mut self, transfer: &Transfer, error: &TransferError) {
        let _ = (transfer, error);
    }
}

pub(crate) struct TransferInner {
    id: u64,
    url: String,
    method: Method,
    headers: HeaderMap,
    body: RequestBody,
    handler: Option<Box<dyn TransferHandler>>,
    state: TransferState,
    record_body: bool,
    response_code: Option<u16>,
    response_headers: Vec<(String, String)>,
    body_buf: BytesMut,
    error: Option<TransferError>,
}

/// One HTTP transfer tracked by the engine.
///
/// Clones share the same underlying transfer. `Rc`-based on purpose: a
/// transfer (and the multiplexer owning it) belongs to one thread, and
/// the compiler enforces it.
#[derive(Clone)]
pub struct Transfer {
    inner: Rc<RefCell<TransferInner>>,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Transfer")
            .field("id", &inner.id)
            .field("url", &inner.url)
            .field("state", &inner.state)
            .finish()
    }
}

impl PartialEq for Transfer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Transfer {
    /// Create a transfer targeting `url`. The URL is validated lazily, at
    /// start-of-transfer: a malformed URL surfaces through `on_failure`,
    /// the way a network error would.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TransferInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                url: url.into(),
                method: Method::GET,
                headers: HeaderMap::new(),
                body: RequestBody::Empty,
                handler: None,
                state: TransferState::Unregistered,
                record_body: true,
                response_code: None,
                response_headers: Vec::new(),
                body_buf: BytesMut::new(),
                error: None,
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    pub fn url(&self) -> String {
        self.inner.borrow().url.clone()
    }

    pub fn method(&self) -> Method {
        self.inner.borrow().method.clone()
    }

    pub fn state(&self) -> TransferState {
        self.inner.borrow().state
    }

    pub fn set_method(&self, method: Method) {
        self.inner.borrow_mut().method = method;
    }

    /// Set a request header; last write wins per name.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.borrow_mut().headers.insert(name, value);
    }

    pub fn set_body(&self, body: impl Into<RequestBody>) {
        self.inner.borrow_mut().body = body.into();
    }

    /// Install the callback object. Replaces any previous handler.
    pub fn set_handler(&self, handler: impl TransferHandler + 'static) {
        self.inner.borrow_mut().handler = Some(Box::new(handler));
    }

    /// Whether the response body is recorded for [`Transfer::body`].
    /// Defaults to true; callers streaming through `on_body` can turn the
    /// recording off.
    pub fn set_record_body(&self, record: bool) {
        self.inner.borrow_mut().record_body = record;
    }

    /// Response status code, once the head has been received.
    pub fn response_code(&self) -> Option<u16> {
        self.inner.borrow().response_code
    }

    /// Parsed response headers, wire order.
    pub fn response_headers(&self) -> Vec<(String, String)> {
        self.inner.borrow().response_headers.clone()
    }

    /// The recorded response body (empty if recording was turned off).
    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.borrow().body_buf)
    }

    /// The failure for a transfer that completed unsuccessfully.
    pub fn error(&self) -> Option<TransferError> {
        self.inner.borrow().error.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.borrow().state == TransferState::Completed
    }

    // ---- crate-internal lifecycle, driven by the multiplexer ----

    /// Transition to Registered, resetting any previous run's response
    /// state so a re-added transfer behaves like a fresh one. Fails if the
    /// transfer is currently registered (with this or any multiplexer).
    pub(crate) fn mark_registered(&self) -> Result<(), crate::base::MultiError> {
        let mut inner = self.inner.borrow_mut();
        if inner.state == TransferState::Registered {
            return Err(crate::base::MultiError::AlreadyRegistered);
        }
        inner.state = TransferState::Registered;
        inner.response_code = None;
        inner.response_headers.clear();
        inner.body_buf.clear();
        inner.error = None;
        Ok(())
    }

    pub(crate) fn mark_unregistered(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == TransferState::Registered {
            inner.state = TransferState::Unregistered;
        }
    }

    /// Build the protocol exchange for this transfer, taking the request
    /// body out (a streaming body can only be sent once).
    pub(crate) fn make_exchange(&self) -> HttpExchange {
        let mut inner = self.inner.borrow_mut();
        let body = std::mem::take(&mut inner.body);
        HttpExchange::new(
            inner.id,
            inner.method.clone(),
            inner.url.clone(),
            inner.headers.clone(),
            body,
        )
    }

    /// Dispatch terminal success: record the code, flip to Completed, fire
    /// `on_success` exactly once.
    pub(crate) fn complete_success(&self, code: u16) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.response_code = Some(code);
            inner.state = TransferState::Completed;
        }
        let mut handler = self.inner.borrow_mut().handler.take();
        if let Some(h) = handler.as_mut() {
            h.on_success(self);
        }
        self.inner.borrow_mut().handler = handler;
    }

    /// Dispatch terminal failure: record the error, flip to Completed,
    /// fire `on_failure` exactly once.
    pub(crate) fn complete_failure(&self, error: TransferError) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.error = Some(error.clone());
            inner.state = TransferState::Completed;
        }
        let mut handler = self.inner.borrow_mut().handler.take();
        if let Some(h) = handler.as_mut() {
            h.on_failure(self, &error);
        }
        self.inner.borrow_mut().handler = handler;
    }
}

/// The [`EventSink`] the multiplexer hands to an exchange while stepping
/// it: records response state on the transfer, then forwards to the
/// caller's handler.
///
/// The handler is taken out of the transfer around each callback so a
/// handler holding its own clone of the handle can use the accessors
/// without tripping the interior borrow.
pub(crate) struct TransferSink {
    transfer: Transfer,
}

impl TransferSink {
    pub(crate) fn new(transfer: Transfer) -> Self {
        Self { transfer }
    }
}

impl EventSink for TransferSink {
    fn on_header_line(&mut self, line: &[u8]) -> usize {
        {
            let mut inner = self.transfer.inner.borrow_mut();
            record_header_line(&mut inner, line);
        }
        let mut handler = self.transfer.inner.borrow_mut().handler.take();
        let consumed = match handler.as_mut() {
            Some(h) => h.on_header(line),
            None => line.len(),
        };
        self.transfer.inner.borrow_mut().handler = handler;
        consumed
    }

    fn on_body_chunk(&mut self, chunk: &[u8]) -> usize {
        {
            let mut inner = self.transfer.inner.borrow_mut();
            if inner.record_body {
                inner.body_buf.extend_from_slice(chunk);
            }
        }
        let mut handler = self.transfer.inner.borrow_mut().handler.take();
        let consumed = match handler.as_mut() {
            Some(h) => h.on_body(chunk),
            None => chunk.len(),
        };
        self.transfer.inner.borrow_mut().handler = handler;
        consumed
    }
}

/// Record one raw header line: the status line sets the response code,
/// name/value lines are parsed into pairs, the blank terminator is skipped.
fn record_header_line(inner: &mut TransferInner, line: &[u8]) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return;
    }
    if let Some(rest) = text.strip_prefix("HTTP/") {
        // Status line: "HTTP/1.1 200 OK"
        if let Some(code) = rest
            .split_whitespace()
            .nth(1)
            .and_then(|c| c.parse::<u16>().ok())
        {
            inner.response_code = Some(code);
        }
        return;
    }
    if let Some((name, value)) = text.split_once(':') {
        inner
            .response_headers
            .push((name.trim().to_owned(), value.trim().to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transfer_is_unregistered() {
        let t = Transfer::new("http://example.com/");
        assert_eq!(t.state(), TransferState::Unregistered);
        assert_eq!(t.method(), Method::GET);
        assert!(t.response_code().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Transfer::new("http://example.com/a");
        let b = Transfer::new("http://example.com/b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_clones_share_state() {
        let a = Transfer::new("http://example.com/");
        let b = a.clone();
        a.set_method(Method::POST);
        assert_eq!(b.method(), Method::POST);
        assert_eq!(a, b);
    }

    #[test]
    fn test_double_register_fails() {
        let t = Transfer::new("http://example.com/");
        t.mark_registered().unwrap();
        assert!(t.mark_registered().is_err());
    }

    #[test]
    fn test_reregister_resets_response_state() {
        let t = Transfer::new("http://example.com/");
        t.mark_registered().unwrap();
        t.complete_success(200);
        assert_eq!(t.response_code(), Some(200));

        t.mark_registered().unwrap();
        assert!(t.response_code().is_none());
        assert_eq!(t.state(), TransferState::Registered);
    }

    #[test]
    fn test_sink_records_status_and_headers() {
        let t = Transfer::new("http://example.com/");
        let mut sink = TransferSink::new(t.clone());
        sink.on_header_line(b"HTTP/1.1 200 OK\r\n");
        sink.on_header_line(b"Content-Type: text/plain\r\n");
        sink.on_header_line(b"\r\n");
        sink.on_body_chunk(b"hello");

        assert_eq!(t.response_code(), Some(200));
        assert_eq!(
            t.response_headers(),
            vec![("Content-Type".to_owned(), "text/plain".to_owned())]
        );
        assert_eq!(&t.body()[..], b"hello");
    }

    #[test]
    fn test_record_body_off() {
        let t = Transfer::new("http://example.com/");
        t.set_record_body(false);
        let mut sink = TransferSink::new(t.clone());
        sink.on_body_chunk(b"hello");
        assert!(t.body().is_empty());
    }

    #[test]
    fn test_handler_can_use_its_own_handle_clone() {
        struct Probe {
            handle: Transfer,
            seen_code: Option<u16>,
        }
        impl TransferHandler for Probe {
            fn on_success(&mut self, _t: &Transfer) {
                self.seen_code = self.handle.response_code();
            }
        }

        let t = Transfer::new("http://example.com/");
        t.set_handler(Probe {
            handle: t.clone(),
            seen_code: None,
        });
        t.mark_registered().unwrap();
        t.complete_success(200);
        // The handler read the code through its own clone without panicking.
        assert_eq!(t.response_code(), Some(200));
    }

    #[test]
    fn test_short_consumption_reported() {
        struct Aborter;
        impl TransferHandler for Aborter {
            fn on_body(&mut self, chunk: &[u8]) -> usize {
                chunk.len() - 1
            }
        }
        let t = Transfer::new("http://example.com/");
        t.set_handler(Aborter);
        let mut sink = TransferSink::new(t.clone());
        assert_eq!(sink.on_body_chunk(b"hello"), 4);
    }
}
