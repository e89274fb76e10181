//! The protocol engine seam and its plain-HTTP/1.1 implementation.
//!
//! The multiplexer core only knows about [`Exchange`]: a socket to watch
//! plus a step function that advances a protocol state machine. Data and
//! terminal events flow back through an [`EventSink`]. [`HttpExchange`]
//! is the built-in engine: non-blocking connect, send request, read
//! response head, read body.

use bytes::BytesMut;
use http::Method;
use mio::net::TcpStream;
use mio::Interest;
use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use url::Url;

use crate::base::TransferError;
use crate::http::headers::HeaderMap;
use crate::http::request::{serialize_head, RequestBody};
use crate::http::response::{body_framing, BodyFraming, ChunkedDecoder, ResponseHead};

const READ_CHUNK: usize = 8 * 1024;
const BODY_STREAM_CHUNK: usize = 8 * 1024;

/// Receives protocol events for one transfer.
///
/// Both callbacks return a consumed count; returning fewer bytes than
/// offered aborts the transfer with a user-abort failure.
pub trait EventSink {
    /// One response header line, CRLF included. The status line and the
    /// blank terminator line are delivered too, matching wire order.
    fn on_header_line(&mut self, line: &[u8]) -> usize;
    /// One response body chunk, as it arrives off the wire. Chunks are
    /// never buffered wholesale before delivery.
    fn on_body_chunk(&mut self, chunk: &[u8]) -> usize;
}

/// Result of advancing an exchange.
#[derive(Debug)]
pub enum StepOutcome {
    /// Waiting for socket readiness; nothing more to do this round.
    Blocked,
    /// Terminal: the exchange finished cleanly with this status code.
    Success(u16),
    /// Terminal: the exchange failed.
    Failure(TransferError),
}

/// One in-flight protocol exchange.
///
/// This is the collaborator boundary: the multiplexer starts an exchange,
/// watches the socket it exposes, and steps it whenever the socket is
/// ready, without knowing anything about HTTP itself.
pub trait Exchange {
    /// Open the socket. Called once before the first poll cycle; an error
    /// here is terminal and the descriptor never joins the interest set.
    fn start(&mut self) -> Result<(), TransferError>;

    /// The socket to watch and the readiness currently needed, or `None`
    /// when there is nothing to poll.
    fn readiness(&mut self) -> Option<(&mut TcpStream, Interest)>;

    /// Advance the state machine as far as the socket allows.
    fn step(&mut self, sink: &mut dyn EventSink) -> StepOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    SendRequest,
    ReadHead,
    ReadBody,
    Done,
}

/// Built-in plain-HTTP/1.1 engine.
///
/// Connections are one-shot (`Connection: close`); pooling and pipelining
/// live above this layer. Host resolution happens synchronously in
/// [`Exchange::start`].
pub struct HttpExchange {
    id: u64,
    raw_url: String,
    method: Method,
    headers: HeaderMap,
    body: RequestBody,
    stream: Option<TcpStream>,
    state: State,
    write_buf: Vec<u8>,
    write_pos: usize,
    body_stream: Option<Box<dyn Read>>,
    read_buf: BytesMut,
    framing: BodyFraming,
    body_remaining: u64,
    chunked: Option<ChunkedDecoder>,
    status: u16,
}

impl HttpExchange {
    pub fn new(id: u64, method: Method, url: String, headers: HeaderMap, body: RequestBody) -> Self {
        Self {
            id,
            raw_url: url,
            method,
            headers,
            body,
            stream: None,
            state: State::Done,
            write_buf: Vec::new(),
            write_pos: 0,
            body_stream: None,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            framing: BodyFraming::Close,
            body_remaining: 0,
            chunked: None,
            status: 0,
        }
    }

    fn finish(&mut self) -> StepOutcome {
        self.state = State::Done;
        self.stream = None;
        if self.status >= 400 {
            StepOutcome::Failure(TransferError::http_status(self.status))
        } else {
            tracing::debug!(id = self.id, status = self.status, "exchange complete");
            StepOutcome::Success(self.status)
        }
    }

    fn fail(&mut self, err: TransferError) -> StepOutcome {
        tracing::debug!(id = self.id, error = %err, "exchange failed");
        self.state = State::Done;
        self.stream = None;
        StepOutcome::Failure(err)
    }

    /// Pull the next piece of a streaming request body into the write
    /// buffer, chunked-framed. Returns false once the terminal chunk has
    /// been queued.
    fn queue_body_chunk(&mut self) -> Result<bool, TransferError> {
        let Some(reader) = self.body_stream.as_mut() else {
            return Ok(false);
        };
        let mut chunk = [0u8; BODY_STREAM_CHUNK];
        let n = reader
            .read(&mut chunk)
            .map_err(|e| TransferError::transport(format!("request body read failed: {e}")))?;
        self.write_buf.clear();
        self.write_pos = 0;
        if n == 0 {
            self.write_buf.extend_from_slice(b"0\r\n\r\n");
            self.body_stream = None;
            Ok(false)
        } else {
            self.write_buf
                .extend_from_slice(format!("{n:x}\r\n").as_bytes());
            self.write_buf.extend_from_slice(&chunk[..n]);
            self.write_buf.extend_from_slice(b"\r\n");
            Ok(true)
        }
    }

    /// Deliver one body chunk, honoring the short-consumption abort.
    fn emit_body(sink: &mut dyn EventSink, chunk: &[u8]) -> Result<(), TransferError> {
        if chunk.is_empty() {
            return Ok(());
        }
        if sink.on_body_chunk(chunk) < chunk.len() {
            return Err(TransferError::aborted());
        }
        Ok(())
    }

    /// Process whatever body bytes are already buffered. Returns true when
    /// the body is complete.
    fn drain_body_buffer(&mut self, sink: &mut dyn EventSink) -> Result<bool, TransferError> {
        match self.framing {
            BodyFraming::None => Ok(true),
            BodyFraming::ContentLength(_) => {
                let take = self.body_remaining.min(self.read_buf.len() as u64) as usize;
                if take > 0 {
                    let chunk = self.read_buf.split_to(take);
                    Self::emit_body(sink, &chunk)?;
                    self.body_remaining -= take as u64;
                }
                Ok(self.body_remaining == 0)
            }
            BodyFraming::Chunked => {
                let Some(decoder) = self.chunked.as_mut() else {
                    return Ok(true);
                };
                let (data, done) = decoder.decode(&mut self.read_buf)?;
                Self::emit_body(sink, &data)?;
                Ok(done)
            }
            BodyFraming::Close => {
                if !self.read_buf.is_empty() {
                    let chunk = self.read_buf.split_to(self.read_buf.len());
                    Self::emit_body(sink, &chunk)?;
                }
                // Only EOF completes a close-delimited body.
                Ok(false)
            }
        }
    }

    fn handle_head(&mut self, sink: &mut dyn EventSink) -> Result<bool, TransferError> {
        let Some((head, consumed)) = ResponseHead::parse(&self.read_buf)? else {
            return Ok(false);
        };

        let raw = self.read_buf.split_to(consumed);
        for line in raw.split_inclusive(|&b| b == b'\n') {
            if sink.on_header_line(line) < line.len() {
                return Err(TransferError::aborted());
            }
        }

        self.status = head.code;
        self.framing = body_framing(&self.method, &head)?;
        tracing::debug!(
            id = self.id,
            status = head.code,
            framing = ?self.framing,
            "response head received"
        );
        match self.framing {
            BodyFraming::ContentLength(len) => self.body_remaining = len,
            BodyFraming::Chunked => self.chunked = Some(ChunkedDecoder::new()),
            BodyFraming::None | BodyFraming::Close => {}
        }
        self.state = State::ReadBody;
        Ok(true)
    }
}

impl Exchange for HttpExchange {
    fn start(&mut self) -> Result<(), TransferError> {
        let url = Url::parse(&self.raw_url)
            .map_err(|e| TransferError::invalid(format!("malformed URL: {e}")))?;
        if url.scheme() != "http" {
            return Err(TransferError::invalid(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| TransferError::invalid("URL has no host"))?
            .to_owned();
        let port = url.port_or_known_default().unwrap_or(80);

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| TransferError::transport(format!("could not resolve {host}: {e}")))?
            .next()
            .ok_or_else(|| TransferError::transport(format!("no addresses for {host}")))?;

        self.write_buf = serialize_head(&self.method, &url, &self.headers, &self.body);
        match std::mem::take(&mut self.body) {
            RequestBody::Empty => {}
            RequestBody::Bytes(b) => self.write_buf.extend_from_slice(&b),
            RequestBody::Stream(reader) => self.body_stream = Some(reader),
        }
        self.write_pos = 0;

        tracing::debug!(id = self.id, %addr, url = %self.raw_url, "starting exchange");
        let stream = TcpStream::connect(addr).map_err(TransferError::from)?;
        self.stream = Some(stream);
        self.state = State::Connecting;
        Ok(())
    }

    fn readiness(&mut self) -> Option<(&mut TcpStream, Interest)> {
        let interest = match self.state {
            State::Connecting | State::SendRequest => Interest::WRITABLE,
            State::ReadHead | State::ReadBody => Interest::READABLE,
            State::Done => return None,
        };
        self.stream.as_mut().map(|s| (s, interest))
    }

    fn step(&mut self, sink: &mut dyn EventSink) -> StepOutcome {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return StepOutcome::Blocked;
            };
            match self.state {
                State::Connecting => {
                    // Non-blocking connect: readiness plus take_error tells
                    // us whether the handshake finished or failed.
                    match stream.take_error() {
                        Ok(Some(e)) | Err(e) => {
                            return self.fail(TransferError::transport(format!(
                                "connect failed: {e}"
                            )));
                        }
                        Ok(None) => {}
                    }
                    match stream.peer_addr() {
                        Ok(_) => {
                            tracing::trace!(id = self.id, "connected");
                            self.state = State::SendRequest;
                        }
                        Err(e)
                            if e.kind() == io::ErrorKind::NotConnected
                                || e.kind() == io::ErrorKind::WouldBlock =>
                        {
                            return StepOutcome::Blocked;
                        }
                        Err(e) => {
                            return self.fail(TransferError::transport(format!(
                                "connect failed: {e}"
                            )));
                        }
                    }
                }
                State::SendRequest => {
                    while self.write_pos < self.write_buf.len() {
                        match stream.write(&self.write_buf[self.write_pos..]) {
                            Ok(n) => self.write_pos += n,
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                return StepOutcome::Blocked;
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                            Err(e) => {
                                return self.fail(TransferError::transport(format!(
                                    "send failed: {e}"
                                )));
                            }
                        }
                    }
                    match self.queue_body_chunk() {
                        Ok(true) => {}
                        Ok(false) => {
                            if self.write_pos >= self.write_buf.len() {
                                tracing::trace!(id = self.id, "request sent");
                                self.state = State::ReadHead;
                            }
                        }
                        Err(e) => return self.fail(e),
                    }
                }
                State::ReadHead | State::ReadBody => {
                    if self.state == State::ReadHead && !self.read_buf.is_empty() {
                        match self.handle_head(sink) {
                            Ok(_) => {}
                            Err(e) => return self.fail(e),
                        }
                    }
                    if self.state == State::ReadBody {
                        match self.drain_body_buffer(sink) {
                            Ok(true) => return self.finish(),
                            Ok(false) => {}
                            Err(e) => return self.fail(e),
                        }
                    }

                    let mut chunk = [0u8; READ_CHUNK];
                    match self.stream.as_mut().map(|s| s.read(&mut chunk)) {
                        Some(Ok(0)) => {
                            let outcome = match (self.state, self.framing) {
                                (State::ReadBody, BodyFraming::Close) => return self.finish(),
                                (State::ReadHead, _) => TransferError::protocol(
                                    "connection closed before response head",
                                ),
                                _ => TransferError::protocol(
                                    "connection closed before end of body",
                                ),
                            };
                            return self.fail(outcome);
                        }
                        Some(Ok(n)) => {
                            self.read_buf.extend_from_slice(&chunk[..n]);
                        }
                        Some(Err(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {
                            return StepOutcome::Blocked;
                        }
                        Some(Err(ref e)) if e.kind() == io::ErrorKind::Interrupted => {}
                        Some(Err(e)) => {
                            return self
                                .fail(TransferError::transport(format!("read failed: {e}")));
                        }
                        None => return StepOutcome::Blocked,
                    }
                }
                State::Done => return StepOutcome::Blocked,
            }
        }
    }
}
