//! Response head parsing and body framing.
//!
//! The head is parsed with `httparse`; the framing rules below decide how
//! the body that follows it is delimited.

use bytes::{Bytes, BytesMut};
use http::Method;

use crate::base::TransferError;

/// Cap on the response head; anything larger is treated as malformed.
const MAX_HEAD_BYTES: usize = 64 * 1024;

const MAX_HEADERS: usize = 100;

/// A parsed response status line and header set.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Try to parse a response head from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, or the head plus the
    /// number of bytes it occupied.
    pub fn parse(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, TransferError> {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut storage);

        match parsed.parse(buf) {
            Ok(httparse::Status::Complete(len)) => {
                let code = parsed
                    .code
                    .ok_or_else(|| TransferError::protocol("response missing status code"))?;
                let reason = parsed.reason.unwrap_or_default().to_owned();
                let headers = parsed
                    .headers
                    .iter()
                    .map(|h| {
                        let value = String::from_utf8_lossy(h.value).into_owned();
                        (h.name.to_owned(), value)
                    })
                    .collect();
                Ok(Some((
                    ResponseHead {
                        code,
                        reason,
                        headers,
                    },
                    len,
                )))
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(TransferError::protocol("response head too large"));
                }
                Ok(None)
            }
            Err(e) => Err(TransferError::protocol(format!(
                "malformed response head: {e}"
            ))),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// How the response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows (HEAD, 1xx, 204, 304).
    None,
    /// Exactly this many bytes follow.
    ContentLength(u64),
    /// Chunked transfer encoding.
    Chunked,
    /// Body runs until the peer closes the connection.
    Close,
}

/// Decide body framing from the request method and response head,
/// per RFC 9112 §6.3.
pub fn body_framing(method: &Method, head: &ResponseHead) -> Result<BodyFraming, TransferError> {
    if method == Method::HEAD
        || (100..200).contains(&head.code)
        || head.code == 204
        || head.code == 304
    {
        return Ok(BodyFraming::None);
    }

    if let Some(te) = head.header("Transfer-Encoding") {
        if te
            .split(',')
            .any(|tok| tok.trim().eq_ignore_ascii_case("chunked"))
        {
            return Ok(BodyFraming::Chunked);
        }
    }

    if let Some(cl) = head.header("Content-Length") {
        let len: u64 = cl
            .trim()
            .parse()
            .map_err(|_| TransferError::protocol("invalid Content-Length"))?;
        return Ok(BodyFraming::ContentLength(len));
    }

    Ok(BodyFraming::Close)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data,
    DataCrlf,
    Trailer,
    Done,
}

/// Incremental decoder for chunked transfer encoding.
///
/// Feed it raw bytes as they arrive; it consumes what it can and leaves
/// incomplete size lines in place for the next call.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
    remaining: u64,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
            remaining: 0,
        }
    }

    /// Decode as much of `input` as possible, returning the decoded bytes
    /// and whether the terminating chunk has been seen.
    pub fn decode(&mut self, input: &mut BytesMut) -> Result<(Bytes, bool), TransferError> {
        let mut out = BytesMut::new();

        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(input) else {
                        if input.len() > MAX_HEAD_BYTES {
                            return Err(TransferError::protocol("chunk size line too long"));
                        }
                        break;
                    };
                    let line = input.split_to(line_end + 2);
                    let size_text = &line[..line_end];
                    // Extensions after ';' are ignored.
                    let hex = size_text
                        .split(|&b| b == b';')
                        .next()
                        .unwrap_or_default();
                    let hex = std::str::from_utf8(hex)
                        .map_err(|_| TransferError::protocol("invalid chunk size"))?;
                    let size = u64::from_str_radix(hex.trim(), 16)
                        .map_err(|_| TransferError::protocol("invalid chunk size"))?;
                    if size == 0 {
                        self.state = ChunkState::Trailer;
                    } else {
                        self.remaining = size;
                        self.state = ChunkState::Data;
                    }
                }
                ChunkState::Data => {
                    if input.is_empty() {
                        break;
                    }
                    let take = self.remaining.min(input.len() as u64) as usize;
                    out.extend_from_slice(&input.split_to(take));
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.state = ChunkState::DataCrlf;
                    }
                }
                ChunkState::DataCrlf => {
                    if input.len() < 2 {
                        break;
                    }
                    let crlf = input.split_to(2);
                    if &crlf[..] != b"\r\n" {
                        return Err(TransferError::protocol("missing CRLF after chunk data"));
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let Some(line_end) = find_crlf(input) else {
                        break;
                    };
                    let line = input.split_to(line_end + 2);
                    if line_end == 0 {
                        self.state = ChunkState::Done;
                    } else {
                        tracing::trace!(len = line.len(), "ignoring chunked trailer line");
                    }
                }
                ChunkState::Done => break,
            }
        }

        Ok((out.freeze(), self.state == ChunkState::Done))
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
