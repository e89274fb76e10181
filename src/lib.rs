//! # httpmux
//!
//! A concurrent HTTP transfer engine: many in-flight request/response
//! exchanges multiplexed over a single poll loop on the calling thread,
//! instead of one thread per request.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use httpmux::{Multi, Transfer};
//!
//! let a = Transfer::new("http://example.com/");
//! let b = Transfer::new("http://example.org/");
//!
//! let mut multi = Multi::new()?;
//! multi.add(&a)?;
//! multi.add(&b)?;
//! multi.perform()?;
//!
//! println!("{:?} {:?}", a.response_code(), b.response_code());
//! ```
//!
//! ## Model
//!
//! - A [`Transfer`] is one exchange: URL, method, headers, body, and a
//!   [`TransferHandler`] for streaming callbacks and completion.
//! - A [`Multi`] owns the registry of transfers and the poll loop.
//!   `perform` drains the registry to empty; it is reusable afterwards.
//! - One transfer's failure is isolated: siblings in the same `perform`
//!   call complete normally, and per-transfer errors surface through
//!   `on_failure`, never out of `perform`.
//! - Callbacks run synchronously on the driving thread and must not
//!   block.
//!
//! ## Modules
//!
//! - [`base`] - error taxonomy
//! - [`http`] - headers, request/response wire handling, the exchange
//!   state machine
//! - [`transfer`] - the transfer handle and its callbacks
//! - [`multi`] - the multiplexer and bulk helpers
//!
//! Out of scope by design: TLS, DNS policy, connection pooling, and
//! pipelining. The exchange seam ([`http::Exchange`]) is where richer
//! protocol engines plug in.

pub mod base;
pub mod http;
pub mod multi;
pub mod transfer;

pub use base::{ErrorKind, MultiError, TransferError};
pub use multi::{Multi, PostSpec};
pub use transfer::{Transfer, TransferHandler, TransferState};
