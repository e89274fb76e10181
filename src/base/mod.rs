//! Base types and error handling.
//!
//! Provides the error taxonomy shared by the whole engine:
//! - [`TransferError`]: per-transfer failure, a structured (kind, message) pair
//! - [`MultiError`]: failures of the multiplexing mechanism itself

pub mod error;

pub use error::{ErrorKind, MultiError, TransferError};
