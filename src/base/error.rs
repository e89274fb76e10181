use thiserror::Error;

/// Classification of a failed transfer.
///
/// Every failure delivered through `on_failure` carries one of these kinds
/// next to a human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The target was malformed before a socket was ever opened
    /// (unparseable URL, missing host, unsupported scheme).
    InvalidConfiguration,
    /// Socket-level failure: resolve error, connection refused/reset,
    /// I/O error mid-exchange.
    Transport,
    /// The peer spoke, but the response framing was malformed or the
    /// body was truncated.
    Protocol,
    /// A header or body callback consumed fewer bytes than it was
    /// offered, signalling abort.
    UserAborted,
    /// The exchange completed but the response status was >= 400.
    HttpStatus,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfiguration => "invalid configuration",
            ErrorKind::Transport => "transport error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::UserAborted => "aborted by user callback",
            ErrorKind::HttpStatus => "http error status",
        }
    }
}

/// A structured (kind, message) pair describing why a transfer failed.
///
/// One transfer's error never affects its siblings and never escapes
/// [`Multi::perform`](crate::multi::Multi::perform); it only reaches the
/// caller through that transfer's `on_failure`.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct TransferError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfiguration, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::UserAborted, "callback signalled abort")
    }

    pub fn http_status(code: u16) -> Self {
        Self::new(ErrorKind::HttpStatus, format!("server returned {code}"))
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

/// Errors raised by the multiplexer itself, as opposed to errors of an
/// individual transfer.
#[derive(Debug, Error)]
pub enum MultiError {
    /// The transfer is already registered with a multiplexer. This is a
    /// usage bug, not a network condition, so it surfaces from `add`
    /// rather than through `on_failure`.
    #[error("transfer is already registered with a multiplexer")]
    AlreadyRegistered,
    /// The poll context could not be created or operated. Fatal to the
    /// current `perform` call.
    #[error("poll context failure: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_kind_and_message() {
        let err = TransferError::transport("connection refused");
        assert_eq!(err.to_string(), "transport error: connection refused");
        assert_eq!(err.kind, ErrorKind::Transport);
    }

    #[test]
    fn test_http_status_error() {
        let err = TransferError::http_status(404);
        assert_eq!(err.kind, ErrorKind::HttpStatus);
        assert!(err.message.contains("404"));
    }

    #[test]
    fn test_from_io_error_is_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: TransferError = io.into();
        assert_eq!(err.kind, ErrorKind::Transport);
    }
}
