//! Domain-specific error types for the kdsh protocol engine.
//!
//! All fallible operations return `Result<T, KdshError>`.
//! Errors raised inside the background tasks never reach the caller
//! directly: they close the connection and are reported to the sink.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the kdsh client.
#[derive(Debug, Error)]
pub enum KdshError {
    // ── Connection Errors ────────────────────────────────────────
    /// The socket could not be established (DNS, refused, timeout).
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP/IO layer reported an error after the connection was up.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection has been closed; no further traffic is possible.
    #[error("connection closed")]
    ConnectionClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Protocol Errors ──────────────────────────────────────────
    /// Inbound bytes could not be decoded as the frame they claim to be.
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A field does not fit its `u32` length prefix or a configured limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    // ── Transfer Errors ──────────────────────────────────────────
    /// A download header arrived while another download is in flight.
    #[error("a file transfer is already in progress ({0})")]
    TransferInProgress(String),

    /// The transmitted file name has no usable path component.
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    /// A received file could not be written to storage.
    #[error("failed to write {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Login Errors ─────────────────────────────────────────────
    /// A login attempt is already waiting for its response.
    #[error("a login attempt is already in progress")]
    LoginAlreadyInProgress,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for KdshError {
    fn from(s: String) -> Self {
        KdshError::Other(s)
    }
}

impl From<&str> for KdshError {
    fn from(s: &str) -> Self {
        KdshError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for KdshError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        KdshError::ConnectionClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = KdshError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = KdshError::Persist {
            path: PathBuf::from("downloads/a.txt"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.to_string().contains("a.txt"));
        assert!(e.to_string().contains("denied"));
    }

    #[test]
    fn connect_error_names_peer() {
        let e = KdshError::Connect {
            addr: "example.invalid:9000".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(e.to_string().contains("example.invalid:9000"));
    }

    #[test]
    fn from_string() {
        let e: KdshError = "something broke".into();
        assert!(matches!(e, KdshError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: KdshError = io_err.into();
        assert!(matches!(e, KdshError::Io(_)));
    }
}
