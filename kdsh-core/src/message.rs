//! Protocol message kinds.
//!
//! Plain enums with `TryFrom`, so unknown values are errors, not panics.

use bytes::Bytes;
use std::fmt;

use crate::error::KdshError;
use crate::header::DownloadHeader;

// ── Opcode ───────────────────────────────────────────────────────

/// Leading byte of every frame sent from client to server.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// A text command or the raw bytes of a script.
    Command = 0,
    /// A local file pushed to the server.
    UploadFile = 1,
    /// Login request ("mode 2").
    Login = 2,
}

impl TryFrom<u8> for Opcode {
    type Error = KdshError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Command),
            1 => Ok(Opcode::UploadFile),
            2 => Ok(Opcode::Login),
            _ => Err(KdshError::UnknownVariant {
                type_name: "Opcode",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── LoginStatus ──────────────────────────────────────────────────

/// The server's verdict on a login request, carried in the first byte
/// of the first read after the request was sent.
///
/// `1` accepts the session and `2` rejects it. Any other byte is kept
/// as [`LoginStatus::Unrecognized`] and counts as a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    Accepted,
    Rejected,
    Unrecognized(u8),
}

impl LoginStatus {
    pub const ACCEPTED: u8 = 1;
    pub const REJECTED: u8 = 2;

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::ACCEPTED => Self::Accepted,
            Self::REJECTED => Self::Rejected,
            other => Self::Unrecognized(other),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

// ── Inbound ──────────────────────────────────────────────────────

/// A decoded unit of server traffic.
///
/// The codec produces exactly one of these per decoding step; the
/// receiver dispatches on the tag and never inspects raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to the pending login request.
    LoginResponse(LoginStatus),
    /// Start of a pushed file.
    DownloadHeader(DownloadHeader),
    /// A piece of the file announced by the last header.
    FileChunk(Bytes),
    /// Plain text to show the user.
    Text(String),
    /// Bytes that were dropped because they could not be decoded.
    Malformed(String),
}
