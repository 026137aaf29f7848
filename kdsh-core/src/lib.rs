//! # kdsh-core
//!
//! Client side of the KodData remote shell protocol.
//!
//! This crate contains:
//! - **Packets**: `Frame`, `LoginRequest`, `UploadFile` (outbound wire encoding)
//! - **Header**: `DownloadHeader`, the `KD` file-transfer announcement
//! - **Codec**: `KdshCodec`, demultiplexing the inbound stream into `Inbound` items
//! - **State**: `LoginGate` (pending login) and `TransferSlot` (in-flight download)
//! - **Network**: `Connection`, one TCP session with a sending and a receiving task
//! - **Sink / Storage**: where server text and received files go
//! - **Error**: `KdshError`, a `thiserror`-based error type

pub mod codec;
pub mod error;
pub mod header;
pub mod message;
pub mod network;
pub mod packet;
pub mod sink;
pub mod state;
pub mod storage;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::KdshCodec;
pub use error::KdshError;
pub use header::{DOWNLOAD_MARKER, DownloadHeader, MAX_NAME_LEN};
pub use message::{Inbound, LoginStatus, Opcode};
pub use network::{Connection, ConnectionInfo, ConnectionOptions, ConnectionSender};
pub use packet::{Frame, LoginRequest, UploadFile};
pub use sink::{ChannelSink, MessageSink};
pub use state::{CompletedFile, FileReceiveState, LoginGate, TransferSlot};
pub use storage::{FsStorage, Storage, resolve_target};
