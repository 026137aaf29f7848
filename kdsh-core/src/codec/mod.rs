//! Inbound demultiplexer.
//!
//! The server's stream has no common envelope: what a run of bytes means
//! depends on what the client is currently waiting for. [`KdshCodec`]
//! keeps that context and turns the read buffer into [`Inbound`] items,
//! one decoding path per step:
//!
//! 1. bytes still owed to an announced file → [`Inbound::FileChunk`]
//! 2. a character cut by the previous read → [`Inbound::Text`], completed
//!    by continuation bytes or flushed lossily
//! 3. a login is pending → [`Inbound::LoginResponse`] (rest of the read discarded)
//! 4. the status byte of a timed-out login → dropped with the rest of the read
//! 5. buffer starts with `KD` → [`Inbound::DownloadHeader`]
//! 6. anything else → [`Inbound::Text`] (the whole buffer)

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::error::KdshError;
use crate::header::{DOWNLOAD_MARKER, DownloadHeader};
use crate::message::{Inbound, LoginStatus};
use crate::state::LoginGate;

pub struct KdshCodec {
    login: Arc<LoginGate>,
    /// Payload bytes still owed to the file announced by the last header.
    payload_remaining: u64,
    max_download_size: u64,
    /// Start of a character cut off by the previous read. At most three
    /// bytes; kept out of the read buffer so it can only ever complete
    /// that character.
    held: Vec<u8>,
}

impl KdshCodec {
    pub fn new(login: Arc<LoginGate>, max_download_size: u64) -> Self {
        Self {
            login,
            payload_remaining: 0,
            max_download_size,
            held: Vec::new(),
        }
    }

    /// Whether the codec is in the middle of a file payload.
    pub fn is_receiving(&self) -> bool {
        self.payload_remaining > 0
    }

    /// Decode `src` as text, moving an incomplete trailing character
    /// into `held`.
    fn decode_text(&mut self, src: &mut BytesMut) -> Option<String> {
        let complete = match std::str::from_utf8(&src[..]) {
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            _ => src.len(),
        };
        let text = src.split_to(complete);
        self.held.extend_from_slice(&src.split());
        (!text.is_empty()).then(|| String::from_utf8_lossy(&text).into_owned())
    }

    /// Try to finish the held character with the continuation bytes at
    /// the front of `src`.
    ///
    /// Returns `None` while `src` ran out before the character did. The
    /// held bytes are flushed as lossy text as soon as a byte shows up
    /// that cannot continue them, leaving that byte to the normal
    /// dispatch.
    fn finish_held(&mut self, src: &mut BytesMut) -> Option<String> {
        let width = match self.held[0] {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            _ => 4,
        };
        while self.held.len() < width && src.first().is_some_and(|b| (0x80..=0xBF).contains(b)) {
            self.held.push(src.get_u8());
        }
        if self.held.len() < width && src.is_empty() {
            return None;
        }
        let held = std::mem::take(&mut self.held);
        Some(String::from_utf8_lossy(&held).into_owned())
    }
}

impl std::fmt::Debug for KdshCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KdshCodec")
            .field("payload_remaining", &self.payload_remaining)
            .field("max_download_size", &self.max_download_size)
            .finish()
    }
}

impl tokio_util::codec::Decoder for KdshCodec {
    type Item = Inbound;
    type Error = KdshError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if self.payload_remaining > 0 {
            let take = usize::try_from(self.payload_remaining)
                .map_or(src.len(), |remaining| remaining.min(src.len()));
            self.payload_remaining -= take as u64;
            return Ok(Some(Inbound::FileChunk(src.split_to(take).freeze())));
        }

        if !self.held.is_empty() {
            let Some(mut text) = self.finish_held(src) else {
                return Ok(None);
            };
            // Plain text right behind the character joins it.
            if !src.is_empty() && !self.login.is_pending() && !src.starts_with(DOWNLOAD_MARKER) {
                if let Some(rest) = self.decode_text(src) {
                    text.push_str(&rest);
                }
            }
            return Ok(Some(Inbound::Text(text)));
        }

        if self.login.is_pending() {
            let status = src.get_u8();
            if !src.is_empty() {
                debug!("ignoring {} bytes after login status", src.len());
                src.clear();
            }
            return Ok(Some(Inbound::LoginResponse(LoginStatus::from_byte(status))));
        }

        if self.login.take_late_reply()
            && matches!(src[0], LoginStatus::ACCEPTED | LoginStatus::REJECTED)
        {
            debug!(status = src[0], "discarding login reply that arrived after the timeout");
            src.clear();
            return Ok(None);
        }

        if src.starts_with(DOWNLOAD_MARKER) {
            return match DownloadHeader::parse(&src[..], self.max_download_size) {
                Ok(Some((header, used))) => {
                    src.advance(used);
                    self.payload_remaining = header.size;
                    Ok(Some(Inbound::DownloadHeader(header)))
                }
                Ok(None) => Ok(None),
                Err(e) => {
                    warn!("dropping {} bytes: {e}", src.len());
                    src.clear();
                    Ok(Some(Inbound::Malformed(e.to_string())))
                }
            };
        }

        Ok(self.decode_text(src).map(Inbound::Text))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if src.is_empty() {
            if self.held.is_empty() {
                return Ok(None);
            }
            let held = std::mem::take(&mut self.held);
            return Ok(Some(Inbound::Text(String::from_utf8_lossy(&held).into_owned())));
        }

        let rest = src.split();
        if rest.starts_with(DOWNLOAD_MARKER) {
            return Ok(Some(Inbound::Malformed(format!(
                "stream ended inside a download header ({} bytes)",
                rest.len()
            ))));
        }
        Ok(Some(Inbound::Text(String::from_utf8_lossy(&rest).into_owned())))
    }
}
