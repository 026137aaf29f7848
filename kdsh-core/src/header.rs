//! Download header: the frame the server uses to push a file.
//!
//! ## Wire format
//!
//! ```text
//! marker:     b"KD"  (2)
//! name_len:   u32    (4, big-endian)
//! name:       [u8]   (name_len, UTF-8)
//! file_len:   u32    (4, big-endian)
//! data:       [u8]   (whatever follows in the stream, file_len in total)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::KdshError;

/// The two bytes every download header starts with.
pub const DOWNLOAD_MARKER: &[u8; 2] = b"KD";

/// Longest file name accepted in a header.
pub const MAX_NAME_LEN: usize = 4096;

/// Bytes before the name: marker + `name_len`.
const PREFIX_LEN: usize = DOWNLOAD_MARKER.len() + 4;

/// Metadata announcing an incoming file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadHeader {
    /// File name as transmitted by the server.
    pub name: String,
    /// Total number of payload bytes that follow the header.
    pub size: u64,
}

impl DownloadHeader {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Encoded size of the header itself (payload excluded).
    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN + self.name.len() + 4
    }

    /// Serialize the header (without payload).
    pub fn encode(&self) -> Result<Bytes, KdshError> {
        let name_len = u32::try_from(self.name.len()).map_err(|_| KdshError::PayloadTooLarge {
            size: self.name.len() as u64,
            max: u32::MAX as u64,
        })?;
        let size = u32::try_from(self.size).map_err(|_| KdshError::PayloadTooLarge {
            size: self.size,
            max: u32::MAX as u64,
        })?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(DOWNLOAD_MARKER);
        buf.put_u32(name_len);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32(size);
        Ok(buf.freeze())
    }

    /// Try to parse a header from the start of `src`.
    ///
    /// Returns `Ok(None)` while the header is still incomplete, and the
    /// header plus the number of bytes it occupied once it is whole.
    /// Declared lengths are checked before anything is allocated.
    pub fn parse(src: &[u8], max_size: u64) -> Result<Option<(Self, usize)>, KdshError> {
        if !src.starts_with(DOWNLOAD_MARKER) {
            return Err(KdshError::ProtocolDecode(
                "download header must start with KD".into(),
            ));
        }
        if src.len() < PREFIX_LEN {
            return Ok(None);
        }

        let mut cursor = &src[DOWNLOAD_MARKER.len()..];
        let name_len = cursor.get_u32() as usize;
        if name_len > MAX_NAME_LEN {
            return Err(KdshError::ProtocolDecode(format!(
                "file name length {name_len} exceeds {MAX_NAME_LEN}"
            )));
        }
        if cursor.remaining() < name_len + 4 {
            return Ok(None);
        }

        let name = String::from_utf8_lossy(&cursor[..name_len]).into_owned();
        cursor.advance(name_len);
        let size = cursor.get_u32() as u64;
        if size > max_size {
            return Err(KdshError::PayloadTooLarge {
                size,
                max: max_size,
            });
        }

        Ok(Some((Self { name, size }, PREFIX_LEN + name_len + 4)))
    }
}
