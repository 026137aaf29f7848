//! The single in-flight download.
//!
//! Owned by the receiving task; no locking. The slot is either empty
//! (idle) or holds one [`FileReceiveState`] whose buffer never grows
//! past the size announced in the header.

use bytes::Bytes;

use crate::error::KdshError;
use crate::header::DownloadHeader;

/// Metadata and assembly buffer of a file being pushed by the server.
#[derive(Debug)]
pub struct FileReceiveState {
    name: String,
    expected_bytes: u64,
    buffer: Vec<u8>,
}

impl FileReceiveState {
    pub fn new(header: DownloadHeader) -> Self {
        // `size` was checked against the download limit by the codec.
        let capacity = usize::try_from(header.size).unwrap_or(0);
        Self {
            name: header.name,
            expected_bytes: header.size,
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expected_bytes(&self) -> u64 {
        self.expected_bytes
    }

    pub fn written_bytes(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn remaining(&self) -> u64 {
        self.expected_bytes - self.written_bytes()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Append as much of `data` as the file still needs.
    ///
    /// Returns the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let take = usize::try_from(self.remaining()).map_or(data.len(), |r| r.min(data.len()));
        self.buffer.extend_from_slice(&data[..take]);
        take
    }

    fn finish(self) -> CompletedFile {
        CompletedFile {
            name: self.name,
            contents: Bytes::from(self.buffer),
        }
    }
}

/// A fully assembled download, ready to be written to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub name: String,
    pub contents: Bytes,
}

/// Holds at most one [`FileReceiveState`].
#[derive(Debug, Default)]
pub struct TransferSlot {
    current: Option<FileReceiveState>,
}

impl TransferSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn current(&self) -> Option<&FileReceiveState> {
        self.current.as_ref()
    }

    /// Open the slot for a new download.
    ///
    /// A second header while one is in flight is rejected and the
    /// in-flight buffer is left untouched. A zero-length file completes
    /// immediately.
    pub fn begin(&mut self, header: DownloadHeader) -> Result<Option<CompletedFile>, KdshError> {
        if let Some(active) = &self.current {
            return Err(KdshError::TransferInProgress(format!(
                "{} at {}/{} bytes, refused {}",
                active.name,
                active.written_bytes(),
                active.expected_bytes,
                header.name
            )));
        }
        self.current = Some(FileReceiveState::new(header));
        Ok(self.take_if_complete())
    }

    /// Feed payload bytes into the open download.
    ///
    /// Returns the finished file once the last byte arrives; the slot is
    /// empty again at that point. Bytes beyond the announced size are
    /// not stored and are reported in `overflow`.
    pub fn feed(&mut self, data: &[u8]) -> Result<Fed, KdshError> {
        let Some(active) = self.current.as_mut() else {
            return Err(KdshError::ProtocolDecode(format!(
                "{} bytes of file data with no download in progress",
                data.len()
            )));
        };
        let taken = active.append(data);
        Ok(Fed {
            completed: self.take_if_complete(),
            overflow: data.len() - taken,
        })
    }

    fn take_if_complete(&mut self) -> Option<CompletedFile> {
        if self.current.as_ref().is_some_and(FileReceiveState::is_complete) {
            self.current.take().map(FileReceiveState::finish)
        } else {
            None
        }
    }
}

/// Outcome of [`TransferSlot::feed`].
#[derive(Debug, Default)]
pub struct Fed {
    pub completed: Option<CompletedFile>,
    pub overflow: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_across_feeds() {
        let mut slot = TransferSlot::new();
        assert!(slot.begin(DownloadHeader::new("a.txt", 3)).unwrap().is_none());
        assert!(!slot.is_idle());

        let fed = slot.feed(b"A").unwrap();
        assert!(fed.completed.is_none());
        assert_eq!(slot.current().unwrap().written_bytes(), 1);

        let fed = slot.feed(b"BC").unwrap();
        let file = fed.completed.unwrap();
        assert_eq!(file.name, "a.txt");
        assert_eq!(&file.contents[..], b"ABC");
        assert!(slot.is_idle());
    }

    #[test]
    fn zero_length_completes_on_begin() {
        let mut slot = TransferSlot::new();
        let file = slot.begin(DownloadHeader::new("empty", 0)).unwrap().unwrap();
        assert!(file.contents.is_empty());
        assert!(slot.is_idle());
    }

    #[test]
    fn never_writes_past_expected() {
        let mut slot = TransferSlot::new();
        slot.begin(DownloadHeader::new("b", 4)).unwrap();
        let fed = slot.feed(b"123456").unwrap();
        assert_eq!(fed.overflow, 2);
        assert_eq!(&fed.completed.unwrap().contents[..], b"1234");
    }

    #[test]
    fn second_header_is_rejected_without_touching_buffer() {
        let mut slot = TransferSlot::new();
        slot.begin(DownloadHeader::new("first", 4)).unwrap();
        slot.feed(b"ab").unwrap();

        let err = slot.begin(DownloadHeader::new("second", 2)).unwrap_err();
        assert!(matches!(err, KdshError::TransferInProgress(_)));

        let current = slot.current().unwrap();
        assert_eq!(current.name(), "first");
        assert_eq!(current.written_bytes(), 2);
        assert!(current.written_bytes() <= current.expected_bytes());

        let file = slot.feed(b"cd").unwrap().completed.unwrap();
        assert_eq!(&file.contents[..], b"abcd");
    }

    #[test]
    fn feed_without_download_is_an_error() {
        let mut slot = TransferSlot::new();
        assert!(slot.feed(b"x").is_err());
    }
}
