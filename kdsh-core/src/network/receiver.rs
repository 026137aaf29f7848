//! Reader task: socket → codec → login gate / transfer slot / sink.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use crate::codec::KdshCodec;
use crate::error::KdshError;
use crate::message::{Inbound, LoginStatus};
use crate::network::connection::{ConnectionOptions, Shared};
use crate::state::{CompletedFile, TransferSlot};
use crate::storage::{Storage, resolve_target};

pub(crate) struct Receiver<R> {
    frames: FramedRead<R, KdshCodec>,
    slot: TransferSlot,
    shared: Arc<Shared>,
    storage: Arc<dyn Storage>,
    download_dir: PathBuf,
}

impl<R> Receiver<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(
        read_half: R,
        options: &ConnectionOptions,
        shared: Arc<Shared>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let codec = KdshCodec::new(Arc::clone(&shared.login), options.max_download_size);
        Self {
            frames: FramedRead::with_capacity(read_half, codec, options.read_buffer_size),
            slot: TransferSlot::new(),
            shared,
            storage,
            download_dir: options.download_dir.clone(),
        }
    }

    /// Process inbound traffic until end of stream, a read error, or
    /// the connection is closed. Always leaves the connection closed.
    pub(crate) async fn run(mut self) {
        let cancel = self.shared.cancel_token();

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = self.frames.next() => next,
            };

            match next {
                Some(Ok(item)) => self.dispatch(item).await,
                Some(Err(e)) => {
                    if self.shared.is_open() {
                        error!("network read error: {e}");
                        self.shared.sink.deliver(format!("Connection error: {e}"));
                    }
                    break;
                }
                None => {
                    info!("server closed the connection");
                    self.shared.sink.deliver("Connection closed by server.".into());
                    break;
                }
            }
        }

        if let Some(partial) = self.slot.current() {
            warn!(
                name = %partial.name(),
                received = partial.written_bytes(),
                expected = partial.expected_bytes(),
                "discarding incomplete download"
            );
            self.shared.sink.deliver(format!(
                "Download of {} incomplete: {}/{} bytes",
                partial.name(),
                partial.written_bytes(),
                partial.expected_bytes()
            ));
        }
        self.shared.close();
    }

    async fn dispatch(&mut self, item: Inbound) {
        match item {
            Inbound::LoginResponse(status) => {
                if let LoginStatus::Unrecognized(byte) = status {
                    warn!(byte, "unrecognized login status; treating as rejection");
                }
                if self.shared.login.resolve(status.is_success()) {
                    info!(accepted = status.is_success(), "login response");
                } else {
                    debug!("login response arrived with no attempt pending");
                }
            }
            Inbound::DownloadHeader(header) => {
                info!(name = %header.name, size = header.size, "receiving file");
                match self.slot.begin(header) {
                    Ok(Some(file)) => self.persist(file).await,
                    Ok(None) => {}
                    Err(e) => self.report(e),
                }
            }
            Inbound::FileChunk(data) => match self.slot.feed(&data) {
                Ok(fed) => {
                    if fed.overflow > 0 {
                        warn!(bytes = fed.overflow, "dropping bytes past the end of the file");
                    }
                    if let Some(file) = fed.completed {
                        self.persist(file).await;
                    }
                }
                Err(e) => self.report(e),
            },
            Inbound::Text(text) => self.shared.sink.deliver(text),
            Inbound::Malformed(reason) => {
                self.shared.sink.deliver(format!("Dropped malformed frame: {reason}"));
            }
        }
    }

    fn report(&self, e: KdshError) {
        warn!("{e}");
        self.shared.sink.deliver(format!("Protocol error: {e}"));
    }

    /// Write a finished download. Failures are reported, never fatal.
    async fn persist(&self, file: CompletedFile) {
        match self.write(&file).await {
            Ok(path) => {
                info!(
                    name = %file.name,
                    path = %path.display(),
                    bytes = file.contents.len(),
                    "file saved"
                );
                self.shared.sink.deliver(format!("File saved: {}", file.name));
            }
            Err(e) => {
                error!(name = %file.name, "{e}");
                self.shared
                    .sink
                    .deliver(format!("Failed to save {}: {e}", file.name));
            }
        }
    }

    async fn write(&self, file: &CompletedFile) -> Result<PathBuf, KdshError> {
        let path = resolve_target(&self.download_dir, &file.name)?;
        if let Err(source) = self.storage.write_file(&path, &file.contents).await {
            return Err(KdshError::Persist { path, source });
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;

    use crate::header::DownloadHeader;
    use crate::sink::ChannelSink;
    use crate::state::LoginGate;

    #[derive(Default)]
    struct MemoryStorage {
        files: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    }

    #[async_trait]
    impl Storage for MemoryStorage {
        async fn write_file(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
            self.files
                .lock()
                .unwrap()
                .push((path.to_path_buf(), contents.to_vec()));
            Ok(())
        }
    }

    fn shared(sink: ChannelSink) -> Arc<Shared> {
        Arc::new(Shared::new("test-peer".into(), Arc::new(LoginGate::new()), Arc::new(sink)))
    }

    #[tokio::test]
    async fn duplex_download_and_text() {
        let (mut server, client) = tokio::io::duplex(64);
        let (sink, mut messages) = ChannelSink::new();
        let shared = shared(sink);
        let storage = Arc::new(MemoryStorage::default());
        let options = ConnectionOptions {
            download_dir: PathBuf::from("dl"),
            ..Default::default()
        };

        let receiver = Receiver::new(client, &options, Arc::clone(&shared), storage.clone());
        let task = tokio::spawn(receiver.run());

        server
            .write_all(&DownloadHeader::new("a.txt", 3).encode().unwrap())
            .await
            .unwrap();
        server.write_all(b"ABC").await.unwrap();

        let saved = tokio::time::timeout(Duration::from_secs(5), messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved, "File saved: a.txt");

        server.write_all(b"bye").await.unwrap();
        let text = tokio::time::timeout(Duration::from_secs(5), messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "bye");

        drop(server);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!shared.is_open());

        let files = storage.files.lock().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, Path::new("dl").join("a.txt"));
        assert_eq!(files[0].1, b"ABC");
    }

    #[tokio::test]
    async fn end_of_stream_mid_download_is_reported() {
        let (mut server, client) = tokio::io::duplex(64);
        let (sink, mut messages) = ChannelSink::new();
        let shared = shared(sink);
        let storage = Arc::new(MemoryStorage::default());

        let receiver = Receiver::new(
            client,
            &ConnectionOptions::default(),
            Arc::clone(&shared),
            storage.clone(),
        );
        let task = tokio::spawn(receiver.run());

        let mut bytes = DownloadHeader::new("a.txt", 5).encode().unwrap().to_vec();
        bytes.extend_from_slice(b"ab");
        server.write_all(&bytes).await.unwrap();
        drop(server);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(messages.recv().await.unwrap(), "Connection closed by server.");
        assert_eq!(
            messages.recv().await.unwrap(),
            "Download of a.txt incomplete: 2/5 bytes"
        );
        assert!(storage.files.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn end_of_stream_fails_pending_login() {
        let (server, client) = tokio::io::duplex(64);
        let (sink, _messages) = ChannelSink::new();
        let shared = shared(sink);
        let reply = shared.login.begin(0).unwrap();

        let receiver = Receiver::new(
            client,
            &ConnectionOptions::default(),
            Arc::clone(&shared),
            Arc::new(MemoryStorage::default()),
        );
        let task = tokio::spawn(receiver.run());
        drop(server);

        assert!(!reply.await.unwrap());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn close_stops_an_idle_reader() {
        let (_server, client) = tokio::io::duplex(64);
        let (sink, _messages) = ChannelSink::new();
        let shared = shared(sink);
        let token: CancellationToken = shared.cancel_token();

        let receiver = Receiver::new(
            client,
            &ConnectionOptions::default(),
            Arc::clone(&shared),
            Arc::new(MemoryStorage::default()),
        );
        let task = tokio::spawn(receiver.run());

        shared.close();
        assert!(token.is_cancelled());
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
