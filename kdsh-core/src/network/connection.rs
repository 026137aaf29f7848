use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::error::KdshError;
use crate::network::receiver::Receiver;
use crate::packet::{Frame, LoginRequest, UploadFile};
use crate::sink::MessageSink;
use crate::state::LoginGate;
use crate::storage::Storage;

/// Tunables for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Upper bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a login verdict; `None` waits forever.
    pub login_timeout: Option<Duration>,
    /// Capacity of the socket read buffer.
    pub read_buffer_size: usize,
    /// Directory received files are written into.
    pub download_dir: PathBuf,
    /// Largest file a download header may announce.
    pub max_download_size: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            login_timeout: Some(Duration::from_secs(30)),
            read_buffer_size: 64 * 1024,
            download_dir: PathBuf::from("."),
            max_download_size: 256 * 1024 * 1024,
        }
    }
}

/// State shared by the connection handle and its two tasks.
pub(crate) struct Shared {
    peer: String,
    running: AtomicBool,
    cancel: CancellationToken,
    pub(crate) login: Arc<LoginGate>,
    pub(crate) sink: Arc<dyn MessageSink>,
}

impl Shared {
    pub(crate) fn new(peer: String, login: Arc<LoginGate>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            peer,
            running: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            login,
            sink,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop both tasks and fail a pending login. Only the first call
    /// does anything.
    pub(crate) fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(peer = %self.peer, "closing connection");
        self.cancel.cancel();
        self.login.close();
    }
}

/// A kdsh connection to a single server
pub struct Connection {
    info: ConnectionInfo,
    options: ConnectionOptions,
    sender: ConnectionSender,
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Connect to `info` and start the sending and receiving tasks.
    pub async fn open(
        info: ConnectionInfo,
        options: ConnectionOptions,
        sink: Arc<dyn MessageSink>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, KdshError> {
        let addr = info.to_string();
        let stream = match tokio::time::timeout(options.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(KdshError::Connect { addr, source }),
            Err(_) => {
                return Err(KdshError::Connect {
                    addr,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no answer within {:?}", options.connect_timeout),
                    ),
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle: {e}");
        }
        info!(peer = %addr, "connected");
        Ok(Self::new(stream, info, options, sink, storage))
    }

    /// Wrap an already connected stream.
    pub fn new(
        stream: TcpStream,
        info: ConnectionInfo,
        options: ConnectionOptions,
        sink: Arc<dyn MessageSink>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared::new(
            info.to_string(),
            Arc::new(LoginGate::new()),
            sink,
        ));

        // User -> Network
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(send_loop(write_half, rx, Arc::clone(&shared)));

        // Network -> User
        let receiver = Receiver::new(read_half, &options, Arc::clone(&shared), storage);
        let reader = tokio::spawn(receiver.run());

        Self {
            info,
            options,
            sender: ConnectionSender {
                tx,
                shared: Arc::clone(&shared),
            },
            shared,
            tasks: vec![writer, reader],
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    pub fn login_gate(&self) -> &LoginGate {
        &self.shared.login
    }

    /// A cloneable handle for queueing bytes from other tasks.
    pub fn sender(&self) -> ConnectionSender {
        self.sender.clone()
    }

    /// Queue already-encoded bytes. Never blocks; a no-op once closed.
    pub fn enqueue_send(&self, bytes: impl Into<Bytes>) {
        self.sender.enqueue_send(bytes);
    }

    pub fn send_frame(&self, frame: &Frame) -> Result<(), KdshError> {
        self.enqueue_send(frame.to_bytes()?);
        Ok(())
    }

    pub fn send_command(&self, text: &str) -> Result<(), KdshError> {
        self.send_frame(&Frame::command(text))
    }

    pub fn send_script(&self, contents: impl Into<Bytes>) -> Result<(), KdshError> {
        self.send_frame(&Frame::script(contents))
    }

    /// Read a local file and queue it as an upload.
    ///
    /// The file's last path component is the name the server sees;
    /// that name is returned.
    pub async fn send_upload_file(&self, path: &Path) -> Result<String, KdshError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| KdshError::InvalidFileName(path.display().to_string()))?;
        let contents = tokio::fs::read(path).await?;
        debug!(file = %name, bytes = contents.len(), "queueing upload");
        self.send_frame(&Frame::UploadFile(UploadFile::new(name.clone(), contents)))?;
        Ok(name)
    }

    /// Send a login request and wait for the server's verdict.
    ///
    /// Resolves to `false` if the server rejects the login or the
    /// connection closes first.
    pub async fn login(&self, request: &LoginRequest) -> Result<bool, KdshError> {
        let frame = Frame::Login(request.clone()).to_bytes()?;
        let reply = self.shared.login.begin(request.session_id)?;
        debug!(user = %request.username, session_id = request.session_id, "sending login");
        self.enqueue_send(frame);

        let verdict = match self.options.login_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(verdict) => verdict,
                Err(_) => {
                    self.shared.login.abandon();
                    return Err(KdshError::Timeout(limit));
                }
            },
            None => reply.await,
        };
        // A dropped reply channel means the gate went away with the connection.
        Ok(verdict.unwrap_or(false))
    }

    /// Close the socket and stop both tasks. Safe to call repeatedly and
    /// from any task.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Resolves once the connection has been closed by either side.
    pub async fn closed(&self) {
        self.shared.cancel_token().cancelled().await;
    }

    /// Close and wait for both tasks to finish.
    pub async fn shutdown(mut self) {
        self.close();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!("connection task failed: {e}");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Writer task: drain the queue into the socket, in order.
async fn send_loop<W>(write_half: W, mut queue: mpsc::UnboundedReceiver<Bytes>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    let cancel = shared.cancel_token();
    let mut net_writer = FramedWrite::new(write_half, BytesCodec::new());

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let len = frame.len();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = net_writer.send(frame) => result,
        };
        match result {
            Ok(()) => trace!(bytes = len, "frame written"),
            Err(e) => {
                if shared.is_open() {
                    error!("network write error: {e}");
                    shared.sink.deliver(format!("Connection error: {e}"));
                }
                break;
            }
        }
    }

    shared.close();
}

/// Queue handle that can be cloned into other tasks.
#[derive(Clone)]
pub struct ConnectionSender {
    tx: mpsc::UnboundedSender<Bytes>,
    shared: Arc<Shared>,
}

impl ConnectionSender {
    pub fn enqueue_send(&self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if !self.shared.is_open() || self.tx.send(bytes).is_err() {
            trace!("connection closed; dropping outbound bytes");
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }
}

impl fmt::Debug for ConnectionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSender")
            .field("open", &self.is_open())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
