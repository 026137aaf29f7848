//! Line-oriented read loop.
//!
//! Lines are collected until one contains `;`; the collected text is one
//! statement. `upload <path>;` and `consult <path>;` (any case) act on a
//! local file, everything else goes to the server verbatim.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kdsh_core::{Connection, KdshError, MessageSink};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::TerminalConfig;

/// What a finished statement asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Send a local file to the server.
    Upload(PathBuf),
    /// Run a local script file on the server.
    Consult(PathBuf),
    /// Send the text as typed, newlines included.
    Command(String),
}

impl Statement {
    pub fn parse(text: &str) -> Self {
        if let Some(path) = keyword_argument(text, "upload") {
            return Statement::Upload(path);
        }
        if let Some(path) = keyword_argument(text, "consult") {
            return Statement::Consult(path);
        }
        Statement::Command(text.to_string())
    }
}

/// `text` minus a leading `keyword` (case-insensitive, followed by
/// whitespace) and the terminating `;`.
fn keyword_argument(text: &str, keyword: &str) -> Option<PathBuf> {
    let text = text.trim_start();
    let head = text.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &text[keyword.len()..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let arg = rest.trim().trim_end_matches(';').trim_end();
    (!arg.is_empty()).then(|| PathBuf::from(arg))
}

/// Collects lines until a statement is complete.
#[derive(Debug, Default)]
pub struct StatementBuffer {
    text: String,
}

impl StatementBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Append `line` and return the whole statement if `line` ends it.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        self.text.push_str(line);
        self.text.push('\n');
        line.contains(';').then(|| std::mem::take(&mut self.text))
    }
}

pub struct Repl<'a> {
    conn: &'a Connection,
    sink: Arc<dyn MessageSink>,
    terminal: TerminalConfig,
    buffer: StatementBuffer,
}

impl<'a> Repl<'a> {
    /// Status lines go to `sink` so they interleave with server output
    /// in arrival order.
    pub fn new(conn: &'a Connection, sink: Arc<dyn MessageSink>, terminal: TerminalConfig) -> Self {
        Self {
            conn,
            sink,
            terminal,
            buffer: StatementBuffer::new(),
        }
    }

    /// Read statements from `input` until `exit`, end of input, or the
    /// connection closes. Prompts are written to `output`.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        loop {
            let prompt = if self.buffer.is_empty() {
                &self.terminal.prompt
            } else {
                &self.terminal.continuation_prompt
            };
            output.write_all(prompt.as_bytes()).await?;
            output.flush().await?;

            let line = tokio::select! {
                () = self.conn.closed() => {
                    debug!("connection closed; leaving the shell");
                    break;
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };

            if line.trim().eq_ignore_ascii_case("exit") {
                break;
            }
            if let Some(text) = self.buffer.push_line(&line) {
                self.execute(Statement::parse(&text)).await;
            }
        }
        Ok(())
    }

    pub async fn execute(&self, statement: Statement) {
        match statement {
            Statement::Upload(path) => match self.conn.send_upload_file(&path).await {
                Ok(name) => self.sink.deliver(format!("Uploading file: {name}")),
                // The bare I/O error, without the connection-level prefix.
                Err(KdshError::Io(e)) => self.read_failed(&path, e),
                Err(e) => self.read_failed(&path, e),
            },
            Statement::Consult(path) => match tokio::fs::read(&path).await {
                Ok(contents) => {
                    self.sink.deliver(format!("Executing: {}", file_name(&path)));
                    if let Err(e) = self.conn.send_script(contents) {
                        warn!("could not queue script: {e}");
                    }
                }
                Err(e) => self.read_failed(&path, e),
            },
            Statement::Command(text) => {
                if let Err(e) = self.conn.send_command(&text) {
                    warn!("could not queue command: {e}");
                }
            }
        }
    }

    fn read_failed(&self, path: &Path, e: impl Display) {
        self.sink
            .deliver(format!("Failed to read file: {} ({e})", path.display()));
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
