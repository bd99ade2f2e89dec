//! Line-oriented command channel to a tuner backend process.
//!
//! The channel owns the backend's standard streams. Commands are written one
//! per line; responses are read back as a lazy stream of lines that ends when
//! the backend exits or its output is closed. Bytes that are not UTF-8 are
//! read as Latin-1, and an overlong line is skipped without ending the stream.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use log::{debug, info, trace, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::codec::{Decoder, FramedRead};

use fmradio_protocol::MAX_LINE_LENGTH;

/// Command channel errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The backend cannot be started, has exited, or stopped accepting input.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The response stream was already handed out.
    #[error("Response stream already taken")]
    ReceiverTaken,

    /// A response line exceeded the maximum length and was discarded.
    #[error("Response line of {0} bytes discarded")]
    LineTooLong(usize),
}

/// Lazy sequence of response lines. Discarded lines show up as errors.
pub type LineStream = BoxStream<'static, Result<String, ChannelError>>;

/// Newline-delimited response decoder.
///
/// Only I/O errors are fatal. Lines longer than [`MAX_LINE_LENGTH`] are
/// dropped up to the next newline and reported as [`ChannelError::LineTooLong`].
#[derive(Debug, Default)]
struct ResponseCodec {
    /// Index to resume the newline search from.
    next_index: usize,
    /// Bytes dropped so far of an overlong line.
    discarding: Option<usize>,
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        // RDS text is commonly Latin-1
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

impl Decoder for ResponseCodec {
    type Item = Result<String, ChannelError>;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, io::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (Some(skipped), Some(end)) => {
                    buf.advance(end + 1);
                    self.next_index = 0;
                    self.discarding = None;
                    return Ok(Some(Err(ChannelError::LineTooLong(skipped + end))));
                }
                (Some(skipped), None) => {
                    let len = buf.len();
                    buf.advance(len);
                    self.next_index = 0;
                    self.discarding = Some(skipped + len);
                    return Ok(None);
                }
                (None, Some(end)) if end > MAX_LINE_LENGTH => {
                    buf.advance(end + 1);
                    self.next_index = 0;
                    return Ok(Some(Err(ChannelError::LineTooLong(end))));
                }
                (None, Some(end)) => {
                    let line = buf.split_to(end + 1);
                    self.next_index = 0;
                    return Ok(Some(Ok(decode_line(&line[..end]))));
                }
                (None, None) if buf.len() > MAX_LINE_LENGTH => {
                    self.discarding = Some(0);
                }
                (None, None) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if let Some(skipped) = self.discarding.take() {
            return Ok(Some(Err(ChannelError::LineTooLong(skipped))));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let line = buf.split();
        Ok(Some(Ok(decode_line(&line))))
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Backend process configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Backend executable.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Upper bound for a single write, including flush.
    pub write_timeout: Duration,
    /// How long `close` waits for the process to exit before killing it.
    pub exit_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("fmbin"),
            args: Vec::new(),
            write_timeout: Duration::from_millis(1000),
            exit_timeout: Duration::from_millis(500),
        }
    }
}

/// Owns the input and output streams of a backend.
pub struct CommandChannel {
    writer: Option<BoxedWriter>,
    reader: Option<BoxedReader>,
    child: Option<Child>,
    write_timeout: Duration,
    exit_timeout: Duration,
}

impl CommandChannel {
    /// Start the backend process and take over its standard streams.
    pub fn spawn(config: &ChannelConfig) -> Result<Self, ChannelError> {
        info!("[Channel] Starting backend: {:?} {:?}", config.program, config.args);

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ChannelError::BackendUnavailable(format!(
                    "failed to start {:?}: {}",
                    config.program, e
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ChannelError::BackendUnavailable("backend stdin not captured".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ChannelError::BackendUnavailable("backend stdout not captured".to_string())
        })?;

        debug!("[Channel] Backend started (pid={:?})", child.id());

        Ok(Self {
            writer: Some(Box::new(stdin)),
            reader: Some(Box::new(stdout)),
            child: Some(child),
            write_timeout: config.write_timeout,
            exit_timeout: config.exit_timeout,
        })
    }

    /// Build a channel over existing streams.
    pub fn from_io<R, W>(reader: R, writer: W, write_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Some(Box::new(writer)),
            reader: Some(Box::new(reader)),
            child: None,
            write_timeout,
            exit_timeout: Duration::ZERO,
        }
    }

    /// Write one command line.
    ///
    /// A write that does not complete within the write timeout is treated the
    /// same as a broken pipe.
    pub async fn send(&mut self, command: &str) -> Result<(), ChannelError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ChannelError::BackendUnavailable("channel closed".to_string()))?;

        trace!("[Channel] >> {}", command);
        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');

        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("[Channel] Write failed: {}", e);
                self.writer = None;
                Err(ChannelError::BackendUnavailable(format!("write failed: {}", e)))
            }
            Err(_) => {
                warn!(
                    "[Channel] Write blocked for more than {:?}",
                    self.write_timeout
                );
                self.writer = None;
                Err(ChannelError::BackendUnavailable(format!(
                    "write blocked for more than {:?}",
                    self.write_timeout
                )))
            }
        }
    }

    /// Take the response stream. Can only be called once.
    pub fn receive(&mut self) -> Result<LineStream, ChannelError> {
        let reader = self.reader.take().ok_or(ChannelError::ReceiverTaken)?;

        let lines = FramedRead::new(reader, ResponseCodec::default())
            .take_while(|line| {
                if let Err(e) = line {
                    warn!("[Channel] Read failed: {}", e);
                }
                futures::future::ready(line.is_ok())
            })
            .filter_map(|line| futures::future::ready(line.ok()));

        Ok(lines.boxed())
    }

    /// Returns true until the channel is closed or a write has failed.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Shut down the input stream and reap the backend process.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("[Channel] Shutdown of backend input failed: {}", e);
            }
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.exit_timeout, child.wait()).await {
                Ok(Ok(status)) => info!("[Channel] Backend exited: {}", status),
                Ok(Err(e)) => warn!("[Channel] Failed to wait for backend: {}", e),
                Err(_) => {
                    warn!("[Channel] Backend did not exit, killing it");
                    if let Err(e) = child.kill().await {
                        warn!("[Channel] Failed to kill backend: {}", e);
                    }
                }
            }
        }
    }
}
