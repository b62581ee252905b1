//! Buffered reader/writer over the MPD byte stream.
//!
//! The server answers every request with `key: value` lines closed by `OK` or
//! `ACK ...`. Artwork chunks embed raw bytes announced by a `binary: N` line.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{MpdError, ProtocolError, TransportError};
use super::protocol::{self, Command, CommandList, Version};

/// Refill granularity of the read buffer.
const CHUNK_SIZE: usize = 8 * 1024;

/// Longest response line accepted before the stream is declared malformed.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Any duplex byte stream the transport can run over.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// Type-erased stream used by live connections.
pub type BoxedStream = Box<dyn Stream>;

/// Transport over a live socket.
pub type Link = Transport<BoxedStream>;

/// Outcome of reading a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRead {
  /// A key whose value must be read next.
  Key(String),
  /// `OK`: the response is complete.
  End,
}

/// Buffered MPD transport.
pub struct Transport<S> {
  stream: S,
  buffer: BytesMut,
  pending_value: Option<String>,
  read_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
  pub fn new(stream: S, read_timeout: Duration) -> Self {
    Self {
      stream,
      buffer: BytesMut::with_capacity(CHUNK_SIZE),
      pending_value: None,
      read_timeout,
    }
  }

  /// Bound for every subsequent socket read.
  pub fn set_read_timeout(&mut self, read_timeout: Duration) {
    self.read_timeout = read_timeout;
  }

  /// Read the server greeting and return its protocol version.
  pub async fn handshake(&mut self) -> Result<Version, MpdError> {
    let line = self.read_line().await?;
    let version = Version::from_greeting(&line)?;
    log::info!("MPD server greeting: protocol {}", version);
    Ok(version)
  }

  /// Pull more bytes from the stream into the buffer.
  async fn fill(&mut self) -> Result<usize, MpdError> {
    self.buffer.reserve(CHUNK_SIZE);
    let read = tokio::time::timeout(self.read_timeout, self.stream.read_buf(&mut self.buffer))
      .await
      .map_err(|_| TransportError::Timeout)?;
    match read {
      Ok(0) => Err(TransportError::Disconnected.into()),
      Ok(n) => Ok(n),
      Err(e) => Err(TransportError::Io(e).into()),
    }
  }

  /// Read one line without its terminator.
  pub async fn read_line(&mut self) -> Result<String, MpdError> {
    let mut scanned = 0;
    loop {
      if let Some(pos) = self.buffer[scanned..].iter().position(|b| *b == b'\n') {
        let mut line = self.buffer.split_to(scanned + pos + 1);
        line.truncate(line.len() - 1);
        let text = String::from_utf8(line.to_vec()).map_err(ProtocolError::from)?;
        return Ok(text);
      }
      scanned = self.buffer.len();
      if scanned > MAX_LINE_LENGTH {
        return Err(
          ProtocolError::Malformed(format!("Line exceeds {} bytes without a newline", MAX_LINE_LENGTH)).into(),
        );
      }
      self.fill().await?;
    }
  }

  /// Read the next key of the current response.
  ///
  /// `ACK` lines become [`ProtocolError::Ack`]. Reading a key while the previous
  /// value has not been consumed is a contract violation.
  pub async fn read_key(&mut self) -> Result<KeyRead, MpdError> {
    if self.pending_value.is_some() {
      return Err(MpdError::ContractViolation("key read while a value is pending"));
    }

    let line = self.read_line().await?;
    if line == protocol::OK {
      return Ok(KeyRead::End);
    }
    if line.starts_with(protocol::ACK_PREFIX) {
      let ack = protocol::parse_ack(&line);
      log::debug!("MPD << {}", line);
      return Err(ProtocolError::Ack(ack).into());
    }

    let (key, value) = match line.split_once(": ") {
      Some(pair) => pair,
      None => line
        .split_once(':')
        .ok_or_else(|| ProtocolError::Malformed(format!("Expected key/value line: {}", line)))?,
    };
    self.pending_value = Some(value.to_string());
    Ok(KeyRead::Key(key.to_string()))
  }

  /// Take the value belonging to the last key read.
  pub fn read_value(&mut self) -> Result<String, MpdError> {
    self
      .pending_value
      .take()
      .ok_or(MpdError::ContractViolation("value read without a pending key"))
  }

  /// Key and value together, or `None` at the end of the response.
  pub async fn read_pair(&mut self) -> Result<Option<(String, String)>, MpdError> {
    match self.read_key().await? {
      KeyRead::End => Ok(None),
      KeyRead::Key(key) => Ok(Some((key, self.read_value()?))),
    }
  }

  /// Read exactly `len` raw bytes and the newline that follows them.
  pub async fn read_binary(&mut self, len: usize) -> Result<Vec<u8>, MpdError> {
    let needed = len
      .checked_add(1)
      .ok_or_else(|| ProtocolError::Malformed(format!("Binary length out of range: {}", len)))?;
    while self.buffer.len() < needed {
      self.fill().await?;
    }
    let data = self.buffer.split_to(len).to_vec();
    if self.buffer.get_u8() != b'\n' {
      return Err(ProtocolError::Malformed("binary payload not followed by newline".into()).into());
    }
    Ok(data)
  }

  /// Whether data can be read without blocking.
  pub fn read_ready(&mut self) -> bool {
    if !self.buffer.is_empty() {
      return true;
    }
    self.buffer.reserve(CHUNK_SIZE);
    matches!(
      self.stream.read_buf(&mut self.buffer).now_or_never(),
      Some(Ok(n)) if n > 0
    )
  }

  /// Write one line and flush it.
  pub async fn write_line(&mut self, line: &str) -> Result<(), MpdError> {
    let mut data = Vec::with_capacity(line.len() + 1);
    data.extend_from_slice(line.as_bytes());
    data.push(b'\n');
    self.stream.write_all(&data).await?;
    self.stream.flush().await?;
    Ok(())
  }

  /// Send a command.
  pub async fn execute(&mut self, command: &Command) -> Result<(), MpdError> {
    log::debug!("MPD >> {}", command);
    self.discard_stale();
    self.write_line(&command.to_line()).await
  }

  /// Send a whole command list in one write.
  pub async fn execute_list(&mut self, list: &CommandList) -> Result<(), MpdError> {
    log::debug!("MPD >> command list of {} commands", list.len());
    self.discard_stale();
    let mut payload = list.to_lines().join("\n");
    payload.push('\n');
    self.stream.write_all(payload.as_bytes()).await?;
    self.stream.flush().await?;
    Ok(())
  }

  /// Consume a response that carries no records.
  pub async fn finish(&mut self) -> Result<(), MpdError> {
    while let Some((key, value)) = self.read_pair().await? {
      log::debug!("Ignoring unexpected pair {}: {}", key, value);
    }
    Ok(())
  }

  /// Skip the rest of a response after a malformed parse.
  pub async fn recover(&mut self) -> Result<(), MpdError> {
    self.pending_value = None;
    loop {
      let line = self.read_line().await?;
      if line == protocol::OK || line.starts_with(protocol::ACK_PREFIX) {
        return Ok(());
      }
    }
  }

  /// Drop unsolicited bytes left over from an abandoned response.
  fn discard_stale(&mut self) {
    if self.pending_value.take().is_some() || self.read_ready() {
      log::warn!(
        "Discarding {} stale bytes before sending a command",
        self.buffer.len()
      );
      self.buffer.clear();
    }
  }
}

impl Link {
  /// Connect to `host:port` over TCP.
  pub async fn connect_tcp(
    host: &str,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
  ) -> Result<Self, MpdError> {
    let address = format!("{}:{}", host, port);
    let stream = tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect(&address))
      .await
      .map_err(|_| TransportError::ConnectionFailed(format!("{}: connect timed out", address)))?
      .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
    stream.set_nodelay(true)?;
    Ok(Self::new(Box::new(stream), read_timeout))
  }

  /// Connect to a local socket.
  #[cfg(unix)]
  pub async fn connect_socket(
    path: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
  ) -> Result<Self, MpdError> {
    let stream = tokio::time::timeout(connect_timeout, tokio::net::UnixStream::connect(path))
      .await
      .map_err(|_| TransportError::ConnectionFailed(format!("{}: connect timed out", path)))?
      .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", path, e)))?;
    Ok(Self::new(Box::new(stream), read_timeout))
  }

  #[cfg(not(unix))]
  pub async fn connect_socket(
    path: &str,
    _connect_timeout: Duration,
    _read_timeout: Duration,
  ) -> Result<Self, MpdError> {
    Err(TransportError::ConnectionFailed(format!("{}: local sockets need a Unix platform", path)).into())
  }
}
