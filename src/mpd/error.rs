//! MPD error types.

use thiserror::Error;

/// Failures of the underlying byte stream.
#[derive(Error, Debug)]
pub enum TransportError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Read timeout")]
  Timeout,
  #[error("Disconnected")]
  Disconnected,
}

/// Error codes carried by `ACK [code@index]` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
  NotList,
  Argument,
  Password,
  Permission,
  UnknownCommand,
  NoExist,
  PlaylistMax,
  System,
  PlaylistLoad,
  UpdateAlready,
  PlayerSync,
  Exist,
  Other(u32),
}

impl AckCode {
  pub fn from_code(code: u32) -> Self {
    match code {
      1 => AckCode::NotList,
      2 => AckCode::Argument,
      3 => AckCode::Password,
      4 => AckCode::Permission,
      5 => AckCode::UnknownCommand,
      50 => AckCode::NoExist,
      51 => AckCode::PlaylistMax,
      52 => AckCode::System,
      53 => AckCode::PlaylistLoad,
      54 => AckCode::UpdateAlready,
      55 => AckCode::PlayerSync,
      56 => AckCode::Exist,
      other => AckCode::Other(other),
    }
  }
}

/// A server-side failure reported as `ACK [code@index] {command} message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckError {
  pub code: AckCode,
  /// Position of the failing command inside a command list.
  pub command_index: u32,
  pub command: String,
  pub message: String,
}

impl std::fmt::Display for AckError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{:?}@{} {{{}}} {}",
      self.code, self.command_index, self.command, self.message
    )
  }
}

/// The response stream did not follow the protocol.
#[derive(Error, Debug)]
pub enum ProtocolError {
  #[error("Server error: {0}")]
  Ack(AckError),
  #[error("Malformed response: {0}")]
  Malformed(String),
  #[error("Unexpected end of response")]
  UnexpectedEnd,
  #[error("Invalid UTF-8 in response")]
  InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Errors surfaced by the MPD engine.
#[derive(Error, Debug)]
pub enum MpdError {
  #[error("Transport error: {0}")]
  Transport(#[from] TransportError),

  #[error("Protocol error: {0}")]
  Protocol(#[from] ProtocolError),

  /// A caller or implementation bug, not a runtime condition.
  #[error("Contract violation: {0}")]
  ContractViolation(&'static str),

  #[error("Not supported by this server: {0}")]
  NotSupported(&'static str),

  #[error("Invalid configuration: {0}")]
  Config(String),
}

impl MpdError {
  /// Whether this failure means the connection is gone.
  pub fn is_transport(&self) -> bool {
    matches!(self, MpdError::Transport(_))
  }

  /// The server's `ACK` payload, if this is one.
  pub fn ack(&self) -> Option<&AckError> {
    match self {
      MpdError::Protocol(ProtocolError::Ack(ack)) => Some(ack),
      _ => None,
    }
  }
}

impl From<std::io::Error> for MpdError {
  fn from(e: std::io::Error) -> Self {
    MpdError::Transport(TransportError::Io(e))
  }
}
