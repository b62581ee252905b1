//! MPD line protocol primitives.
//!
//! Reference: https://mpd.readthedocs.io/en/latest/protocol.html

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{AckCode, AckError, ProtocolError};

/// Greeting prefix sent by the server right after connecting.
pub const GREETING_PREFIX: &str = "OK MPD ";
/// Successful end of a response.
pub const OK: &str = "OK";
/// Prefix of a server-side failure line.
pub const ACK_PREFIX: &str = "ACK ";

/// Verbs whose success changes the current playlist (queue) or the database.
const MUTATING_VERBS: &[&str] = &[
  "add",
  "addid",
  "clear",
  "delete",
  "deleteid",
  "load",
  "move",
  "moveid",
  "playlistadd",
  "playlistdelete",
  "rm",
  "save",
  "searchadd",
  "findadd",
  "shuffle",
  "update",
  "rescan",
];

/// Verbs that only read server state and may share the worker pool.
const READ_ONLY_VERBS: &[&str] = &[
  "albumart",
  "commands",
  "count",
  "currentsong",
  "find",
  "list",
  "listall",
  "listallinfo",
  "listplaylist",
  "listplaylistinfo",
  "listplaylists",
  "lsinfo",
  "outputs",
  "ping",
  "playlistfind",
  "playlistid",
  "playlistinfo",
  "plchanges",
  "readpicture",
  "search",
  "stats",
  "status",
  "tagtypes",
];

/// Server protocol version from the greeting line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Version {
  pub major: u32,
  pub minor: u32,
  pub patch: u32,
}

impl Version {
  pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
    Self {
      major,
      minor,
      patch,
    }
  }

  /// Parse `0.23.5` (patch may be missing).
  pub fn parse(text: &str) -> Option<Self> {
    let mut parts = text.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = match parts.next() {
      Some(p) => p.parse().ok()?,
      None => 0,
    };
    Some(Self::new(major, minor, patch))
  }

  /// Parse the connection greeting `OK MPD 0.23.5`.
  pub fn from_greeting(line: &str) -> Result<Self, ProtocolError> {
    line
      .strip_prefix(GREETING_PREFIX)
      .and_then(Version::parse)
      .ok_or_else(|| ProtocolError::Malformed(format!("Unexpected greeting: {}", line)))
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
  }
}

/// A single request line: a verb followed by arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
  verb: &'static str,
  args: Vec<String>,
}

impl Command {
  pub fn new(verb: &'static str) -> Self {
    Self {
      verb,
      args: Vec::new(),
    }
  }

  /// Append an argument (quoted on the wire when needed).
  pub fn arg(mut self, value: impl ToString) -> Self {
    self.args.push(value.to_string());
    self
  }

  /// Append a `START:END` range argument.
  pub fn range(self, start: u32, end: u32) -> Self {
    self.arg(format!("{}:{}", start, end))
  }

  /// Whether success of this verb invalidates cached results.
  pub fn is_mutation(&self) -> bool {
    MUTATING_VERBS.contains(&self.verb)
  }

  /// Whether this verb only reads state.
  pub fn is_read_only(&self) -> bool {
    READ_ONLY_VERBS.contains(&self.verb)
  }

  /// Wire form without the trailing newline.
  pub fn to_line(&self) -> String {
    let mut line = String::from(self.verb);
    for arg in &self.args {
      line.push(' ');
      push_quoted(&mut line, arg);
    }
    line
  }
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.verb == "password" {
      return write!(f, "password [REDACTED]");
    }
    write!(f, "{}", self.to_line())
  }
}

/// Commands sent as one `command_list_begin` … `command_list_end` batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandList {
  commands: Vec<Command>,
}

impl CommandList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, command: Command) {
    self.commands.push(command);
  }

  pub fn len(&self) -> usize {
    self.commands.len()
  }

  pub fn is_empty(&self) -> bool {
    self.commands.is_empty()
  }

  pub fn is_mutation(&self) -> bool {
    self.commands.iter().any(Command::is_mutation)
  }

  /// Wire lines, including the list delimiters.
  pub fn to_lines(&self) -> Vec<String> {
    let mut lines = Vec::with_capacity(self.commands.len() + 2);
    lines.push("command_list_begin".to_string());
    lines.extend(self.commands.iter().map(Command::to_line));
    lines.push("command_list_end".to_string());
    lines
  }
}

impl FromIterator<Command> for CommandList {
  fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
    Self {
      commands: iter.into_iter().collect(),
    }
  }
}

fn push_quoted(line: &mut String, arg: &str) {
  let needs_quotes = arg.is_empty()
    || arg
      .chars()
      .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c == '\'');
  if !needs_quotes {
    line.push_str(arg);
    return;
  }
  line.push('"');
  for c in arg.chars() {
    if c == '"' || c == '\\' {
      line.push('\\');
    }
    line.push(c);
  }
  line.push('"');
}

/// Parse `ACK [50@0] {play} song doesn't exist: "1"`.
pub fn parse_ack(line: &str) -> AckError {
  let body = line.strip_prefix(ACK_PREFIX).unwrap_or(line);

  let (code, command_index, rest) = match body
    .strip_prefix('[')
    .and_then(|b| b.split_once(']'))
  {
    Some((inner, rest)) => {
      let (code, index) = inner.split_once('@').unwrap_or((inner, "0"));
      (
        code.trim().parse().unwrap_or(0),
        index.trim().parse().unwrap_or(0),
        rest.trim_start(),
      )
    }
    None => (0, 0, body),
  };

  let (command, message) = match rest.strip_prefix('{').and_then(|r| r.split_once('}')) {
    Some((command, message)) => (command.to_string(), message.trim_start().to_string()),
    None => (String::new(), rest.to_string()),
  };

  AckError {
    code: AckCode::from_code(code),
    command_index,
    command,
    message,
  }
}

/// Subsystems reported by `idle` as `changed: <name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subsystem {
  Database,
  Update,
  StoredPlaylist,
  Playlist,
  Player,
  Mixer,
  Output,
  Options,
  Partition,
  Sticker,
  Subscription,
  Message,
  Neighbor,
  Mount,
}

impl Subsystem {
  /// The subsystems that affect "now playing".
  pub const PLAYBACK: &'static [Subsystem] = &[
    Subsystem::Player,
    Subsystem::Mixer,
    Subsystem::Playlist,
    Subsystem::Options,
    Subsystem::Output,
    Subsystem::Update,
    Subsystem::Database,
  ];

  /// Whether a change here makes cached list results stale.
  pub fn invalidates_cache(&self) -> bool {
    matches!(
      self,
      Subsystem::Database | Subsystem::Update | Subsystem::StoredPlaylist | Subsystem::Playlist
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Subsystem::Database => "database",
      Subsystem::Update => "update",
      Subsystem::StoredPlaylist => "stored_playlist",
      Subsystem::Playlist => "playlist",
      Subsystem::Player => "player",
      Subsystem::Mixer => "mixer",
      Subsystem::Output => "output",
      Subsystem::Options => "options",
      Subsystem::Partition => "partition",
      Subsystem::Sticker => "sticker",
      Subsystem::Subscription => "subscription",
      Subsystem::Message => "message",
      Subsystem::Neighbor => "neighbor",
      Subsystem::Mount => "mount",
    }
  }

  pub fn parse(name: &str) -> Option<Self> {
    let subsystem = match name {
      "database" => Subsystem::Database,
      "update" => Subsystem::Update,
      "stored_playlist" => Subsystem::StoredPlaylist,
      "playlist" => Subsystem::Playlist,
      "player" => Subsystem::Player,
      "mixer" => Subsystem::Mixer,
      "output" => Subsystem::Output,
      "options" => Subsystem::Options,
      "partition" => Subsystem::Partition,
      "sticker" => Subsystem::Sticker,
      "subscription" => Subsystem::Subscription,
      "message" => Subsystem::Message,
      "neighbor" => Subsystem::Neighbor,
      "mount" => Subsystem::Mount,
      _ => return None,
    };
    Some(subsystem)
  }
}
