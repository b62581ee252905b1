//! MPD client engine - talks the Music Player Daemon line protocol.
//!
//! Architecture:
//! - `transport.rs` - Buffered line/binary reader and writer over TCP or a local socket
//! - `protocol.rs` - Commands, command lists, versions, subsystems
//! - `parser.rs` - Response decoding into typed records
//! - `capabilities.rs` - Feature flags derived from version, commands and tag types
//! - `dispatcher.rs` - Serial and pooled lanes sharing one connection
//! - `cache.rs` - Generation-stamped result cache
//! - `client.rs` - Connection lifecycle and the `Mpd` facade
//! - `idle.rs` - Change notifications over a second connection
//! - `monitor.rs` - Status polling, interpolation and listeners
//! - `library.rs`, `queue.rs`, `playback.rs`, `artwork.rs` - Typed verbs

mod artwork;
mod cache;
mod capabilities;
mod client;
mod dispatcher;
mod error;
mod idle;
mod library;
mod monitor;
mod playback;
mod queue;
mod types;

pub mod parser;
pub mod protocol;
pub mod transport;

pub use artwork::Artwork;
pub use cache::ResultCache;
pub use capabilities::{Capabilities, GroupingStrategy, VersionThresholds};
pub use client::{Mpd, MpdClient};
pub use dispatcher::{ConnectionEvent, Dispatcher, Lane, Ticket, VerbState};
pub use error::{AckCode, AckError, MpdError, ProtocolError, TransportError};
pub use idle::IdleListener;
pub use library::SearchKind;
pub use monitor::{
  MonitorSettings, MonitorState, PushHandle, StateMonitor, StatusListener, StatusSource, TrackListener,
  VolumeListener,
};
pub use protocol::{Command, CommandList, Subsystem, Version};
pub use transport::Link;
pub use types::*;
