//! Client engine for the Music Player Daemon protocol.
//!
//! `Mpd` is a cheap, cloneable handle exposing typed verbs over one command
//! connection. `MpdClient` wraps it with a state monitor, an idle listener on a
//! second connection and automatic reconnects.
//!
//! The crate logs through the `log` facade and installs no logger itself.

pub mod config;
pub mod mpd;

pub use config::ClientConfig;
pub use mpd::{Mpd, MpdClient, MpdError};
