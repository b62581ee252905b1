//! Records decoded from MPD responses.
//!
//! Records are built per request and handed out by value; nothing here holds
//! a reference back to the connection.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Last path segment, used as a display name.
pub fn display_name(path: &str) -> &str {
  path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// A song, either in the database or in the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
  pub path: String,
  pub title: Option<String>,
  /// Stream name for radio entries.
  pub name: Option<String>,
  pub artist: Option<String>,
  pub artist_sort: Option<String>,
  pub album: Option<String>,
  pub album_artist: Option<String>,
  pub album_artist_sort: Option<String>,
  pub genre: Option<String>,
  pub date: Option<String>,
  pub composer: Option<String>,
  pub performer: Option<String>,
  pub track: u32,
  pub total_tracks: Option<u32>,
  pub disc: u32,
  pub total_discs: Option<u32>,
  pub duration: Option<Duration>,
  pub last_modified: Option<String>,
  /// Position in the queue.
  pub pos: Option<u32>,
  /// Queue id.
  pub id: Option<u32>,
  pub musicbrainz_track_id: Option<String>,
  pub musicbrainz_artist_id: Option<String>,
  pub musicbrainz_album_id: Option<String>,
  pub musicbrainz_album_artist_id: Option<String>,
  /// Where collaborators can fetch artwork for this record.
  pub artwork: Option<String>,
}

impl Track {
  pub fn new(path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      ..Default::default()
    }
  }

  /// Title, falling back to the stream name and then the file name.
  pub fn display_name(&self) -> &str {
    self
      .title
      .as_deref()
      .or(self.name.as_deref())
      .unwrap_or_else(|| display_name(&self.path))
  }

  /// Album artist when tagged, artist otherwise.
  pub fn album_artist_or_artist(&self) -> Option<&str> {
    self.album_artist.as_deref().or(self.artist.as_deref())
  }

  /// Whether this is a network stream rather than a library file.
  pub fn is_stream(&self) -> bool {
    self.path.contains("://")
  }
}

/// A directory in the music database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
  pub path: String,
  pub last_modified: Option<String>,
  /// `path` with a trailing slash, so cover files resolve inside the directory.
  pub artwork: Option<String>,
}

impl Directory {
  pub fn display_name(&self) -> &str {
    display_name(&self.path)
  }
}

/// A stored playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
  pub path: String,
  pub last_modified: Option<String>,
  /// Listings leave this empty; `Mpd::playlist_artwork` falls back to the first entry.
  pub artwork: Option<String>,
}

impl Playlist {
  pub fn display_name(&self) -> &str {
    display_name(&self.path)
  }
}

/// One entry of a mixed `lsinfo` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Entry {
  Track(Track),
  Directory(Directory),
  Playlist(Playlist),
}

impl Entry {
  pub fn path(&self) -> &str {
    match self {
      Entry::Track(t) => &t.path,
      Entry::Directory(d) => &d.path,
      Entry::Playlist(p) => &p.path,
    }
  }

  pub fn display_name(&self) -> &str {
    match self {
      Entry::Track(t) => t.display_name(),
      Entry::Directory(d) => d.display_name(),
      Entry::Playlist(p) => p.display_name(),
    }
  }
}

/// An album as produced by `list album`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
  pub name: String,
  pub artist: Option<String>,
  pub artist_sort: Option<String>,
  pub musicbrainz_id: Option<String>,
  pub date: Option<String>,
}

impl Album {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }
}

/// An artist as produced by `list artist` / `list albumartist`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
  pub name: String,
  pub sort_name: Option<String>,
  pub musicbrainz_ids: BTreeSet<String>,
}

impl Artist {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  /// Name used for ordering.
  pub fn sort_key(&self) -> String {
    self.sort_name.as_deref().unwrap_or(&self.name).to_lowercase()
  }
}

/// Playback state reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayState {
  Playing,
  Paused,
  #[default]
  Stopped,
}

impl PlayState {
  pub fn from_mpd(raw: &str) -> Self {
    match raw {
      "play" => PlayState::Playing,
      "pause" => PlayState::Paused,
      _ => PlayState::Stopped,
    }
  }
}

/// Audio format as `rate:bits:channels`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
  pub sample_rate: Option<u32>,
  pub bit_depth: Option<u32>,
  pub channels: Option<u32>,
}

/// Result of `status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
  /// 0–100; `None` when the server has no mixer.
  pub volume: Option<u8>,
  pub repeat: bool,
  pub random: bool,
  pub single: bool,
  pub consume: bool,
  /// Queue version, bumped by the server on every queue change.
  pub playlist_version: u32,
  pub playlist_length: u32,
  pub state: PlayState,
  pub song: Option<u32>,
  pub song_id: Option<u32>,
  pub next_song: Option<u32>,
  pub next_song_id: Option<u32>,
  pub elapsed: Duration,
  pub duration: Duration,
  /// kbit/s.
  pub bitrate: u32,
  pub audio: AudioFormat,
  pub crossfade: u32,
  pub mixramp_db: Option<f32>,
  pub updating_db: Option<u32>,
  pub error: Option<String>,
}

impl Status {
  pub fn is_playing(&self) -> bool {
    self.state == PlayState::Playing
  }
}

/// Result of `stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
  pub artists: u32,
  pub albums: u32,
  pub songs: u32,
  pub uptime: Duration,
  pub playtime: Duration,
  pub db_playtime: Duration,
  /// Unix timestamp of the last database update.
  pub db_update: u64,
}

/// An audio output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
  pub id: u32,
  pub name: String,
  pub plugin: Option<String>,
  pub enabled: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display_names() {
    assert_eq!(display_name("Jazz/Coltrane/Blue Train.flac"), "Blue Train.flac");
    assert_eq!(display_name("Jazz/Coltrane/"), "Coltrane");
    assert_eq!(display_name("single"), "single");

    let mut track = Track::new("a/b.mp3");
    assert_eq!(track.display_name(), "b.mp3");
    track.title = Some("Bee".into());
    assert_eq!(track.display_name(), "Bee");
  }

  #[test]
  fn test_album_artist_fallback() {
    let mut track = Track::new("x.flac");
    track.artist = Some("Miles Davis".into());
    assert_eq!(track.album_artist_or_artist(), Some("Miles Davis"));
    track.album_artist = Some("Various".into());
    assert_eq!(track.album_artist_or_artist(), Some("Various"));
  }
}
