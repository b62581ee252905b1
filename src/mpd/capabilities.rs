//! Server capability negotiation.
//!
//! A [`Capabilities`] snapshot is derived once per connection from the greeting
//! version, the `commands` list and the `tagtypes` list. The only transition
//! afterwards is [`Capabilities::with_alternate_server_workarounds`].

use serde::{Deserialize, Serialize};

use super::error::MpdError;
use super::protocol::Version;

/// Minimum protocol versions for version-gated features.
///
/// The grouping defect window (`grouping_defect_from` up to, but excluding,
/// `grouping_fixed`) is server-release specific; check it against the release
/// notes of the server fork in use before changing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionThresholds {
  pub ranged_playlist: Version,
  pub ranged_delete: Version,
  pub seek_current: Version,
  pub toggle_output: Version,
  pub list_grouping: Version,
  pub grouping_defect_from: Version,
  pub grouping_fixed: Version,
  pub album_art: Version,
}

impl Default for VersionThresholds {
  fn default() -> Self {
    Self {
      ranged_playlist: Version::new(0, 15, 0),
      ranged_delete: Version::new(0, 16, 0),
      seek_current: Version::new(0, 17, 0),
      toggle_output: Version::new(0, 18, 0),
      list_grouping: Version::new(0, 19, 0),
      grouping_defect_from: Version::new(0, 21, 0),
      grouping_fixed: Version::new(0, 21, 11),
      album_art: Version::new(0, 21, 0),
    }
  }
}

/// How grouped `list` responses delimit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingStrategy {
  /// The listed tag opens a record; group tags that follow belong to it.
  Legacy,
  /// Group tags precede the listed tag and stay in effect until replaced.
  Fixed,
}

/// Feature flags of the connected server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
  pub version: Version,

  pub ranged_playlist: bool,
  pub ranged_delete: bool,
  pub seek_current: bool,
  pub toggle_output: bool,
  pub list_grouping: bool,
  pub list_filtering: bool,
  pub grouping_fixed: bool,
  pub album_art: bool,

  pub idle: bool,
  pub search_add: bool,
  pub playlist_find: bool,
  pub read_picture: bool,

  pub musicbrainz: bool,
  pub album_artist: bool,
  pub date: bool,
  pub artist_sort: bool,
  pub album_artist_sort: bool,

  /// Set once a protocol-compatible but divergent server was detected.
  pub alternate_server: bool,
}

impl Capabilities {
  /// Derive the flags from the handshake data.
  pub fn derive(
    version: Version,
    commands: &[String],
    tags: &[String],
    thresholds: &VersionThresholds,
  ) -> Self {
    let has_command = |name: &str| commands.iter().any(|c| c == name);
    let has_tag = |name: &str| tags.iter().any(|t| t.eq_ignore_ascii_case(name));

    let in_defect_window =
      version >= thresholds.grouping_defect_from && version < thresholds.grouping_fixed;
    let grouping = version >= thresholds.list_grouping && !in_defect_window;

    let caps = Self {
      version,
      ranged_playlist: version >= thresholds.ranged_playlist,
      ranged_delete: version >= thresholds.ranged_delete,
      seek_current: version >= thresholds.seek_current,
      toggle_output: version >= thresholds.toggle_output,
      list_grouping: grouping,
      list_filtering: grouping,
      grouping_fixed: version >= thresholds.grouping_fixed,
      album_art: version >= thresholds.album_art,
      idle: has_command("idle"),
      search_add: has_command("searchadd"),
      playlist_find: has_command("playlistfind"),
      read_picture: has_command("readpicture"),
      musicbrainz: tags
        .iter()
        .any(|t| t.to_ascii_lowercase().contains("musicbrainz")),
      album_artist: has_tag("albumartist"),
      date: has_tag("date"),
      artist_sort: has_tag("artistsort"),
      album_artist_sort: has_tag("albumartistsort"),
      alternate_server: false,
    };

    if in_defect_window {
      log::warn!(
        "MPD {} has a known list grouping defect, grouping disabled",
        version
      );
    }
    log::debug!("Derived capabilities: {:?}", caps);
    caps
  }

  /// Snapshot with the workarounds for divergent server implementations.
  ///
  /// There is no way back: the returned snapshot keeps `alternate_server` set.
  pub fn with_alternate_server_workarounds(&self) -> Self {
    if self.alternate_server {
      return self.clone();
    }
    log::warn!("Alternate server implementation detected, disabling list grouping and playlistfind");
    Self {
      list_grouping: false,
      list_filtering: false,
      playlist_find: false,
      alternate_server: true,
      ..self.clone()
    }
  }

  pub fn grouping_strategy(&self) -> GroupingStrategy {
    if self.grouping_fixed {
      GroupingStrategy::Fixed
    } else {
      GroupingStrategy::Legacy
    }
  }

  /// Artist de-duplication applies only with MusicBrainz-aware grouping.
  pub fn dedupe_artists(&self) -> bool {
    self.musicbrainz && self.list_grouping
  }

  /// Tag used for "the artist of an album".
  pub fn album_artist_tag(&self) -> &'static str {
    if self.album_artist {
      "albumartist"
    } else {
      "artist"
    }
  }

  /// Fail with [`MpdError::NotSupported`] unless `flag` is set.
  pub fn require(flag: bool, feature: &'static str) -> Result<(), MpdError> {
    if flag {
      Ok(())
    } else {
      Err(MpdError::NotSupported(feature))
    }
  }
}
