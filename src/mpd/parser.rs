//! Streaming decoders turning `key: value` responses into records.
//!
//! Every decoder follows the same loop: read a key, stop at `OK`, read its
//! value, fold it into the record being staged. A primary key (for example
//! `file`) closes the staged record and opens a new one. An `ACK` anywhere in
//! the stream fails the whole decode; partial lists are never returned.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use super::capabilities::GroupingStrategy;
use super::error::{MpdError, ProtocolError};
use super::protocol::Subsystem;
use super::transport::{KeyRead, Transport};
use super::types::{
  Album, Artist, AudioFormat, Directory, Entry, Output, PlayState, Playlist, Statistics, Status,
  Track,
};

/// Split `N` or `N/M`. Unparsable parts fall back to `0` / `None`.
pub fn parse_number_pair(value: &str) -> (u32, Option<u32>) {
  let (first, second) = match value.split_once('/') {
    Some((first, second)) => (first, Some(second)),
    None => (value, None),
  };
  let number = first.trim().parse().unwrap_or(0);
  let total = second.and_then(|s| s.trim().parse().ok());
  (number, total)
}

/// Seconds with optional fraction; `None` for negative or out-of-range values.
pub fn parse_seconds(value: &str) -> Option<Duration> {
  let seconds = value.trim().parse::<f64>().ok()?;
  Duration::try_from_secs_f64(seconds).ok()
}

fn parse_flag(value: &str) -> bool {
  value == "1"
}

fn non_empty(value: String) -> Option<String> {
  if value.is_empty() {
    None
  } else {
    Some(value)
  }
}

/// Multi-valued tags repeat the key; the first occurrence wins.
fn set_first(slot: &mut Option<String>, value: String) {
  if slot.is_none() {
    *slot = non_empty(value);
  }
}

fn apply_track_field(track: &mut Track, key: &str, value: String) {
  match key {
    "Title" => set_first(&mut track.title, value),
    "Name" => set_first(&mut track.name, value),
    "Artist" => set_first(&mut track.artist, value),
    "ArtistSort" => set_first(&mut track.artist_sort, value),
    "Album" => set_first(&mut track.album, value),
    "AlbumArtist" => set_first(&mut track.album_artist, value),
    "AlbumArtistSort" => set_first(&mut track.album_artist_sort, value),
    "Genre" => set_first(&mut track.genre, value),
    "Date" => set_first(&mut track.date, value),
    "Composer" => set_first(&mut track.composer, value),
    "Performer" => set_first(&mut track.performer, value),
    "Track" => {
      let (number, total) = parse_number_pair(&value);
      track.track = number;
      track.total_tracks = total;
    }
    "Disc" => {
      let (number, total) = parse_number_pair(&value);
      track.disc = number;
      track.total_discs = total;
    }
    "duration" => {
      if let Some(duration) = parse_seconds(&value) {
        track.duration = Some(duration);
      }
    }
    // Integer seconds from servers that predate `duration`.
    "Time" => {
      if track.duration.is_none() {
        track.duration = parse_seconds(&value);
      }
    }
    "Last-Modified" => track.last_modified = non_empty(value),
    "Pos" => track.pos = value.parse().ok(),
    "Id" => track.id = value.parse().ok(),
    "MUSICBRAINZ_TRACKID" => set_first(&mut track.musicbrainz_track_id, value),
    "MUSICBRAINZ_ARTISTID" => set_first(&mut track.musicbrainz_artist_id, value),
    "MUSICBRAINZ_ALBUMID" => set_first(&mut track.musicbrainz_album_id, value),
    "MUSICBRAINZ_ALBUMARTISTID" => set_first(&mut track.musicbrainz_album_artist_id, value),
    _ => {}
  }
}

/// Decode a mixed listing of files, directories and playlists (`lsinfo`).
pub async fn entries<S>(t: &mut Transport<S>) -> Result<Vec<Entry>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut entries = Vec::new();
  let mut current: Option<Entry> = None;

  while let KeyRead::Key(key) = t.read_key().await? {
    let value = t.read_value()?;
    match key.as_str() {
      "file" => {
        entries.extend(current.take());
        let mut track = Track::new(value);
        if !track.is_stream() {
          track.artwork = Some(track.path.clone());
        }
        current = Some(Entry::Track(track));
      }
      "directory" => {
        entries.extend(current.take());
        // The server resolves cover files relative to the parent of the URI.
        let artwork = Some(format!("{}/", value));
        current = Some(Entry::Directory(Directory {
          path: value,
          artwork,
          ..Default::default()
        }));
      }
      "playlist" => {
        entries.extend(current.take());
        current = Some(Entry::Playlist(Playlist {
          path: value,
          ..Default::default()
        }));
      }
      _ => match current.as_mut() {
        Some(Entry::Track(track)) => apply_track_field(track, &key, value),
        Some(Entry::Directory(dir)) if key == "Last-Modified" => dir.last_modified = non_empty(value),
        Some(Entry::Playlist(pl)) if key == "Last-Modified" => pl.last_modified = non_empty(value),
        _ => {}
      },
    }
  }
  entries.extend(current);
  Ok(entries)
}

/// Decode song records, skipping any directory or playlist records.
pub async fn tracks<S>(t: &mut Transport<S>) -> Result<Vec<Track>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  Ok(
    entries(t)
      .await?
      .into_iter()
      .filter_map(|entry| match entry {
        Entry::Track(track) => Some(track),
        _ => None,
      })
      .collect(),
  )
}

/// Decode at most one song (`currentsong`).
pub async fn track<S>(t: &mut Transport<S>) -> Result<Option<Track>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  Ok(tracks(t).await?.into_iter().next())
}

/// Decode stored playlists (`listplaylists`).
pub async fn playlists<S>(t: &mut Transport<S>) -> Result<Vec<Playlist>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  Ok(
    entries(t)
      .await?
      .into_iter()
      .filter_map(|entry| match entry {
        Entry::Playlist(playlist) => Some(playlist),
        _ => None,
      })
      .collect(),
  )
}

fn parse_audio_format(value: &str) -> AudioFormat {
  let mut parts = value.split(':').map(|p| p.parse::<u32>().ok());
  AudioFormat {
    sample_rate: parts.next().flatten(),
    bit_depth: parts.next().flatten(),
    channels: parts.next().flatten(),
  }
}

/// Decode `status`.
pub async fn status<S>(t: &mut Transport<S>) -> Result<Status, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut status = Status::default();
  let mut legacy_time: Option<(Duration, Duration)> = None;
  let mut has_elapsed = false;
  let mut has_duration = false;

  while let Some((key, value)) = t.read_pair().await? {
    match key.as_str() {
      "volume" => {
        status.volume = value
          .parse::<i32>()
          .ok()
          .filter(|v| *v >= 0)
          .map(|v| v.min(100) as u8);
      }
      "repeat" => status.repeat = parse_flag(&value),
      "random" => status.random = parse_flag(&value),
      "single" => status.single = parse_flag(&value) || value == "oneshot",
      "consume" => status.consume = parse_flag(&value) || value == "oneshot",
      "playlist" => status.playlist_version = value.parse().unwrap_or(0),
      "playlistlength" => status.playlist_length = value.parse().unwrap_or(0),
      "state" => status.state = PlayState::from_mpd(&value),
      "song" => status.song = value.parse().ok(),
      "songid" => status.song_id = value.parse().ok(),
      "nextsong" => status.next_song = value.parse().ok(),
      "nextsongid" => status.next_song_id = value.parse().ok(),
      "time" => {
        legacy_time = value
          .split_once(':')
          .and_then(|(e, d)| Some((parse_seconds(e)?, parse_seconds(d)?)));
      }
      "elapsed" => {
        if let Some(elapsed) = parse_seconds(&value) {
          status.elapsed = elapsed;
          has_elapsed = true;
        }
      }
      "duration" => {
        if let Some(duration) = parse_seconds(&value) {
          status.duration = duration;
          has_duration = true;
        }
      }
      "bitrate" => status.bitrate = value.parse().unwrap_or(0),
      "audio" => status.audio = parse_audio_format(&value),
      "xfade" => status.crossfade = value.parse().unwrap_or(0),
      "mixrampdb" => status.mixramp_db = value.parse().ok(),
      "updating_db" => status.updating_db = value.parse().ok(),
      "error" => status.error = non_empty(value),
      _ => {}
    }
  }

  if let Some((elapsed, duration)) = legacy_time {
    if !has_elapsed {
      status.elapsed = elapsed;
    }
    if !has_duration {
      status.duration = duration;
    }
  }
  Ok(status)
}

/// Decode `stats`.
pub async fn statistics<S>(t: &mut Transport<S>) -> Result<Statistics, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut stats = Statistics::default();
  let seconds = |value: &str| Duration::from_secs(value.parse().unwrap_or(0));

  while let Some((key, value)) = t.read_pair().await? {
    match key.as_str() {
      "artists" => stats.artists = value.parse().unwrap_or(0),
      "albums" => stats.albums = value.parse().unwrap_or(0),
      "songs" => stats.songs = value.parse().unwrap_or(0),
      "uptime" => stats.uptime = seconds(&value),
      "playtime" => stats.playtime = seconds(&value),
      "db_playtime" => stats.db_playtime = seconds(&value),
      "db_update" => stats.db_update = value.parse().unwrap_or(0),
      _ => {}
    }
  }
  Ok(stats)
}

/// Decode `outputs`.
pub async fn outputs<S>(t: &mut Transport<S>) -> Result<Vec<Output>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut outputs = Vec::new();
  let mut current: Option<Output> = None;

  while let Some((key, value)) = t.read_pair().await? {
    if key == "outputid" {
      outputs.extend(current.take());
      current = Some(Output {
        id: value.parse().unwrap_or(0),
        ..Default::default()
      });
      continue;
    }
    let Some(output) = current.as_mut() else {
      continue;
    };
    match key.as_str() {
      "outputname" => output.name = value,
      "outputenabled" => output.enabled = parse_flag(&value),
      "plugin" => output.plugin = non_empty(value),
      _ => {}
    }
  }
  outputs.extend(current);
  Ok(outputs)
}

/// Collect every value of `key` (case-insensitive), e.g. `command` or `tagtype`.
pub async fn values<S>(t: &mut Transport<S>, key: &str) -> Result<Vec<String>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut values = Vec::new();
  while let Some((k, value)) = t.read_pair().await? {
    if k.eq_ignore_ascii_case(key) {
      values.push(value);
    }
  }
  Ok(values)
}

/// Collect the raw pairs of a response.
pub async fn pairs<S>(t: &mut Transport<S>) -> Result<Vec<(String, String)>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut pairs = Vec::new();
  while let Some(pair) = t.read_pair().await? {
    pairs.push(pair);
  }
  Ok(pairs)
}

/// Job id returned by `update`.
pub async fn update_id<S>(t: &mut Transport<S>) -> Result<Option<u32>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut id = None;
  while let Some((key, value)) = t.read_pair().await? {
    if key == "updating_db" {
      id = value.parse().ok();
    }
  }
  Ok(id)
}

/// Subsystems reported by `idle`.
pub async fn changes<S>(t: &mut Transport<S>) -> Result<Vec<Subsystem>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut changed = Vec::new();
  while let Some((key, value)) = t.read_pair().await? {
    if key != "changed" {
      continue;
    }
    match Subsystem::parse(&value) {
      Some(subsystem) => changed.push(subsystem),
      None => log::debug!("Unknown idle subsystem: {}", value),
    }
  }
  Ok(changed)
}

fn apply_album_field(album: &mut Album, key: &str, value: String) {
  match key.to_ascii_lowercase().as_str() {
    "artist" | "albumartist" => album.artist = non_empty(value),
    "artistsort" | "albumartistsort" => album.artist_sort = non_empty(value),
    "musicbrainz_albumid" => album.musicbrainz_id = non_empty(value),
    "date" => album.date = non_empty(value),
    _ => {}
  }
}

/// Decode `list album [group ...]`.
pub async fn albums<S>(
  t: &mut Transport<S>,
  strategy: GroupingStrategy,
) -> Result<Vec<Album>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut albums = Vec::new();
  match strategy {
    GroupingStrategy::Legacy => {
      let mut current: Option<Album> = None;
      while let Some((key, value)) = t.read_pair().await? {
        if key.eq_ignore_ascii_case("album") {
          albums.extend(current.take());
          current = Some(Album::new(value));
        } else if let Some(album) = current.as_mut() {
          apply_album_field(album, &key, value);
        }
      }
      albums.extend(current);
    }
    GroupingStrategy::Fixed => {
      let mut group = Album::default();
      while let Some((key, value)) = t.read_pair().await? {
        if key.eq_ignore_ascii_case("album") {
          albums.push(Album {
            name: value,
            ..group.clone()
          });
        } else {
          apply_album_field(&mut group, &key, value);
        }
      }
    }
  }
  Ok(albums)
}

/// `replace_ids` drops previously seen ids first (a new group value).
fn apply_artist_field(artist: &mut Artist, key: &str, value: String, replace_ids: bool) {
  match key.to_ascii_lowercase().as_str() {
    "artistsort" | "albumartistsort" => artist.sort_name = non_empty(value),
    "musicbrainz_artistid" | "musicbrainz_albumartistid" => {
      if replace_ids {
        artist.musicbrainz_ids.clear();
      }
      if !value.is_empty() {
        artist.musicbrainz_ids.insert(value);
      }
    }
    _ => {}
  }
}

/// Decode `list artist` / `list albumartist`, keyed by `name_key`.
pub async fn artists<S>(
  t: &mut Transport<S>,
  name_key: &str,
  strategy: GroupingStrategy,
) -> Result<Vec<Artist>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut artists = Vec::new();
  match strategy {
    GroupingStrategy::Legacy => {
      let mut current: Option<Artist> = None;
      while let Some((key, value)) = t.read_pair().await? {
        if key.eq_ignore_ascii_case(name_key) {
          artists.extend(current.take());
          current = Some(Artist::new(value));
        } else if let Some(artist) = current.as_mut() {
          apply_artist_field(artist, &key, value, false);
        }
      }
      artists.extend(current);
    }
    GroupingStrategy::Fixed => {
      let mut group = Artist::default();
      while let Some((key, value)) = t.read_pair().await? {
        if key.eq_ignore_ascii_case(name_key) {
          artists.push(Artist {
            name: value,
            ..group.clone()
          });
        } else {
          apply_artist_field(&mut group, &key, value, true);
        }
      }
    }
  }
  Ok(artists)
}

/// Sort by case-insensitive name, richest MusicBrainz entry first, then keep
/// only the first of each run of same-named artists.
pub fn dedupe_artists(artists: &mut Vec<Artist>) {
  artists.sort_by(|a, b| {
    a.name
      .to_lowercase()
      .cmp(&b.name.to_lowercase())
      .then_with(|| b.musicbrainz_ids.len().cmp(&a.musicbrainz_ids.len()))
  });
  artists.dedup_by(|later, first| later.name.to_lowercase() == first.name.to_lowercase());
}

/// Largest chunk accepted from `albumart` / `readpicture`.
///
/// The server default is 8 KiB and `binarylimit` caps it well below this.
pub const MAX_BINARY_CHUNK: usize = 16 * 1024 * 1024;

/// One chunk of an `albumart` / `readpicture` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryChunk {
  /// Size of the whole picture.
  pub total_size: usize,
  pub mime_type: Option<String>,
  pub data: Vec<u8>,
}

/// Decode a binary chunk; `None` when the server has no picture.
pub async fn binary_chunk<S>(t: &mut Transport<S>) -> Result<Option<BinaryChunk>, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut total_size = 0;
  let mut mime_type = None;
  let mut data = None;

  while let Some((key, value)) = t.read_pair().await? {
    match key.as_str() {
      "size" => total_size = value.parse().unwrap_or(0),
      "type" => mime_type = non_empty(value),
      "binary" => {
        let len = value
          .parse::<usize>()
          .ok()
          .filter(|len| *len <= MAX_BINARY_CHUNK)
          .ok_or_else(|| ProtocolError::Malformed(format!("Invalid binary length: {}", value)))?;
        data = Some(t.read_binary(len).await?);
      }
      _ => {}
    }
  }

  Ok(data.map(|data| BinaryChunk {
    total_size,
    mime_type,
    data,
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpd::error::AckCode;
  use crate::mpd::transport::tests::mock_reading;

  const TRACKS: &[u8] = b"file: Jazz/Coltrane/01 Blue Train.flac\n\
Last-Modified: 2021-03-04T10:00:00Z\n\
Artist: John Coltrane\n\
AlbumArtist: John Coltrane\n\
Title: Blue Train\n\
Album: Blue Train\n\
Track: 1/5\n\
Disc: 1\n\
Date: 1957\n\
Genre: Jazz\n\
Time: 643\n\
duration: 643.120\n\
MUSICBRAINZ_ALBUMID: 6d1e0a1c\n\
Pos: 0\n\
Id: 11\n\
file: Jazz/Coltrane/02 Moment's Notice.flac\n\
Artist: John Coltrane\n\
Title: Moment's Notice\n\
Track: two\n\
Pos: 1\n\
Id: 12\n\
OK\n";

  #[tokio::test]
  async fn test_tracks_round_trip() {
    let mut t = mock_reading(&[TRACKS]);
    let tracks = tracks(&mut t).await.unwrap();
    assert_eq!(tracks.len(), 2);

    let first = &tracks[0];
    assert_eq!(first.path, "Jazz/Coltrane/01 Blue Train.flac");
    assert_eq!(first.last_modified.as_deref(), Some("2021-03-04T10:00:00Z"));
    assert_eq!(first.artist.as_deref(), Some("John Coltrane"));
    assert_eq!(first.album_artist.as_deref(), Some("John Coltrane"));
    assert_eq!(first.title.as_deref(), Some("Blue Train"));
    assert_eq!(first.album.as_deref(), Some("Blue Train"));
    assert_eq!(first.track, 1);
    assert_eq!(first.total_tracks, Some(5));
    assert_eq!(first.disc, 1);
    assert_eq!(first.total_discs, None);
    assert_eq!(first.date.as_deref(), Some("1957"));
    assert_eq!(first.genre.as_deref(), Some("Jazz"));
    assert_eq!(first.duration, Some(Duration::from_secs_f64(643.12)));
    assert_eq!(first.musicbrainz_album_id.as_deref(), Some("6d1e0a1c"));
    assert_eq!(first.pos, Some(0));
    assert_eq!(first.id, Some(11));

    let second = &tracks[1];
    assert_eq!(second.title.as_deref(), Some("Moment's Notice"));
    assert_eq!(second.track, 0, "unparsable track number keeps the default");
    assert_eq!(second.id, Some(12));
  }

  #[tokio::test]
  async fn test_parsing_is_idempotent() {
    let first = tracks(&mut mock_reading(&[TRACKS])).await.unwrap();
    let second = tracks(&mut mock_reading(&[TRACKS])).await.unwrap();
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn test_buffer_boundary_invariance() {
    let whole = tracks(&mut mock_reading(&[TRACKS])).await.unwrap();
    for offset in 1..TRACKS.len() {
      let (head, tail) = TRACKS.split_at(offset);
      let split = tracks(&mut mock_reading(&[head, tail])).await.unwrap();
      assert_eq!(split, whole, "split at offset {}", offset);
    }
  }

  #[tokio::test]
  async fn test_status_buffer_boundary_invariance() {
    let raw: &[u8] = b"volume: 80\nstate: play\nelapsed: 12.5\nduration: 200.0\naudio: 44100:16:2\nOK\n";
    let whole = status(&mut mock_reading(&[raw])).await.unwrap();
    for offset in 1..raw.len() {
      let (head, tail) = raw.split_at(offset);
      assert_eq!(status(&mut mock_reading(&[head, tail])).await.unwrap(), whole);
    }
  }

  #[tokio::test]
  async fn test_mid_stream_ack_fails_whole_response() {
    let raw: &[u8] = b"file: a.flac\nTitle: A\nfile: b.flac\nACK [52@0] {listallinfo} read error\n";
    let err = tracks(&mut mock_reading(&[raw])).await.unwrap_err();
    match err {
      MpdError::Protocol(ProtocolError::Ack(ack)) => {
        assert_eq!(ack.code, AckCode::System);
        assert_eq!(ack.message, "read error");
      }
      other => panic!("expected ACK, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_entries_mixed_listing() {
    let raw: &[u8] = b"directory: Jazz/Coltrane\n\
Last-Modified: 2020-01-01T00:00:00Z\n\
file: Jazz/intro.mp3\n\
Title: Intro\n\
playlist: Jazz/best.m3u\n\
Last-Modified: 2022-01-01T00:00:00Z\n\
OK\n";
    let entries = entries(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(entries.len(), 3);
    match &entries[0] {
      Entry::Directory(d) => {
        assert_eq!(d.path, "Jazz/Coltrane");
        assert_eq!(d.display_name(), "Coltrane");
        assert_eq!(d.last_modified.as_deref(), Some("2020-01-01T00:00:00Z"));
      }
      other => panic!("expected directory, got {:?}", other),
    }
    assert!(matches!(&entries[1], Entry::Track(t) if t.title.as_deref() == Some("Intro")));
    match &entries[2] {
      Entry::Playlist(p) => {
        assert_eq!(p.display_name(), "best.m3u");
        assert_eq!(p.last_modified.as_deref(), Some("2022-01-01T00:00:00Z"));
      }
      other => panic!("expected playlist, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_playlists_round_trip() {
    let raw: &[u8] = b"playlist: Road trip\nLast-Modified: 2023-05-01T08:00:00Z\nplaylist: Chill\nOK\n";
    let playlists = playlists(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(playlists.len(), 2);
    assert_eq!(playlists[0].path, "Road trip");
    assert_eq!(playlists[1].path, "Chill");
    assert_eq!(playlists[1].last_modified, None);
  }

  #[tokio::test]
  async fn test_status_round_trip() {
    let raw: &[u8] = b"volume: 65\n\
repeat: 1\n\
random: 0\n\
single: oneshot\n\
consume: 1\n\
playlist: 42\n\
playlistlength: 12\n\
mixrampdb: 0.000000\n\
state: pause\n\
song: 3\n\
songid: 14\n\
time: 61:244\n\
elapsed: 61.312\n\
bitrate: 320\n\
duration: 244.123\n\
audio: 44100:24:2\n\
nextsong: 4\n\
nextsongid: 15\n\
updating_db: 7\n\
OK\n";
    let status = status(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(status.volume, Some(65));
    assert!(status.repeat);
    assert!(!status.random);
    assert!(status.single);
    assert!(status.consume);
    assert_eq!(status.playlist_version, 42);
    assert_eq!(status.playlist_length, 12);
    assert_eq!(status.state, PlayState::Paused);
    assert_eq!(status.song, Some(3));
    assert_eq!(status.song_id, Some(14));
    assert_eq!(status.next_song, Some(4));
    assert_eq!(status.next_song_id, Some(15));
    assert_eq!(status.elapsed, Duration::from_secs_f64(61.312));
    assert_eq!(status.duration, Duration::from_secs_f64(244.123));
    assert_eq!(status.bitrate, 320);
    assert_eq!(status.audio.sample_rate, Some(44100));
    assert_eq!(status.audio.bit_depth, Some(24));
    assert_eq!(status.audio.channels, Some(2));
    assert_eq!(status.mixramp_db, Some(0.0));
    assert_eq!(status.updating_db, Some(7));
  }

  #[tokio::test]
  async fn test_status_legacy_time_and_missing_mixer() {
    let raw: &[u8] = b"volume: -1\nstate: play\ntime: 30:180\naudio: dsd64:*:2\nOK\n";
    let status = status(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(status.volume, None);
    assert!(status.is_playing());
    assert_eq!(status.elapsed, Duration::from_secs(30));
    assert_eq!(status.duration, Duration::from_secs(180));
    assert_eq!(status.audio.sample_rate, None);
    assert_eq!(status.audio.bit_depth, None);
    assert_eq!(status.audio.channels, Some(2));
    assert_eq!(status.updating_db, None);
  }

  #[tokio::test]
  async fn test_statistics_round_trip() {
    let raw: &[u8] = b"uptime: 3600\nplaytime: 1200\nartists: 120\nalbums: 300\nsongs: 4200\ndb_playtime: 999999\ndb_update: 1700000000\nOK\n";
    let stats = statistics(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(
      stats,
      Statistics {
        artists: 120,
        albums: 300,
        songs: 4200,
        uptime: Duration::from_secs(3600),
        playtime: Duration::from_secs(1200),
        db_playtime: Duration::from_secs(999_999),
        db_update: 1_700_000_000,
      }
    );
  }

  #[tokio::test]
  async fn test_outputs_round_trip() {
    let raw: &[u8] = b"outputid: 0\noutputname: ALSA\nplugin: alsa\noutputenabled: 1\noutputid: 1\noutputname: HTTP stream\nplugin: httpd\noutputenabled: 0\nOK\n";
    let outputs = outputs(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(
      outputs,
      vec![
        Output {
          id: 0,
          name: "ALSA".into(),
          plugin: Some("alsa".into()),
          enabled: true,
        },
        Output {
          id: 1,
          name: "HTTP stream".into(),
          plugin: Some("httpd".into()),
          enabled: false,
        },
      ]
    );
  }

  #[tokio::test]
  async fn test_command_and_tag_lists() {
    let raw: &[u8] = b"command: add\ncommand: idle\ncommand: status\nOK\n";
    let commands = values(&mut mock_reading(&[raw]), "command").await.unwrap();
    assert_eq!(commands, vec!["add", "idle", "status"]);

    let raw: &[u8] = b"tagtype: Artist\ntagtype: MUSICBRAINZ_ARTISTID\nOK\n";
    let tags = values(&mut mock_reading(&[raw]), "tagtype").await.unwrap();
    assert_eq!(tags, vec!["Artist", "MUSICBRAINZ_ARTISTID"]);
  }

  #[tokio::test]
  async fn test_legacy_grouped_albums() {
    // Primary tag first, grouping tags after it.
    let raw: &[u8] = b"Album: Blue Train\n\
AlbumArtist: John Coltrane\n\
Date: 1957\n\
Album: Kind of Blue\n\
AlbumArtist: Miles Davis\n\
Date: 1959\n\
Album: Untagged\n\
OK\n";
    let albums = albums(&mut mock_reading(&[raw]), GroupingStrategy::Legacy)
      .await
      .unwrap();
    assert_eq!(albums.len(), 3);
    assert_eq!(albums[0].name, "Blue Train");
    assert_eq!(albums[0].artist.as_deref(), Some("John Coltrane"));
    assert_eq!(albums[0].date.as_deref(), Some("1957"));
    assert_eq!(albums[1].artist.as_deref(), Some("Miles Davis"));
    assert_eq!(albums[1].date.as_deref(), Some("1959"));
    assert_eq!(albums[2], Album::new("Untagged"));
  }

  #[tokio::test]
  async fn test_fixed_grouped_albums() {
    // Grouping tags first, held until replaced.
    let raw: &[u8] = b"AlbumArtist: John Coltrane\n\
Date: 1957\n\
Album: Blue Train\n\
Date: 1958\n\
Album: Soultrane\n\
AlbumArtist: Miles Davis\n\
Date: 1959\n\
MUSICBRAINZ_ALBUMID: kob-1\n\
Album: Kind of Blue\n\
OK\n";
    let albums = albums(&mut mock_reading(&[raw]), GroupingStrategy::Fixed)
      .await
      .unwrap();
    assert_eq!(albums.len(), 3);
    assert_eq!(albums[0].name, "Blue Train");
    assert_eq!(albums[0].artist.as_deref(), Some("John Coltrane"));
    assert_eq!(albums[0].date.as_deref(), Some("1957"));
    assert_eq!(albums[1].name, "Soultrane");
    assert_eq!(albums[1].artist.as_deref(), Some("John Coltrane"));
    assert_eq!(albums[1].date.as_deref(), Some("1958"));
    assert_eq!(albums[2].artist.as_deref(), Some("Miles Davis"));
    assert_eq!(albums[2].musicbrainz_id.as_deref(), Some("kob-1"));
  }

  #[tokio::test]
  async fn test_fixed_shape_misparsed_by_legacy_strategy() {
    let raw: &[u8] = b"AlbumArtist: John Coltrane\nAlbum: Blue Train\nAlbumArtist: Miles Davis\nAlbum: Kind of Blue\nOK\n";
    let albums = albums(&mut mock_reading(&[raw]), GroupingStrategy::Legacy)
      .await
      .unwrap();
    // Each artist ends up on the album before it.
    assert_eq!(albums[0].artist.as_deref(), Some("Miles Davis"));
    assert_eq!(albums[1].artist, None);
  }

  #[tokio::test]
  async fn test_grouped_artists_and_dedupe() {
    let raw: &[u8] = b"MUSICBRAINZ_ARTISTID: \n\
Artist: john coltrane\n\
Artist: Alice Coltrane\n\
MUSICBRAINZ_ARTISTID: b625448e\n\
Artist: John Coltrane\n\
OK\n";
    let mut artists = artists(&mut mock_reading(&[raw]), "Artist", GroupingStrategy::Fixed)
      .await
      .unwrap();
    assert_eq!(artists.len(), 3);
    dedupe_artists(&mut artists);
    assert_eq!(artists.len(), 2);
    assert_eq!(artists[0].name, "Alice Coltrane");
    assert_eq!(artists[1].name, "John Coltrane");
    assert!(artists[1].musicbrainz_ids.contains("b625448e"));
  }

  #[tokio::test]
  async fn test_legacy_artists_with_sort_names() {
    let raw: &[u8] = b"AlbumArtist: The Beatles\nAlbumArtistSort: Beatles, The\nAlbumArtist: ABBA\nOK\n";
    let artists = artists(&mut mock_reading(&[raw]), "AlbumArtist", GroupingStrategy::Legacy)
      .await
      .unwrap();
    assert_eq!(artists.len(), 2);
    assert_eq!(artists[0].sort_name.as_deref(), Some("Beatles, The"));
    assert_eq!(artists[0].sort_key(), "beatles, the");
    assert_eq!(artists[1].sort_name, None);
  }

  #[tokio::test]
  async fn test_binary_chunk() {
    let raw: &[u8] = b"size: 10\ntype: image/png\nbinary: 4\n\x89PNG\nOK\n";
    let chunk = binary_chunk(&mut mock_reading(&[raw])).await.unwrap().unwrap();
    assert_eq!(chunk.total_size, 10);
    assert_eq!(chunk.mime_type.as_deref(), Some("image/png"));
    assert_eq!(chunk.data, b"\x89PNG".to_vec());

    let none = binary_chunk(&mut mock_reading(&[b"OK\n"])).await.unwrap();
    assert_eq!(none, None);
  }

  #[tokio::test]
  async fn test_binary_chunk_buffer_boundary_invariance() {
    let raw: &[u8] = b"size: 9\ntype: image/jpeg\nbinary: 5\n\xff\nOK\n\nOK\n";
    let whole = binary_chunk(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(whole.as_ref().map(|c| c.data.clone()), Some(b"\xff\nOK\n".to_vec()));
    for offset in 1..raw.len() {
      let (head, tail) = raw.split_at(offset);
      let split = binary_chunk(&mut mock_reading(&[head, tail])).await.unwrap();
      assert_eq!(split, whole, "split at offset {}", offset);
    }
  }

  #[tokio::test]
  async fn test_binary_length_out_of_range() {
    let raw: &[u8] = b"size: 1\nbinary: 18446744073709551615\n";
    let err = binary_chunk(&mut mock_reading(&[raw])).await.unwrap_err();
    assert!(matches!(err, MpdError::Protocol(ProtocolError::Malformed(_))));

    let raw: &[u8] = b"binary: 999999999999\n";
    let err = binary_chunk(&mut mock_reading(&[raw])).await.unwrap_err();
    assert!(matches!(err, MpdError::Protocol(ProtocolError::Malformed(_))));
  }

  #[tokio::test]
  async fn test_grouped_lists_buffer_boundary_invariance() {
    let raw: &[u8] = b"AlbumArtist: John Coltrane\nDate: 1957\nAlbum: Blue Train\nAlbumArtist: Miles Davis\nMUSICBRAINZ_ALBUMID: kob-1\nAlbum: Kind of Blue\nOK\n";
    let whole = albums(&mut mock_reading(&[raw]), GroupingStrategy::Fixed)
      .await
      .unwrap();
    assert_eq!(whole.len(), 2);
    for offset in 1..raw.len() {
      let (head, tail) = raw.split_at(offset);
      let split = albums(&mut mock_reading(&[head, tail]), GroupingStrategy::Fixed)
        .await
        .unwrap();
      assert_eq!(split, whole, "split at offset {}", offset);
    }

    let raw: &[u8] = b"MUSICBRAINZ_ARTISTID: b625448e\nArtist: John Coltrane\nArtist: Alice Coltrane\nOK\n";
    let whole = artists(&mut mock_reading(&[raw]), "Artist", GroupingStrategy::Fixed)
      .await
      .unwrap();
    for offset in 1..raw.len() {
      let (head, tail) = raw.split_at(offset);
      let split = artists(&mut mock_reading(&[head, tail]), "Artist", GroupingStrategy::Fixed)
        .await
        .unwrap();
      assert_eq!(split, whole, "split at offset {}", offset);
    }
  }

  #[tokio::test]
  async fn test_outputs_buffer_boundary_invariance() {
    let raw: &[u8] = b"outputid: 0\noutputname: ALSA\nplugin: alsa\noutputenabled: 1\noutputid: 1\noutputname: HTTP\noutputenabled: 0\nOK\n";
    let whole = outputs(&mut mock_reading(&[raw])).await.unwrap();
    for offset in 1..raw.len() {
      let (head, tail) = raw.split_at(offset);
      assert_eq!(outputs(&mut mock_reading(&[head, tail])).await.unwrap(), whole);
    }
  }

  #[tokio::test]
  async fn test_out_of_range_seconds_keep_defaults() {
    let raw: &[u8] = b"state: play\nelapsed: 1e30\nduration: -3\ntime: 1e300:inf\nOK\n";
    let status = status(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(status.state, PlayState::Playing);
    assert_eq!(status.elapsed, Duration::ZERO);
    assert_eq!(status.duration, Duration::ZERO);

    let raw: &[u8] = b"file: a.flac\nTime: 1e30\nduration: NaN\nOK\n";
    let tracks = tracks(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(tracks[0].duration, None);
  }

  #[test]
  fn test_parse_seconds_bounds() {
    assert_eq!(parse_seconds("1.5"), Some(Duration::from_millis(1500)));
    assert_eq!(parse_seconds(" 2 "), Some(Duration::from_secs(2)));
    assert_eq!(parse_seconds("1e30"), None);
    assert_eq!(parse_seconds("-1"), None);
    assert_eq!(parse_seconds("inf"), None);
    assert_eq!(parse_seconds("abc"), None);
  }

  #[tokio::test]
  async fn test_artwork_references() {
    let raw: &[u8] = b"directory: Jazz/Coltrane\nfile: Jazz/intro.mp3\nfile: http://radio.example/stream\nName: Radio\nOK\n";
    let entries = entries(&mut mock_reading(&[raw])).await.unwrap();
    match &entries[0] {
      Entry::Directory(d) => assert_eq!(d.artwork.as_deref(), Some("Jazz/Coltrane/")),
      other => panic!("expected directory, got {:?}", other),
    }
    match &entries[1] {
      Entry::Track(t) => assert_eq!(t.artwork.as_deref(), Some("Jazz/intro.mp3")),
      other => panic!("expected track, got {:?}", other),
    }
    match &entries[2] {
      Entry::Track(t) => {
        assert!(t.is_stream());
        assert_eq!(t.artwork, None);
      }
      other => panic!("expected track, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_idle_changes_and_update_id() {
    let raw: &[u8] = b"changed: player\nchanged: mixer\nchanged: unknown_thing\nOK\n";
    let changed = changes(&mut mock_reading(&[raw])).await.unwrap();
    assert_eq!(changed, vec![Subsystem::Player, Subsystem::Mixer]);

    let id = update_id(&mut mock_reading(&[b"updating_db: 3\nOK\n"])).await.unwrap();
    assert_eq!(id, Some(3));
  }

  #[test]
  fn test_number_pairs() {
    assert_eq!(parse_number_pair("7"), (7, None));
    assert_eq!(parse_number_pair("7/12"), (7, Some(12)));
    assert_eq!(parse_number_pair("7/"), (7, None));
    assert_eq!(parse_number_pair("7/x"), (7, None));
    assert_eq!(parse_number_pair("x/12"), (0, Some(12)));
  }
}
