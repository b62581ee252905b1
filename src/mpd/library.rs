//! Music database queries: albums, artists, tracks, search and updates.

use std::collections::HashSet;

use futures_util::FutureExt;

use super::capabilities::Capabilities;
use super::client::Mpd;
use super::error::{AckCode, MpdError};
use super::parser;
use super::protocol::{Command, CommandList};
use super::types::{Album, Artist, Entry, Track};

/// Which tag a search matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
  Track,
  Album,
  Artist,
  File,
  Any,
}

impl SearchKind {
  fn tag(self) -> &'static str {
    match self {
      SearchKind::Track => "title",
      SearchKind::Album => "album",
      SearchKind::Artist => "artist",
      SearchKind::File => "file",
      SearchKind::Any => "any",
    }
  }
}

/// A server that advertises grouping but rejects the arguments.
fn is_grouping_rejection(error: &MpdError) -> bool {
  matches!(
    error.ack().map(|ack| ack.code),
    Some(AckCode::Argument) | Some(AckCode::UnknownCommand)
  )
}

fn sort_albums(albums: &mut [Album]) {
  albums.sort_by_cached_key(|album| {
    (
      album.name.to_lowercase(),
      album
        .artist_sort
        .as_deref()
        .or(album.artist.as_deref())
        .map(str::to_lowercase),
    )
  });
}

fn sort_artists(artists: &mut [Artist]) {
  artists.sort_by_cached_key(Artist::sort_key);
}

fn sort_album_tracks(tracks: &mut [Track]) {
  tracks.sort_by_key(|track| (track.disc, track.track));
}

/// Distinct albums of `tracks`, in first-seen order.
pub(crate) fn albums_from_tracks(tracks: &[Track]) -> Vec<Album> {
  let mut seen = HashSet::new();
  let mut albums = Vec::new();
  for track in tracks {
    let Some(name) = &track.album else {
      continue;
    };
    let artist = track.album_artist_or_artist().map(str::to_string);
    if !seen.insert((name.clone(), artist.clone())) {
      continue;
    }
    albums.push(Album {
      name: name.clone(),
      artist,
      artist_sort: track
        .album_artist_sort
        .clone()
        .or_else(|| track.artist_sort.clone()),
      musicbrainz_id: track.musicbrainz_album_id.clone(),
      date: track.date.clone(),
    });
  }
  albums
}

fn album_list_command(caps: &Capabilities, filter: Option<&(&'static str, String)>) -> Command {
  let mut command = Command::new("list").arg("album");
  if let Some((tag, value)) = filter {
    command = command.arg(tag).arg(value);
  }
  if caps.list_grouping {
    command = command.arg("group").arg(caps.album_artist_tag());
    if caps.album_artist && caps.album_artist_sort {
      command = command.arg("group").arg("albumartistsort");
    } else if !caps.album_artist && caps.artist_sort {
      command = command.arg("group").arg("artistsort");
    }
    if caps.date {
      command = command.arg("group").arg("date");
    }
    if caps.musicbrainz {
      command = command.arg("group").arg("musicbrainz_albumid");
    }
  }
  command
}

fn artist_list_command(caps: &Capabilities, album_artists: bool) -> (Command, &'static str) {
  let (tag, sort_tag, id_tag, sort_supported) = if album_artists && caps.album_artist {
    (
      "albumartist",
      "albumartistsort",
      "musicbrainz_albumartistid",
      caps.album_artist_sort,
    )
  } else {
    ("artist", "artistsort", "musicbrainz_artistid", caps.artist_sort)
  };
  let mut command = Command::new("list").arg(tag);
  if caps.list_grouping {
    if sort_supported {
      command = command.arg("group").arg(sort_tag);
    }
    if caps.musicbrainz {
      command = command.arg("group").arg(id_tag);
    }
  }
  (command, tag)
}

impl Mpd {
  /// Run a grouped `list` query, downgrading once if the server rejects
  /// grouping it claims to support.
  async fn with_grouping_fallback<T, F, Fut>(&self, fetch: F) -> Result<T, MpdError>
  where
    F: Fn(std::sync::Arc<Capabilities>) -> Fut,
    Fut: std::future::Future<Output = Result<T, MpdError>>,
  {
    let caps = self.capabilities();
    let grouped = caps.list_grouping && !caps.alternate_server;
    match fetch(caps).await {
      Err(e) if grouped && is_grouping_rejection(&e) => {
        log::warn!("Server rejected list grouping ({}), retrying without", e);
        self.apply_alternate_server_workaround();
        fetch(self.capabilities()).await
      }
      result => result,
    }
  }

  async fn list_albums(&self, filter: Option<(&'static str, String)>) -> Result<Vec<Album>, MpdError> {
    self
      .with_grouping_fallback(|caps| {
        let command = album_list_command(&caps, filter.as_ref());
        let strategy = caps.grouping_strategy();
        let key = format!("albums:{}", command.to_line());
        async move {
          self
            .cached(key, move |t| {
              async move {
                t.execute(&command).await?;
                parser::albums(t, strategy).await
              }
              .boxed()
            })
            .await
        }
      })
      .await
  }

  /// Every album in the database.
  pub async fn albums(&self, sorted: bool) -> Result<Vec<Album>, MpdError> {
    let mut albums = self.list_albums(None).await?;
    if sorted {
      sort_albums(&mut albums);
    }
    Ok(albums)
  }

  /// Albums with at least one track below `path`.
  pub async fn albums_in_path(&self, path: &str, sorted: bool) -> Result<Vec<Album>, MpdError> {
    let tracks = self.tracks_in_path(path).await?;
    let mut albums = albums_from_tracks(&tracks);
    if sorted {
      sort_albums(&mut albums);
    }
    Ok(albums)
  }

  /// Albums credited to `artist` (album artist when the server indexes it).
  pub async fn albums_by_artist(&self, artist: &str, sorted: bool) -> Result<Vec<Album>, MpdError> {
    let caps = self.capabilities();
    let tag = caps.album_artist_tag();
    let mut albums = if caps.list_filtering {
      self.list_albums(Some((tag, artist.to_string()))).await?
    } else {
      let tracks = self.find(tag, artist).await?;
      albums_from_tracks(&tracks)
    };
    if sorted {
      sort_albums(&mut albums);
    }
    Ok(albums)
  }

  async fn list_artists(&self, album_artists: bool, sorted: bool) -> Result<Vec<Artist>, MpdError> {
    let mut artists = self
      .with_grouping_fallback(|caps| {
        let (command, tag) = artist_list_command(&caps, album_artists);
        let strategy = caps.grouping_strategy();
        let dedupe = caps.dedupe_artists();
        let key = format!("artists:{}", command.to_line());
        async move {
          self
            .cached(key, move |t| {
              async move {
                t.execute(&command).await?;
                let mut artists = parser::artists(t, tag, strategy).await?;
                if dedupe {
                  parser::dedupe_artists(&mut artists);
                }
                Ok(artists)
              }
              .boxed()
            })
            .await
        }
      })
      .await?;
    if sorted {
      sort_artists(&mut artists);
    }
    Ok(artists)
  }

  /// Every track artist.
  pub async fn artists(&self, sorted: bool) -> Result<Vec<Artist>, MpdError> {
    self.list_artists(false, sorted).await
  }

  /// Every album artist; plain artists on servers without the tag.
  pub async fn album_artists(&self, sorted: bool) -> Result<Vec<Artist>, MpdError> {
    self.list_artists(true, sorted).await
  }

  /// Exact-match `find <tag> <value>`.
  async fn find(&self, tag: &'static str, value: &str) -> Result<Vec<Track>, MpdError> {
    let command = Command::new("find").arg(tag).arg(value);
    self
      .cached(format!("tracks:{}", command.to_line()), move |t| {
        async move {
          t.execute(&command).await?;
          parser::tracks(t).await
        }
        .boxed()
      })
      .await
  }

  /// Tracks of an album, in disc and track order.
  pub async fn tracks_by_album(&self, album: &str) -> Result<Vec<Track>, MpdError> {
    let mut tracks = self.find("album", album).await?;
    sort_album_tracks(&mut tracks);
    Ok(tracks)
  }

  /// Tracks of one artist's album; the MusicBrainz id wins when known.
  pub async fn tracks_by_artist_album(
    &self,
    artist: &str,
    album: &str,
    musicbrainz_id: Option<&str>,
  ) -> Result<Vec<Track>, MpdError> {
    let caps = self.capabilities();
    let command = match musicbrainz_id {
      Some(id) if caps.musicbrainz => Command::new("find").arg("musicbrainz_albumid").arg(id),
      _ => Command::new("find")
        .arg(caps.album_artist_tag())
        .arg(artist)
        .arg("album")
        .arg(album),
    };
    let mut tracks = self
      .cached(format!("tracks:{}", command.to_line()), move |t| {
        async move {
          t.execute(&command).await?;
          parser::tracks(t).await
        }
        .boxed()
      })
      .await?;
    sort_album_tracks(&mut tracks);
    Ok(tracks)
  }

  /// Every track in the database.
  pub async fn all_tracks(&self) -> Result<Vec<Track>, MpdError> {
    self.tracks_in_path("").await
  }

  /// Every track below `path` (the whole database for `""`).
  pub async fn tracks_in_path(&self, path: &str) -> Result<Vec<Track>, MpdError> {
    let mut command = Command::new("listallinfo");
    if !path.is_empty() {
      command = command.arg(path);
    }
    self
      .cached(format!("tracks:{}", command.to_line()), move |t| {
        async move {
          t.execute(&command).await?;
          parser::tracks(t).await
        }
        .boxed()
      })
      .await
  }

  /// Directory listing; the root for `""`.
  pub async fn lsinfo(&self, path: &str) -> Result<Vec<Entry>, MpdError> {
    let mut command = Command::new("lsinfo");
    if !path.is_empty() {
      command = command.arg(path);
    }
    self
      .cached(format!("entries:{}", command.to_line()), move |t| {
        async move {
          t.execute(&command).await?;
          parser::entries(t).await
        }
        .boxed()
      })
      .await
  }

  /// Case-insensitive substring search.
  pub async fn search(&self, kind: SearchKind, query: &str) -> Result<Vec<Track>, MpdError> {
    let command = Command::new("search").arg(kind.tag()).arg(query);
    self
      .query(command.to_string(), move |t| {
        async move {
          t.execute(&command).await?;
          parser::tracks(t).await
        }
        .boxed()
      })
      .await
  }

  /// Append every match to the queue.
  pub async fn search_add(&self, kind: SearchKind, query: &str) -> Result<(), MpdError> {
    if self.capabilities().search_add {
      return self
        .send(Command::new("searchadd").arg(kind.tag()).arg(query))
        .await;
    }
    let tracks = self.search(kind, query).await?;
    let list: CommandList = tracks
      .iter()
      .map(|track| Command::new("add").arg(&track.path))
      .collect();
    self.send_list(list).await
  }

  /// Append every match and start playing the first one.
  pub async fn search_add_play(&self, kind: SearchKind, query: &str) -> Result<(), MpdError> {
    let first = self.status().await?.playlist_length;
    self.search_add(kind, query).await?;
    let added = self.status().await?.playlist_length;
    if added <= first {
      log::info!("Search for {:?} `{}` added nothing", kind, query);
      return Ok(());
    }
    self.play_index(first).await
  }

  /// Rescan `path` (everything when `None`); returns the update job id.
  pub async fn update(&self, path: Option<&str>) -> Result<Option<u32>, MpdError> {
    let mut command = Command::new("update");
    if let Some(path) = path {
      command = command.arg(path);
    }
    self
      .mutate(command.to_string(), move |t| {
        async move {
          t.execute(&command).await?;
          parser::update_id(t).await
        }
        .boxed()
      })
      .await
  }
}
