//! Cover art fetched in chunks over `albumart` and `readpicture`.

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use super::client::Mpd;
use super::error::{AckCode, MpdError};
use super::parser;
use super::protocol::Command;
use super::transport::Link;
use super::types::{Album, Playlist};

/// A complete picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artwork {
  pub mime_type: Option<String>,
  pub data: Vec<u8>,
}

/// Request chunks of `verb` until the announced size is reached.
///
/// `None` when the server has no picture for `path`.
async fn fetch_picture(t: &mut Link, verb: &'static str, path: &str) -> Result<Option<Artwork>, MpdError> {
  let mut data: Vec<u8> = Vec::new();
  let mut mime_type = None;

  loop {
    t.execute(&Command::new(verb).arg(path).arg(data.len())).await?;
    let chunk = match parser::binary_chunk(t).await {
      Ok(Some(chunk)) => chunk,
      Ok(None) if data.is_empty() => return Ok(None),
      Ok(None) => break,
      Err(e) if e.ack().map(|ack| ack.code) == Some(AckCode::NoExist) => return Ok(None),
      Err(e) => return Err(e),
    };

    if mime_type.is_none() {
      mime_type = chunk.mime_type;
    }
    let done = chunk.data.is_empty() || data.len() + chunk.data.len() >= chunk.total_size;
    data.extend_from_slice(&chunk.data);
    if done {
      break;
    }
  }

  log::debug!("Fetched {} bytes of artwork for {} via {}", data.len(), path, verb);
  Ok(Some(Artwork { mime_type, data }))
}

impl Mpd {
  /// Cover for a track: the directory's cover file first, then embedded art.
  pub async fn artwork(&self, path: &str) -> Result<Option<Artwork>, MpdError> {
    let caps = self.capabilities();
    let mut verbs = Vec::with_capacity(2);
    if caps.album_art {
      verbs.push("albumart");
    }
    if caps.read_picture {
      verbs.push("readpicture");
    }
    if verbs.is_empty() {
      return Err(MpdError::NotSupported("albumart"));
    }

    let path = path.to_string();
    self
      .query(format!("artwork {}", path), move |t| {
        async move {
          for verb in verbs {
            if let Some(artwork) = fetch_picture(t, verb, &path).await? {
              return Ok(Some(artwork));
            }
          }
          Ok(None)
        }
        .boxed()
      })
      .await
  }

  /// Cover for an album, taken from its first track.
  pub async fn album_artwork(&self, album: &Album) -> Result<Option<Artwork>, MpdError> {
    let tracks = match &album.artist {
      Some(artist) => {
        self
          .tracks_by_artist_album(artist, &album.name, album.musicbrainz_id.as_deref())
          .await?
      }
      None => self.tracks_by_album(&album.name).await?,
    };
    match tracks.first() {
      Some(track) => self.artwork(&track.path).await,
      None => Ok(None),
    }
  }

  /// Cover for a stored playlist, taken from its first entry with a reference.
  pub async fn playlist_artwork(&self, playlist: &Playlist) -> Result<Option<Artwork>, MpdError> {
    if let Some(reference) = &playlist.artwork {
      return self.artwork(reference).await;
    }
    let tracks = self.playlist_tracks(&playlist.path).await?;
    match tracks.iter().find_map(|t| t.artwork.as_deref()) {
      Some(reference) => self.artwork(reference).await,
      None => Ok(None),
    }
  }
}
