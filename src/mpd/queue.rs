//! The play queue and stored playlists.

use futures_util::FutureExt;

use super::capabilities::Capabilities;
use super::client::Mpd;
use super::error::MpdError;
use super::parser;
use super::protocol::{Command, CommandList};
use super::types::{Playlist, Track};

impl Mpd {
  /// Stored playlists.
  pub async fn playlists(&self) -> Result<Vec<Playlist>, MpdError> {
    self
      .cached("playlists".to_string(), |t| {
        async move {
          t.execute(&Command::new("listplaylists")).await?;
          parser::playlists(t).await
        }
        .boxed()
      })
      .await
  }

  /// Songs of a stored playlist.
  pub async fn playlist_tracks(&self, name: &str) -> Result<Vec<Track>, MpdError> {
    let command = Command::new("listplaylistinfo").arg(name);
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

  /// Save the queue as a stored playlist.
  pub async fn save_playlist(&self, name: &str) -> Result<(), MpdError> {
    self.send(Command::new("save").arg(name)).await
  }

  /// Append a stored playlist to the queue.
  pub async fn load_playlist(&self, name: &str) -> Result<(), MpdError> {
    self.send(Command::new("load").arg(name)).await
  }

  pub async fn remove_playlist(&self, name: &str) -> Result<(), MpdError> {
    self.send(Command::new("rm").arg(name)).await
  }

  /// Replace the queue with a stored playlist and start from its first song.
  pub async fn play_playlist(&self, name: &str) -> Result<(), MpdError> {
    let list: CommandList = [
      Command::new("clear"),
      Command::new("load").arg(name),
      Command::new("play").arg(0),
    ]
    .into_iter()
    .collect();
    self.send_list(list).await
  }

  /// Append a song to a stored playlist.
  pub async fn playlist_add(&self, name: &str, path: &str) -> Result<(), MpdError> {
    self.send(Command::new("playlistadd").arg(name).arg(path)).await
  }

  /// Remove the song at `pos` from a stored playlist.
  pub async fn playlist_remove(&self, name: &str, pos: u32) -> Result<(), MpdError> {
    self
      .send(Command::new("playlistdelete").arg(name).arg(pos))
      .await
  }

  /// The queue, or the `start..end` window of it.
  ///
  /// Servers without ranged `playlistinfo` return the whole queue and the
  /// window is cut client-side.
  pub async fn queue(&self, range: Option<(u32, u32)>) -> Result<Vec<Track>, MpdError> {
    let ranged = self.capabilities().ranged_playlist;
    let mut command = Command::new("playlistinfo");
    if let (Some((start, end)), true) = (range, ranged) {
      command = command.range(start, end);
    }
    let tracks: Vec<Track> = self
      .cached(format!("queue:{}", command.to_line()), move |t| {
        async move {
          t.execute(&command).await?;
          parser::tracks(t).await
        }
        .boxed()
      })
      .await?;

    match range {
      Some((start, end)) if !ranged => Ok(
        tracks
          .into_iter()
          .skip(start as usize)
          .take(end.saturating_sub(start) as usize)
          .collect(),
      ),
      _ => Ok(tracks),
    }
  }

  /// Append a song or directory to the queue.
  pub async fn add(&self, path: &str) -> Result<(), MpdError> {
    self.send(Command::new("add").arg(path)).await
  }

  /// Append several paths in one command list.
  pub async fn add_paths<I, P>(&self, paths: I) -> Result<(), MpdError>
  where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
  {
    let list: CommandList = paths
      .into_iter()
      .map(|path| Command::new("add").arg(path.as_ref()))
      .collect();
    self.send_list(list).await
  }

  /// Insert a song at `pos`; returns its queue id.
  pub async fn insert(&self, path: &str, pos: u32) -> Result<Option<u32>, MpdError> {
    let command = Command::new("addid").arg(path).arg(pos);
    self
      .mutate(command.to_string(), move |t| {
        async move {
          t.execute(&command).await?;
          let pairs = parser::pairs(t).await?;
          Ok(
            pairs
              .into_iter()
              .find(|(key, _)| key == "Id")
              .and_then(|(_, id)| id.parse().ok()),
          )
        }
        .boxed()
      })
      .await
  }

  /// Remove the song at `pos`.
  pub async fn remove(&self, pos: u32) -> Result<(), MpdError> {
    self.send(Command::new("delete").arg(pos)).await
  }

  /// Remove positions `start..end`.
  pub async fn remove_range(&self, start: u32, end: u32) -> Result<(), MpdError> {
    if end <= start {
      return Ok(());
    }
    self.send_list(remove_range_commands(&self.capabilities(), start, end)).await
  }

  /// Move the song at `from` to `to`.
  pub async fn move_track(&self, from: u32, to: u32) -> Result<(), MpdError> {
    self.send(Command::new("move").arg(from).arg(to)).await
  }

  pub async fn shuffle(&self) -> Result<(), MpdError> {
    self.send(Command::new("shuffle")).await
  }

  pub async fn clear(&self) -> Result<(), MpdError> {
    self.send(Command::new("clear")).await
  }
}

/// One ranged `delete`, or one `delete start` per song on older servers.
fn remove_range_commands(caps: &Capabilities, start: u32, end: u32) -> CommandList {
  if caps.ranged_delete {
    return std::iter::once(Command::new("delete").range(start, end)).collect();
  }
  // Positions shift down after each delete.
  (start..end)
    .map(|_| Command::new("delete").arg(start))
    .collect()
}
