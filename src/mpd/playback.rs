//! Transport controls, mixer, options and outputs.

use std::time::Duration;

use futures_util::FutureExt;

use super::client::Mpd;
use super::error::{MpdError, ProtocolError};
use super::parser;
use super::protocol::Command;
use super::types::{Output, Statistics, Status, Track};

fn flag(on: bool) -> u8 {
  u8::from(on)
}

impl Mpd {
  /// Fresh `status`, never served from the cache.
  pub async fn status(&self) -> Result<Status, MpdError> {
    self
      .query("status", |t| {
        async move {
          t.execute(&Command::new("status")).await?;
          parser::status(t).await
        }
        .boxed()
      })
      .await
  }

  pub async fn stats(&self) -> Result<Statistics, MpdError> {
    self
      .query("stats", |t| {
        async move {
          t.execute(&Command::new("stats")).await?;
          parser::statistics(t).await
        }
        .boxed()
      })
      .await
  }

  /// The song at the play position, if any.
  pub async fn current_song(&self) -> Result<Option<Track>, MpdError> {
    self
      .query("currentsong", |t| {
        async move {
          t.execute(&Command::new("currentsong")).await?;
          parser::track(t).await
        }
        .boxed()
      })
      .await
  }

  pub async fn play(&self) -> Result<(), MpdError> {
    self.send(Command::new("play")).await
  }

  /// Play the queue entry at `pos`.
  pub async fn play_index(&self, pos: u32) -> Result<(), MpdError> {
    self.send(Command::new("play").arg(pos)).await
  }

  /// Play `path`, queueing it first when it is not in the queue yet.
  pub async fn play_path(&self, path: &str) -> Result<(), MpdError> {
    if let Some(pos) = self.queue_position(path).await? {
      return self.play_index(pos).await;
    }
    match self.add_with_id(path).await? {
      Some(id) => self.send(Command::new("playid").arg(id)).await,
      None => Err(ProtocolError::Malformed("addid returned no Id".to_string()).into()),
    }
  }

  async fn queue_position(&self, path: &str) -> Result<Option<u32>, MpdError> {
    if !self.capabilities().playlist_find {
      let queue = self.queue(None).await?;
      return Ok(queue.into_iter().find(|t| t.path == path).and_then(|t| t.pos));
    }
    let command = Command::new("playlistfind").arg("file").arg(path);
    let found = self
      .query(command.to_string(), move |t| {
        async move {
          t.execute(&command).await?;
          parser::tracks(t).await
        }
        .boxed()
      })
      .await?;
    Ok(found.into_iter().next().and_then(|t| t.pos))
  }

  async fn add_with_id(&self, path: &str) -> Result<Option<u32>, MpdError> {
    let command = Command::new("addid").arg(path);
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

  pub async fn pause(&self) -> Result<(), MpdError> {
    self.send(Command::new("pause").arg(1)).await
  }

  pub async fn resume(&self) -> Result<(), MpdError> {
    self.send(Command::new("pause").arg(0)).await
  }

  pub async fn stop(&self) -> Result<(), MpdError> {
    self.send(Command::new("stop")).await
  }

  pub async fn next(&self) -> Result<(), MpdError> {
    self.send(Command::new("next")).await
  }

  pub async fn previous(&self) -> Result<(), MpdError> {
    self.send(Command::new("previous")).await
  }

  /// Seek within the current song.
  pub async fn seek(&self, position: Duration) -> Result<(), MpdError> {
    if self.capabilities().seek_current {
      return self
        .send(Command::new("seekcur").arg(format!("{:.3}", position.as_secs_f64())))
        .await;
    }
    let Some(song) = self.status().await?.song else {
      return Err(MpdError::NotSupported("seek while stopped"));
    };
    self
      .send(Command::new("seek").arg(song).arg(position.as_secs()))
      .await
  }

  /// Set the mixer volume, clamped to 100.
  pub async fn set_volume(&self, volume: u8) -> Result<(), MpdError> {
    self.send(Command::new("setvol").arg(volume.min(100))).await
  }

  /// Change the volume by `delta`, clamped to 0..=100; returns the new value.
  pub async fn step_volume(&self, delta: i32) -> Result<u8, MpdError> {
    let Some(current) = self.status().await?.volume else {
      return Err(MpdError::NotSupported("volume control without a mixer"));
    };
    let volume = (i32::from(current) + delta).clamp(0, 100) as u8;
    self.set_volume(volume).await?;
    Ok(volume)
  }

  pub async fn set_random(&self, on: bool) -> Result<(), MpdError> {
    self.send(Command::new("random").arg(flag(on))).await
  }

  pub async fn set_repeat(&self, on: bool) -> Result<(), MpdError> {
    self.send(Command::new("repeat").arg(flag(on))).await
  }

  pub async fn set_single(&self, on: bool) -> Result<(), MpdError> {
    self.send(Command::new("single").arg(flag(on))).await
  }

  pub async fn set_consume(&self, on: bool) -> Result<(), MpdError> {
    self.send(Command::new("consume").arg(flag(on))).await
  }

  /// Flip random mode; returns the new setting.
  pub async fn toggle_random(&self) -> Result<bool, MpdError> {
    let on = !self.status().await?.random;
    self.set_random(on).await?;
    Ok(on)
  }

  pub async fn toggle_repeat(&self) -> Result<bool, MpdError> {
    let on = !self.status().await?.repeat;
    self.set_repeat(on).await?;
    Ok(on)
  }

  pub async fn toggle_single(&self) -> Result<bool, MpdError> {
    let on = !self.status().await?.single;
    self.set_single(on).await?;
    Ok(on)
  }

  pub async fn toggle_consume(&self) -> Result<bool, MpdError> {
    let on = !self.status().await?.consume;
    self.set_consume(on).await?;
    Ok(on)
  }

  /// Audio outputs.
  pub async fn outputs(&self) -> Result<Vec<Output>, MpdError> {
    self
      .query("outputs", |t| {
        async move {
          t.execute(&Command::new("outputs")).await?;
          parser::outputs(t).await
        }
        .boxed()
      })
      .await
  }

  pub async fn enable_output(&self, id: u32) -> Result<(), MpdError> {
    self.send(Command::new("enableoutput").arg(id)).await
  }

  pub async fn disable_output(&self, id: u32) -> Result<(), MpdError> {
    self.send(Command::new("disableoutput").arg(id)).await
  }

  /// Flip an output; older servers get an explicit enable or disable.
  pub async fn toggle_output(&self, id: u32) -> Result<(), MpdError> {
    if self.capabilities().toggle_output {
      return self.send(Command::new("toggleoutput").arg(id)).await;
    }
    let outputs = self.outputs().await?;
    match outputs.iter().find(|output| output.id == id) {
      Some(output) if output.enabled => self.disable_output(id).await,
      Some(_) => self.enable_output(id).await,
      None => Err(MpdError::NotSupported("toggle of an unknown output")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpd::client::tests::{caps_at, mpd_over};
  use crate::mpd::types::PlayState;
  use tokio_test::io::Builder;

  #[tokio::test]
  async fn test_status_and_current_song() {
    let mock = Builder::new()
      .write(b"status\n")
      .read(b"volume: 80\nstate: play\nsong: 2\nsongid: 13\nelapsed: 12.500\nduration: 200.000\nOK\n")
      .write(b"currentsong\n")
      .read(b"OK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 23, 0), &[], &[]));
    let status = mpd.status().await.unwrap();
    assert_eq!(status.state, PlayState::Playing);
    assert_eq!(status.elapsed, Duration::from_millis(12_500));
    assert_eq!(mpd.current_song().await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_seek_current() {
    let mock = Builder::new()
      .write(b"seekcur 61.250\n")
      .read(b"OK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 17, 0), &[], &[]));
    mpd.seek(Duration::from_millis(61_250)).await.unwrap();
  }

  #[tokio::test]
  async fn test_seek_on_old_server_uses_song_position() {
    let mock = Builder::new()
      .write(b"status\n")
      .read(b"state: play\nsong: 4\nOK\n")
      .write(b"seek 4 61\n")
      .read(b"OK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 16, 0), &[], &[]));
    mpd.seek(Duration::from_millis(61_250)).await.unwrap();
  }

  #[tokio::test]
  async fn test_step_volume_clamps() {
    let mock = Builder::new()
      .write(b"status\n")
      .read(b"volume: 95\nOK\n")
      .write(b"setvol 100\n")
      .read(b"OK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 23, 0), &[], &[]));
    assert_eq!(mpd.step_volume(10).await.unwrap(), 100);
  }

  #[tokio::test]
  async fn test_step_volume_without_mixer() {
    let mock = Builder::new()
      .write(b"status\n")
      .read(b"volume: -1\nOK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 23, 0), &[], &[]));
    assert!(matches!(
      mpd.step_volume(5).await,
      Err(MpdError::NotSupported(_))
    ));
  }

  #[tokio::test]
  async fn test_toggle_random() {
    let mock = Builder::new()
      .write(b"status\n")
      .read(b"random: 0\nOK\n")
      .write(b"random 1\n")
      .read(b"OK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 23, 0), &[], &[]));
    assert!(mpd.toggle_random().await.unwrap());
  }

  #[tokio::test]
  async fn test_toggle_output_fallback() {
    let mock = Builder::new()
      .write(b"outputs\n")
      .read(b"outputid: 0\noutputname: ALSA\noutputenabled: 1\noutputid: 1\noutputname: HTTP\noutputenabled: 0\nOK\n")
      .write(b"enableoutput 1\n")
      .read(b"OK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 17, 0), &[], &[]));
    mpd.toggle_output(1).await.unwrap();
  }

  #[tokio::test]
  async fn test_toggle_output_native() {
    let mock = Builder::new()
      .write(b"toggleoutput 0\n")
      .read(b"OK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 18, 0), &[], &[]));
    mpd.toggle_output(0).await.unwrap();
  }

  #[tokio::test]
  async fn test_play_path_already_queued() {
    let mock = Builder::new()
      .write(b"playlistfind file b.flac\n")
      .read(b"file: b.flac\nPos: 1\nId: 2\nOK\n")
      .write(b"play 1\n")
      .read(b"OK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 23, 0), &["playlistfind"], &[]));
    mpd.play_path("b.flac").await.unwrap();
  }

  #[tokio::test]
  async fn test_play_path_not_queued_without_playlistfind() {
    let mock = Builder::new()
      .write(b"playlistinfo\n")
      .read(b"file: a.flac\nPos: 0\nId: 1\nOK\n")
      .write(b"addid z.flac\n")
      .read(b"Id: 9\nOK\n")
      .write(b"playid 9\n")
      .read(b"OK\n")
      .build();
    let mpd = mpd_over(mock, caps_at((0, 23, 0), &[], &[]));
    mpd.play_path("z.flac").await.unwrap();
  }
}
