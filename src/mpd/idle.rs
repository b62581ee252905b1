//! Push notifications over a dedicated `idle` connection.
//!
//! The command connection never enters `idle`; a second socket waits for
//! `changed: <subsystem>` lines and hands them to a callback.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::{authenticate, open_link};
use super::error::{MpdError, TransportError};
use super::parser;
use super::protocol::{Command, Subsystem};
use super::transport::{Link, Transport};
use crate::config::ClientConfig;

/// Backoff between idle reconnects, in seconds.
const RECONNECT_DELAYS: &[u64] = &[1, 2, 5, 10, 30, 60];

/// Re-enter `idle` after this long without news.
const IDLE_REFRESH: Duration = Duration::from_secs(300);

fn idle_command() -> Command {
  Subsystem::PLAYBACK
    .iter()
    .chain(std::iter::once(&Subsystem::StoredPlaylist))
    .fold(Command::new("idle"), |command, subsystem| command.arg(subsystem.as_str()))
}

/// Background task turning server pushes into callbacks.
pub struct IdleListener;

impl IdleListener {
  /// Spawn the listener; it reconnects on its own until `cancel` fires.
  pub fn spawn<F>(config: ClientConfig, on_change: F, cancel: CancellationToken) -> JoinHandle<()>
  where
    F: Fn(&[Subsystem]) + Send + Sync + 'static,
  {
    tokio::spawn(async move {
      let mut attempt: usize = 0;
      loop {
        match Self::connect(&config).await {
          Ok(mut link) => {
            log::info!("MPD idle listener connected");
            attempt = 0;
            match Self::listen(&mut link, &on_change, &cancel).await {
              Ok(()) => break,
              Err(e) => log::warn!("MPD idle connection lost: {}", e),
            }
          }
          Err(e) => log::warn!("MPD idle connection failed: {}", e),
        }

        let delay = RECONNECT_DELAYS[attempt.min(RECONNECT_DELAYS.len() - 1)];
        attempt += 1;
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
        }
      }
      log::info!("MPD idle listener stopped");
    })
  }

  async fn connect(config: &ClientConfig) -> Result<Link, MpdError> {
    let mut link = open_link(config).await?;
    link.handshake().await?;
    authenticate(&mut link, config.password.as_deref()).await?;
    link.set_read_timeout(IDLE_REFRESH);
    Ok(link)
  }

  /// Loop over `idle` until cancelled (`Ok`) or the connection fails.
  pub(crate) async fn listen<S, F>(
    t: &mut Transport<S>,
    on_change: &F,
    cancel: &CancellationToken,
  ) -> Result<(), MpdError>
  where
    S: AsyncRead + AsyncWrite + Unpin,
    F: Fn(&[Subsystem]),
  {
    let idle = idle_command();
    loop {
      t.execute(&idle).await?;
      let outcome = tokio::select! {
        _ = cancel.cancelled() => None,
        changed = parser::changes(t) => Some(changed),
      };

      let changed = match outcome {
        Some(Ok(changed)) => changed,
        Some(Err(MpdError::Transport(TransportError::Timeout))) => {
          log::debug!("No idle events for {:?}, refreshing", IDLE_REFRESH);
          Self::leave_idle(t).await?
        }
        Some(Err(e)) => return Err(e),
        None => {
          let changed = Self::leave_idle(t).await?;
          Self::report(&changed, on_change);
          return Ok(());
        }
      };
      Self::report(&changed, on_change);
    }
  }

  /// `noidle` makes the server answer the pending `idle` right away.
  async fn leave_idle<S>(t: &mut Transport<S>) -> Result<Vec<Subsystem>, MpdError>
  where
    S: AsyncRead + AsyncWrite + Unpin,
  {
    t.write_line("noidle").await?;
    parser::changes(t).await
  }

  fn report<F: Fn(&[Subsystem])>(changed: &[Subsystem], on_change: &F) {
    if changed.is_empty() {
      return;
    }
    log::debug!("MPD idle: {:?} changed", changed);
    on_change(changed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpd::transport::tests::TIMEOUT;
  use parking_lot::Mutex;
  use tokio_test::io::Builder;

  const IDLE_LINE: &[u8] = b"idle player mixer playlist options output update database stored_playlist\n";

  #[test]
  fn test_idle_command_subsystems() {
    assert_eq!(
      idle_command().to_line().into_bytes(),
      IDLE_LINE[..IDLE_LINE.len() - 1].to_vec()
    );
  }

  #[tokio::test]
  async fn test_changes_reach_callback_until_cancelled() {
    let mock = Builder::new()
      .write(IDLE_LINE)
      .read(b"changed: player\nchanged: mixer\nOK\n")
      .write(IDLE_LINE)
      .write(b"noidle\n")
      .read(b"OK\n")
      .build();
    let mut t = Transport::new(mock, TIMEOUT);
    let cancel = CancellationToken::new();
    let seen = Mutex::new(Vec::new());

    let on_change = |changed: &[Subsystem]| {
      seen.lock().push(changed.to_vec());
      cancel.cancel();
    };
    IdleListener::listen(&mut t, &on_change, &cancel).await.unwrap();

    assert_eq!(
      *seen.lock(),
      vec![vec![Subsystem::Player, Subsystem::Mixer]]
    );
  }

  #[tokio::test]
  async fn test_connection_loss_is_reported() {
    let mock = Builder::new().write(IDLE_LINE).read(b"changed: pla").build();
    let mut t = Transport::new(mock, TIMEOUT);
    let cancel = CancellationToken::new();
    let err = IdleListener::listen(&mut t, &|_: &[Subsystem]| {}, &cancel)
      .await
      .unwrap_err();
    assert!(err.is_transport());
  }
}
