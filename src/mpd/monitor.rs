//! Playback state synchronization.
//!
//! The monitor keeps a local copy of the server status fresh without polling
//! on every tick. A resync reads `status` and `currentsong`; between resyncs the
//! elapsed time is interpolated from the monotonic clock. A resync happens on
//! connect, on push signals from the idle listener and whenever the idle budget
//! of ticks runs out.
//!
//! ```text
//! Disconnected --connected()--> Resynchronizing --ok--> Interpolating
//!      ^                          ^     |                 |
//!      |                          |     +--error, retry   | push / budget
//!      +--disconnected()----------+-----------------------+
//! ```
//!
//! A resync that finds playback paused or stopped lands in `Idle` instead of
//! `Interpolating`: ticks are not delivered, but still spend the idle budget.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::error::MpdError;
use super::types::{Status, Track};
use crate::config::ClientConfig;

/// Where the monitor reads server state from.
#[async_trait]
pub trait StatusSource: Send + Sync {
  async fn fetch_status(&self) -> Result<Status, MpdError>;
  async fn fetch_current_track(&self) -> Result<Option<Track>, MpdError>;
}

/// Receives every delivered status, interpolated or fresh.
pub trait StatusListener: Send + Sync {
  fn status_changed(&self, status: &Status);
}

/// Receives the current song when it changes; `None` when nothing is current.
pub trait TrackListener: Send + Sync {
  fn track_changed(&self, track: Option<&Track>);
}

/// Receives the mixer volume when it changes.
pub trait VolumeListener: Send + Sync {
  fn volume_changed(&self, volume: Option<u8>);
}

impl<F: Fn(&Status) + Send + Sync> StatusListener for F {
  fn status_changed(&self, status: &Status) {
    self(status)
  }
}

impl<F: Fn(Option<&Track>) + Send + Sync> TrackListener for F {
  fn track_changed(&self, track: Option<&Track>) {
    self(track)
  }
}

impl<F: Fn(Option<u8>) + Send + Sync> VolumeListener for F {
  fn volume_changed(&self, volume: Option<u8>) {
    self(volume)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
  Disconnected,
  Resynchronizing,
  Interpolating,
  /// Connected while paused or stopped; ticks only count down the idle budget.
  Idle,
}

/// Timing of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
  pub tick_interval: Duration,
  /// Ticks without a server read before a resync is forced.
  pub idle_budget: u32,
  /// Delay before a failed resync is retried.
  pub resync_interval: Duration,
}

impl Default for MonitorSettings {
  fn default() -> Self {
    Self {
      tick_interval: Duration::from_secs(1),
      idle_budget: 30,
      resync_interval: Duration::from_secs(2),
    }
  }
}

impl From<&ClientConfig> for MonitorSettings {
  fn from(config: &ClientConfig) -> Self {
    Self {
      tick_interval: config.tick_interval(),
      idle_budget: config.idle_budget.max(1),
      resync_interval: config.resync_interval(),
    }
  }
}

type TrackKey = Option<(Option<u32>, String)>;

fn track_key(track: Option<&Track>) -> TrackKey {
  track.map(|t| (t.id, t.path.clone()))
}

struct Shared {
  state: MonitorState,
  status: Option<Status>,
  /// Instant of the last resync and the elapsed time the server reported then.
  anchor: Option<(Instant, Duration)>,
  ticks_since_sync: u32,
  track: Option<Track>,
  track_delivered: bool,
  last_volume: Option<Option<u8>>,
}

impl Shared {
  fn new() -> Self {
    Self {
      state: MonitorState::Disconnected,
      status: None,
      anchor: None,
      ticks_since_sync: 0,
      track: None,
      track_delivered: false,
      last_volume: None,
    }
  }

  /// Advance the elapsed time of a playing status; `None` if nothing moved.
  fn interpolate(&mut self, now: Instant) -> Option<Status> {
    let (at, elapsed) = self.anchor?;
    let status = self.status.as_mut()?;
    if !status.is_playing() {
      return None;
    }
    let mut position = elapsed + now.saturating_duration_since(at);
    if !status.duration.is_zero() {
      position = position.min(status.duration);
    }
    status.elapsed = position;
    Some(status.clone())
  }
}

#[derive(Default)]
struct Listeners {
  status: Vec<Arc<dyn StatusListener>>,
  track: Vec<Arc<dyn TrackListener>>,
  volume: Vec<Arc<dyn VolumeListener>>,
}

struct MonitorInner {
  source: Arc<dyn StatusSource>,
  settings: MonitorSettings,
  shared: Mutex<Shared>,
  listeners: RwLock<Listeners>,
  trigger_tx: Sender<()>,
}

impl MonitorInner {
  fn request_resync(&self) {
    let _ = self.trigger_tx.try_send(());
  }

  fn on_tick(&self) {
    let (emit, resync) = {
      let mut shared = self.shared.lock();
      if !matches!(shared.state, MonitorState::Interpolating | MonitorState::Idle) {
        return;
      }
      shared.ticks_since_sync += 1;
      if shared.ticks_since_sync >= self.settings.idle_budget {
        log::debug!(
          "Idle budget of {} ticks spent, forcing resync",
          self.settings.idle_budget
        );
        shared.state = MonitorState::Resynchronizing;
        (None, true)
      } else if shared.state == MonitorState::Interpolating {
        (shared.interpolate(Instant::now()), false)
      } else {
        (None, false)
      }
    };

    if resync {
      self.request_resync();
    }
    if let Some(status) = emit {
      self.notify_status(&status);
    }
  }

  async fn resync(&self) -> Result<(), MpdError> {
    let status = self.source.fetch_status().await?;
    let track = self.source.fetch_current_track().await?;

    let (volume_changed, track_changed) = {
      let mut shared = self.shared.lock();
      if shared.state == MonitorState::Disconnected {
        return Ok(());
      }
      shared.anchor = Some((Instant::now(), status.elapsed));
      shared.ticks_since_sync = 0;
      shared.state = if status.is_playing() {
        MonitorState::Interpolating
      } else {
        MonitorState::Idle
      };

      let volume_changed = shared.last_volume != Some(status.volume);
      shared.last_volume = Some(status.volume);

      let track_changed =
        !shared.track_delivered || track_key(shared.track.as_ref()) != track_key(track.as_ref());
      shared.track_delivered = true;
      shared.track = track.clone();
      shared.status = Some(status.clone());
      (volume_changed, track_changed)
    };

    log::debug!(
      "Resynchronized: {:?} at {:?}, queue version {}",
      status.state,
      status.elapsed,
      status.playlist_version
    );
    self.notify_status(&status);
    if volume_changed {
      self.notify_volume(status.volume);
    }
    if track_changed {
      self.notify_track(track.as_ref());
    }
    Ok(())
  }

  fn notify_status(&self, status: &Status) {
    let listeners = self.listeners.read().status.clone();
    for listener in listeners {
      listener.status_changed(status);
    }
  }

  fn notify_track(&self, track: Option<&Track>) {
    let listeners = self.listeners.read().track.clone();
    for listener in listeners {
      listener.track_changed(track);
    }
  }

  fn notify_volume(&self, volume: Option<u8>) {
    let listeners = self.listeners.read().volume.clone();
    for listener in listeners {
      listener.volume_changed(volume);
    }
  }
}

/// Keeps playback status, current track and volume in sync with the server.
pub struct StateMonitor {
  inner: Arc<MonitorInner>,
  cancel: CancellationToken,
}

impl StateMonitor {
  /// Spawn the tick and resync tasks. The monitor starts disconnected.
  pub fn start(source: Arc<dyn StatusSource>, settings: MonitorSettings) -> Self {
    let (trigger_tx, trigger_rx) = async_channel::unbounded();
    let inner = Arc::new(MonitorInner {
      source,
      settings,
      shared: Mutex::new(Shared::new()),
      listeners: RwLock::new(Listeners::default()),
      trigger_tx,
    });
    let cancel = CancellationToken::new();

    tokio::spawn(Self::tick_loop(inner.clone(), cancel.clone()));
    tokio::spawn(Self::resync_loop(inner.clone(), trigger_rx, cancel.clone()));

    Self { inner, cancel }
  }

  async fn tick_loop(inner: Arc<MonitorInner>, cancel: CancellationToken) {
    let period = inner.settings.tick_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => inner.on_tick(),
      }
    }
    log::debug!("State monitor tick task stopped");
  }

  async fn resync_loop(inner: Arc<MonitorInner>, trigger_rx: Receiver<()>, cancel: CancellationToken) {
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        trigger = trigger_rx.recv() => {
          if trigger.is_err() {
            break;
          }
        }
      }
      // Coalesce bursts of push signals into one read.
      while trigger_rx.try_recv().is_ok() {}

      if inner.shared.lock().state == MonitorState::Disconnected {
        continue;
      }
      if let Err(e) = inner.resync().await {
        if e.is_transport() {
          log::warn!("Resync failed, connection unavailable: {}", e);
        } else {
          log::warn!("Resync returned no usable data, retrying: {}", e);
        }
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(inner.settings.resync_interval) => inner.request_resync(),
        }
      }
    }
    log::debug!("State monitor resync task stopped");
  }

  /// The connection is up; read fresh state.
  pub fn connected(&self) {
    {
      let mut shared = self.inner.shared.lock();
      shared.state = MonitorState::Resynchronizing;
      shared.ticks_since_sync = 0;
    }
    log::info!("State monitor resynchronizing");
    self.inner.request_resync();
  }

  /// The connection is gone; reset listeners to an empty state.
  pub fn disconnected(&self) {
    let (had_volume, was_connected) = {
      let mut shared = self.inner.shared.lock();
      let was_connected = shared.state != MonitorState::Disconnected;
      let had_volume = matches!(shared.last_volume, Some(Some(_)));
      *shared = Shared::new();
      (had_volume, was_connected)
    };
    if !was_connected {
      return;
    }

    log::info!("State monitor disconnected");
    self.inner.notify_status(&Status::default());
    self.inner.notify_track(None);
    if had_volume {
      self.inner.notify_volume(None);
    }
  }

  /// Server pushed a change; resync now unless disconnected.
  pub fn push(&self) {
    if self.state() == MonitorState::Disconnected {
      return;
    }
    self.inner.request_resync();
  }

  /// Handle for the idle listener.
  pub fn push_handle(&self) -> PushHandle {
    PushHandle {
      inner: self.inner.clone(),
    }
  }

  pub fn state(&self) -> MonitorState {
    self.inner.shared.lock().state
  }

  /// Last delivered status, interpolated.
  pub fn status(&self) -> Option<Status> {
    self.inner.shared.lock().status.clone()
  }

  pub fn current_track(&self) -> Option<Track> {
    self.inner.shared.lock().track.clone()
  }

  pub fn add_status_listener(&self, listener: Arc<dyn StatusListener>) {
    self.inner.listeners.write().status.push(listener);
  }

  pub fn add_track_listener(&self, listener: Arc<dyn TrackListener>) {
    self.inner.listeners.write().track.push(listener);
  }

  pub fn add_volume_listener(&self, listener: Arc<dyn VolumeListener>) {
    self.inner.listeners.write().volume.push(listener);
  }

  /// Stop both tasks.
  pub fn stop(&self) {
    self.cancel.cancel();
  }
}

impl Drop for StateMonitor {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// Cloneable trigger for push-driven resyncs.
#[derive(Clone)]
pub struct PushHandle {
  inner: Arc<MonitorInner>,
}

impl PushHandle {
  pub fn push(&self) {
    if self.inner.shared.lock().state != MonitorState::Disconnected {
      self.inner.request_resync();
    }
  }
}
