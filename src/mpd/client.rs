//! Connection context and supervisor.
//!
//! [`Mpd`] is a cheap, cloneable handle holding everything one connection
//! needs: settings, dispatcher, capability snapshot and result cache. The verb
//! surface lives in the `library`, `queue`, `playback` and `artwork` modules as
//! further `impl Mpd` blocks. [`MpdClient`] adds the state monitor, the idle
//! listener and automatic reconnection on top.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::cache::ResultCache;
use super::capabilities::Capabilities;
use super::dispatcher::{ConnectionEvent, Dispatcher, Lane};
use super::error::MpdError;
use super::idle::IdleListener;
use super::monitor::{MonitorSettings, StateMonitor, StatusSource};
use super::parser;
use super::protocol::{Command, CommandList, Subsystem};
use super::transport::{Link, Transport};
use super::types::{Status, Track};
use crate::config::ClientConfig;

/// Backoff between reconnect attempts, in seconds.
const RECONNECT_DELAYS: &[u64] = &[1, 2, 5, 10, 30, 60];

/// Open a socket to the configured endpoint.
pub(crate) async fn open_link(config: &ClientConfig) -> Result<Link, MpdError> {
  match &config.socket_path {
    Some(path) => Link::connect_socket(path, config.connect_timeout(), config.read_timeout()).await,
    None => {
      Link::connect_tcp(
        &config.host,
        config.port,
        config.connect_timeout(),
        config.read_timeout(),
      )
      .await
    }
  }
}

/// Send `password` if one is configured.
pub(crate) async fn authenticate<S>(t: &mut Transport<S>, password: Option<&str>) -> Result<(), MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  if let Some(password) = password {
    t.execute(&Command::new("password").arg(password)).await?;
    t.finish().await?;
  }
  Ok(())
}

/// Greeting, authentication and capability discovery on a fresh stream.
pub(crate) async fn negotiate<S>(t: &mut Transport<S>, config: &ClientConfig) -> Result<Capabilities, MpdError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let version = t.handshake().await?;
  authenticate(t, config.password.as_deref()).await?;

  t.execute(&Command::new("commands")).await?;
  let commands = parser::values(t, "command").await?;
  t.execute(&Command::new("tagtypes")).await?;
  let tags = parser::values(t, "tagtype").await?;

  log::debug!(
    "Server offers {} commands and {} tag types",
    commands.len(),
    tags.len()
  );
  Ok(Capabilities::derive(version, &commands, &tags, &config.thresholds))
}

async fn open_session(config: &ClientConfig) -> Result<(Link, Capabilities), MpdError> {
  let mut link = open_link(config).await?;
  let capabilities = negotiate(&mut link, config).await?;
  Ok((link, capabilities))
}

struct MpdInner {
  config: ClientConfig,
  dispatcher: Dispatcher,
  cache: ResultCache,
  capabilities: RwLock<Arc<Capabilities>>,
}

/// Handle to one MPD connection.
#[derive(Clone)]
pub struct Mpd {
  inner: Arc<MpdInner>,
}

impl Mpd {
  /// Connect, authenticate and negotiate capabilities.
  pub async fn connect(config: ClientConfig) -> Result<Self, MpdError> {
    config.validate().map_err(MpdError::Config)?;
    log::info!("Connecting to MPD at {}", config.endpoint());
    let (link, capabilities) = open_session(&config).await?;
    log::info!("MPD client connected (protocol {})", capabilities.version);
    Ok(Self::from_parts(link, capabilities, config))
  }

  /// Wrap an already negotiated link.
  pub fn from_parts(link: Link, capabilities: Capabilities, config: ClientConfig) -> Self {
    let dispatcher = Dispatcher::new(Some(link), config.pool_size);
    Self {
      inner: Arc::new(MpdInner {
        config,
        dispatcher,
        cache: ResultCache::new(),
        capabilities: RwLock::new(Arc::new(capabilities)),
      }),
    }
  }

  pub fn config(&self) -> &ClientConfig {
    &self.inner.config
  }

  /// Current capability snapshot.
  pub fn capabilities(&self) -> Arc<Capabilities> {
    self.inner.capabilities.read().clone()
  }

  /// Switch to the workarounds for divergent server implementations.
  pub fn apply_alternate_server_workaround(&self) {
    let mut capabilities = self.inner.capabilities.write();
    if capabilities.alternate_server {
      return;
    }
    *capabilities = Arc::new(capabilities.with_alternate_server_workarounds());
    drop(capabilities);
    self.inner.cache.bump();
  }

  /// Make every cached result stale.
  pub fn invalidate_cache(&self) {
    self.inner.cache.bump();
  }

  /// Open a new connection and swap it in.
  ///
  /// The alternate-server workaround survives the reconnect.
  pub async fn reconnect(&self) -> Result<(), MpdError> {
    let (link, mut capabilities) = open_session(&self.inner.config).await?;
    if self.capabilities().alternate_server {
      capabilities = capabilities.with_alternate_server_workarounds();
    }
    *self.inner.capabilities.write() = Arc::new(capabilities);
    self.inner.dispatcher.replace_link(link).await;
    self.inner.cache.bump();
    log::info!("Reconnected to MPD at {}", self.inner.config.endpoint());
    Ok(())
  }

  /// Drop the connection; verbs fail with `Disconnected` until a reconnect.
  pub async fn disconnect(&self) {
    self.inner.dispatcher.drop_link().await;
  }

  pub async fn is_connected(&self) -> bool {
    self.inner.dispatcher.is_connected().await
  }

  /// Connection lifecycle events.
  pub fn events(&self) -> Receiver<ConnectionEvent> {
    self.inner.dispatcher.events()
  }

  /// Stop the dispatcher.
  pub fn shutdown(&self) {
    self.inner.dispatcher.shutdown();
  }

  pub(crate) fn cache(&self) -> &ResultCache {
    &self.inner.cache
  }

  pub(crate) async fn run<T, F>(&self, lane: Lane, label: impl Into<String>, f: F) -> Result<T, MpdError>
  where
    T: Send + 'static,
    F: for<'t> FnOnce(&'t mut Link) -> BoxFuture<'t, Result<T, MpdError>> + Send + 'static,
  {
    self.inner.dispatcher.submit(lane, label, f).await
  }

  /// Read-only request, eligible for the worker pool.
  pub(crate) async fn query<T, F>(&self, label: impl Into<String>, f: F) -> Result<T, MpdError>
  where
    T: Send + 'static,
    F: for<'t> FnOnce(&'t mut Link) -> BoxFuture<'t, Result<T, MpdError>> + Send + 'static,
  {
    self.run(Lane::Pool, label, f).await
  }

  /// Request that changes the queue or database; bumps the cache on success.
  pub(crate) async fn mutate<T, F>(&self, label: impl Into<String>, f: F) -> Result<T, MpdError>
  where
    T: Send + 'static,
    F: for<'t> FnOnce(&'t mut Link) -> BoxFuture<'t, Result<T, MpdError>> + Send + 'static,
  {
    let result = self.run(Lane::Serial, label, f).await?;
    self.inner.cache.bump();
    Ok(result)
  }

  /// Send a command whose response carries no records.
  pub(crate) async fn send(&self, command: Command) -> Result<(), MpdError> {
    let lane = if command.is_read_only() {
      Lane::Pool
    } else {
      Lane::Serial
    };
    let mutation = command.is_mutation();
    self
      .run(lane, command.to_string(), move |t| {
        async move {
          t.execute(&command).await?;
          t.finish().await
        }
        .boxed()
      })
      .await?;
    if mutation {
      self.inner.cache.bump();
    }
    Ok(())
  }

  /// Send a command list as one cycle.
  pub(crate) async fn send_list(&self, list: CommandList) -> Result<(), MpdError> {
    if list.is_empty() {
      return Ok(());
    }
    let mutation = list.is_mutation();
    let label = format!("command list ({})", list.len());
    self
      .run(Lane::Serial, label, move |t| {
        async move {
          t.execute_list(&list).await?;
          t.finish().await
        }
        .boxed()
      })
      .await?;
    if mutation {
      self.inner.cache.bump();
    }
    Ok(())
  }

  /// Serve `key` from the cache, or fetch it and cache the result.
  pub(crate) async fn cached<T, F>(&self, key: String, f: F) -> Result<T, MpdError>
  where
    T: Clone + Send + Sync + 'static,
    F: for<'t> FnOnce(&'t mut Link) -> BoxFuture<'t, Result<T, MpdError>> + Send + 'static,
  {
    if let Some(value) = self.inner.cache.get::<T>(&key) {
      log::debug!("Cache hit: {}", key);
      return Ok(value);
    }
    let generation = self.inner.cache.generation();
    let value = self.query(key.clone(), f).await?;
    self.inner.cache.put_at(generation, key, value.clone());
    Ok(value)
  }

  /// Commands this connection may run.
  pub async fn commands(&self) -> Result<Vec<String>, MpdError> {
    self
      .query("commands", |t| {
        async move {
          t.execute(&Command::new("commands")).await?;
          parser::values(t, "command").await
        }
        .boxed()
      })
      .await
  }

  /// Tag types the server indexes.
  pub async fn tag_types(&self) -> Result<Vec<String>, MpdError> {
    self
      .query("tagtypes", |t| {
        async move {
          t.execute(&Command::new("tagtypes")).await?;
          parser::values(t, "tagtype").await
        }
        .boxed()
      })
      .await
  }

  pub async fn ping(&self) -> Result<(), MpdError> {
    self.send(Command::new("ping")).await
  }
}

#[async_trait]
impl StatusSource for Mpd {
  async fn fetch_status(&self) -> Result<Status, MpdError> {
    self.status().await
  }

  async fn fetch_current_track(&self) -> Result<Option<Track>, MpdError> {
    self.current_song().await
  }
}

/// Long-lived client: connection, state monitor, idle push and reconnects.
pub struct MpdClient {
  mpd: Mpd,
  monitor: Arc<StateMonitor>,
  cancel: CancellationToken,
}

impl MpdClient {
  /// Connect and start background synchronization.
  pub async fn connect(config: ClientConfig) -> Result<Self, MpdError> {
    let mpd = Mpd::connect(config).await?;
    Ok(Self::start(mpd))
  }

  /// Start background synchronization around an existing handle.
  pub fn start(mpd: Mpd) -> Self {
    let settings = MonitorSettings::from(mpd.config());
    let monitor = Arc::new(StateMonitor::start(Arc::new(mpd.clone()), settings));
    let cancel = CancellationToken::new();

    monitor.connected();
    Self::start_supervisor(mpd.clone(), monitor.clone(), cancel.clone());
    if mpd.config().idle_enabled && mpd.capabilities().idle {
      Self::start_idle_listener(&mpd, &monitor, &cancel);
    } else {
      log::info!("Idle push disabled, relying on periodic resync");
    }

    Self {
      mpd,
      monitor,
      cancel,
    }
  }

  pub fn mpd(&self) -> &Mpd {
    &self.mpd
  }

  pub fn monitor(&self) -> &StateMonitor {
    &self.monitor
  }

  fn start_idle_listener(mpd: &Mpd, monitor: &StateMonitor, cancel: &CancellationToken) {
    let handle = mpd.clone();
    let push = monitor.push_handle();
    IdleListener::spawn(
      mpd.config().clone(),
      move |changed: &[Subsystem]| {
        if changed.iter().any(Subsystem::invalidates_cache) {
          handle.invalidate_cache();
        }
        if changed.iter().any(|s| Subsystem::PLAYBACK.contains(s)) {
          push.push();
        }
      },
      cancel.child_token(),
    );
  }

  /// Watch for connection loss and reconnect with backoff.
  fn start_supervisor(mpd: Mpd, monitor: Arc<StateMonitor>, cancel: CancellationToken) {
    let events = mpd.events();
    tokio::spawn(async move {
      loop {
        let event = tokio::select! {
          _ = cancel.cancelled() => break,
          event = events.recv() => event,
        };
        let Ok(ConnectionEvent::Lost(reason)) = event else {
          break;
        };

        log::warn!("MPD connection lost: {}", reason);
        monitor.disconnected();

        if Self::reconnect_with_backoff(&mpd, &cancel).await {
          monitor.connected();
        } else if !cancel.is_cancelled() {
          log::error!("Giving up reconnecting to {}", mpd.config().endpoint());
          break;
        }
      }
      log::debug!("MPD supervisor stopped");
    });
  }

  async fn reconnect_with_backoff(mpd: &Mpd, cancel: &CancellationToken) -> bool {
    let retries = mpd.config().reconnect_retries as usize;
    for attempt in 0..retries {
      let delay = RECONNECT_DELAYS[attempt.min(RECONNECT_DELAYS.len() - 1)];
      log::info!(
        "Attempting MPD reconnection in {} seconds (attempt {})",
        delay,
        attempt + 1
      );
      tokio::select! {
        _ = cancel.cancelled() => return false,
        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
      }
      match mpd.reconnect().await {
        Ok(()) => return true,
        Err(e) => log::error!("MPD reconnection failed: {}", e),
      }
    }
    false
  }

  /// Stop background tasks and the dispatcher.
  pub fn shutdown(&self) {
    log::info!("MPD client shutting down");
    self.cancel.cancel();
    self.monitor.stop();
    self.mpd.shutdown();
  }
}

impl Drop for MpdClient {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}
