//! Command dispatcher serializing access to the shared connection.
//!
//! Verbs are queued as [`PendingAction`]s. One serial loop runs them in
//! submission order; read-only verbs may instead go to a small pool of
//! workers. Every action holds the transport lock for its whole
//! write-and-parse cycle, so two requests never interleave on the wire.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_channel::{Receiver, Sender};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::error::{MpdError, ProtocolError, TransportError};
use super::transport::Link;

/// Where an action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
  /// The single in-order consumer.
  Serial,
  /// The worker pool; falls back to `Serial` when the pool is empty.
  Pool,
}

/// Lifecycle of a queued verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbState {
  Queued,
  Executing,
  Completed,
  Failed,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
  /// The transport failed; the reason is for diagnostics.
  Lost(String),
}

/// How an action left the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
  Completed,
  /// Typed failure, stream still aligned (e.g. `ACK`, not supported).
  Failed,
  /// The stream position is unknown and must be resynchronized.
  Desynced,
  TransportLost,
}

impl Outcome {
  fn of<T>(result: &Result<T, MpdError>) -> Self {
    match result {
      Ok(_) => Outcome::Completed,
      Err(MpdError::Transport(_)) => Outcome::TransportLost,
      Err(MpdError::Protocol(ProtocolError::Ack(_))) => Outcome::Failed,
      Err(MpdError::Protocol(_)) | Err(MpdError::ContractViolation(_)) => Outcome::Desynced,
      Err(_) => Outcome::Failed,
    }
  }
}

type Job = Box<dyn for<'t> FnOnce(Option<&'t mut Link>) -> BoxFuture<'t, Outcome> + Send>;

fn job<F>(f: F) -> Job
where
  F: for<'t> FnOnce(Option<&'t mut Link>) -> BoxFuture<'t, Outcome> + Send + 'static,
{
  Box::new(f)
}

/// A queued verb and its result sink.
pub struct PendingAction {
  id: u64,
  label: String,
  state: VerbState,
  job: Job,
}

impl PendingAction {
  fn transition(&mut self, state: VerbState) {
    log::debug!(
      "Verb #{} `{}`: {:?} -> {:?}",
      self.id,
      self.label,
      self.state,
      state
    );
    self.state = state;
  }

  /// Run against the shared link and report the final state.
  async fn run(
    mut self,
    link: &Mutex<Option<Link>>,
    event_tx: &Sender<ConnectionEvent>,
  ) -> VerbState {
    let mut guard = link.lock().await;
    self.transition(VerbState::Executing);

    let had_link = guard.is_some();
    // A panicking decoder leaves the stream position unknown; treat it as a lost link.
    let outcome = match AssertUnwindSafe((self.job)(guard.as_mut())).catch_unwind().await {
      Ok(outcome) => outcome,
      Err(_) => {
        log::error!("Verb #{} `{}` panicked", self.id, self.label);
        Outcome::TransportLost
      }
    };
    let final_state = match outcome {
      Outcome::Completed => VerbState::Completed,
      _ => VerbState::Failed,
    };

    match outcome {
      Outcome::TransportLost if had_link => {
        log::error!("MPD transport lost while running `{}`", self.label);
        guard.take();
        let _ = event_tx.try_send(ConnectionEvent::Lost(format!("failed during `{}`", self.label)));
      }
      Outcome::Desynced => {
        if let Some(transport) = guard.as_mut() {
          log::warn!("Resynchronizing stream after malformed response to `{}`", self.label);
          if let Err(e) = transport.recover().await {
            log::error!("MPD stream recovery failed: {}", e);
            guard.take();
            let _ = event_tx.try_send(ConnectionEvent::Lost(e.to_string()));
          }
        }
      }
      _ => {}
    }

    log::debug!("Verb #{} `{}`: Executing -> {:?}", self.id, self.label, final_state);
    final_state
  }
}

/// Result of a submitted verb.
///
/// Resolves to `Disconnected` if the dispatcher shut down before running it.
pub struct Ticket<T> {
  rx: oneshot::Receiver<Result<T, MpdError>>,
}

impl<T> Future for Ticket<T> {
  type Output = Result<T, MpdError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.rx)
      .poll(cx)
      .map(|result| result.unwrap_or_else(|_| Err(TransportError::Disconnected.into())))
  }
}

/// Background executor for verbs against one connection.
pub struct Dispatcher {
  link: Arc<Mutex<Option<Link>>>,
  serial_tx: Sender<PendingAction>,
  pool_tx: Sender<PendingAction>,
  pool_size: usize,
  event_rx: Receiver<ConnectionEvent>,
  next_id: AtomicU64,
  _handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
  /// Spawn the serial loop and `pool_size` workers around `link`.
  pub fn new(link: Option<Link>, pool_size: usize) -> Self {
    let link = Arc::new(Mutex::new(link));
    let (event_tx, event_rx) = async_channel::unbounded();
    let (serial_tx, serial_rx) = async_channel::unbounded::<PendingAction>();
    let (pool_tx, pool_rx) = async_channel::unbounded::<PendingAction>();

    let mut handles = Vec::with_capacity(pool_size + 1);
    handles.push(tokio::spawn(Self::consumer_loop(
      "serial".to_string(),
      serial_rx,
      link.clone(),
      event_tx.clone(),
    )));
    for n in 0..pool_size {
      handles.push(tokio::spawn(Self::consumer_loop(
        format!("pool-{}", n),
        pool_rx.clone(),
        link.clone(),
        event_tx.clone(),
      )));
    }

    Self {
      link,
      serial_tx,
      pool_tx,
      pool_size,
      event_rx,
      next_id: AtomicU64::new(1),
      _handles: handles,
    }
  }

  async fn consumer_loop(
    name: String,
    rx: Receiver<PendingAction>,
    link: Arc<Mutex<Option<Link>>>,
    event_tx: Sender<ConnectionEvent>,
  ) {
    log::debug!("MPD dispatcher {} started", name);
    while let Ok(action) = rx.recv().await {
      action.run(&link, &event_tx).await;
    }
    log::debug!("MPD dispatcher {} stopped", name);
  }

  /// Queue a verb. `f` gets exclusive use of the transport for one cycle.
  pub fn submit<T, F>(&self, lane: Lane, label: impl Into<String>, f: F) -> Ticket<T>
  where
    T: Send + 'static,
    F: for<'t> FnOnce(&'t mut Link) -> BoxFuture<'t, Result<T, MpdError>> + Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    let action = PendingAction {
      id: self.next_id.fetch_add(1, Ordering::Relaxed),
      label: label.into(),
      state: VerbState::Queued,
      job: job(move |link| {
        async move {
          let result = match link {
            Some(transport) => f(transport).await,
            None => Err(TransportError::Disconnected.into()),
          };
          let outcome = Outcome::of(&result);
          // The caller may have stopped waiting; a late result is dropped.
          let _ = tx.send(result);
          outcome
        }
        .boxed()
      }),
    };

    let queue = match lane {
      Lane::Pool if self.pool_size > 0 => &self.pool_tx,
      _ => &self.serial_tx,
    };
    log::debug!("Verb #{} `{}` queued on {:?} lane", action.id, action.label, lane);
    if queue.try_send(action).is_err() {
      log::warn!("MPD dispatcher is shut down, rejecting verb");
    }
    Ticket { rx }
  }

  /// Like [`Dispatcher::submit`], delivering the result to `callback`.
  ///
  /// The callback runs on a runtime worker thread, not the caller's.
  pub fn submit_with_callback<T, F, C>(&self, lane: Lane, label: impl Into<String>, f: F, callback: C)
  where
    T: Send + 'static,
    F: for<'t> FnOnce(&'t mut Link) -> BoxFuture<'t, Result<T, MpdError>> + Send + 'static,
    C: FnOnce(Result<T, MpdError>) + Send + 'static,
  {
    let ticket = self.submit(lane, label, f);
    tokio::spawn(async move {
      callback(ticket.await);
    });
  }

  /// Install a fresh transport after a reconnect.
  pub async fn replace_link(&self, link: Link) {
    *self.link.lock().await = Some(link);
  }

  /// Drop the transport; queued verbs fail with `Disconnected`.
  pub async fn drop_link(&self) {
    self.link.lock().await.take();
  }

  pub async fn is_connected(&self) -> bool {
    self.link.lock().await.is_some()
  }

  /// Connection lifecycle events.
  pub fn events(&self) -> Receiver<ConnectionEvent> {
    self.event_rx.clone()
  }

  /// Stop accepting verbs; workers exit once their queues drain.
  pub fn shutdown(&self) {
    log::info!("MPD dispatcher shutting down");
    self.serial_tx.close();
    self.pool_tx.close();
  }
}

impl Drop for Dispatcher {
  fn drop(&mut self) {
    self.serial_tx.close();
    self.pool_tx.close();
  }
}
