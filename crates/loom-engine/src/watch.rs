//! Per-run fan-out of snapshots to watchers.
//!
//! Every watcher owns an unbounded queue, so publishing never waits on a
//! watcher. Callback watchers drain their queue on a dedicated task; stream
//! watchers drain it through [`WatchStream`]. A callback that returns an error
//! or panics is pruned on its own task and the rest keep receiving.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::info;

use crate::state::RunState;

/// Error type returned by watch callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

struct Slot {
  sender: mpsc::UnboundedSender<Arc<RunState>>,
  cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct HubInner {
  watchers: HashMap<u64, Slot>,
  next_id: u64,
  /// Set once a terminal snapshot went out.
  closed: bool,
}

fn lock(inner: &Mutex<HubInner>) -> MutexGuard<'_, HubInner> {
  inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Multiplexes one run's snapshots to every current watcher.
///
/// Watchers only see snapshots published after they subscribe.
pub struct WatchHub {
  run_id: String,
  inner: Arc<Mutex<HubInner>>,
}

impl WatchHub {
  pub fn new(run_id: impl Into<String>) -> Self {
    Self {
      run_id: run_id.into(),
      inner: Arc::new(Mutex::new(HubInner::default())),
    }
  }

  /// Register a callback invoked with every later snapshot, in publish order.
  ///
  /// Must be called from within a tokio runtime. Subscribing to a closed hub
  /// returns a watcher that is already cancelled.
  pub fn subscribe<F>(&self, callback: F) -> Watcher
  where
    F: Fn(&RunState) -> Result<(), BoxError> + Send + Sync + 'static,
  {
    let Some((watcher, mut receiver)) = self.register() else {
      return Watcher::detached();
    };

    let run_id = self.run_id.clone();
    let cancelled = Arc::clone(&watcher.cancelled);
    let hub = Arc::downgrade(&self.inner);
    let watcher_id = watcher.id;

    tokio::spawn(async move {
      while let Some(snapshot) = receiver.recv().await {
        if cancelled.load(Ordering::Acquire) {
          break;
        }

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot.as_ref()))) {
          Ok(Ok(())) => None,
          Ok(Err(e)) => Some(e.to_string()),
          Err(_) => Some("watch callback panicked".to_string()),
        };

        if let Some(error) = failure {
          info!(run_id = %run_id, watcher_id, error = %error, "watcher_pruned");
          cancelled.store(true, Ordering::Release);
          remove(&hub, watcher_id);
          break;
        }
      }
    });

    watcher
  }

  /// Watch as a [`Stream`] of snapshots. Dropping the stream unsubscribes.
  ///
  /// The stream ends after the run's terminal snapshot.
  pub fn stream(&self) -> WatchStream {
    match self.register() {
      Some((watcher, receiver)) => WatchStream {
        watcher,
        receiver: Some(receiver),
      },
      None => WatchStream {
        watcher: Watcher::detached(),
        receiver: None,
      },
    }
  }

  /// Remove a watcher. Idempotent.
  pub fn unsubscribe(&self, watcher: &Watcher) {
    watcher.unsubscribe();
  }

  /// Queue a snapshot for every watcher.
  ///
  /// A terminal snapshot closes the hub: queued snapshots still drain, and no
  /// watcher is registered afterwards.
  pub fn publish(&self, snapshot: &RunState) {
    let mut inner = lock(&self.inner);
    if inner.closed {
      return;
    }

    let shared = Arc::new(snapshot.clone());
    inner
      .watchers
      .retain(|_, slot| slot.sender.send(Arc::clone(&shared)).is_ok());

    if snapshot.status.is_terminal() {
      inner.close();
    }
  }

  /// Stop accepting watchers and release the current ones.
  pub fn close(&self) {
    lock(&self.inner).close();
  }

  pub fn is_closed(&self) -> bool {
    lock(&self.inner).closed
  }

  pub fn watcher_count(&self) -> usize {
    lock(&self.inner).watchers.len()
  }

  fn register(&self) -> Option<(Watcher, mpsc::UnboundedReceiver<Arc<RunState>>)> {
    let mut inner = lock(&self.inner);
    if inner.closed {
      return None;
    }

    let (sender, receiver) = mpsc::unbounded_channel();
    let cancelled = Arc::new(AtomicBool::new(false));
    let id = inner.next_id;
    inner.next_id += 1;
    inner.watchers.insert(
      id,
      Slot {
        sender,
        cancelled: Arc::clone(&cancelled),
      },
    );

    let watcher = Watcher {
      id,
      cancelled,
      hub: Arc::downgrade(&self.inner),
    };
    Some((watcher, receiver))
  }
}

impl HubInner {
  fn close(&mut self) {
    self.closed = true;
    // Dropping the senders lets each receiver drain and then end.
    self.watchers.clear();
  }
}

fn remove(hub: &Weak<Mutex<HubInner>>, id: u64) {
  if let Some(inner) = hub.upgrade() {
    if let Some(slot) = lock(&inner).watchers.remove(&id) {
      slot.cancelled.store(true, Ordering::Release);
    }
  }
}

/// Subscription handle returned by [`WatchHub::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Watcher::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Watcher {
  id: u64,
  cancelled: Arc<AtomicBool>,
  hub: Weak<Mutex<HubInner>>,
}

impl Watcher {
  fn detached() -> Self {
    Self {
      id: u64::MAX,
      cancelled: Arc::new(AtomicBool::new(true)),
      hub: Weak::new(),
    }
  }

  /// Stop delivery to this watcher. Safe to call repeatedly and concurrently.
  pub fn unsubscribe(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      remove(&self.hub, self.id);
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }
}

/// Snapshots of one run as a [`Stream`].
pub struct WatchStream {
  watcher: Watcher,
  receiver: Option<mpsc::UnboundedReceiver<Arc<RunState>>>,
}

impl WatchStream {
  pub fn watcher(&self) -> &Watcher {
    &self.watcher
  }
}

impl Stream for WatchStream {
  type Item = RunState;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    let Some(receiver) = this.receiver.as_mut() else {
      return Poll::Ready(None);
    };
    if this.watcher.is_cancelled() {
      return Poll::Ready(None);
    }
    receiver
      .poll_recv(cx)
      .map(|item| item.map(Arc::unwrap_or_clone))
  }
}

impl Drop for WatchStream {
  fn drop(&mut self) {
    self.watcher.unsubscribe();
  }
}
