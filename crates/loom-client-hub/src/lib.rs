//! Loom Client Hub
//!
//! A workflow-agnostic broadcast channel that tells connected UI clients that
//! something changed and they should re-fetch. Notices carry no payload.
//!
//! ```ignore
//! let hub = ClientHub::new();
//! let (handle, mut notices) = hub.connect();
//!
//! // elsewhere, after any mutation
//! hub.broadcast_refresh();
//!
//! while let Some(notice) = notices.recv().await {
//!     sse.write_all(notice.as_event_data().as_bytes()).await?;
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info};

/// A notice delivered to a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientNotice {
  /// Sent once, right after connecting.
  Connected,
  /// State changed somewhere; re-fetch.
  Refresh,
}

impl ClientNotice {
  pub fn as_str(&self) -> &'static str {
    match self {
      ClientNotice::Connected => "connected",
      ClientNotice::Refresh => "refresh",
    }
  }

  /// The notice as a server-sent event frame.
  pub fn as_event_data(&self) -> String {
    format!("data: {}\n\n", self.as_str())
  }
}

impl fmt::Display for ClientNotice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Identifies one connection to a [`ClientHub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(u64);

impl ClientHandle {
  pub fn id(&self) -> u64 {
    self.0
  }
}

/// Receiving half of a client connection.
pub type NoticeReceiver = mpsc::UnboundedReceiver<ClientNotice>;

/// Registry of connected UI clients.
#[derive(Debug, Default)]
pub struct ClientHub {
  clients: RwLock<HashMap<u64, mpsc::UnboundedSender<ClientNotice>>>,
  next_id: AtomicU64,
}

impl ClientHub {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a client. The receiver already holds [`ClientNotice::Connected`].
  pub fn connect(&self) -> (ClientHandle, NoticeReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    // The receiver is alive, so this cannot fail.
    let _ = sender.send(ClientNotice::Connected);

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .clients
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(id, sender);
    debug!(client_id = id, "client_connected");

    (ClientHandle(id), receiver)
  }

  /// Remove a client. Returns whether it was still connected.
  pub fn disconnect(&self, handle: ClientHandle) -> bool {
    self
      .clients
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&handle.0)
      .is_some()
  }

  /// Send [`ClientNotice::Refresh`] to every client and return how many got it.
  ///
  /// Clients whose receiver is gone are pruned instead of failing the broadcast.
  pub fn broadcast_refresh(&self) -> usize {
    let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
    let mut notified = 0;
    clients.retain(|id, sender| {
      if sender.send(ClientNotice::Refresh).is_ok() {
        notified += 1;
        true
      } else {
        info!(client_id = *id, "client_pruned");
        false
      }
    });
    notified
  }

  pub fn client_count(&self) -> usize {
    self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_broadcast_with_no_clients_returns_zero() {
    let hub = ClientHub::new();
    assert_eq!(hub.broadcast_refresh(), 0);
  }

  #[tokio::test]
  async fn test_connect_receives_connected_then_refresh() {
    let hub = ClientHub::new();
    let (_handle, mut notices) = hub.connect();

    assert_eq!(hub.broadcast_refresh(), 1);
    assert_eq!(notices.recv().await, Some(ClientNotice::Connected));
    assert_eq!(notices.recv().await, Some(ClientNotice::Refresh));
  }

  #[test]
  fn test_disconnect_is_idempotent() {
    let hub = ClientHub::new();
    let (handle, _notices) = hub.connect();

    assert!(hub.disconnect(handle));
    assert!(!hub.disconnect(handle));
    assert_eq!(hub.client_count(), 0);
    assert_eq!(hub.broadcast_refresh(), 0);
  }

  #[test]
  fn test_closed_clients_are_pruned() {
    let hub = ClientHub::new();
    let (_kept, _kept_rx) = hub.connect();
    let (_gone, gone_rx) = hub.connect();
    drop(gone_rx);

    assert_eq!(hub.broadcast_refresh(), 1);
    assert_eq!(hub.client_count(), 1);
  }

  #[test]
  fn test_event_data_frames() {
    assert_eq!(ClientNotice::Connected.as_event_data(), "data: connected\n\n");
    assert_eq!(ClientNotice::Refresh.as_event_data(), "data: refresh\n\n");
    assert_eq!(ClientNotice::Refresh.to_string(), "refresh");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_connect_and_broadcast() {
    let hub = std::sync::Arc::new(ClientHub::new());

    let tasks: Vec<_> = (0..32)
      .map(|i| {
        let hub = std::sync::Arc::clone(&hub);
        tokio::spawn(async move {
          let (handle, rx) = hub.connect();
          hub.broadcast_refresh();
          if i % 2 == 0 {
            hub.disconnect(handle);
          }
          rx
        })
      })
      .collect();

    let mut receivers = Vec::new();
    for task in tasks {
      receivers.push(task.await.unwrap());
    }

    assert_eq!(hub.client_count(), 16);
    assert_eq!(hub.broadcast_refresh(), 16);
  }
}
