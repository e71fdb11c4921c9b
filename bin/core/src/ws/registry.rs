//! In-memory index from users, event kinds and deployments to open
//! WebSocket handles.
//!
//! Each socket is represented by a sender handle feeding the socket's
//! writer task. Broadcasts snapshot the relevant handles under the
//! lock, send outside the lock, and evict any handle whose channel is
//! closed in a second locked pass. A socket therefore receives each
//! broadcast at most once, and a dead socket is dropped from every
//! index on its first failed send.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
  },
};

use tokio::sync::mpsc;
use windflow_client::ws::{WsEnvelope, WsEventType};

#[derive(Clone)]
pub struct SocketHandle {
  id: u64,
  tx: mpsc::UnboundedSender<WsEnvelope>,
}

impl SocketHandle {
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Queues a frame on the socket's writer. Err means the writer is
  /// gone and the socket should be evicted.
  pub fn send(&self, envelope: WsEnvelope) -> Result<(), ()> {
    self.tx.send(envelope).map_err(|_| ())
  }
}

#[derive(Default)]
struct RegistryInner {
  user_connections: HashMap<String, Vec<SocketHandle>>,
  user_subscriptions: HashMap<String, HashSet<WsEventType>>,
  deployment_subscribers: HashMap<String, HashSet<String>>,
  deployment_connections: HashMap<String, Vec<SocketHandle>>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
  inner: Mutex<RegistryInner>,
  next_socket_id: AtomicU64,
}

impl ConnectionRegistry {
  pub fn new() -> ConnectionRegistry {
    Default::default()
  }

  /// Allocates a socket handle and the receiver its writer task
  /// drains.
  pub fn create_socket(
    &self,
  ) -> (SocketHandle, mpsc::UnboundedReceiver<WsEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SocketHandle {
      id: self.next_socket_id.fetch_add(1, Ordering::Relaxed),
      tx,
    };
    (handle, rx)
  }

  pub fn add_connection(&self, user_id: &str, handle: SocketHandle) {
    self
      .lock()
      .user_connections
      .entry(user_id.to_string())
      .or_default()
      .push(handle);
  }

  /// Removes one socket. Empty entries (and the user's
  /// subscriptions) are dropped with the last socket.
  pub fn remove_connection(&self, user_id: &str, socket_id: u64) {
    let mut inner = self.lock();
    if let Some(sockets) = inner.user_connections.get_mut(user_id) {
      sockets.retain(|socket| socket.id != socket_id);
      if sockets.is_empty() {
        inner.user_connections.remove(user_id);
        inner.user_subscriptions.remove(user_id);
        for subscribers in inner.deployment_subscribers.values_mut()
        {
          subscribers.remove(user_id);
        }
        inner
          .deployment_subscribers
          .retain(|_, subscribers| !subscribers.is_empty());
      }
    }
  }

  pub fn subscribe(&self, user_id: &str, kind: WsEventType) {
    self
      .lock()
      .user_subscriptions
      .entry(user_id.to_string())
      .or_default()
      .insert(kind);
  }

  pub fn unsubscribe(&self, user_id: &str, kind: WsEventType) {
    let mut inner = self.lock();
    if let Some(kinds) = inner.user_subscriptions.get_mut(user_id) {
      kinds.remove(&kind);
      if kinds.is_empty() {
        inner.user_subscriptions.remove(user_id);
      }
    }
  }

  pub fn subscribe_deployment(
    &self,
    user_id: &str,
    deployment_id: &str,
  ) {
    self
      .lock()
      .deployment_subscribers
      .entry(deployment_id.to_string())
      .or_default()
      .insert(user_id.to_string());
  }

  pub fn add_deployment_connection(
    &self,
    deployment_id: &str,
    handle: SocketHandle,
  ) {
    self
      .lock()
      .deployment_connections
      .entry(deployment_id.to_string())
      .or_default()
      .push(handle);
  }

  pub fn remove_deployment_connection(
    &self,
    deployment_id: &str,
    socket_id: u64,
  ) {
    let mut inner = self.lock();
    if let Some(sockets) =
      inner.deployment_connections.get_mut(deployment_id)
    {
      sockets.retain(|socket| socket.id != socket_id);
      if sockets.is_empty() {
        inner.deployment_connections.remove(deployment_id);
      }
    }
  }

  pub fn broadcast_to_user(&self, user_id: &str, msg: &WsEnvelope) {
    let sockets = {
      let inner = self.lock();
      inner
        .user_connections
        .get(user_id)
        .cloned()
        .unwrap_or_default()
    };
    self.send_all(sockets, msg);
  }

  pub fn broadcast_to_event_subscribers(
    &self,
    kind: WsEventType,
    msg: &WsEnvelope,
  ) {
    let sockets = {
      let inner = self.lock();
      let mut sockets = Vec::new();
      for (user_id, kinds) in &inner.user_subscriptions {
        if kinds.contains(&kind)
          && let Some(user_sockets) =
            inner.user_connections.get(user_id)
        {
          sockets.extend(user_sockets.iter().cloned());
        }
      }
      sockets
    };
    self.send_all(sockets, msg);
  }

  pub fn broadcast_deployment_log_to_subscribers(
    &self,
    deployment_id: &str,
    msg: &WsEnvelope,
  ) {
    let sockets = {
      let inner = self.lock();
      let Some(subscribers) =
        inner.deployment_subscribers.get(deployment_id)
      else {
        return;
      };
      let mut sockets = Vec::new();
      for user_id in subscribers {
        if let Some(user_sockets) =
          inner.user_connections.get(user_id)
        {
          sockets.extend(user_sockets.iter().cloned());
        }
      }
      sockets
    };
    self.send_all(sockets, msg);
  }

  /// Sockets on the logs-only endpoint for one deployment.
  pub fn broadcast_to_deployment(
    &self,
    deployment_id: &str,
    msg: &WsEnvelope,
  ) {
    let sockets = {
      let inner = self.lock();
      inner
        .deployment_connections
        .get(deployment_id)
        .cloned()
        .unwrap_or_default()
    };
    self.send_all(sockets, msg);
  }

  fn send_all(&self, sockets: Vec<SocketHandle>, msg: &WsEnvelope) {
    let mut dead = Vec::new();
    for socket in sockets {
      if socket.send(msg.clone()).is_err() {
        dead.push(socket.id);
      }
    }
    if !dead.is_empty() {
      self.evict(&dead);
    }
  }

  /// Drops dead sockets from every index.
  fn evict(&self, socket_ids: &[u64]) {
    let mut inner = self.lock();
    inner.user_connections.retain(|_, sockets| {
      sockets.retain(|socket| !socket_ids.contains(&socket.id));
      !sockets.is_empty()
    });
    inner.deployment_connections.retain(|_, sockets| {
      sockets.retain(|socket| !socket_ids.contains(&socket.id));
      !sockets.is_empty()
    });
    let connected: HashSet<String> =
      inner.user_connections.keys().cloned().collect();
    inner
      .user_subscriptions
      .retain(|user_id, _| connected.contains(user_id));
    inner.deployment_subscribers.retain(|_, subscribers| {
      subscribers.retain(|user_id| connected.contains(user_id));
      !subscribers.is_empty()
    });
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
    self.inner.lock().expect("connection registry lock poisoned")
  }

  #[cfg(test)]
  fn user_socket_count(&self, user_id: &str) -> usize {
    self
      .lock()
      .user_connections
      .get(user_id)
      .map(|sockets| sockets.len())
      .unwrap_or(0)
  }
}
