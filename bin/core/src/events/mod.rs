//! In-process typed pub/sub of domain events.
//!
//! Handlers for one published event run concurrently on spawned
//! tasks. A handler error (or panic) is logged and never reaches the
//! publisher or the other handlers. Delivery is best-effort with no
//! persistence queue.

use std::{
  collections::HashMap,
  sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
  },
};

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;
use windflow_client::entities::{windflow_id, windflow_timestamp};

pub mod bridge;

/// Closed set of domain event kinds carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  DeploymentCreated,
  DeploymentStarted,
  DeploymentCompleted,
  DeploymentFailed,
  /// Internal retry bookkeeping, not bridged to sockets.
  DeploymentRetryAttempted,
  DeploymentStatusChanged,
  DeploymentLogsUpdate,
  DeploymentProgress,
  AuthLoginSuccess,
  AuthLogout,
  SessionExpired,
  SessionAuthRequired,
  SessionPermissionChanged,
  SessionOrganizationChanged,
  NotificationSystem,
  NotificationUser,
  NotificationDeployment,
  UiNavigationRequest,
  UiModalDisplay,
  UiToastDisplay,
  UiWorkflowStep,
}

#[derive(Debug, Clone)]
pub struct Event {
  pub id: String,
  pub kind: EventKind,
  pub payload: Value,
  pub timestamp: i64,
  pub user_id: Option<String>,
}

impl Event {
  pub fn new(kind: EventKind, payload: Value) -> Event {
    Event {
      id: windflow_id(),
      kind,
      payload,
      timestamp: windflow_timestamp(),
      user_id: None,
    }
  }

  pub fn with_user(mut self, user_id: Option<String>) -> Event {
    self.user_id = user_id;
    self
  }
}

pub type EventHandler = Arc<
  dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>>
    + Send
    + Sync,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct EventBus {
  handlers: Mutex<HashMap<EventKind, Vec<(HandlerId, EventHandler)>>>,
  next_id: AtomicU64,
}

impl EventBus {
  pub fn new() -> EventBus {
    Default::default()
  }

  pub fn subscribe(
    &self,
    kind: EventKind,
    handler: EventHandler,
  ) -> HandlerId {
    let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self
      .handlers
      .lock()
      .expect("event bus lock poisoned")
      .entry(kind)
      .or_default()
      .push((id, handler));
    id
  }

  pub fn unsubscribe(&self, kind: EventKind, id: HandlerId) {
    if let Some(handlers) = self
      .handlers
      .lock()
      .expect("event bus lock poisoned")
      .get_mut(&kind)
    {
      handlers.retain(|(handler_id, _)| *handler_id != id);
    }
  }

  /// Dispatches `event` to every subscribed handler on its own task.
  /// Returns once the handlers are spawned, not once they complete.
  pub fn publish(&self, event: Event) {
    let handlers: Vec<EventHandler> = {
      let handlers =
        self.handlers.lock().expect("event bus lock poisoned");
      match handlers.get(&event.kind) {
        Some(list) => {
          list.iter().map(|(_, handler)| handler.clone()).collect()
        }
        None => return,
      }
    };
    for handler in handlers {
      let event = event.clone();
      let kind = event.kind;
      tokio::spawn(async move {
        if let Err(e) = handler(event).await {
          error!("event handler for {kind:?} failed | {e:#}");
        }
      });
    }
  }
}

/// Wraps an async closure into the boxed handler shape.
pub fn handler<F, Fut>(f: F) -> EventHandler
where
  F: Fn(Event) -> Fut + Send + Sync + 'static,
  Fut: std::future::Future<Output = anyhow::Result<()>>
    + Send
    + 'static,
{
  Arc::new(move |event| Box::pin(f(event)))
}
