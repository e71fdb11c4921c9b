//! Bridge between the event bus and the WebSocket layer.
//!
//! The fixed table below is the only path from domain events onto
//! sockets: at startup one handler is subscribed per mapped kind,
//! and each handler forwards a `{ type, data, timestamp }` envelope
//! through the connection registry.

use std::sync::Arc;

use windflow_client::ws::{WsEnvelope, WsEventType};

use super::{Event, EventBus, EventKind, handler};
use crate::ws::registry::ConnectionRegistry;

/// Domain event kind -> outbound WebSocket event kind.
/// Unmapped kinds (eg retry bookkeeping) stay internal.
pub fn event_mapping(kind: EventKind) -> Option<WsEventType> {
  let mapped = match kind {
    EventKind::DeploymentCreated
    | EventKind::DeploymentStarted
    | EventKind::DeploymentCompleted
    | EventKind::DeploymentFailed
    | EventKind::DeploymentStatusChanged => {
      WsEventType::DeploymentStatusChanged
    }
    EventKind::DeploymentLogsUpdate => {
      WsEventType::DeploymentLogsUpdate
    }
    EventKind::DeploymentProgress => WsEventType::DeploymentProgress,
    EventKind::AuthLoginSuccess => WsEventType::AuthLoginSuccess,
    EventKind::AuthLogout => WsEventType::AuthLogout,
    EventKind::SessionExpired => WsEventType::SessionExpired,
    EventKind::SessionAuthRequired => {
      WsEventType::SessionAuthRequired
    }
    EventKind::SessionPermissionChanged => {
      WsEventType::SessionPermissionChanged
    }
    EventKind::SessionOrganizationChanged => {
      WsEventType::SessionOrganizationChanged
    }
    EventKind::NotificationSystem => WsEventType::NotificationSystem,
    EventKind::NotificationUser => WsEventType::NotificationUser,
    EventKind::NotificationDeployment => {
      WsEventType::NotificationDeployment
    }
    EventKind::UiNavigationRequest => {
      WsEventType::UiNavigationRequest
    }
    EventKind::UiModalDisplay => WsEventType::UiModalDisplay,
    EventKind::UiToastDisplay => WsEventType::UiToastDisplay,
    EventKind::UiWorkflowStep => WsEventType::UiWorkflowStep,
    EventKind::DeploymentRetryAttempted => return None,
  };
  Some(mapped)
}

const MAPPED_KINDS: &[EventKind] = &[
  EventKind::DeploymentCreated,
  EventKind::DeploymentStarted,
  EventKind::DeploymentCompleted,
  EventKind::DeploymentFailed,
  EventKind::DeploymentStatusChanged,
  EventKind::DeploymentLogsUpdate,
  EventKind::DeploymentProgress,
  EventKind::AuthLoginSuccess,
  EventKind::AuthLogout,
  EventKind::SessionExpired,
  EventKind::SessionAuthRequired,
  EventKind::SessionPermissionChanged,
  EventKind::SessionOrganizationChanged,
  EventKind::NotificationSystem,
  EventKind::NotificationUser,
  EventKind::NotificationDeployment,
  EventKind::UiNavigationRequest,
  EventKind::UiModalDisplay,
  EventKind::UiToastDisplay,
  EventKind::UiWorkflowStep,
];

/// Subscribes the forwarding handlers. Call once at startup, after
/// the registry exists and before the orchestrator starts publishing.
pub fn setup_event_bridge(
  bus: &EventBus,
  registry: Arc<ConnectionRegistry>,
) {
  for kind in MAPPED_KINDS {
    let registry = registry.clone();
    bus.subscribe(
      *kind,
      handler(move |event| {
        let registry = registry.clone();
        async move {
          forward(&registry, event);
          Ok(())
        }
      }),
    );
  }
}

fn forward(registry: &ConnectionRegistry, event: Event) {
  let Some(ws_kind) = event_mapping(event.kind) else {
    return;
  };
  let envelope = WsEnvelope {
    ty: ws_kind,
    timestamp: chrono::DateTime::from_timestamp_millis(
      event.timestamp,
    )
    .map(|ts| ts.to_rfc3339())
    .unwrap_or_default(),
    data: Some(event.payload.clone()),
  };

  registry.broadcast_to_event_subscribers(ws_kind, &envelope);

  // Notifications addressed to a user reach that user's sockets
  // whether or not they subscribed to the kind.
  if matches!(
    ws_kind,
    WsEventType::NotificationSystem
      | WsEventType::NotificationUser
      | WsEventType::NotificationDeployment
  ) && let Some(user_id) = &event.user_id
  {
    registry.broadcast_to_user(user_id, &envelope);
  }

  // Deployment traffic additionally reaches the per-deployment
  // subscriber set and the logs-only endpoint sockets.
  let deployment_id = event
    .payload
    .get("deployment_id")
    .and_then(|id| id.as_str());
  if let Some(deployment_id) = deployment_id {
    match ws_kind {
      WsEventType::DeploymentLogsUpdate => {
        registry.broadcast_deployment_log_to_subscribers(
          deployment_id,
          &envelope,
        );
        registry.broadcast_to_deployment(deployment_id, &envelope);
      }
      WsEventType::DeploymentStatusChanged
      | WsEventType::DeploymentProgress => {
        registry.broadcast_to_deployment(deployment_id, &envelope);
      }
      _ => {}
    }
  }
}
