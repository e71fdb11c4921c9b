//! WebSocket wire protocol.
//!
//! Server frames are always the `{ type, timestamp, data }` envelope.
//! Clients authenticate with `{ type: "auth", token }` as the first
//! frame on the general endpoint, then send the subscription messages
//! below. The bare text frame `"ping"` is answered with a `pong`
//! envelope on both endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

/// Close code used for authentication / authorization failures
/// and malformed auth frames.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Every `type` the server emits over WebSockets.
#[derive(
  Serialize,
  Deserialize,
  Debug,
  Display,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
)]
pub enum WsEventType {
  #[serde(rename = "AUTH_LOGIN_SUCCESS")]
  #[strum(serialize = "AUTH_LOGIN_SUCCESS")]
  AuthLoginSuccess,
  #[serde(rename = "AUTH_LOGOUT")]
  #[strum(serialize = "AUTH_LOGOUT")]
  AuthLogout,
  #[serde(rename = "AUTH_TOKEN_REFRESH")]
  #[strum(serialize = "AUTH_TOKEN_REFRESH")]
  AuthTokenRefresh,
  #[serde(rename = "NOTIFICATION_SYSTEM")]
  #[strum(serialize = "NOTIFICATION_SYSTEM")]
  NotificationSystem,
  #[serde(rename = "NOTIFICATION_USER")]
  #[strum(serialize = "NOTIFICATION_USER")]
  NotificationUser,
  #[serde(rename = "NOTIFICATION_DEPLOYMENT")]
  #[strum(serialize = "NOTIFICATION_DEPLOYMENT")]
  NotificationDeployment,
  #[serde(rename = "SESSION_EXPIRED")]
  #[strum(serialize = "SESSION_EXPIRED")]
  SessionExpired,
  #[serde(rename = "SESSION_AUTH_REQUIRED")]
  #[strum(serialize = "SESSION_AUTH_REQUIRED")]
  SessionAuthRequired,
  #[serde(rename = "SESSION_PERMISSION_CHANGED")]
  #[strum(serialize = "SESSION_PERMISSION_CHANGED")]
  SessionPermissionChanged,
  #[serde(rename = "SESSION_ORGANIZATION_CHANGED")]
  #[strum(serialize = "SESSION_ORGANIZATION_CHANGED")]
  SessionOrganizationChanged,
  #[serde(rename = "UI_NAVIGATION_REQUEST")]
  #[strum(serialize = "UI_NAVIGATION_REQUEST")]
  UiNavigationRequest,
  #[serde(rename = "UI_MODAL_DISPLAY")]
  #[strum(serialize = "UI_MODAL_DISPLAY")]
  UiModalDisplay,
  #[serde(rename = "UI_TOAST_DISPLAY")]
  #[strum(serialize = "UI_TOAST_DISPLAY")]
  UiToastDisplay,
  #[serde(rename = "UI_WORKFLOW_STEP")]
  #[strum(serialize = "UI_WORKFLOW_STEP")]
  UiWorkflowStep,
  #[serde(rename = "DEPLOYMENT_STATUS_CHANGED")]
  #[strum(serialize = "DEPLOYMENT_STATUS_CHANGED")]
  DeploymentStatusChanged,
  #[serde(rename = "DEPLOYMENT_LOGS_UPDATE")]
  #[strum(serialize = "DEPLOYMENT_LOGS_UPDATE")]
  DeploymentLogsUpdate,
  #[serde(rename = "DEPLOYMENT_PROGRESS")]
  #[strum(serialize = "DEPLOYMENT_PROGRESS")]
  DeploymentProgress,
  #[serde(rename = "SYSTEM_MAINTENANCE")]
  #[strum(serialize = "SYSTEM_MAINTENANCE")]
  SystemMaintenance,
  #[serde(rename = "SYSTEM_BROADCAST")]
  #[strum(serialize = "SYSTEM_BROADCAST")]
  SystemBroadcast,
  #[serde(rename = "pong")]
  #[strum(serialize = "pong")]
  Pong,
  #[serde(rename = "error")]
  #[strum(serialize = "error")]
  Error,
  #[serde(rename = "status")]
  #[strum(serialize = "status")]
  Status,
  #[serde(rename = "subscribed")]
  #[strum(serialize = "subscribed")]
  Subscribed,
  #[serde(rename = "unsubscribed")]
  #[strum(serialize = "unsubscribed")]
  Unsubscribed,
  #[serde(rename = "logs_subscribed")]
  #[strum(serialize = "logs_subscribed")]
  LogsSubscribed,
  #[serde(rename = "message_received")]
  #[strum(serialize = "message_received")]
  MessageReceived,
  #[serde(rename = "text_received")]
  #[strum(serialize = "text_received")]
  TextReceived,
}

/// Server → client frame.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WsEnvelope {
  #[serde(rename = "type")]
  pub ty: WsEventType,
  /// RFC3339.
  pub timestamp: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

impl WsEnvelope {
  pub fn new(ty: WsEventType, data: impl Into<Option<Value>>) -> WsEnvelope {
    WsEnvelope {
      ty,
      timestamp: chrono::Utc::now().to_rfc3339(),
      data: data.into(),
    }
  }

  pub fn to_json(&self) -> String {
    // Envelope serialization cannot fail: known keys, Value payload.
    serde_json::to_string(self).unwrap_or_default()
  }
}

/// Client → server messages, dispatched by `type`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
  Auth { token: String },
  Subscribe { event_type: WsEventType },
  Unsubscribe { event_type: WsEventType },
  DeploymentLogs { deployment_id: String },
}
