//! Logs-only WebSocket endpoint for one deployment. Authenticates
//! via a `token` query parameter, authorizes against the
//! deployment's organization, then streams whatever the bridge
//! forwards for that deployment plus heartbeats.

use std::sync::Arc;

use axum::{
  extract::{
    Path, Query, State, WebSocketUpgrade,
    ws::{Message, WebSocket},
  },
  response::IntoResponse,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use windflow_client::ws::{WsEnvelope, WsEventType};

use super::{close_policy_violation, spawn_writer};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LogsQuery {
  token: Option<String>,
}

pub async fn handler(
  Path(deployment_id): Path<String>,
  Query(query): Query<LogsQuery>,
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
  ws.on_upgrade(move |socket| {
    handle_socket(socket, state, deployment_id, query.token)
  })
}

async fn handle_socket(
  socket: WebSocket,
  state: Arc<AppState>,
  deployment_id: String,
  token: Option<String>,
) {
  let Some(token) = token else {
    return close_policy_violation(socket, "Authentication required")
      .await;
  };
  let user = match crate::auth::authenticate_token(&state, &token) {
    Ok(user) => user,
    Err(e) => {
      debug!("deployment logs ws authentication failed | {e:#}");
      return close_policy_violation(
        socket,
        "User not found or inactive",
      )
      .await;
    }
  };

  let deployment = match state.db.get_deployment(&deployment_id) {
    Ok(deployment) => deployment,
    Err(_) => {
      return close_policy_violation(socket, "Deployment not found")
        .await;
    }
  };
  if !user.can_access_organization(&deployment.organization_id) {
    return close_policy_violation(
      socket,
      "Access denied to this deployment",
    )
    .await;
  }

  let (handle, rx) = state.registry.create_socket();
  let socket_id = handle.id();
  let (sink, mut stream) = socket.split();
  spawn_writer(sink, rx);
  state
    .registry
    .add_deployment_connection(&deployment_id, handle.clone());

  let _ = handle.send(WsEnvelope::new(
    WsEventType::Status,
    json!({
      "status": deployment.status.to_string(),
      "deployment_id": deployment.id,
      "name": deployment.name,
    }),
  ));
  debug!(
    "logs ws connected for deployment {deployment_id} (user {})",
    user.id
  );

  while let Some(msg) = stream.next().await {
    match msg {
      Ok(Message::Text(text)) => {
        if text.as_str() == "ping" {
          let _ =
            handle.send(WsEnvelope::new(WsEventType::Pong, None));
        }
      }
      Ok(Message::Close(_)) | Err(_) => break,
      _ => {}
    }
  }

  state
    .registry
    .remove_deployment_connection(&deployment_id, socket_id);
  debug!("logs ws disconnected for deployment {deployment_id}");
}
