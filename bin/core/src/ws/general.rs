//! General WebSocket endpoint: authenticate with a first
//! `{ type: "auth", token }` frame, then exchange subscription
//! messages and heartbeats.

use std::{sync::Arc, time::Duration};

use axum::{
  extract::{
    State, WebSocketUpgrade,
    ws::{Message, WebSocket},
  },
  response::IntoResponse,
};
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::debug;
use windflow_client::{
  entities::user::User,
  ws::{ClientMessage, WsEnvelope, WsEventType},
};

use super::{close_policy_violation, registry::SocketHandle, spawn_writer};
use crate::{
  events::{Event, EventKind},
  state::AppState,
};

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn handler(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
  ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
  // The first frame must authenticate, within the deadline.
  let first_frame =
    tokio::time::timeout(AUTH_TIMEOUT, socket.recv()).await;
  let text = match first_frame {
    Err(_) => {
      return close_policy_violation(
        socket,
        "Authentication timeout",
      )
      .await;
    }
    Ok(Some(Ok(Message::Text(text)))) => text.to_string(),
    Ok(_) => {
      return close_policy_violation(
        socket,
        "Authentication required as first message",
      )
      .await;
    }
  };

  let token = match serde_json::from_str::<ClientMessage>(&text) {
    Ok(ClientMessage::Auth { token }) => token,
    _ => {
      return close_policy_violation(
        socket,
        "Authentication required as first message",
      )
      .await;
    }
  };

  let user = match crate::auth::authenticate_token(&state, &token) {
    Ok(user) => user,
    Err(e) => {
      debug!("ws authentication failed | {e:#}");
      return close_policy_violation(
        socket,
        "User not found or inactive",
      )
      .await;
    }
  };

  let (handle, rx) = state.registry.create_socket();
  let socket_id = handle.id();
  let (sink, mut stream) = socket.split();
  spawn_writer(sink, rx);
  state.registry.add_connection(&user.id, handle.clone());

  let auth_data = json!({
    "user_id": user.id,
    "username": user.username,
    "organization_id": user.organization_id,
  });
  let _ = handle.send(WsEnvelope::new(
    WsEventType::AuthLoginSuccess,
    auth_data.clone(),
  ));
  state.bus.publish(
    Event::new(EventKind::AuthLoginSuccess, auth_data)
      .with_user(Some(user.id.clone())),
  );
  debug!("general ws connected for user {}", user.id);

  while let Some(msg) = stream.next().await {
    match msg {
      Ok(Message::Text(text)) => {
        let text = text.to_string();
        if text == "ping" {
          let _ =
            handle.send(WsEnvelope::new(WsEventType::Pong, None));
        } else {
          handle_text(&state, &user, &handle, &text);
        }
      }
      Ok(Message::Close(_)) | Err(_) => break,
      _ => {}
    }
  }

  debug!("general ws disconnected for user {}", user.id);
  state.registry.remove_connection(&user.id, socket_id);
  state.bus.publish(
    Event::new(
      EventKind::AuthLogout,
      json!({ "user_id": user.id, "username": user.username }),
    )
    .with_user(Some(user.id.clone())),
  );
}

/// Dispatches one non-heartbeat text frame. Handler problems are
/// reported back as `error` envelopes; the socket stays open.
fn handle_text(
  state: &Arc<AppState>,
  user: &User,
  handle: &SocketHandle,
  text: &str,
) {
  match serde_json::from_str::<ClientMessage>(text) {
    Ok(message) => dispatch(state, user, handle, message),
    Err(_) => match serde_json::from_str::<Value>(text) {
      // Valid json nobody handles: echo it back.
      Ok(value) => {
        let _ = handle.send(WsEnvelope::new(
          WsEventType::MessageReceived,
          value,
        ));
      }
      Err(_) => {
        let _ = handle.send(WsEnvelope::new(
          WsEventType::TextReceived,
          json!(text),
        ));
      }
    },
  }
}

fn dispatch(
  state: &Arc<AppState>,
  user: &User,
  handle: &SocketHandle,
  message: ClientMessage,
) {
  match message {
    ClientMessage::Auth { .. } => {
      // Already authenticated; treat as a no-op echo.
      let _ = handle.send(WsEnvelope::new(
        WsEventType::MessageReceived,
        json!({ "type": "auth" }),
      ));
    }
    ClientMessage::Subscribe { event_type } => {
      state.registry.subscribe(&user.id, event_type);
      let _ = handle.send(WsEnvelope::new(
        WsEventType::Subscribed,
        json!({ "event_type": event_type }),
      ));
    }
    ClientMessage::Unsubscribe { event_type } => {
      state.registry.unsubscribe(&user.id, event_type);
      let _ = handle.send(WsEnvelope::new(
        WsEventType::Unsubscribed,
        json!({ "event_type": event_type }),
      ));
    }
    ClientMessage::DeploymentLogs { deployment_id } => {
      let deployment = match state.db.get_deployment(&deployment_id)
      {
        Ok(deployment) => deployment,
        Err(_) => {
          let _ = handle.send(WsEnvelope::new(
            WsEventType::Error,
            json!({ "message": "Deployment not found" }),
          ));
          return;
        }
      };
      if !user.can_access_organization(&deployment.organization_id)
      {
        let _ = handle.send(WsEnvelope::new(
          WsEventType::Error,
          json!({ "message": "Access denied to this deployment" }),
        ));
        return;
      }
      state
        .registry
        .subscribe_deployment(&user.id, &deployment_id);
      let _ = handle.send(WsEnvelope::new(
        WsEventType::LogsSubscribed,
        json!({ "deployment_id": deployment_id }),
      ));
    }
  }
}
