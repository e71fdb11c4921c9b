use std::sync::Arc;

use axum::{
  Router,
  extract::ws::{CloseFrame, Message, WebSocket},
  routing::get,
};
use futures::{SinkExt, stream::SplitSink};
use tokio::sync::mpsc;
use windflow_client::ws::{
  CLOSE_POLICY_VIOLATION, WsEnvelope,
};

use crate::state::AppState;

mod deployment;
mod general;
pub mod registry;

pub fn router() -> Router<Arc<AppState>> {
  Router::new()
    .route("/", get(general::handler))
    .route("/deployments/{deployment_id}/logs", get(deployment::handler))
}

/// Closes the socket with 1008 and a textual reason, for auth /
/// authorization failures and malformed auth frames.
async fn close_policy_violation(
  mut socket: WebSocket,
  reason: &str,
) {
  let _ = socket
    .send(Message::Close(Some(CloseFrame {
      code: CLOSE_POLICY_VIOLATION,
      reason: reason.to_string().into(),
    })))
    .await;
}

/// Drains the registry channel into the socket. The task ends when
/// every sender handle is dropped or the socket rejects a write.
fn spawn_writer(
  mut sink: SplitSink<WebSocket, Message>,
  mut rx: mpsc::UnboundedReceiver<WsEnvelope>,
) {
  tokio::spawn(async move {
    while let Some(envelope) = rx.recv().await {
      if sink
        .send(Message::text(envelope.to_json()))
        .await
        .is_err()
      {
        break;
      }
    }
    let _ = sink.close().await;
  });
}
