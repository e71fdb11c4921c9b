//! Thin HTTP surface over the core. Handlers only adapt requests
//! onto the orchestrator / scanner; all behavior lives there.

use std::sync::Arc;

use axum::{
  Json, Router,
  extract::{Path, Query, State},
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
  routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::error;
use windflow_client::entities::{
  deployment::DeploymentStatus, user::User,
};

use crate::{
  orchestrator::{CreateDeployment, CreateDeploymentError},
  state::AppState,
};

pub fn router() -> Router<Arc<AppState>> {
  Router::new()
    .route("/health", get(health))
    .route(
      "/deployments",
      post(create_deployment).get(list_deployments),
    )
    .route(
      "/deployments/{id}",
      get(get_deployment).delete(delete_deployment),
    )
    .route("/deployments/{id}/retry", post(retry_deployment))
    .route("/deployments/{id}/cancel", post(cancel_deployment))
    .route("/deployments/{id}/stop", post(stop_deployment))
    .route("/deployments/{id}/restart", post(restart_deployment))
    .route("/deployments/{id}/status", get(deployment_status))
    .route("/deployments/{id}/logs", get(deployment_logs))
    .route("/targets/{id}/scan", post(scan_target))
}

type ApiError = (StatusCode, String);

fn internal(e: anyhow::Error) -> ApiError {
  error!("api request failed | {e:#}");
  (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

fn bearer_user(
  state: &AppState,
  headers: &HeaderMap,
) -> Result<User, ApiError> {
  let token = headers
    .get("authorization")
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.strip_prefix("Bearer "))
    .ok_or((
      StatusCode::UNAUTHORIZED,
      String::from("missing bearer token"),
    ))?;
  crate::auth::authenticate_token(state, token)
    .map_err(|e| (StatusCode::UNAUTHORIZED, format!("{e:#}")))
}

fn authorized_deployment(
  state: &AppState,
  user: &User,
  deployment_id: &str,
) -> Result<
  windflow_client::entities::deployment::Deployment,
  ApiError,
> {
  let deployment = state
    .db
    .get_deployment(deployment_id)
    .map_err(|e| (StatusCode::NOT_FOUND, format!("{e:#}")))?;
  if !user.can_access_organization(&deployment.organization_id) {
    return Err((
      StatusCode::FORBIDDEN,
      String::from("access denied to this deployment"),
    ));
  }
  Ok(deployment)
}

async fn health() -> impl IntoResponse {
  Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct CreateDeploymentBody {
  stack_id: String,
  target_id: String,
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  variables: Option<Map<String, Value>>,
}

async fn create_deployment(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Json(body): Json<CreateDeploymentBody>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  let deployment = state
    .orchestrator
    .create_deployment(CreateDeployment {
      stack_id: body.stack_id,
      target_id: body.target_id,
      organization_id: user.organization_id.clone(),
      name: body.name,
      variables: body.variables,
      user_id: Some(user.id.clone()),
    })
    .map_err(|e| match e {
      CreateDeploymentError::NameConflict(_) => {
        (StatusCode::CONFLICT, e.to_string())
      }
      CreateDeploymentError::Other(e) => internal(e),
    })?;
  state
    .orchestrator
    .start(&deployment.id, Some(user.id))
    .map_err(internal)?;
  Ok((StatusCode::CREATED, Json(deployment)))
}

#[derive(Deserialize)]
struct ListParams {
  #[serde(default)]
  status: Option<DeploymentStatus>,
}

async fn list_deployments(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  let deployments = match params.status {
    Some(status) => state
      .db
      .deployments_by_status(status)
      .into_iter()
      .filter(|d| d.organization_id == user.organization_id)
      .collect(),
    None => state.db.list_deployments_by_org(&user.organization_id),
  };
  Ok(Json(deployments))
}

async fn get_deployment(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  let deployment = authorized_deployment(&state, &user, &id)?;
  Ok(Json(deployment))
}

async fn delete_deployment(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  authorized_deployment(&state, &user, &id)?;
  let deleted = state
    .orchestrator
    .delete(&id, Some(user.id))
    .await
    .map_err(internal)?;
  if deleted {
    Ok(StatusCode::NO_CONTENT.into_response())
  } else {
    // Resources could not be removed; the row was kept as FAILED.
    Ok(
      (
        StatusCode::CONFLICT,
        Json(json!({
          "deleted": false,
          "message": "failed to remove deployment resources",
        })),
      )
        .into_response(),
    )
  }
}

async fn retry_deployment(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  authorized_deployment(&state, &user, &id)?;
  state
    .orchestrator
    .retry(&id, Some(user.id))
    .map_err(|e| (StatusCode::BAD_REQUEST, format!("{e:#}")))?;
  Ok(StatusCode::ACCEPTED)
}

async fn cancel_deployment(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  authorized_deployment(&state, &user, &id)?;
  let cancelled = state.orchestrator.cancel(&id);
  Ok(Json(json!({ "cancelled": cancelled })))
}

async fn stop_deployment(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  let deployment = authorized_deployment(&state, &user, &id)?;
  if deployment.status != DeploymentStatus::Running {
    return Err((
      StatusCode::BAD_REQUEST,
      format!(
        "deployment is {}, only running deployments can be stopped",
        deployment.status
      ),
    ));
  }
  let stack = state
    .db
    .get_stack(&deployment.stack_id)
    .map_err(internal)?;
  state
    .runtime
    .stop(&deployment, &stack)
    .await
    .map_err(internal)?;
  let updated = state
    .orchestrator
    .update_status(
      &id,
      DeploymentStatus::Stopped,
      None,
      Some(String::from("[INFO] Deployment stopped by user")),
      Some(user.id),
    )
    .map_err(internal)?;
  Ok(Json(updated))
}

async fn restart_deployment(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  let deployment = authorized_deployment(&state, &user, &id)?;
  if deployment.status != DeploymentStatus::Running {
    return Err((
      StatusCode::BAD_REQUEST,
      format!(
        "deployment is {}, only running deployments can be restarted",
        deployment.status
      ),
    ));
  }
  let stack = state
    .db
    .get_stack(&deployment.stack_id)
    .map_err(internal)?;
  state
    .runtime
    .restart(&deployment, &stack)
    .await
    .map_err(|e| (StatusCode::BAD_REQUEST, format!("{e:#}")))?;
  let updated = state
    .orchestrator
    .update_status(
      &id,
      DeploymentStatus::Running,
      None,
      Some(String::from("[INFO] Deployment restarted by user")),
      Some(user.id),
    )
    .map_err(internal)?;
  Ok(Json(updated))
}

async fn deployment_status(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  let deployment = authorized_deployment(&state, &user, &id)?;
  let stack = state
    .db
    .get_stack(&deployment.stack_id)
    .map_err(internal)?;
  let status = state
    .runtime
    .runtime_status(&deployment, &stack)
    .await
    .map_err(internal)?;
  Ok(Json(json!({
    "deployment_id": deployment.id,
    "status": deployment.status,
    "runtime": status,
  })))
}

#[derive(Deserialize)]
struct LogsParams {
  #[serde(default = "default_tail")]
  tail: u64,
}

fn default_tail() -> u64 {
  100
}

async fn deployment_logs(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<String>,
  Query(params): Query<LogsParams>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  let deployment = authorized_deployment(&state, &user, &id)?;
  let stack = state
    .db
    .get_stack(&deployment.stack_id)
    .map_err(internal)?;
  let runtime_logs = state
    .runtime
    .runtime_logs(&deployment, &stack, params.tail)
    .await
    .unwrap_or_default();
  Ok(Json(json!({
    "deployment_id": deployment.id,
    "logs": deployment.logs,
    "runtime_logs": runtime_logs,
  })))
}

async fn scan_target(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
  let user = bearer_user(&state, &headers)?;
  let target = state
    .db
    .get_target(&id)
    .map_err(|e| (StatusCode::NOT_FOUND, format!("{e:#}")))?;
  if !user.can_access_organization(&target.organization_id) {
    return Err((
      StatusCode::FORBIDDEN,
      String::from("access denied to this target"),
    ));
  }
  let scan = crate::scanner::scan_and_update_target(&state.db, &id)
    .await
    .map_err(internal)?;
  Ok(Json(scan))
}
