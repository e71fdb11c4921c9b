//! Deployment orchestrator: lifecycle of individual deployments.
//!
//! Owns the in-flight task registry. The store is the source of
//! truth for deployment state; every status transition goes through
//! [Orchestrator::update_status], which appends logs, maintains the
//! timestamp invariants and publishes the resulting events on the
//! bus (the bridge is the only path from there to sockets).

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::{Arc, Mutex},
  time::Duration,
};

use anyhow::{Context, bail};
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use windflow_client::entities::{
  deployment::{Deployment, DeploymentStatus},
  stack::{Stack, TargetType},
  to_container_compatible_name, windflow_id, windflow_timestamp,
};

use crate::{
  compose::ComposeExecutor,
  db::DbClient,
  docker::DockerExecutor,
  events::{Event, EventBus, EventKind},
};

pub mod recovery;
mod worker;

pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(60);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub initial_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> RetryPolicy {
    RetryPolicy {
      max_retries: MAX_RETRIES,
      initial_delay: INITIAL_RETRY_DELAY,
      max_delay: MAX_RETRY_DELAY,
    }
  }
}

impl RetryPolicy {
  /// Exponential backoff: initial * 2^(attempt - 1), capped.
  pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self
      .initial_delay
      .saturating_mul(factor)
      .min(self.max_delay)
  }
}

#[derive(thiserror::Error, Debug)]
pub enum CreateDeploymentError {
  #[error(
    "Deployment name '{0}' already exists in this organization"
  )]
  NameConflict(String),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct CreateDeployment {
  pub stack_id: String,
  pub target_id: String,
  pub organization_id: String,
  pub name: Option<String>,
  pub variables: Option<Map<String, Value>>,
  pub user_id: Option<String>,
}

/// Execution seam between the worker loop and the Docker tooling.
/// Production uses [ExecutorDeployer]; tests script outcomes.
pub trait Deployer: Send + Sync + 'static {
  fn deploy<'a>(
    &'a self,
    deployment: &'a Deployment,
    stack: &'a Stack,
  ) -> BoxFuture<'a, anyhow::Result<String>>;

  fn teardown<'a>(
    &'a self,
    deployment: &'a Deployment,
    stack: &'a Stack,
  ) -> BoxFuture<'a, anyhow::Result<String>>;
}

pub struct ExecutorDeployer {
  docker: DockerExecutor,
  compose: ComposeExecutor,
  deploy_dir: PathBuf,
}

impl ExecutorDeployer {
  pub fn new(
    deploy_dir: PathBuf,
    legacy_compose_cli: bool,
  ) -> ExecutorDeployer {
    ExecutorDeployer {
      docker: DockerExecutor,
      compose: ComposeExecutor::new(legacy_compose_cli),
      deploy_dir,
    }
  }

  async fn deploy_inner(
    &self,
    deployment: &Deployment,
    stack: &Stack,
  ) -> anyhow::Result<String> {
    let name = deployment.resource_name();
    match stack.target_type {
      TargetType::Docker => {
        let log = self
          .docker
          .deploy_container(&deployment.config, Some(&name))
          .await?;
        if !log.success {
          bail!("docker run failed: {}", log.stderr.trim());
        }
        Ok(log.stdout.trim().to_string())
      }
      // Compose covers docker_compose, swarm and the rest.
      _ => {
        ComposeExecutor::validate_compose_spec(&deployment.config)?;
        let compose_file = self
          .deploy_dir
          .join(&deployment.id)
          .join("docker-compose.yml");
        ComposeExecutor::write_compose_file(
          &deployment.config,
          &compose_file,
        )
        .await?;
        let log = self
          .compose
          .compose_up(&compose_file, &name, &Default::default())
          .await;
        if !log.success {
          bail!("docker compose up failed: {}", log.stderr.trim());
        }
        Ok(log.combined())
      }
    }
  }

  async fn teardown_inner(
    &self,
    deployment: &Deployment,
    stack: &Stack,
  ) -> anyhow::Result<String> {
    let name = deployment.resource_name();
    match stack.target_type {
      TargetType::Docker => {
        let log =
          self.docker.remove_container(&name, true, true).await;
        if !log.success {
          bail!(
            "failed to remove container {name}: {}",
            log.stderr.trim()
          );
        }
        // Named volumes listed in the rendered target parameters
        // are destroyed after the container.
        for volume in named_volumes(deployment) {
          let log = self.docker.remove_volume(&volume, false).await;
          if !log.success {
            bail!(
              "failed to remove volume {volume}: {}",
              log.stderr.trim()
            );
          }
        }
        Ok(format!("removed container {name}"))
      }
      _ => {
        let log = self.compose.compose_remove(&name, true).await;
        if !log.success {
          bail!(
            "failed to remove compose project {name}: {}",
            log.stderr.trim()
          );
        }
        Ok(format!("removed compose project {name}"))
      }
    }
  }
}

/// Runtime operations against already-deployed resources, exposed
/// to the http api. Dispatch mirrors the worker's executor choice.
impl ExecutorDeployer {
  pub async fn runtime_status(
    &self,
    deployment: &Deployment,
    stack: &Stack,
  ) -> anyhow::Result<Value> {
    let name = deployment.resource_name();
    match stack.target_type {
      TargetType::Docker => {
        let status = self.docker.container_status(&name).await?;
        serde_json::to_value(status)
          .context("failed to serialize container status")
      }
      _ => {
        let services = self.compose.compose_status(&name).await?;
        Ok(json!({ "services": services }))
      }
    }
  }

  pub async fn runtime_logs(
    &self,
    deployment: &Deployment,
    stack: &Stack,
    tail: u64,
  ) -> anyhow::Result<String> {
    let name = deployment.resource_name();
    let log = match stack.target_type {
      TargetType::Docker => {
        self.docker.container_logs(&name, tail, None).await
      }
      _ => self.compose.compose_logs(&name, None, tail).await,
    };
    if !log.success {
      bail!("failed to fetch logs: {}", log.stderr.trim());
    }
    // docker interleaves log output across stdout and stderr.
    Ok(log.combined())
  }

  pub async fn stop(
    &self,
    deployment: &Deployment,
    stack: &Stack,
  ) -> anyhow::Result<String> {
    let name = deployment.resource_name();
    let log = match stack.target_type {
      TargetType::Docker => {
        self.docker.stop_container(&name, 10).await
      }
      _ => self.compose.compose_stop(&name).await,
    };
    if !log.success {
      bail!("failed to stop {name}: {}", log.stderr.trim());
    }
    Ok(log.combined())
  }

  pub async fn restart(
    &self,
    deployment: &Deployment,
    stack: &Stack,
  ) -> anyhow::Result<String> {
    let name = deployment.resource_name();
    match stack.target_type {
      TargetType::Docker => {
        let log = self.docker.restart_container(&name, 10).await;
        if !log.success {
          bail!("failed to restart {name}: {}", log.stderr.trim());
        }
        Ok(log.combined())
      }
      _ => bail!(
        "restart is only supported for single-container deployments"
      ),
    }
  }
}

fn named_volumes(deployment: &Deployment) -> Vec<String> {
  deployment
    .rendered_target_parameters
    .as_ref()
    .and_then(|params| params.get("volumes"))
    .and_then(Value::as_array)
    .map(|volumes| {
      volumes
        .iter()
        .filter_map(Value::as_str)
        .map(|volume| volume.trim().to_string())
        .filter(|volume| !volume.is_empty())
        .collect()
    })
    .unwrap_or_default()
}

impl Deployer for ExecutorDeployer {
  fn deploy<'a>(
    &'a self,
    deployment: &'a Deployment,
    stack: &'a Stack,
  ) -> BoxFuture<'a, anyhow::Result<String>> {
    Box::pin(self.deploy_inner(deployment, stack))
  }

  fn teardown<'a>(
    &'a self,
    deployment: &'a Deployment,
    stack: &'a Stack,
  ) -> BoxFuture<'a, anyhow::Result<String>> {
    Box::pin(self.teardown_inner(deployment, stack))
  }
}

struct TaskHandle {
  cancel: CancellationToken,
}

pub struct Orchestrator {
  db: Arc<DbClient>,
  bus: Arc<EventBus>,
  deployer: Arc<dyn Deployer>,
  retry_policy: RetryPolicy,
  active_tasks: Mutex<HashMap<String, TaskHandle>>,
  worker_permits: Arc<Semaphore>,
}

impl Orchestrator {
  pub fn new(
    db: Arc<DbClient>,
    bus: Arc<EventBus>,
    deployer: Arc<dyn Deployer>,
    retry_policy: RetryPolicy,
    worker_limit: usize,
  ) -> Arc<Orchestrator> {
    Arc::new(Orchestrator {
      db,
      bus,
      deployer,
      retry_policy,
      active_tasks: Default::default(),
      worker_permits: Arc::new(Semaphore::new(worker_limit.max(1))),
    })
  }

  pub fn db(&self) -> &Arc<DbClient> {
    &self.db
  }

  pub fn bus(&self) -> &Arc<EventBus> {
    &self.bus
  }

  /// Renders variables and template exactly once and persists the
  /// row in PENDING. Generated secrets live in the `variables`
  /// snapshot from here on; nothing is ever re-rendered.
  pub fn create_deployment(
    &self,
    request: CreateDeployment,
  ) -> Result<Deployment, CreateDeploymentError> {
    let stack = self.db.get_stack(&request.stack_id)?;
    self
      .db
      .get_target(&request.target_id)
      .context("deployment target does not exist")?;

    let renderer = render::Renderer::default();
    let merged = render::merge_variables(
      &stack.variables,
      request.variables.as_ref(),
    );
    let mut variables = render::render_variables(&renderer, merged);

    let name = match &request.name {
      Some(name) if !name.trim().is_empty() => name.clone(),
      _ => generate_deployment_name(&renderer, &stack, &variables),
    };
    let name = to_container_compatible_name(&name);

    if self
      .db
      .get_deployment_by_name(&request.organization_id, &name)
      .is_some()
    {
      return Err(CreateDeploymentError::NameConflict(name));
    }

    variables
      .insert("deployment_name".to_string(), json!(name.clone()));

    let rendered_target_parameters = stack
      .target_parameters
      .as_ref()
      .map(|params| renderer.render_value(params, &variables));

    let config = renderer.render_value(&stack.template, &variables);

    let now = windflow_timestamp();
    let deployment = Deployment {
      id: windflow_id(),
      name,
      stack_id: stack.id.clone(),
      target_id: request.target_id.clone(),
      organization_id: request.organization_id.clone(),
      status: DeploymentStatus::Pending,
      config,
      variables: Value::Object(variables),
      rendered_target_parameters,
      logs: String::new(),
      error_message: None,
      deployed_at: None,
      stopped_at: None,
      deploy_duration_seconds: None,
      task_started_at: None,
      task_retry_count: 0,
      created_at: now,
      updated_at: now,
    };
    self
      .db
      .deployments
      .insert(deployment.id.clone(), deployment.clone());

    self.bus.publish(
      Event::new(
        EventKind::DeploymentCreated,
        json!({
          "deployment_id": deployment.id,
          "status": deployment.status.to_string(),
          "old_status": Value::Null,
          "name": deployment.name,
        }),
      )
      .with_user(request.user_id),
    );

    Ok(deployment)
  }

  /// Spawns the worker for a deployment in PENDING / FAILED (or
  /// DEPLOYING, when the recovery sweeper resumes orphaned work).
  pub fn start(
    self: &Arc<Self>,
    deployment_id: &str,
    user_id: Option<String>,
  ) -> anyhow::Result<()> {
    let deployment = self.db.get_deployment(deployment_id)?;
    if matches!(
      deployment.status,
      DeploymentStatus::Running
        | DeploymentStatus::Stopped
        | DeploymentStatus::RollingBack
    ) {
      bail!(
        "cannot start deployment {deployment_id} in status {}",
        deployment.status
      );
    }
    if self.is_active(deployment_id) {
      bail!("deployment {deployment_id} already has an active task");
    }
    self.db.update_deployment(deployment_id, |deployment| {
      deployment.task_started_at = Some(windflow_timestamp());
      deployment.task_retry_count = 0;
    })?;
    self.spawn_worker(deployment_id.to_string(), user_id);
    Ok(())
  }

  fn spawn_worker(
    self: &Arc<Self>,
    deployment_id: String,
    user_id: Option<String>,
  ) {
    let cancel = CancellationToken::new();
    self.active_tasks.lock().expect("active task lock poisoned").insert(
      deployment_id.clone(),
      TaskHandle {
        cancel: cancel.clone(),
      },
    );

    let orchestrator = self.clone();
    let join = tokio::spawn(worker::run_worker(
      orchestrator.clone(),
      deployment_id.clone(),
      user_id,
      cancel,
    ));

    // Watcher removes the handle and logs the outcome.
    tokio::spawn(async move {
      let outcome = join.await;
      orchestrator
        .active_tasks
        .lock()
        .expect("active task lock poisoned")
        .remove(&deployment_id);
      match outcome {
        Ok(worker::WorkerOutcome::Completed) => {
          info!("deployment {deployment_id} completed")
        }
        Ok(worker::WorkerOutcome::Failed) => {
          error!("deployment {deployment_id} failed")
        }
        Ok(worker::WorkerOutcome::Cancelled) => {
          warn!("deployment {deployment_id} cancelled")
        }
        Err(e) => {
          error!("deployment {deployment_id} worker panicked | {e:#}")
        }
      }
    });
  }

  pub fn is_active(&self, deployment_id: &str) -> bool {
    self
      .active_tasks
      .lock()
      .expect("active task lock poisoned")
      .contains_key(deployment_id)
  }

  pub fn active_task_count(&self) -> usize {
    self
      .active_tasks
      .lock()
      .expect("active task lock poisoned")
      .len()
  }

  /// Cancels the in-flight worker, if any. The worker observes the
  /// cancellation and writes the terminal status itself.
  pub fn cancel(&self, deployment_id: &str) -> bool {
    let tasks =
      self.active_tasks.lock().expect("active task lock poisoned");
    match tasks.get(deployment_id) {
      Some(handle) => {
        handle.cancel.cancel();
        true
      }
      None => false,
    }
  }

  /// Tears down deployed resources, then removes the row. If any
  /// teardown step fails the row is kept and moved to FAILED so the
  /// user can retry the delete.
  pub async fn delete(
    self: &Arc<Self>,
    deployment_id: &str,
    user_id: Option<String>,
  ) -> anyhow::Result<bool> {
    let deployment = self.db.get_deployment(deployment_id)?;

    self.cancel(deployment_id);

    if matches!(
      deployment.status,
      DeploymentStatus::Running
        | DeploymentStatus::Deploying
        | DeploymentStatus::Pending
    ) {
      let stack = self
        .db
        .get_stack(&deployment.stack_id)
        .context("cannot tear down deployment without its stack")?;
      if let Err(e) =
        self.deployer.teardown(&deployment, &stack).await
      {
        warn!(
          "teardown failed for deployment {deployment_id}, keeping row | {e:#}"
        );
        self.update_status(
          deployment_id,
          DeploymentStatus::Failed,
          Some(format!("Failed to remove resources: {e:#}")),
          Some(format!("[ERROR] Failed to remove resources: {e:#}")),
          user_id,
        )?;
        return Ok(false);
      }
    }

    self.db.deployments.remove(deployment_id);
    Ok(true)
  }

  /// Restarts a PENDING / FAILED deployment on the same row,
  /// reusing the persisted `variables` and `config` snapshots.
  pub fn retry(
    self: &Arc<Self>,
    deployment_id: &str,
    user_id: Option<String>,
  ) -> anyhow::Result<()> {
    let deployment = self.db.get_deployment(deployment_id)?;
    if !matches!(
      deployment.status,
      DeploymentStatus::Pending | DeploymentStatus::Failed
    ) {
      bail!(
        "deployment {deployment_id} is {}, only pending or failed deployments can be retried",
        deployment.status
      );
    }

    self.update_status(
      deployment_id,
      DeploymentStatus::Deploying,
      None,
      Some(String::from("[RETRY] Retrying deployment...")),
      user_id.clone(),
    )?;

    self.db.update_deployment(deployment_id, |deployment| {
      deployment.task_started_at = Some(windflow_timestamp());
      deployment.task_retry_count = 0;
    })?;
    self.spawn_worker(deployment_id.to_string(), user_id);
    Ok(())
  }

  /// The single mutation point for deployment status. Appends logs,
  /// maintains deployed_at / stopped_at / duration, then publishes
  /// the transition (and a logs event when logs were appended).
  pub fn update_status(
    &self,
    deployment_id: &str,
    status: DeploymentStatus,
    error_message: Option<String>,
    logs: Option<String>,
    user_id: Option<String>,
  ) -> anyhow::Result<Deployment> {
    let mut old_status = DeploymentStatus::Pending;
    let updated =
      self.db.update_deployment(deployment_id, |deployment| {
        old_status = deployment.status;
        deployment.status = status;
        if let Some(error_message) = &error_message {
          deployment.error_message = Some(error_message.clone());
        }
        if let Some(logs) = &logs {
          deployment.append_log(logs);
        }
        match status {
          DeploymentStatus::Running => {
            deployment.deployed_at = Some(windflow_timestamp());
          }
          DeploymentStatus::Stopped | DeploymentStatus::Failed => {
            let stopped_at = windflow_timestamp();
            deployment.stopped_at = Some(stopped_at);
            if let Some(deployed_at) = deployment.deployed_at {
              deployment.deploy_duration_seconds = Some(
                (stopped_at - deployed_at).max(0) as f64 / 1000.0,
              );
            }
          }
          _ => {}
        }
      })?;

    self.bus.publish(
      Event::new(
        status_event_kind(old_status, status),
        json!({
          "deployment_id": updated.id,
          "status": status.to_string(),
          "old_status": old_status.to_string(),
          "name": updated.name,
          "error_message": updated.error_message,
        }),
      )
      .with_user(user_id.clone()),
    );

    if let Some(logs) = logs
      && !logs.is_empty()
    {
      self.bus.publish(
        Event::new(
          EventKind::DeploymentLogsUpdate,
          json!({
            "deployment_id": updated.id,
            "logs": logs,
            "append": true,
          }),
        )
        .with_user(user_id),
      );
    }

    Ok(updated)
  }

  pub(crate) fn publish_progress(
    &self,
    deployment_id: &str,
    progress: u8,
    step: &str,
    user_id: Option<String>,
  ) {
    self.bus.publish(
      Event::new(
        EventKind::DeploymentProgress,
        json!({
          "deployment_id": deployment_id,
          "progress": progress,
          "step": step,
        }),
      )
      .with_user(user_id),
    );
  }
}

/// Deployment lifecycle transitions publish their lifecycle kind;
/// anything else is a plain status change. All of them reach
/// sockets as DEPLOYMENT_STATUS_CHANGED through the bridge, once.
fn status_event_kind(
  old: DeploymentStatus,
  new: DeploymentStatus,
) -> EventKind {
  match new {
    DeploymentStatus::Deploying
      if old == DeploymentStatus::Pending =>
    {
      EventKind::DeploymentStarted
    }
    DeploymentStatus::Running => EventKind::DeploymentCompleted,
    DeploymentStatus::Failed => EventKind::DeploymentFailed,
    _ => EventKind::DeploymentStatusChanged,
  }
}

fn generate_deployment_name(
  renderer: &render::Renderer,
  stack: &Stack,
  variables: &Map<String, Value>,
) -> String {
  if let Some(template) = &stack.deployment_name {
    let rendered = renderer.render_str(template, variables);
    // A template that failed to render still contains markers.
    if !rendered.trim().is_empty() && !rendered.contains("{{") {
      return rendered;
    }
  }
  format!(
    "{}-{}",
    stack.name,
    chrono::Utc::now().format("%Y%m%d-%H%M%S")
  )
}

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests;
