//! Periodic health monitor for running deployments.
//!
//! Each pass inspects the runtime state behind every RUNNING row and
//! moves rows whose containers died to STOPPED / FAILED, so the
//! store converges on reality after out-of-band `docker stop`s,
//! OOM kills and host reboots.

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use tracing::{error, info, warn};
use windflow_client::entities::{
  deployment::{Deployment, DeploymentStatus},
  stack::TargetType,
};

use crate::{
  events::{Event, EventKind},
  orchestrator::{ExecutorDeployer, Orchestrator},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeHealth {
  Healthy,
  /// Cleanly exited; the row moves to STOPPED.
  Stopped(String),
  /// Dead, missing or partially down; the row moves to FAILED.
  Failed(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReport {
  pub healthy: usize,
  pub transitioned: usize,
  pub errors: usize,
}

/// One monitoring pass over all RUNNING deployments.
pub async fn check_running_deployments(
  orchestrator: &Arc<Orchestrator>,
  runtime: &ExecutorDeployer,
) -> MonitorReport {
  let mut report = MonitorReport::default();
  let running = orchestrator
    .db()
    .deployments_by_status(DeploymentStatus::Running);

  for deployment in running {
    let stack = match orchestrator.db().get_stack(&deployment.stack_id)
    {
      Ok(stack) => stack,
      Err(e) => {
        warn!(
          "monitor cannot load stack for deployment {} | {e:#}",
          deployment.id
        );
        report.errors += 1;
        continue;
      }
    };

    let health =
      match runtime.runtime_status(&deployment, &stack).await {
        Ok(status) => {
          classify_runtime_status(stack.target_type, &status)
        }
        Err(e) => RuntimeHealth::Failed(format!(
          "deployed resources are missing: {e:#}"
        )),
      };

    match apply_health(orchestrator, &deployment, health) {
      Ok(true) => report.transitioned += 1,
      Ok(false) => report.healthy += 1,
      Err(e) => {
        error!(
          "monitor failed to update deployment {} | {e:#}",
          deployment.id
        );
        report.errors += 1;
      }
    }
  }

  report
}

/// Maps a runtime status payload onto a health verdict.
pub fn classify_runtime_status(
  target_type: TargetType,
  status: &Value,
) -> RuntimeHealth {
  match target_type {
    TargetType::Docker => {
      if status
        .get("running")
        .and_then(Value::as_bool)
        .unwrap_or(false)
      {
        return RuntimeHealth::Healthy;
      }
      let state = status
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
      if state == "exited" {
        RuntimeHealth::Stopped(String::from(
          "container exited outside of WindFlow",
        ))
      } else {
        RuntimeHealth::Failed(format!("container is {state}"))
      }
    }
    _ => {
      let services = status
        .get("services")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
      if services.is_empty() {
        return RuntimeHealth::Failed(String::from(
          "compose project has no services",
        ));
      }
      let down: Vec<String> = services
        .iter()
        .filter(|service| {
          service.get("State").and_then(Value::as_str)
            != Some("running")
        })
        .filter_map(|service| {
          service
            .get("Name")
            .or_else(|| service.get("Service"))
            .and_then(Value::as_str)
            .map(str::to_string)
        })
        .collect();
      if down.is_empty() {
        RuntimeHealth::Healthy
      } else {
        RuntimeHealth::Failed(format!(
          "service(s) not running: {}",
          down.join(", ")
        ))
      }
    }
  }
}

/// Applies the verdict to the row. Returns whether a transition was
/// written.
fn apply_health(
  orchestrator: &Arc<Orchestrator>,
  deployment: &Deployment,
  health: RuntimeHealth,
) -> anyhow::Result<bool> {
  let (status, message) = match health {
    RuntimeHealth::Healthy => return Ok(false),
    RuntimeHealth::Stopped(message) => {
      (DeploymentStatus::Stopped, message)
    }
    RuntimeHealth::Failed(message) => {
      (DeploymentStatus::Failed, message)
    }
  };

  warn!(
    "monitor transitions deployment {} to {status}: {message}",
    deployment.id
  );
  orchestrator.update_status(
    &deployment.id,
    status,
    Some(message.clone()),
    Some(format!("[SYSTEM] Health monitor: {message}")),
    None,
  )?;
  orchestrator.bus().publish(Event::new(
    EventKind::NotificationDeployment,
    json!({
      "deployment_id": deployment.id,
      "name": deployment.name,
      "status": status.to_string(),
      "message": message,
    }),
  ));
  Ok(true)
}

/// Periodic monitor. `interval_seconds == 0` disables it.
pub fn spawn_monitor_loop(
  orchestrator: Arc<Orchestrator>,
  runtime: Arc<ExecutorDeployer>,
  interval_seconds: u64,
) {
  if interval_seconds == 0 {
    return;
  }
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(Duration::from_secs(
      interval_seconds,
    ));
    interval.tick().await;
    loop {
      interval.tick().await;
      let report =
        check_running_deployments(&orchestrator, &runtime).await;
      if report.transitioned > 0 || report.errors > 0 {
        info!(
          "deployment monitor: {} healthy, {} transitioned, {} errors",
          report.healthy, report.transitioned, report.errors
        );
      }
    }
  });
}
