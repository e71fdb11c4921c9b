//! The per-deployment worker: a plain retry loop around a
//! cancellable sleep and the executor call. Exactly one worker runs
//! per deployment; the orchestrator's task registry enforces that.

use std::sync::Arc;

use anyhow::bail;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use windflow_client::entities::deployment::DeploymentStatus;

use super::Orchestrator;
use crate::events::{Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
  Completed,
  Failed,
  Cancelled,
}

pub async fn run_worker(
  orchestrator: Arc<Orchestrator>,
  deployment_id: String,
  user_id: Option<String>,
  cancel: CancellationToken,
) -> WorkerOutcome {
  // Bounded worker pool: wait for a slot, unless cancelled first.
  let _permit = tokio::select! {
    permit = orchestrator.worker_permits.clone().acquire_owned() => {
      match permit {
        Ok(permit) => permit,
        // Semaphore never closes while the orchestrator lives.
        Err(_) => return WorkerOutcome::Failed,
      }
    }
    _ = cancel.cancelled() => {
      return finalize_cancelled(
        &orchestrator, &deployment_id, user_id,
      );
    }
  };

  let policy = orchestrator.retry_policy;
  let mut last_error = None;

  for attempt in 0..=policy.max_retries {
    if attempt > 0 {
      if orchestrator
        .db
        .update_deployment(&deployment_id, |deployment| {
          deployment.task_retry_count = attempt;
        })
        .is_err()
      {
        // Row deleted out from under the worker.
        return WorkerOutcome::Cancelled;
      }
      orchestrator.bus.publish(
        Event::new(
          EventKind::DeploymentRetryAttempted,
          json!({
            "deployment_id": deployment_id,
            "attempt": attempt,
            "max_retries": policy.max_retries,
          }),
        )
        .with_user(user_id.clone()),
      );

      let delay = policy.delay_before_attempt(attempt);
      tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => {
          return finalize_cancelled(
            &orchestrator, &deployment_id, user_id,
          );
        }
      }
    }

    let result = tokio::select! {
      result = run_attempt(
        &orchestrator, &deployment_id, attempt, user_id.clone(),
      ) => result,
      _ = cancel.cancelled() => {
        return finalize_cancelled(
          &orchestrator, &deployment_id, user_id,
        );
      }
    };

    match result {
      Ok(()) => return WorkerOutcome::Completed,
      Err(AttemptError::Externalized) => {
        // Someone else finalized or deleted the row; stop quietly.
        return WorkerOutcome::Cancelled;
      }
      Err(AttemptError::Execution(e)) => {
        warn!(
          "deployment {deployment_id} attempt {attempt} failed | {e:#}"
        );
        let _ = orchestrator.update_status(
          &deployment_id,
          DeploymentStatus::Deploying,
          None,
          Some(format!("[ERROR] {e:#}")),
          user_id.clone(),
        );
        last_error = Some(e);
      }
    }
  }

  let last_error = last_error
    .map(|e| format!("{e:#}"))
    .unwrap_or_else(|| String::from("unknown error"));
  let _ = orchestrator.update_status(
    &deployment_id,
    DeploymentStatus::Failed,
    Some(format!(
      "After {} attempts: {last_error}",
      policy.max_retries
    )),
    Some(format!(
      "[ERROR] All retry attempts failed\nLast error: {last_error}"
    )),
    user_id,
  );
  WorkerOutcome::Failed
}

enum AttemptError {
  /// The row reached a terminal state (or vanished) outside this
  /// worker; stop without touching it.
  Externalized,
  Execution(anyhow::Error),
}

async fn run_attempt(
  orchestrator: &Arc<Orchestrator>,
  deployment_id: &str,
  attempt: u32,
  user_id: Option<String>,
) -> Result<(), AttemptError> {
  let Ok(deployment) = orchestrator.db.get_deployment(deployment_id)
  else {
    return Err(AttemptError::Externalized);
  };
  if matches!(
    deployment.status,
    DeploymentStatus::Running | DeploymentStatus::Stopped
  ) {
    return Err(AttemptError::Externalized);
  }

  let attempt_result: anyhow::Result<()> = async {
    let stack =
      orchestrator.db.get_stack(&deployment.stack_id)?;

    let logs = if attempt == 0 {
      String::from("[INFO] Deployment starting")
    } else {
      format!(
        "[INFO] Deployment attempt {attempt} of {} starting",
        orchestrator.retry_policy.max_retries
      )
    };
    orchestrator.update_status(
      deployment_id,
      DeploymentStatus::Deploying,
      None,
      Some(logs),
      user_id.clone(),
    )?;
    orchestrator.publish_progress(
      deployment_id,
      10,
      "prepare",
      user_id.clone(),
    );

    // The rendered spec was persisted at creation; never
    // re-render for an existing deployment.
    if deployment.config.is_null() {
      bail!("deployment has no rendered config snapshot");
    }

    orchestrator.publish_progress(
      deployment_id,
      50,
      "execute",
      user_id.clone(),
    );
    let output = orchestrator
      .deployer
      .deploy(&deployment, &stack)
      .await?;

    orchestrator.update_status(
      deployment_id,
      DeploymentStatus::Running,
      None,
      Some(if output.is_empty() {
        String::from("[SUCCESS] Deployment completed successfully")
      } else {
        format!(
          "[SUCCESS] Deployment completed successfully\n{output}"
        )
      }),
      user_id.clone(),
    )?;
    orchestrator.publish_progress(
      deployment_id,
      100,
      "complete",
      user_id.clone(),
    );
    Ok(())
  }
  .await;

  attempt_result.map_err(AttemptError::Execution)
}

fn finalize_cancelled(
  orchestrator: &Arc<Orchestrator>,
  deployment_id: &str,
  user_id: Option<String>,
) -> WorkerOutcome {
  let _ = orchestrator.update_status(
    deployment_id,
    DeploymentStatus::Failed,
    Some(String::from("cancelled")),
    Some(String::from("[ERROR] Deployment cancelled")),
    user_id,
  );
  WorkerOutcome::Cancelled
}
