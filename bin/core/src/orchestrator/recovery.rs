//! Recovery sweeper: restarts deployments orphaned by a process
//! restart and fails the ones stuck past the timeout.

use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};
use windflow_client::entities::{
  deployment::DeploymentStatus, windflow_timestamp,
};

use super::Orchestrator;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
  pub retried: usize,
  pub failed: usize,
  pub skipped: usize,
  pub errors: usize,
}

/// One sweep over stale PENDING / DEPLOYING deployments. Never
/// raises; per-deployment problems land in the `errors` count.
pub async fn run_recovery(
  orchestrator: &Arc<Orchestrator>,
  max_age_minutes: u64,
  timeout_minutes: u64,
) -> RecoveryReport {
  let now = windflow_timestamp();
  let max_age_threshold = now - (max_age_minutes as i64) * 60_000;
  let timeout_threshold = now - (timeout_minutes as i64) * 60_000;

  let stale = orchestrator.db.stale_deployments(
    &[DeploymentStatus::Pending, DeploymentStatus::Deploying],
    max_age_threshold,
  );
  info!(
    "recovery sweep found {} stale deployment(s) (max_age={max_age_minutes}m, timeout={timeout_minutes}m)",
    stale.len()
  );

  let mut report = RecoveryReport::default();
  for deployment in stale {
    if deployment.created_at < timeout_threshold {
      warn!(
        "deployment {} stuck for more than {timeout_minutes} minutes, failing",
        deployment.id
      );
      match orchestrator.update_status(
        &deployment.id,
        DeploymentStatus::Failed,
        Some(format!(
          "Timeout: stuck for more than {timeout_minutes} minutes"
        )),
        Some(format!(
          "[ERROR] Deployment failed after exceeding the {timeout_minutes} minute recovery timeout"
        )),
        None,
      ) {
        Ok(_) => report.failed += 1,
        Err(e) => {
          error!(
            "failed to time out deployment {} | {e:#}",
            deployment.id
          );
          report.errors += 1;
        }
      }
      continue;
    }

    if orchestrator.is_active(&deployment.id) {
      report.skipped += 1;
      continue;
    }

    match orchestrator.start(&deployment.id, None) {
      Ok(()) => {
        info!("recovered deployment {}", deployment.id);
        report.retried += 1;
      }
      Err(e) => {
        error!(
          "failed to recover deployment {} | {e:#}",
          deployment.id
        );
        report.errors += 1;
      }
    }
  }

  info!(
    "recovery sweep done: {} retried, {} failed, {} skipped, {} errors",
    report.retried, report.failed, report.skipped, report.errors
  );
  report
}

/// Periodic sweep. `interval_seconds == 0` disables the loop.
pub fn spawn_recovery_loop(
  orchestrator: Arc<Orchestrator>,
  max_age_minutes: u64,
  timeout_minutes: u64,
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
      run_recovery(
        &orchestrator,
        max_age_minutes,
        timeout_minutes,
      )
      .await;
    }
  });
}
