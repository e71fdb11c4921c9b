use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use serde_json::json;
use windflow_client::entities::deployment::DeploymentStatus;

use super::{
  CreateDeployment, CreateDeploymentError, RetryPolicy,
  named_volumes, recovery::run_recovery, status_event_kind,
  test_support::*,
};
use crate::events::{EventKind, handler};

fn create_request() -> CreateDeployment {
  CreateDeployment {
    stack_id: STACK_ID.to_string(),
    target_id: TARGET_ID.to_string(),
    organization_id: ORG_ID.to_string(),
    name: Some("blog".to_string()),
    variables: None,
    user_id: None,
  }
}

#[test]
fn backoff_is_exponential_and_capped() {
  let policy = RetryPolicy {
    max_retries: 3,
    initial_delay: Duration::from_secs(60),
    max_delay: Duration::from_secs(600),
  };
  assert_eq!(
    policy.delay_before_attempt(1),
    Duration::from_secs(60)
  );
  assert_eq!(
    policy.delay_before_attempt(2),
    Duration::from_secs(120)
  );
  assert_eq!(
    policy.delay_before_attempt(3),
    Duration::from_secs(240)
  );
  assert_eq!(
    policy.delay_before_attempt(6),
    Duration::from_secs(600)
  );
}

#[test]
fn lifecycle_transitions_publish_lifecycle_kinds() {
  use DeploymentStatus::*;
  assert_eq!(
    status_event_kind(Pending, Deploying),
    EventKind::DeploymentStarted
  );
  assert_eq!(
    status_event_kind(Deploying, Running),
    EventKind::DeploymentCompleted
  );
  assert_eq!(
    status_event_kind(Deploying, Failed),
    EventKind::DeploymentFailed
  );
  assert_eq!(
    status_event_kind(Failed, Deploying),
    EventKind::DeploymentStatusChanged
  );
}

#[tokio::test]
async fn create_renders_template_with_merged_variables() {
  let h = harness();
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();

  assert_eq!(deployment.status, DeploymentStatus::Pending);
  assert_eq!(deployment.config["ports"][0], "8080:80");
  assert_eq!(deployment.variables["port"], json!(8080));
  assert_eq!(deployment.variables["deployment_name"], "blog");
}

#[tokio::test]
async fn create_rejects_duplicate_names_per_org() {
  let h = harness();
  h.orchestrator.create_deployment(create_request()).unwrap();
  let err = h
    .orchestrator
    .create_deployment(create_request())
    .unwrap_err();
  assert!(matches!(
    err,
    CreateDeploymentError::NameConflict(name) if name == "blog"
  ));
}

#[tokio::test]
async fn docker_deploy_happy_path() {
  let h = harness();
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();

  h.orchestrator.start(&deployment.id, None).unwrap();
  let running = wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Running,
    Duration::from_secs(5),
  )
  .await;

  assert!(running.deployed_at.is_some());
  assert_eq!(running.task_retry_count, 0);
  assert!(running.logs.contains("[INFO] Deployment starting"));
  assert!(running.logs.contains("[SUCCESS]"));
  assert_eq!(
    h.deployer.deploy_calls.load(Ordering::SeqCst),
    1
  );
}

#[tokio::test]
async fn failed_attempt_retries_then_succeeds() {
  let h = harness();
  h.deployer.script_deploys([
    Err(String::from("docker: connection refused")),
    Ok(String::from("deployed")),
  ]);
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();

  h.orchestrator.start(&deployment.id, None).unwrap();
  let running = wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Running,
    Duration::from_secs(5),
  )
  .await;

  assert_eq!(running.task_retry_count, 1);
  assert!(running.logs.contains("[ERROR]"));
  assert!(running.logs.contains("connection refused"));
  assert!(running.logs.contains("[SUCCESS]"));
  assert_eq!(
    h.deployer.deploy_calls.load(Ordering::SeqCst),
    2
  );
}

#[tokio::test]
async fn exhausted_retries_fail_the_deployment_once() {
  let h = harness();
  h.deployer.script_deploys(
    (0..4).map(|_| Err(String::from("docker: boom"))),
  );

  // Count terminal failure events off the bus.
  let failures = Arc::new(AtomicUsize::new(0));
  let counter = failures.clone();
  h.bus.subscribe(
    EventKind::DeploymentFailed,
    handler(move |_| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    }),
  );

  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.orchestrator.start(&deployment.id, None).unwrap();
  let failed = wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Failed,
    Duration::from_secs(5),
  )
  .await;
  wait_for_idle(&h.orchestrator, Duration::from_secs(5)).await;

  assert_eq!(failed.task_retry_count, 3);
  assert!(
    failed
      .error_message
      .as_deref()
      .unwrap()
      .starts_with("After 3 attempts"),
    "unexpected error message: {:?}",
    failed.error_message
  );
  assert!(failed.stopped_at.is_some());
  assert_eq!(
    h.deployer.deploy_calls.load(Ordering::SeqCst),
    4
  );
  // Give spawned handlers a beat to drain.
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn secrets_render_once_and_survive_retries() {
  let mut stack = nginx_stack(Default::default());
  stack.variables = serde_json::from_value(json!({
    "db_password": {
      "type": "password",
      "default": "{{ generate_password(20) }}",
    },
  }))
  .unwrap();
  stack.template = json!({
    "image": "postgres:16",
    "environment": { "POSTGRES_PASSWORD": "{{ db_password }}" },
  });
  let h = harness_with_stack(stack);
  h.deployer.script_deploys([
    Err(String::from("transient")),
    Err(String::from("transient")),
    Ok(String::from("deployed")),
  ]);

  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  let password =
    deployment.variables["db_password"].as_str().unwrap().to_string();
  assert_eq!(password.len(), 20);
  assert_eq!(
    deployment.config["environment"]["POSTGRES_PASSWORD"]
      .as_str()
      .unwrap(),
    password
  );

  h.orchestrator.start(&deployment.id, None).unwrap();
  let running = wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Running,
    Duration::from_secs(5),
  )
  .await;

  // Retries reuse the persisted snapshots; the secret is stable.
  assert_eq!(running.variables["db_password"], json!(password));
  assert_eq!(
    running.config["environment"]["POSTGRES_PASSWORD"],
    json!(password)
  );
}

#[tokio::test]
async fn cancel_writes_terminal_cancelled_state() {
  let h = harness();
  h.deployer.set_deploy_delay(Duration::from_secs(30));
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.orchestrator.start(&deployment.id, None).unwrap();

  // Let the worker reach the executor call, then cancel.
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(h.orchestrator.cancel(&deployment.id));

  let failed = wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Failed,
    Duration::from_secs(5),
  )
  .await;
  assert_eq!(failed.error_message.as_deref(), Some("cancelled"));
  assert!(failed.logs.contains("[ERROR] Deployment cancelled"));
}

#[tokio::test]
async fn start_rejects_terminal_states_except_failed() {
  let h = harness();
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.orchestrator
    .update_status(
      &deployment.id,
      DeploymentStatus::Running,
      None,
      None,
      None,
    )
    .unwrap();
  assert!(h.orchestrator.start(&deployment.id, None).is_err());

  h.orchestrator
    .update_status(
      &deployment.id,
      DeploymentStatus::Failed,
      None,
      None,
      None,
    )
    .unwrap();
  h.orchestrator.start(&deployment.id, None).unwrap();
  wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Running,
    Duration::from_secs(5),
  )
  .await;
}

#[tokio::test]
async fn delete_tears_down_and_removes_the_row() {
  let h = harness();
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.orchestrator.start(&deployment.id, None).unwrap();
  wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Running,
    Duration::from_secs(5),
  )
  .await;

  let deleted =
    h.orchestrator.delete(&deployment.id, None).await.unwrap();
  assert!(deleted);
  assert_eq!(
    h.deployer.teardown_calls.load(Ordering::SeqCst),
    1
  );
  assert!(h.db.get_deployment(&deployment.id).is_err());
}

#[tokio::test]
async fn failed_teardown_keeps_the_row_as_failed() {
  let h = harness();
  h.deployer.script_teardowns([Err(String::from(
    "container rm exploded",
  ))]);
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.orchestrator.start(&deployment.id, None).unwrap();
  wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Running,
    Duration::from_secs(5),
  )
  .await;

  let deleted =
    h.orchestrator.delete(&deployment.id, None).await.unwrap();
  assert!(!deleted);

  let kept = h.db.get_deployment(&deployment.id).unwrap();
  assert_eq!(kept.status, DeploymentStatus::Failed);
  assert!(
    kept
      .error_message
      .as_deref()
      .unwrap()
      .starts_with("Failed to remove resources")
  );
  assert!(
    kept.logs.contains("[ERROR] Failed to remove resources")
  );
  assert!(kept.deploy_duration_seconds.is_some());
}

#[tokio::test]
async fn stopped_deployment_delete_skips_teardown() {
  let h = harness();
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.orchestrator
    .update_status(
      &deployment.id,
      DeploymentStatus::Stopped,
      None,
      None,
      None,
    )
    .unwrap();

  let deleted =
    h.orchestrator.delete(&deployment.id, None).await.unwrap();
  assert!(deleted);
  assert_eq!(
    h.deployer.teardown_calls.load(Ordering::SeqCst),
    0
  );
}

#[tokio::test]
async fn retry_restarts_a_failed_deployment_on_the_same_row() {
  let h = harness();
  h.deployer.script_deploys(
    (0..4).map(|_| Err(String::from("down"))),
  );
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.orchestrator.start(&deployment.id, None).unwrap();
  wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Failed,
    Duration::from_secs(5),
  )
  .await;
  wait_for_idle(&h.orchestrator, Duration::from_secs(5)).await;

  h.orchestrator.retry(&deployment.id, None).unwrap();
  let running = wait_for_status(
    &h.db,
    &deployment.id,
    DeploymentStatus::Running,
    Duration::from_secs(5),
  )
  .await;
  assert!(running.logs.contains("[RETRY] Retrying deployment"));
  assert_eq!(running.id, deployment.id);
}

#[tokio::test]
async fn retry_rejects_running_deployments() {
  let h = harness();
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.orchestrator
    .update_status(
      &deployment.id,
      DeploymentStatus::Running,
      None,
      None,
      None,
    )
    .unwrap();
  assert!(h.orchestrator.retry(&deployment.id, None).is_err());
}

#[tokio::test]
async fn recovery_restarts_stale_and_fails_timed_out() {
  let h = harness();

  // D1: deploying for 5 minutes, should be resumed.
  let d1 =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.db
    .update_deployment(&d1.id, |d| {
      d.status = DeploymentStatus::Deploying;
      d.created_at -= 5 * 60 * 1000;
    })
    .unwrap();

  // D2: pending for 90 minutes, should be timed out.
  let mut request = create_request();
  request.name = Some("stuck".to_string());
  let d2 = h.orchestrator.create_deployment(request).unwrap();
  h.db
    .update_deployment(&d2.id, |d| {
      d.created_at -= 90 * 60 * 1000;
    })
    .unwrap();

  let report = run_recovery(&h.orchestrator, 2, 60).await;
  assert_eq!(report.retried, 1);
  assert_eq!(report.failed, 1);
  assert_eq!(report.skipped, 0);
  assert_eq!(report.errors, 0);

  let timed_out = h.db.get_deployment(&d2.id).unwrap();
  assert_eq!(timed_out.status, DeploymentStatus::Failed);
  assert!(
    timed_out
      .error_message
      .as_deref()
      .unwrap()
      .starts_with("Timeout: stuck for more than 60 minutes")
  );
  assert!(timed_out.logs.contains("[ERROR]"));

  wait_for_status(
    &h.db,
    &d1.id,
    DeploymentStatus::Running,
    Duration::from_secs(5),
  )
  .await;

  // Post-sweep invariant: nothing old is still pending/deploying.
  let report = run_recovery(&h.orchestrator, 2, 60).await;
  assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn recovery_skips_deployments_with_active_workers() {
  let h = harness();
  h.deployer.set_deploy_delay(Duration::from_secs(30));
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  h.orchestrator.start(&deployment.id, None).unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;

  h.db
    .update_deployment(&deployment.id, |d| {
      d.created_at -= 5 * 60 * 1000;
    })
    .unwrap();

  let report = run_recovery(&h.orchestrator, 2, 60).await;
  assert_eq!(report.skipped, 1);
  assert_eq!(report.retried, 0);

  h.orchestrator.cancel(&deployment.id);
}

#[test]
fn named_volumes_come_from_rendered_target_parameters() {
  let h = harness();
  let mut deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();
  assert!(named_volumes(&deployment).is_empty());

  deployment.rendered_target_parameters = Some(json!({
    "volumes": ["app-xyz_data", "  ", "app-xyz_config"],
  }));
  assert_eq!(
    named_volumes(&deployment),
    vec!["app-xyz_data".to_string(), "app-xyz_config".to_string()]
  );
}

#[tokio::test]
async fn duration_is_computed_from_deploy_to_stop() {
  let h = harness();
  let deployment =
    h.orchestrator.create_deployment(create_request()).unwrap();

  let running = h
    .orchestrator
    .update_status(
      &deployment.id,
      DeploymentStatus::Running,
      None,
      None,
      None,
    )
    .unwrap();
  assert!(running.deployed_at.is_some());
  assert!(running.deploy_duration_seconds.is_none());

  tokio::time::sleep(Duration::from_millis(20)).await;
  let stopped = h
    .orchestrator
    .update_status(
      &deployment.id,
      DeploymentStatus::Stopped,
      None,
      None,
      None,
    )
    .unwrap();
  assert!(stopped.stopped_at.is_some());
  let duration = stopped.deploy_duration_seconds.unwrap();
  assert!(duration >= 0.0);
  assert!(stopped.stopped_at >= stopped.deployed_at);
}
