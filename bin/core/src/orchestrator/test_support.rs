//! Shared fixtures for orchestrator tests: a scripted deployer in
//! place of the Docker tooling, and an in-memory store seeded with
//! one stack and one target.

use std::{
  collections::VecDeque,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use anyhow::anyhow;
use futures::future::BoxFuture;
use serde_json::json;
use windflow_client::entities::{
  deployment::{Deployment, DeploymentStatus},
  stack::{Stack, TargetType},
  target::Target,
  windflow_timestamp,
};

use super::{Deployer, Orchestrator, RetryPolicy};
use crate::{db::DbClient, events::EventBus};

type Scripted = Mutex<VecDeque<Result<String, String>>>;

#[derive(Default)]
pub struct ScriptedDeployer {
  deploy_results: Scripted,
  teardown_results: Scripted,
  pub deploy_calls: AtomicUsize,
  pub teardown_calls: AtomicUsize,
  /// Simulated execution time per deploy call.
  pub deploy_delay: Mutex<Duration>,
}

impl ScriptedDeployer {
  pub fn new() -> Arc<ScriptedDeployer> {
    Default::default()
  }

  pub fn script_deploys(
    &self,
    results: impl IntoIterator<Item = Result<String, String>>,
  ) {
    self
      .deploy_results
      .lock()
      .unwrap()
      .extend(results);
  }

  pub fn script_teardowns(
    &self,
    results: impl IntoIterator<Item = Result<String, String>>,
  ) {
    self
      .teardown_results
      .lock()
      .unwrap()
      .extend(results);
  }

  pub fn set_deploy_delay(&self, delay: Duration) {
    *self.deploy_delay.lock().unwrap() = delay;
  }

  fn next(scripted: &Scripted) -> Result<String, String> {
    scripted
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| Ok(String::from("ok")))
  }
}

impl Deployer for ScriptedDeployer {
  fn deploy<'a>(
    &'a self,
    _deployment: &'a Deployment,
    _stack: &'a Stack,
  ) -> BoxFuture<'a, anyhow::Result<String>> {
    Box::pin(async move {
      self.deploy_calls.fetch_add(1, Ordering::SeqCst);
      let delay = *self.deploy_delay.lock().unwrap();
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      Self::next(&self.deploy_results).map_err(|e| anyhow!(e))
    })
  }

  fn teardown<'a>(
    &'a self,
    _deployment: &'a Deployment,
    _stack: &'a Stack,
  ) -> BoxFuture<'a, anyhow::Result<String>> {
    Box::pin(async move {
      self.teardown_calls.fetch_add(1, Ordering::SeqCst);
      Self::next(&self.teardown_results).map_err(|e| anyhow!(e))
    })
  }
}

pub const STACK_ID: &str = "stack-1";
pub const TARGET_ID: &str = "target-1";
pub const ORG_ID: &str = "org-1";

pub fn nginx_stack(target_type: TargetType) -> Stack {
  Stack {
    id: STACK_ID.to_string(),
    name: "nginx".to_string(),
    version: "1.0.0".to_string(),
    target_type,
    template: json!({
      "image": "nginx:1.25",
      "ports": ["{{ port }}:80"],
    }),
    variables: serde_json::from_value(json!({
      "port": { "type": "integer", "default": 8080 },
    }))
    .unwrap(),
    target_parameters: None,
    deployment_name: None,
  }
}

pub struct TestHarness {
  pub db: Arc<DbClient>,
  pub bus: Arc<EventBus>,
  pub deployer: Arc<ScriptedDeployer>,
  pub orchestrator: Arc<Orchestrator>,
}

pub fn harness_with_stack(stack: Stack) -> TestHarness {
  let db = Arc::new(DbClient::new());
  db.stacks.insert(stack.id.clone(), stack);
  db.targets.insert(
    TARGET_ID.to_string(),
    Target {
      id: TARGET_ID.to_string(),
      name: "local".to_string(),
      host: "localhost".to_string(),
      port: None,
      target_type: Default::default(),
      organization_id: ORG_ID.to_string(),
      credentials: None,
      status: Default::default(),
      scan_date: None,
      scan_success: None,
      platform_info: None,
      os_info: None,
      capabilities: None,
    },
  );

  let bus = Arc::new(EventBus::new());
  let deployer = ScriptedDeployer::new();
  let orchestrator = Orchestrator::new(
    db.clone(),
    bus.clone(),
    deployer.clone(),
    RetryPolicy {
      max_retries: 3,
      initial_delay: Duration::from_millis(10),
      max_delay: Duration::from_millis(40),
    },
    4,
  );
  TestHarness {
    db,
    bus,
    deployer,
    orchestrator,
  }
}

pub fn harness() -> TestHarness {
  harness_with_stack(nginx_stack(TargetType::Docker))
}

pub async fn wait_for_status(
  db: &DbClient,
  deployment_id: &str,
  status: DeploymentStatus,
  timeout: Duration,
) -> Deployment {
  let deadline = windflow_timestamp() + timeout.as_millis() as i64;
  loop {
    if let Ok(deployment) = db.get_deployment(deployment_id)
      && deployment.status == status
    {
      return deployment;
    }
    if windflow_timestamp() > deadline {
      panic!(
        "deployment {deployment_id} never reached {status}: {:?}",
        db.get_deployment(deployment_id).map(|d| d.status)
      );
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}

/// Waits until the orchestrator's task registry is empty.
pub async fn wait_for_idle(
  orchestrator: &Arc<Orchestrator>,
  timeout: Duration,
) {
  let deadline = windflow_timestamp() + timeout.as_millis() as i64;
  while orchestrator.active_task_count() > 0 {
    if windflow_timestamp() > deadline {
      panic!("orchestrator still has active tasks");
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}
