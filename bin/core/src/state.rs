//! Composition root. All long-lived services are built here and
//! passed around as explicit handles through axum state; nothing
//! relies on process-global mutable singletons.

use std::sync::Arc;

use crate::{
  auth::jwt::JwtClient,
  config::CoreConfig,
  db::DbClient,
  events::{EventBus, bridge::setup_event_bridge},
  orchestrator::{ExecutorDeployer, Orchestrator, RetryPolicy},
  ws::registry::ConnectionRegistry,
};

pub struct AppState {
  pub db: Arc<DbClient>,
  pub bus: Arc<EventBus>,
  pub registry: Arc<ConnectionRegistry>,
  pub orchestrator: Arc<Orchestrator>,
  /// Direct executor access for runtime ops (status / logs /
  /// stop / restart) that do not go through the worker.
  pub runtime: Arc<ExecutorDeployer>,
  pub jwt: Arc<JwtClient>,
}

impl AppState {
  pub fn new(config: &CoreConfig) -> Arc<AppState> {
    let db = Arc::new(DbClient::new());
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(ConnectionRegistry::new());

    // The bridge is the single path from bus events to sockets;
    // wire it before anything can publish.
    setup_event_bridge(&bus, registry.clone());

    let runtime = Arc::new(ExecutorDeployer::new(
      config.deploy_dir.clone(),
      config.legacy_compose_cli,
    ));
    let orchestrator = Orchestrator::new(
      db.clone(),
      bus.clone(),
      runtime.clone(),
      RetryPolicy::default(),
      config.worker_limit(),
    );
    let jwt = Arc::new(JwtClient::new(config));

    Arc::new(AppState {
      db,
      bus,
      registry,
      orchestrator,
      runtime,
      jwt,
    })
  }
}
