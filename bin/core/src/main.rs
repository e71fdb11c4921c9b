use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::core_config;

mod api;
mod auth;
mod compose;
mod config;
mod db;
mod docker;
mod events;
mod monitor;
mod orchestrator;
mod scanner;
mod stack;
mod state;
mod ws;

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let config = core_config();
  logger::init(&config.logging)?;
  if let Err(e) =
    rustls::crypto::aws_lc_rs::default_provider().install_default()
  {
    error!("Failed to install default crypto provider | {e:?}");
    std::process::exit(1);
  };

  info!("WindFlow Core version: v{}", env!("CARGO_PKG_VERSION"));
  info!("{:?}", config.sanitized());

  let state = state::AppState::new(config);

  // Seed marketplace stacks from disk.
  if let Some(stacks_dir) = &config.stacks_dir {
    let loaded =
      stack::load_stack_definitions(&state.db, stacks_dir).await;
    info!("seeded {loaded} stack definition(s) from {stacks_dir:?}");
  }

  // Recover deployments orphaned by the previous process.
  orchestrator::recovery::run_recovery(
    &state.orchestrator,
    config.recovery_max_age_minutes,
    config.recovery_timeout_minutes,
  )
  .await;
  orchestrator::recovery::spawn_recovery_loop(
    state.orchestrator.clone(),
    config.recovery_max_age_minutes,
    config.recovery_timeout_minutes,
    config.recovery_interval_seconds,
  );

  // Watch running deployments for containers dying out-of-band.
  monitor::spawn_monitor_loop(
    state.orchestrator.clone(),
    state.runtime.clone(),
    config.monitor_interval_seconds,
  );

  let app = Router::new()
    .nest("/api", api::router())
    .nest("/ws", ws::router())
    .with_state(state)
    .layer(
      CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any),
    )
    .into_make_service();

  let addr = format!("{}:{}", config.bind_ip, config.port);
  let socket_addr = SocketAddr::from_str(&addr)
    .context("failed to parse listen address")?;

  if config.ssl_enabled {
    info!("🔒 Core SSL Enabled");
    info!("WindFlow Core starting on https://{socket_addr}");
    let ssl_config = RustlsConfig::from_pem_file(
      &config.ssl_cert_file,
      &config.ssl_key_file,
    )
    .await
    .context("Invalid ssl cert / key")?;
    axum_server::bind_rustls(socket_addr, ssl_config)
      .serve(app)
      .await
      .context("failed to start https server")
  } else {
    info!("🔓 Core SSL Disabled");
    info!("WindFlow Core starting on http://{socket_addr}");
    axum_server::bind(socket_addr)
      .serve(app)
      .await
      .context("failed to start http server")
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let mut term_signal = tokio::signal::unix::signal(
    tokio::signal::unix::SignalKind::terminate(),
  )?;
  tokio::select! {
    res = tokio::spawn(app()) => res?,
    _ = term_signal.recv() => Ok(()),
  }
}
