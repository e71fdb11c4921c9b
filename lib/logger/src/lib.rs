use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
  Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};
use windflow_client::entities::logger::{LogConfig, StdioLogMode};

mod otel;

pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let log_level: tracing::Level = config.level.into();

  let stdio_layer = match (config.stdio, config.pretty) {
    (StdioLogMode::Standard, true) => Some(
      tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(config.location)
        .with_file(false)
        .with_line_number(false)
        .boxed(),
    ),
    (StdioLogMode::Standard, false) => Some(
      tracing_subscriber::fmt::layer()
        .with_target(config.location)
        .with_file(false)
        .with_line_number(false)
        .boxed(),
    ),
    (StdioLogMode::Json, _) => {
      Some(tracing_subscriber::fmt::layer().json().boxed())
    }
    (StdioLogMode::None, _) => None,
  };

  let otel_layer = if config.otlp_endpoint.is_empty() {
    None
  } else {
    Some(OpenTelemetryLayer::new(otel::tracer(
      &config.otlp_endpoint,
      config.opentelemetry_service_name.clone(),
    )))
  };

  if stdio_layer.is_none() && otel_layer.is_none() {
    // Nothing to emit to, leave the global subscriber unset.
    return Ok(());
  }

  Registry::default()
    .with(LevelFilter::from(log_level))
    .with(stdio_layer)
    .with(otel_layer)
    .try_init()
    .context("failed to init logger")
}
