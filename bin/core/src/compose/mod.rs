//! Docker Compose executor.
//!
//! A rendered compose spec is emitted to disk as YAML (stable key
//! order), then driven through `docker compose -p NAME -f FILE`.
//! The standalone `docker-compose` binary is supported for hosts
//! that never migrated to the plugin.

use std::{
  borrow::Cow,
  collections::HashMap,
  path::Path,
  time::Duration,
};

use anyhow::{Context, bail};
use command::run_windflow_command_with_timeout;
use serde_json::Value;
use tokio::fs;
use windflow_client::entities::Log;

const UP_TIMEOUT: Duration = Duration::from_secs(300);
const DOWN_TIMEOUT: Duration = Duration::from_secs(120);
const STOP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn esc(value: &str) -> Cow<'_, str> {
  shell_escape::escape(Cow::Borrowed(value))
}

pub struct ComposeExecutor {
  legacy_compose_cli: bool,
}

impl ComposeExecutor {
  pub fn new(legacy_compose_cli: bool) -> ComposeExecutor {
    ComposeExecutor { legacy_compose_cli }
  }

  fn docker_compose(&self) -> &'static str {
    if self.legacy_compose_cli {
      "docker-compose"
    } else {
      "docker compose"
    }
  }

  /// Checks a rendered compose spec before it is written to disk.
  pub fn validate_compose_spec(spec: &Value) -> anyhow::Result<()> {
    if spec.get("version").is_none() {
      bail!("compose spec is missing 'version'");
    }
    let services = spec
      .get("services")
      .and_then(Value::as_object)
      .context("compose spec is missing 'services'")?;
    if services.is_empty() {
      bail!("compose spec defines no services");
    }
    for (name, service) in services {
      let service = service
        .as_object()
        .with_context(|| format!("service '{name}' is not a mapping"))?;
      if !service.contains_key("image")
        && !service.contains_key("build")
      {
        bail!("service '{name}' must define 'image' or 'build'");
      }
    }
    Ok(())
  }

  /// Serializes the spec as YAML at `path`, creating parent
  /// directories. Key order follows the spec's insertion order.
  pub async fn write_compose_file(
    spec: &Value,
    path: &Path,
  ) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await.with_context(|| {
        format!("failed to create deploy directory {parent:?}")
      })?;
    }
    let contents = serde_yaml_ng::to_string(spec)
      .context("failed to serialize compose spec to yaml")?;
    fs::write(path, contents).await.with_context(|| {
      format!("failed to write compose file to {path:?}")
    })
  }

  pub async fn compose_up(
    &self,
    compose_file: &Path,
    project_name: &str,
    env: &HashMap<String, String>,
  ) -> Log {
    let env_prefix: String = env
      .iter()
      .map(|(key, value)| format!("{key}={} ", esc(value)))
      .collect();
    run_windflow_command_with_timeout(
      "Compose Up",
      None,
      format!(
        "{env_prefix}{} -f {} -p {} up -d",
        self.docker_compose(),
        esc(&compose_file.display().to_string()),
        esc(project_name),
      ),
      UP_TIMEOUT,
    )
    .await
  }

  /// `compose ps --format json`, parsed from newline-delimited
  /// JSON objects.
  pub async fn compose_status(
    &self,
    project_name: &str,
  ) -> anyhow::Result<Vec<Value>> {
    let log = run_windflow_command_with_timeout(
      "Compose Ps",
      None,
      format!(
        "{} -p {} ps --format json",
        self.docker_compose(),
        esc(project_name),
      ),
      DEFAULT_TIMEOUT,
    )
    .await;
    if !log.success {
      bail!("docker compose ps failed: {}", log.stderr.trim());
    }
    parse_ps_output(&log.stdout)
  }

  pub async fn compose_stop(&self, project_name: &str) -> Log {
    run_windflow_command_with_timeout(
      "Compose Down",
      None,
      format!(
        "{} -p {} down",
        self.docker_compose(),
        esc(project_name)
      ),
      STOP_TIMEOUT,
    )
    .await
  }

  pub async fn compose_remove(
    &self,
    project_name: &str,
    remove_volumes: bool,
  ) -> Log {
    let volumes = if remove_volumes { " -v" } else { "" };
    run_windflow_command_with_timeout(
      "Compose Remove",
      None,
      format!(
        "{} -p {} down{volumes} --remove-orphans",
        self.docker_compose(),
        esc(project_name),
      ),
      DOWN_TIMEOUT,
    )
    .await
  }

  pub async fn compose_logs(
    &self,
    project_name: &str,
    service: Option<&str>,
    tail: u64,
  ) -> Log {
    let service = service
      .map(|service| format!(" {}", esc(service)))
      .unwrap_or_default();
    run_windflow_command_with_timeout(
      "Compose Logs",
      None,
      format!(
        "{} -p {} logs --tail {tail}{service}",
        self.docker_compose(),
        esc(project_name),
      ),
      DEFAULT_TIMEOUT,
    )
    .await
  }
}

fn parse_ps_output(stdout: &str) -> anyhow::Result<Vec<Value>> {
  stdout
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(|line| {
      serde_json::from_str(line).with_context(|| {
        format!("invalid json in compose ps output: {line}")
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn validates_compose_shape() {
    assert!(
      ComposeExecutor::validate_compose_spec(&json!({})).is_err()
    );
    assert!(
      ComposeExecutor::validate_compose_spec(
        &json!({ "version": "3.8", "services": {} })
      )
      .is_err()
    );
    assert!(
      ComposeExecutor::validate_compose_spec(&json!({
        "version": "3.8",
        "services": { "app": { "ports": ["80:80"] } },
      }))
      .is_err()
    );
    assert!(
      ComposeExecutor::validate_compose_spec(&json!({
        "version": "3.8",
        "services": {
          "app": { "image": "nginx:1.25" },
          "builder": { "build": "." },
        },
      }))
      .is_ok()
    );
  }

  #[tokio::test]
  async fn emits_yaml_with_stable_key_order() {
    let spec = json!({
      "version": "3.8",
      "services": {
        "web": { "image": "nginx:1.25", "ports": ["8080:80"] },
        "db": { "image": "postgres:16" },
      },
    });
    let dir = std::env::temp_dir()
      .join(format!("windflow-compose-test-{}", std::process::id()));
    let path = dir.join("nested/docker-compose.yml");
    ComposeExecutor::write_compose_file(&spec, &path)
      .await
      .unwrap();

    let written = tokio::fs::read_to_string(&path).await.unwrap();
    // `version` first, then services in template order.
    let version_at = written.find("version:").unwrap();
    let web_at = written.find("web:").unwrap();
    let db_at = written.find("db:").unwrap();
    assert!(version_at < web_at && web_at < db_at);

    let round_trip: Value =
      serde_yaml_ng::from_str(&written).unwrap();
    assert_eq!(
      round_trip["services"]["web"]["image"],
      "nginx:1.25"
    );

    tokio::fs::remove_dir_all(&dir).await.ok();
  }

  #[test]
  fn parses_newline_delimited_ps_output() {
    let stdout = concat!(
      r#"{"Name":"windflow-01234567-web-1","State":"running"}"#,
      "\n",
      r#"{"Name":"windflow-01234567-db-1","State":"exited"}"#,
      "\n",
    );
    let services = parse_ps_output(stdout).unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(services[0]["State"], "running");

    assert!(parse_ps_output("not json").is_err());
    assert!(parse_ps_output("").unwrap().is_empty());
  }

  #[test]
  fn compose_binary_selection() {
    assert_eq!(
      ComposeExecutor::new(false).docker_compose(),
      "docker compose"
    );
    assert_eq!(
      ComposeExecutor::new(true).docker_compose(),
      "docker-compose"
    );
  }
}
