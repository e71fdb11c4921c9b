//! Docker CLI executor.
//!
//! Single-container deployments shell out to `docker` with bounded
//! timeouts. Results come back as [Log] records; a non-zero exit is
//! a failed Log, a timeout is a failed Log with `stderr = "Timeout"`.

use std::{borrow::Cow, sync::OnceLock, time::Duration};

use anyhow::{Context, bail};
use command::run_windflow_command_with_timeout;
use regex::Regex;
use serde_json::Value;
use windflow_client::entities::Log;

const DEPLOY_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn esc(value: &str) -> Cow<'_, str> {
  shell_escape::escape(Cow::Borrowed(value))
}

fn container_name_regex() -> &'static Regex {
  static CONTAINER_NAME: OnceLock<Regex> = OnceLock::new();
  CONTAINER_NAME.get_or_init(|| {
    Regex::new("^[a-zA-Z0-9][a-zA-Z0-9_.-]*$")
      .expect("invalid container name regex")
  })
}

/// Parsed subset of `docker inspect` the platform cares about.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContainerStatus {
  pub id: String,
  pub name: String,
  pub image: String,
  pub state: String,
  pub running: bool,
  pub started_at: Option<String>,
  pub health: String,
  pub restart_count: i64,
}

#[derive(Default)]
pub struct DockerExecutor;

impl DockerExecutor {
  /// Checks a rendered container spec before any command is built.
  pub fn validate_container_spec(spec: &Value) -> anyhow::Result<()> {
    let image = spec
      .get("image")
      .context("container spec is missing 'image'")?;
    match image.as_str() {
      Some(image) if !image.trim().is_empty() => {}
      _ => bail!("container 'image' must be a non-empty string"),
    }

    if let Some(name) = spec.get("container_name") {
      let name = name
        .as_str()
        .context("'container_name' must be a string")?;
      if !container_name_regex().is_match(name) {
        bail!(
          "container name '{name}' must be alphanumeric ('-', '_', '.' allowed after the first character)"
        );
      }
    }

    if let Some(ports) = spec.get("ports")
      && !ports.is_null()
    {
      let ports =
        ports.as_array().context("'ports' must be a list")?;
      for port in ports {
        let port = port
          .as_str()
          .with_context(|| format!("invalid port mapping: {port}"))?;
        if !port.contains(':') {
          bail!(
            "invalid port mapping '{port}' (expected host:container)"
          );
        }
      }
    }

    if let Some(environment) = spec.get("environment")
      && !environment.is_null()
      && !environment.is_object()
    {
      bail!("'environment' must be a mapping");
    }

    if let Some(volumes) = spec.get("volumes")
      && !volumes.is_null()
      && !volumes.is_array()
    {
      bail!("'volumes' must be a list");
    }

    Ok(())
  }

  /// Shapes the full `docker run` invocation:
  /// `docker run -d [--name] [-e]* [-p]* [-v]* --restart
  /// [--health-*]* [--label]* IMAGE`
  pub fn build_run_command(
    spec: &Value,
    container_name: Option<&str>,
  ) -> anyhow::Result<String> {
    Self::validate_container_spec(spec)?;

    let mut cmd = String::from("docker run -d");

    let name = container_name
      .or_else(|| spec.get("container_name").and_then(Value::as_str));
    if let Some(name) = name {
      cmd.push_str(&format!(" --name {}", esc(name)));
    }

    if let Some(environment) =
      spec.get("environment").and_then(Value::as_object)
    {
      for (key, value) in environment {
        let value = match value {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        cmd.push_str(&format!(" -e {}", esc(&format!("{key}={value}"))));
      }
    }

    if let Some(ports) = spec.get("ports").and_then(Value::as_array) {
      for port in ports.iter().filter_map(Value::as_str) {
        cmd.push_str(&format!(" -p {}", esc(port)));
      }
    }

    if let Some(volumes) = spec.get("volumes").and_then(Value::as_array)
    {
      for volume in volumes.iter().filter_map(Value::as_str) {
        cmd.push_str(&format!(" -v {}", esc(volume)));
      }
    }

    let restart_policy = spec
      .get("restart_policy")
      .and_then(Value::as_str)
      .unwrap_or("unless-stopped");
    cmd.push_str(&format!(" --restart {}", esc(restart_policy)));

    if let Some(healthcheck) =
      spec.get("healthcheck").and_then(Value::as_object)
    {
      if let Some(test) = healthcheck.get("test") {
        let test = match test {
          // ["CMD-SHELL", "pg_isready"] style lists.
          Value::Array(parts) => {
            let strings: Vec<&str> =
              parts.iter().filter_map(Value::as_str).collect();
            match strings.split_first() {
              Some((&"CMD-SHELL", rest)) => rest.join(" "),
              _ => strings.join(" "),
            }
          }
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        if !test.is_empty() {
          cmd.push_str(&format!(" --health-cmd {}", esc(&test)));
        }
      }
      for (field, flag) in [
        ("interval", "--health-interval"),
        ("timeout", "--health-timeout"),
        ("start_period", "--health-start-period"),
      ] {
        if let Some(value) =
          healthcheck.get(field).and_then(Value::as_str)
        {
          cmd.push_str(&format!(" {flag} {}", esc(value)));
        }
      }
      if let Some(retries) =
        healthcheck.get("retries").and_then(Value::as_i64)
      {
        cmd.push_str(&format!(" --health-retries {retries}"));
      }
    }

    if let Some(labels) =
      spec.get("labels").and_then(Value::as_object)
    {
      for (key, value) in labels {
        let value = match value {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        cmd.push_str(&format!(
          " --label {}",
          esc(&format!("{key}={value}"))
        ));
      }
    }

    // Image goes last.
    let image = spec
      .get("image")
      .and_then(Value::as_str)
      .context("container spec is missing 'image'")?;
    cmd.push_str(&format!(" {}", esc(image)));

    Ok(cmd)
  }

  pub async fn deploy_container(
    &self,
    spec: &Value,
    container_name: Option<&str>,
  ) -> anyhow::Result<Log> {
    let cmd = Self::build_run_command(spec, container_name)?;
    Ok(
      run_windflow_command_with_timeout(
        "Deploy Container",
        None,
        cmd,
        DEPLOY_TIMEOUT,
      )
      .await,
    )
  }

  pub async fn container_status(
    &self,
    container_name: &str,
  ) -> anyhow::Result<ContainerStatus> {
    let log = run_windflow_command_with_timeout(
      "Inspect Container",
      None,
      format!("docker inspect {}", esc(container_name)),
      DEFAULT_TIMEOUT,
    )
    .await;
    if !log.success {
      bail!("docker inspect failed: {}", log.stderr.trim());
    }
    let inspected: Vec<Value> = serde_json::from_str(&log.stdout)
      .context("failed to parse docker inspect output")?;
    let container = inspected
      .first()
      .context("docker inspect returned no containers")?;
    parse_inspect(container)
  }

  pub async fn stop_container(
    &self,
    container_name: &str,
    timeout_secs: u64,
  ) -> Log {
    run_windflow_command_with_timeout(
      "Stop Container",
      None,
      format!(
        "docker stop -t {timeout_secs} {}",
        esc(container_name)
      ),
      Duration::from_secs(timeout_secs + 5),
    )
    .await
  }

  pub async fn remove_container(
    &self,
    container_name: &str,
    force: bool,
    remove_volumes: bool,
  ) -> Log {
    let force = if force { " -f" } else { "" };
    let volumes = if remove_volumes { " -v" } else { "" };
    run_windflow_command_with_timeout(
      "Remove Container",
      None,
      format!("docker rm{force}{volumes} {}", esc(container_name)),
      DEFAULT_TIMEOUT,
    )
    .await
  }

  pub async fn container_logs(
    &self,
    container_name: &str,
    tail: u64,
    since: Option<&str>,
  ) -> Log {
    let since = since
      .map(|since| format!(" --since {}", esc(since)))
      .unwrap_or_default();
    run_windflow_command_with_timeout(
      "Container Logs",
      None,
      format!(
        "docker logs --tail {tail}{since} {}",
        esc(container_name)
      ),
      DEFAULT_TIMEOUT,
    )
    .await
  }

  pub async fn restart_container(
    &self,
    container_name: &str,
    timeout_secs: u64,
  ) -> Log {
    run_windflow_command_with_timeout(
      "Restart Container",
      None,
      format!(
        "docker restart -t {timeout_secs} {}",
        esc(container_name)
      ),
      Duration::from_secs(timeout_secs + 5),
    )
    .await
  }

  /// `docker volume rm`. A volume that no longer exists counts as
  /// removed.
  pub async fn remove_volume(
    &self,
    volume_name: &str,
    force: bool,
  ) -> Log {
    let force = if force { " -f" } else { "" };
    let mut log = run_windflow_command_with_timeout(
      "Remove Volume",
      None,
      format!("docker volume rm{force} {}", esc(volume_name)),
      DEFAULT_TIMEOUT,
    )
    .await;
    if !log.success && volume_already_gone(&log.stderr) {
      log.success = true;
      log.stdout =
        format!("volume {volume_name} does not exist, skipping");
    }
    log
  }
}

fn volume_already_gone(stderr: &str) -> bool {
  let stderr = stderr.to_lowercase();
  stderr.contains("no such volume") || stderr.contains("not found")
}

fn parse_inspect(container: &Value) -> anyhow::Result<ContainerStatus> {
  let state = container
    .get("State")
    .context("inspect output missing .State")?;
  Ok(ContainerStatus {
    id: container
      .get("Id")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string(),
    name: container
      .get("Name")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .trim_start_matches('/')
      .to_string(),
    image: container
      .pointer("/Config/Image")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string(),
    state: state
      .get("Status")
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string(),
    running: state
      .get("Running")
      .and_then(Value::as_bool)
      .unwrap_or_default(),
    started_at: state
      .get("StartedAt")
      .and_then(Value::as_str)
      .map(str::to_string),
    health: state
      .pointer("/Health/Status")
      .and_then(Value::as_str)
      .unwrap_or("none")
      .to_string(),
    restart_count: container
      .get("RestartCount")
      .and_then(Value::as_i64)
      .unwrap_or_default(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn validates_required_image() {
    assert!(
      DockerExecutor::validate_container_spec(&json!({})).is_err()
    );
    assert!(
      DockerExecutor::validate_container_spec(&json!({ "image": " " }))
        .is_err()
    );
    assert!(
      DockerExecutor::validate_container_spec(
        &json!({ "image": "nginx:1.25" })
      )
      .is_ok()
    );
  }

  #[test]
  fn validates_container_name_shape() {
    let ok = json!({ "image": "x", "container_name": "my-app_1.0" });
    assert!(DockerExecutor::validate_container_spec(&ok).is_ok());
    let bad = json!({ "image": "x", "container_name": "-leading" });
    assert!(DockerExecutor::validate_container_spec(&bad).is_err());
    let bad = json!({ "image": "x", "container_name": "sp ace" });
    assert!(DockerExecutor::validate_container_spec(&bad).is_err());
  }

  #[test]
  fn validates_ports_environment_volumes() {
    let bad_port = json!({ "image": "x", "ports": ["8080"] });
    assert!(
      DockerExecutor::validate_container_spec(&bad_port).is_err()
    );
    let bad_env = json!({ "image": "x", "environment": ["A=1"] });
    assert!(
      DockerExecutor::validate_container_spec(&bad_env).is_err()
    );
    let bad_volumes = json!({ "image": "x", "volumes": "vol:/data" });
    assert!(
      DockerExecutor::validate_container_spec(&bad_volumes).is_err()
    );
  }

  #[test]
  fn run_command_shape_for_happy_path() {
    let spec = json!({
      "image": "nginx:1.25",
      "ports": ["8080:80"],
    });
    let cmd = DockerExecutor::build_run_command(
      &spec,
      Some("windflow-0a1b2c3d"),
    )
    .unwrap();
    // ':' falls outside the shell-escape whitelist, so port and
    // image arguments come out single-quoted.
    assert_eq!(
      cmd,
      "docker run -d --name windflow-0a1b2c3d -p '8080:80' --restart unless-stopped 'nginx:1.25'"
    );
  }

  #[test]
  fn run_command_includes_env_volumes_labels_healthcheck() {
    let spec = json!({
      "image": "postgres:16",
      "container_name": "db",
      "environment": { "POSTGRES_USER": "admin" },
      "volumes": ["pgdata:/var/lib/postgresql/data"],
      "labels": { "app": "blog" },
      "restart_policy": "always",
      "healthcheck": {
        "test": ["CMD-SHELL", "pg_isready"],
        "interval": "10s",
        "retries": 3,
      },
    });
    let cmd =
      DockerExecutor::build_run_command(&spec, None).unwrap();
    assert!(cmd.starts_with("docker run -d --name db"));
    assert!(cmd.contains(" -e POSTGRES_USER=admin"));
    assert!(cmd.contains(" -v 'pgdata:/var/lib/postgresql/data'"));
    assert!(cmd.contains(" --restart always"));
    assert!(cmd.contains(" --health-cmd pg_isready"));
    assert!(cmd.contains(" --health-interval 10s"));
    assert!(cmd.contains(" --health-retries 3"));
    assert!(cmd.contains(" --label app=blog"));
    assert!(cmd.ends_with(" 'postgres:16'"));
  }

  #[test]
  fn shell_escapes_untrusted_values() {
    let spec = json!({
      "image": "x",
      "environment": { "MOTD": "hello world; rm -rf /" },
    });
    let cmd =
      DockerExecutor::build_run_command(&spec, None).unwrap();
    assert!(cmd.contains("-e 'MOTD=hello world; rm -rf /'"));
  }

  #[test]
  fn parses_inspect_state() {
    let inspected = json!({
      "Id": "abc123",
      "Name": "/windflow-0a1b2c3d",
      "RestartCount": 2,
      "Config": { "Image": "nginx:1.25" },
      "State": {
        "Status": "running",
        "Running": true,
        "StartedAt": "2025-01-01T00:00:00Z",
        "Health": { "Status": "healthy" },
      },
    });
    let status = parse_inspect(&inspected).unwrap();
    assert_eq!(status.name, "windflow-0a1b2c3d");
    assert_eq!(status.state, "running");
    assert!(status.running);
    assert_eq!(status.health, "healthy");
    assert_eq!(status.restart_count, 2);
  }

  #[test]
  fn missing_volume_counts_as_removed() {
    assert!(volume_already_gone(
      "Error response from daemon: get windflow_data: No such volume"
    ));
    assert!(volume_already_gone("volume windflow_data not found"));
    assert!(!volume_already_gone("volume is in use"));
  }
}
