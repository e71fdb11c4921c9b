use std::{path::Path, time::Duration};

use run_command::{CommandOutput, async_run_command};
use windflow_client::entities::{Log, windflow_timestamp};

/// Runs the command through the shell, capturing stdout / stderr
/// into a [Log]. If `path` is given, the command runs from there.
pub async fn run_windflow_command(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
) -> Log {
  let command = if let Some(path) = path.into() {
    format!("cd {} && {}", path.display(), command.as_ref())
  } else {
    command.as_ref().to_string()
  };
  let start_ts = windflow_timestamp();
  let output = async_run_command(&command).await;
  output_into_log(stage, command, start_ts, output)
}

/// Like [run_windflow_command], but bounded by `timeout`.
/// Exceeding the timeout yields a failed Log with `stderr = "Timeout"`,
/// which callers treat like any other command failure.
pub async fn run_windflow_command_with_timeout(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
  timeout: Duration,
) -> Log {
  let command = command.as_ref();
  let start_ts = windflow_timestamp();
  match tokio::time::timeout(
    timeout,
    run_windflow_command(stage, path, command),
  )
  .await
  {
    Ok(log) => log,
    Err(_) => Log {
      stage: stage.to_string(),
      command: command.to_string(),
      stdout: String::new(),
      stderr: String::from("Timeout"),
      success: false,
      start_ts,
      end_ts: windflow_timestamp(),
    },
  }
}

pub fn output_into_log(
  stage: &str,
  command: String,
  start_ts: i64,
  output: CommandOutput,
) -> Log {
  let success = output.success();
  Log {
    stage: stage.to_string(),
    stdout: output.stdout,
    stderr: output.stderr,
    command,
    success,
    start_ts,
    end_ts: windflow_timestamp(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn captures_stdout_and_exit_status() {
    let log = run_windflow_command("Test", None, "echo hello").await;
    assert!(log.success);
    assert_eq!(log.stdout.trim(), "hello");
  }

  #[tokio::test]
  async fn nonzero_exit_is_failure() {
    let log = run_windflow_command("Test", None, "false").await;
    assert!(!log.success);
  }

  #[tokio::test]
  async fn timeout_yields_failed_log() {
    let log = run_windflow_command_with_timeout(
      "Test",
      None,
      "sleep 5",
      Duration::from_millis(50),
    )
    .await;
    assert!(!log.success);
    assert_eq!(log.stderr, "Timeout");
  }
}
