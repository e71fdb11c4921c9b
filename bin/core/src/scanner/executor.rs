//! Command execution for capability scans: local subprocess or a
//! single multiplexed SSH session, with optional sudo wrapping.

use std::{process::Stdio, sync::Arc, time::Duration};

use russh::{ChannelMsg, client};
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
  #[error(
    "Command '{command}' exited with status {exit_status}: {stderr}"
  )]
  Failed {
    command: String,
    exit_status: i32,
    stderr: String,
  },
  #[error("Command '{command}' timed out after {timeout_secs}s")]
  Timeout { command: String, timeout_secs: u64 },
  #[error("failed to spawn '{command}': {source}")]
  Spawn {
    command: String,
    source: std::io::Error,
  },
  #[error("SSH execution failed: {0}")]
  Ssh(String),
}

#[derive(Debug, Clone)]
pub struct CommandResult {
  pub exit_status: i32,
  pub stdout: String,
  pub stderr: String,
}

impl CommandResult {
  pub fn success(&self) -> bool {
    self.exit_status == 0
  }

  pub fn stripped_stdout(&self) -> &str {
    self.stdout.trim()
  }
}

#[derive(Debug, Clone)]
pub struct SudoConfig {
  pub user: String,
  pub password: Option<String>,
}

impl SudoConfig {
  fn wrap(&self, command: &str) -> String {
    format!("sudo -S -p '' -u {} {command}", self.user)
  }

  fn stdin_payload(&self) -> Option<String> {
    self
      .password
      .as_ref()
      .map(|password| format!("{password}\n"))
  }
}

pub enum ScanExecutor {
  Local(LocalExecutor),
  Ssh(SshExecutor),
}

impl ScanExecutor {
  pub fn is_local(&self) -> bool {
    matches!(self, ScanExecutor::Local(_))
  }

  pub async fn run(
    &self,
    command: &str,
    timeout: Duration,
    require_success: bool,
  ) -> Result<CommandResult, CommandError> {
    let result = match self {
      ScanExecutor::Local(executor) => {
        executor.run(command, timeout).await?
      }
      ScanExecutor::Ssh(executor) => {
        executor.run(command, timeout).await?
      }
    };
    if require_success && !result.success() {
      return Err(CommandError::Failed {
        command: command.to_string(),
        exit_status: result.exit_status,
        stderr: result.stderr.trim().to_string(),
      });
    }
    Ok(result)
  }
}

#[derive(Default)]
pub struct LocalExecutor {
  pub sudo: Option<SudoConfig>,
}

impl LocalExecutor {
  async fn run(
    &self,
    command: &str,
    timeout: Duration,
  ) -> Result<CommandResult, CommandError> {
    let wrapped = match &self.sudo {
      Some(sudo) => sudo.wrap(command),
      None => command.to_string(),
    };
    let stdin_payload =
      self.sudo.as_ref().and_then(SudoConfig::stdin_payload);

    let mut cmd = tokio::process::Command::new("sh");
    cmd
      .arg("-c")
      .arg(&wrapped)
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .stdin(if stdin_payload.is_some() {
        Stdio::piped()
      } else {
        Stdio::null()
      })
      .kill_on_drop(true);

    let mut child =
      cmd.spawn().map_err(|source| CommandError::Spawn {
        command: command.to_string(),
        source,
      })?;

    if let (Some(payload), Some(mut stdin)) =
      (stdin_payload, child.stdin.take())
    {
      let _ = stdin.write_all(payload.as_bytes()).await;
    }

    let output =
      tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| CommandError::Timeout {
          command: command.to_string(),
          timeout_secs: timeout.as_secs(),
        })?
        .map_err(|source| CommandError::Spawn {
          command: command.to_string(),
          source,
        })?;

    Ok(CommandResult {
      exit_status: output.status.code().unwrap_or(-1),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
  }
}

struct ScanSshHandler;

#[async_trait::async_trait]
impl client::Handler for ScanSshHandler {
  type Error = russh::Error;

  async fn check_server_key(
    &mut self,
    _server_public_key: &russh_keys::key::PublicKey,
  ) -> Result<bool, Self::Error> {
    // Targets are registered with credentials by an operator;
    // host keys are not pinned.
    Ok(true)
  }
}

pub struct SshExecutor {
  session: client::Handle<ScanSshHandler>,
  sudo: Option<SudoConfig>,
}

impl SshExecutor {
  /// Opens one session; every probe runs on its own channel.
  pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    sudo: Option<SudoConfig>,
  ) -> Result<SshExecutor, CommandError> {
    let config = Arc::new(client::Config::default());
    let mut session =
      client::connect(config, (host, port), ScanSshHandler)
        .await
        .map_err(|e| {
          CommandError::Ssh(format!("connection failed: {e}"))
        })?;
    let authenticated = session
      .authenticate_password(username, password)
      .await
      .map_err(|e| {
        CommandError::Ssh(format!("authentication failed: {e}"))
      })?;
    if !authenticated {
      return Err(CommandError::Ssh(
        "password authentication rejected".to_string(),
      ));
    }
    Ok(SshExecutor { session, sudo })
  }

  async fn run(
    &self,
    command: &str,
    timeout: Duration,
  ) -> Result<CommandResult, CommandError> {
    let wrapped = match &self.sudo {
      Some(sudo) => sudo.wrap(command),
      None => command.to_string(),
    };
    let stdin_payload =
      self.sudo.as_ref().and_then(SudoConfig::stdin_payload);

    tokio::time::timeout(
      timeout,
      self.exec(&wrapped, stdin_payload),
    )
    .await
    .map_err(|_| CommandError::Timeout {
      command: command.to_string(),
      timeout_secs: timeout.as_secs(),
    })?
  }

  async fn exec(
    &self,
    command: &str,
    stdin_payload: Option<String>,
  ) -> Result<CommandResult, CommandError> {
    let ssh_err =
      |e: russh::Error| CommandError::Ssh(e.to_string());

    let mut channel = self
      .session
      .channel_open_session()
      .await
      .map_err(ssh_err)?;
    channel.exec(true, command).await.map_err(ssh_err)?;
    if let Some(payload) = stdin_payload {
      channel
        .data(payload.as_bytes())
        .await
        .map_err(ssh_err)?;
      channel.eof().await.map_err(ssh_err)?;
    }

    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
      match msg {
        ChannelMsg::Data { ref data } => {
          stdout.push_str(&String::from_utf8_lossy(data));
        }
        ChannelMsg::ExtendedData { ref data, ext: 1 } => {
          stderr.push_str(&String::from_utf8_lossy(data));
        }
        ChannelMsg::ExitStatus { exit_status: code } => {
          exit_status = Some(code as i32);
        }
        _ => {}
      }
    }

    Ok(CommandResult {
      exit_status: exit_status.unwrap_or(-1),
      stdout,
      stderr,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn local_executor_captures_output_and_exit_status() {
    let executor = ScanExecutor::Local(Default::default());
    let result = executor
      .run("echo out && echo err >&2", Duration::from_secs(5), false)
      .await
      .unwrap();
    assert!(result.success());
    assert_eq!(result.stripped_stdout(), "out");
    assert_eq!(result.stderr.trim(), "err");

    let result = executor
      .run("exit 3", Duration::from_secs(5), false)
      .await
      .unwrap();
    assert_eq!(result.exit_status, 3);
  }

  #[tokio::test]
  async fn require_success_turns_nonzero_into_error() {
    let executor = ScanExecutor::Local(Default::default());
    let err = executor
      .run("echo broken >&2; exit 1", Duration::from_secs(5), true)
      .await
      .unwrap_err();
    match err {
      CommandError::Failed {
        exit_status, stderr, ..
      } => {
        assert_eq!(exit_status, 1);
        assert_eq!(stderr, "broken");
      }
      other => panic!("expected Failed, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn local_executor_times_out() {
    let executor = ScanExecutor::Local(Default::default());
    let err = executor
      .run("sleep 5", Duration::from_millis(50), false)
      .await
      .unwrap_err();
    assert!(matches!(err, CommandError::Timeout { .. }));
  }

  #[test]
  fn sudo_wrapping() {
    let sudo = SudoConfig {
      user: "deploy".to_string(),
      password: Some("hunter2".to_string()),
    };
    assert_eq!(
      sudo.wrap("docker info"),
      "sudo -S -p '' -u deploy docker info"
    );
    assert_eq!(sudo.stdin_payload().unwrap(), "hunter2\n");
  }
}
