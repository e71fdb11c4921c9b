use async_timing_util::unix_timestamp_ms;
use serde::{Deserialize, Serialize};

pub mod deployment;
pub mod logger;
pub mod scan;
pub mod stack;
pub mod target;
pub mod user;

/// Current time in unix ms.
pub fn windflow_timestamp() -> i64 {
  unix_timestamp_ms() as i64
}

pub fn windflow_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

/// Replaces characters docker rejects in container / project names.
pub fn to_container_compatible_name(name: &str) -> String {
  name.trim().replace([' ', ',', '\n', '&'], "_").to_string()
}

/// The result of one subprocess or executor stage.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Log {
  pub stage: String,
  pub command: String,
  pub stdout: String,
  pub stderr: String,
  pub success: bool,
  pub start_ts: i64,
  pub end_ts: i64,
}

impl Log {
  pub fn simple(stage: &str, msg: String) -> Log {
    let ts = windflow_timestamp();
    Log {
      stage: stage.to_string(),
      stdout: msg,
      success: true,
      stderr: String::new(),
      command: String::new(),
      start_ts: ts,
      end_ts: ts,
    }
  }

  pub fn error(stage: &str, msg: String) -> Log {
    let ts = windflow_timestamp();
    Log {
      stage: stage.to_string(),
      stderr: msg,
      success: false,
      stdout: String::new(),
      command: String::new(),
      start_ts: ts,
      end_ts: ts,
    }
  }

  /// stdout and stderr as one block, the way `docker logs` interleaves them.
  pub fn combined(&self) -> String {
    match (self.stdout.is_empty(), self.stderr.is_empty()) {
      (true, true) => String::new(),
      (false, true) => self.stdout.clone(),
      (true, false) => self.stderr.clone(),
      (false, false) => format!("{}\n{}", self.stdout, self.stderr),
    }
  }
}

pub fn all_logs_success(logs: &[Log]) -> bool {
  logs.iter().all(|log| log.success)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn container_compatible_name_replaces_separators() {
    assert_eq!(
      to_container_compatible_name(" my app, v2 "),
      "my_app__v2"
    );
  }

  #[test]
  fn combined_log_output() {
    let mut log = Log::simple("Test", "out".to_string());
    assert_eq!(log.combined(), "out");
    log.stderr = "err".to_string();
    assert_eq!(log.combined(), "out\nerr");
  }
}
