use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

/// A single attempt (with possible retries) to materialize a stack
/// on a target. `config` and `variables` are snapshots taken when the
/// deployment is created; they are never re-rendered afterwards, so
/// generated secrets stay stable across retries.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Deployment {
  pub id: String,
  /// Unique per organization.
  pub name: String,
  pub stack_id: String,
  pub target_id: String,
  pub organization_id: String,
  #[serde(default)]
  pub status: DeploymentStatus,
  /// The rendered, ready-to-execute Docker or Compose spec.
  pub config: Value,
  /// The rendered variable values, including generated secrets.
  pub variables: Value,
  /// Snapshot of the stack's target_parameters, rendered at creation.
  /// Consulted on delete (eg the `volumes` list to destroy).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rendered_target_parameters: Option<Value>,
  /// Append-only, every line prefixed with one of
  /// [INFO] [WARN] [ERROR] [RETRY] [SUCCESS] [SYSTEM].
  #[serde(default)]
  pub logs: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deployed_at: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stopped_at: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deploy_duration_seconds: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_started_at: Option<i64>,
  #[serde(default)]
  pub task_retry_count: u32,
  pub created_at: i64,
  pub updated_at: i64,
}

impl Deployment {
  /// Container name (docker) / project name (compose) for this
  /// deployment: `windflow-` + the first 8 chars of the id.
  pub fn resource_name(&self) -> String {
    let short_id: String = self.id.chars().take(8).collect();
    format!("windflow-{short_id}")
  }

  /// Append a newline-delimited entry, preserving prior content.
  pub fn append_log(&mut self, entry: &str) {
    if self.logs.is_empty() {
      self.logs = entry.to_string();
    } else {
      self.logs.push('\n');
      self.logs.push_str(entry);
    }
  }
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Display,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStatus {
  #[default]
  Pending,
  Deploying,
  Running,
  Failed,
  Stopped,
  RollingBack,
}

impl DeploymentStatus {
  /// Terminal statuses only leave via an explicit user-initiated retry.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      DeploymentStatus::Running
        | DeploymentStatus::Failed
        | DeploymentStatus::Stopped
    )
  }
}
