use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

/// The normalized outcome of one capability scan.
///
/// Partial success is expected: individual tool failures accumulate in
/// `errors` without failing the scan. `success` is true iff `errors`
/// is empty.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanResult {
  pub host: String,
  pub scan_date: i64,
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platform: Option<PlatformInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub os: Option<OsInfo>,
  #[serde(default)]
  pub virtualization: IndexMap<String, ToolInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub docker: Option<DockerCapabilities>,
  #[serde(default)]
  pub kubernetes: IndexMap<String, ToolInfo>,
  #[serde(default)]
  pub errors: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PlatformInfo {
  pub architecture: PlatformArchitecture,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cpu_model: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cpu_cores: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total_memory_gb: Option<f64>,
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
)]
pub enum PlatformArchitecture {
  #[serde(rename = "x86_64")]
  #[strum(serialize = "x86_64")]
  X86_64,
  #[serde(rename = "x86_32")]
  #[strum(serialize = "x86_32")]
  X86_32,
  #[serde(rename = "arm64")]
  #[strum(serialize = "arm64")]
  Arm64,
  #[serde(rename = "armv8")]
  #[strum(serialize = "armv8")]
  Armv8,
  #[serde(rename = "armv7")]
  #[strum(serialize = "armv7")]
  Armv7,
  #[serde(rename = "armv6")]
  #[strum(serialize = "armv6")]
  Armv6,
  #[default]
  #[serde(rename = "unknown")]
  #[strum(serialize = "unknown")]
  Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OsInfo {
  pub system: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub distribution: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kernel: Option<String>,
}

/// Availability record for a single probed tool.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ToolInfo {
  pub available: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<Value>,
}

impl ToolInfo {
  pub fn unavailable() -> ToolInfo {
    Default::default()
  }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DockerCapabilities {
  pub installed: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  pub running: bool,
  pub socket_accessible: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub compose: Option<DockerComposeInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub swarm: Option<DockerSwarmInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DockerComposeInfo {
  pub available: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  /// true for the `docker compose` plugin, false for the
  /// standalone `docker-compose` binary.
  pub plugin_based: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DockerSwarmInfo {
  pub available: bool,
  pub active: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_role: Option<SwarmNodeRole>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<Value>,
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Display,
  Clone,
  Copy,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SwarmNodeRole {
  Manager,
  Worker,
}
