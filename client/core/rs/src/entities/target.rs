use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use super::{
  scan::{OsInfo, PlatformInfo},
  stack::TargetType,
};

/// A host with known credentials and detected capabilities
/// where stacks are deployed.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Target {
  pub id: String,
  pub name: String,
  pub host: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub port: Option<u16>,
  #[serde(rename = "type", default)]
  pub target_type: TargetType,
  pub organization_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub credentials: Option<TargetCredentials>,
  #[serde(default)]
  pub status: ScanStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scan_date: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scan_success: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platform_info: Option<PlatformInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub os_info: Option<OsInfo>,
  /// Full capability payload from the last accepted scan.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub capabilities: Option<Value>,
}

impl Target {
  pub fn is_localhost(&self) -> bool {
    self.host == "localhost" || self.host == "127.0.0.1"
  }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TargetCredentials {
  pub username: String,
  pub password: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sudo_user: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sudo_password: Option<String>,
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScanStatus {
  #[default]
  Unscanned,
  Scanning,
  Completed,
  Failed,
}
