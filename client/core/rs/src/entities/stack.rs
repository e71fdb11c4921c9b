use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

/// A reusable parameterized deployment template plus variable schema.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Stack {
  pub id: String,
  pub name: String,
  pub version: String,
  pub target_type: TargetType,
  /// Nested mapping, opaque to the core except as Renderer input.
  pub template: Value,
  /// Variable schema. Insertion order is the render order.
  #[serde(default)]
  pub variables: IndexMap<String, VariableSpec>,
  /// Rendered at deployment creation and snapshotted on the row.
  /// May contain a `volumes` list of names to destroy on delete.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_parameters: Option<Value>,
  /// Template string used to generate deployment names.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deployment_name: Option<String>,
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
pub enum TargetType {
  #[default]
  Docker,
  DockerCompose,
  DockerSwarm,
  Kubernetes,
  Vm,
  Physical,
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
pub enum VariableType {
  #[default]
  String,
  Number,
  Integer,
  Boolean,
  Password,
  Textarea,
}

/// Schema for one stack variable.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct VariableSpec {
  #[serde(rename = "type", default)]
  pub var_type: VariableType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// May itself be a template string containing generator calls.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<Value>,
  #[serde(default)]
  pub required: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub group: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub help: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pattern: Option<String>,
  #[serde(
    rename = "enum",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub enum_values: Option<Vec<Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enum_labels: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub minimum: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub maximum: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_length: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_length: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub depends_on: Option<String>,
}

/// On-disk stack definition file: `metadata` + `template` +
/// `variables`, with optional `target_parameters` / `deployment_notes`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StackDefinition {
  pub metadata: StackMetadata,
  pub template: Value,
  #[serde(default)]
  pub variables: IndexMap<String, VariableSpec>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_parameters: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deployment_notes: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StackMetadata {
  pub name: String,
  pub version: String,
  pub category: String,
  pub author: String,
  pub license: String,
  pub description: String,
  pub target_type: TargetType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub documentation_url: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub screenshots: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
  #[serde(default)]
  pub is_public: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deployment_name: Option<String>,
}

impl StackDefinition {
  pub fn into_stack(self, id: String) -> Stack {
    Stack {
      id,
      name: self.metadata.name,
      version: self.metadata.version,
      target_type: self.metadata.target_type,
      template: self.template,
      variables: self.variables,
      target_parameters: self.target_parameters,
      deployment_name: self.metadata.deployment_name,
    }
  }
}
