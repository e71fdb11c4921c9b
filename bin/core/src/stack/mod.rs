//! Stack definition files: YAML documents with `metadata`,
//! `template`, `variables` and optional `target_parameters` /
//! `deployment_notes`. A directory of definitions is validated and
//! seeded into the store at startup; broken files are logged and
//! skipped, never fatal.

use std::path::Path;

use anyhow::{Context, bail};
use regex::Regex;
use tokio::fs;
use tracing::{info, warn};
use windflow_client::entities::{
  stack::{StackDefinition, VariableSpec},
  windflow_id,
};

use crate::db::DbClient;

/// Loads every `.yml` / `.yaml` under `dir` into the store.
/// Returns how many stacks were seeded.
pub async fn load_stack_definitions(
  db: &DbClient,
  dir: &Path,
) -> usize {
  let mut entries = match fs::read_dir(dir).await {
    Ok(entries) => entries,
    Err(e) => {
      warn!(
        "cannot read stack definitions directory {dir:?} | {e:#}"
      );
      return 0;
    }
  };

  let mut loaded = 0;
  while let Ok(Some(entry)) = entries.next_entry().await {
    let path = entry.path();
    let is_yaml = path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| ext == "yml" || ext == "yaml");
    if !is_yaml {
      continue;
    }
    match load_definition_file(&path).await {
      Ok(definition) => {
        let stack = definition.into_stack(windflow_id());
        info!(
          "loaded stack definition '{}' v{} from {path:?}",
          stack.name, stack.version
        );
        db.stacks.insert(stack.id.clone(), stack);
        loaded += 1;
      }
      Err(e) => {
        warn!("skipping stack definition {path:?} | {e:#}");
      }
    }
  }
  loaded
}

async fn load_definition_file(
  path: &Path,
) -> anyhow::Result<StackDefinition> {
  let contents = fs::read_to_string(path)
    .await
    .context("failed to read file")?;
  let definition: StackDefinition =
    serde_yaml_ng::from_str(&contents)
      .context("failed to parse yaml")?;
  validate_definition(&definition)?;
  Ok(definition)
}

pub fn validate_definition(
  definition: &StackDefinition,
) -> anyhow::Result<()> {
  let metadata = &definition.metadata;
  for (field, value) in [
    ("name", &metadata.name),
    ("version", &metadata.version),
    ("category", &metadata.category),
    ("author", &metadata.author),
    ("license", &metadata.license),
    ("description", &metadata.description),
  ] {
    if value.trim().is_empty() {
      bail!("metadata field '{field}' must not be empty");
    }
  }

  if !definition.template.is_object() {
    bail!("'template' must be a mapping");
  }

  for (name, spec) in &definition.variables {
    validate_variable(name, spec, definition)?;
  }

  Ok(())
}

fn validate_variable(
  name: &str,
  spec: &VariableSpec,
  definition: &StackDefinition,
) -> anyhow::Result<()> {
  if let Some(pattern) = &spec.pattern {
    Regex::new(pattern).with_context(|| {
      format!("variable '{name}' has an invalid pattern")
    })?;
  }
  if let (Some(min), Some(max)) = (spec.minimum, spec.maximum)
    && min > max
  {
    bail!("variable '{name}': minimum exceeds maximum");
  }
  if let (Some(min), Some(max)) = (spec.min_length, spec.max_length)
    && min > max
  {
    bail!("variable '{name}': min_length exceeds max_length");
  }
  if let (Some(values), Some(labels)) =
    (&spec.enum_values, &spec.enum_labels)
    && values.len() != labels.len()
  {
    bail!(
      "variable '{name}': enum_labels length does not match enum"
    );
  }
  if let Some(depends_on) = &spec.depends_on
    && !definition.variables.contains_key(depends_on)
  {
    bail!(
      "variable '{name}' depends on unknown variable '{depends_on}'"
    );
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const VALID: &str = r#"
metadata:
  name: postgres
  version: "1.0.0"
  category: database
  author: windflow
  license: Apache-2.0
  description: PostgreSQL database server
  target_type: docker
  deployment_name: "{{ generate_animalname('pg', 'ubuntu') }}"
  tags: [database, sql]
template:
  image: "postgres:16"
  environment:
    POSTGRES_PASSWORD: "{{ db_password }}"
  ports:
    - "{{ db_port }}:5432"
variables:
  db_password:
    type: password
    label: Database password
    default: "{{ generate_password(24) }}"
  db_port:
    type: integer
    default: 5432
    minimum: 1024
    maximum: 65535
target_parameters:
  volumes:
    - "{{ deployment_name }}_data"
deployment_notes: |
  The database listens on the configured port.
"#;

  #[test]
  fn parses_and_validates_a_full_definition() {
    let definition: StackDefinition =
      serde_yaml_ng::from_str(VALID).unwrap();
    validate_definition(&definition).unwrap();
    assert_eq!(definition.metadata.name, "postgres");
    assert_eq!(definition.variables.len(), 2);
    // Variable order is preserved for the render pass.
    let names: Vec<&String> =
      definition.variables.keys().collect();
    assert_eq!(names, ["db_password", "db_port"]);

    let stack = definition.into_stack("s1".to_string());
    assert_eq!(stack.name, "postgres");
    assert!(stack.deployment_name.is_some());
    assert!(stack.target_parameters.is_some());
  }

  #[test]
  fn rejects_missing_metadata_and_bad_variables() {
    let mut definition: StackDefinition =
      serde_yaml_ng::from_str(VALID).unwrap();
    definition.metadata.category = String::from("  ");
    assert!(validate_definition(&definition).is_err());

    let mut definition: StackDefinition =
      serde_yaml_ng::from_str(VALID).unwrap();
    definition
      .variables
      .get_mut("db_port")
      .unwrap()
      .minimum = Some(70000.0);
    assert!(validate_definition(&definition).is_err());

    let mut definition: StackDefinition =
      serde_yaml_ng::from_str(VALID).unwrap();
    definition.variables.get_mut("db_password").unwrap().pattern =
      Some(String::from("([unclosed"));
    assert!(validate_definition(&definition).is_err());

    let mut definition: StackDefinition =
      serde_yaml_ng::from_str(VALID).unwrap();
    definition
      .variables
      .get_mut("db_password")
      .unwrap()
      .depends_on = Some(String::from("nope"));
    assert!(validate_definition(&definition).is_err());
  }

  #[tokio::test]
  async fn seeds_valid_files_and_skips_broken_ones() {
    let dir = std::env::temp_dir()
      .join(format!("windflow-stacks-test-{}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join("postgres.yaml"), VALID)
      .await
      .unwrap();
    tokio::fs::write(dir.join("broken.yaml"), "metadata: [")
      .await
      .unwrap();
    tokio::fs::write(dir.join("notes.txt"), "not a stack")
      .await
      .unwrap();

    let db = DbClient::new();
    let loaded = load_stack_definitions(&db, &dir).await;
    assert_eq!(loaded, 1);
    assert_eq!(db.stacks.all().len(), 1);

    tokio::fs::remove_dir_all(&dir).await.ok();
  }
}
