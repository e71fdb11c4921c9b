//! Template rendering for deployment specs.
//!
//! `Renderer` walks a template recursively. Each string leaf may
//! contain `{{ variable }}` substitutions and calls into the fixed
//! generator library (`{{ generate_password(16) }}`). Rendering a
//! string leaf is non-fatal: syntax errors, unknown variables and
//! generator failures leave the original string unchanged and log a
//! warning.
//!
//! Generators are non-deterministic, so callers render exactly once
//! and persist the result. The deployment pipeline is two-pass:
//! first the merged variable mapping is rendered (in insertion
//! order, earlier values visible to later ones), then the template
//! is rendered with the resolved variables as context.

use std::collections::HashMap;

use anyhow::{Context as _, bail};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::warn;
use windflow_client::entities::stack::VariableSpec;

mod expr;
mod functions;
mod names;

pub use functions::{CallArgs, ExprValue, FnArg, GeneratorFn};
pub use names::{NameKind, NameStyle, generate_codename};

use expr::{Arg, ArgValue, Expr, Literal};

pub struct Renderer {
  functions: HashMap<&'static str, GeneratorFn>,
}

impl Default for Renderer {
  fn default() -> Renderer {
    Renderer {
      functions: functions::library(),
    }
  }
}

impl Renderer {
  /// Recursively renders every string leaf of `value`.
  pub fn render_value(
    &self,
    value: &Value,
    context: &Map<String, Value>,
  ) -> Value {
    match value {
      Value::Object(map) => Value::Object(
        map
          .iter()
          .map(|(key, val)| {
            (key.clone(), self.render_value(val, context))
          })
          .collect(),
      ),
      Value::Array(items) => Value::Array(
        items
          .iter()
          .map(|item| self.render_value(item, context))
          .collect(),
      ),
      Value::String(s) => Value::String(self.render_str(s, context)),
      other => other.clone(),
    }
  }

  /// Renders one string leaf. Any failure returns the input
  /// unchanged, with a warning.
  pub fn render_str(
    &self,
    input: &str,
    context: &Map<String, Value>,
  ) -> String {
    match self.try_render_str(input, context) {
      Ok(rendered) => rendered,
      Err(e) => {
        warn!("failed to render template string '{input}' | {e:#}");
        input.to_string()
      }
    }
  }

  fn try_render_str(
    &self,
    input: &str,
    context: &Map<String, Value>,
  ) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
      out.push_str(&rest[..start]);
      let after = &rest[start + 2..];
      let end = after
        .find("}}")
        .context("unclosed '{{' in template string")?;
      let expression = expr::parse(&after[..end])?;
      let value = self.eval(&expression, context)?;
      out.push_str(&value.to_string());
      rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
  }

  fn eval(
    &self,
    expression: &Expr,
    context: &Map<String, Value>,
  ) -> anyhow::Result<ExprValue> {
    match expression {
      Expr::Var(name) => lookup(context, name),
      Expr::Call { name, args } => {
        let function = self
          .functions
          .get(name.as_str())
          .with_context(|| format!("unknown function '{name}'"))?;
        let args = args
          .iter()
          .map(|arg| self.resolve_arg(arg, context))
          .collect::<anyhow::Result<Vec<_>>>()?;
        function(&CallArgs(args))
          .with_context(|| format!("call to '{name}' failed"))
      }
    }
  }

  fn resolve_arg(
    &self,
    arg: &Arg,
    context: &Map<String, Value>,
  ) -> anyhow::Result<FnArg> {
    let value = match &arg.value {
      ArgValue::Literal(Literal::Str(s)) => {
        ExprValue::Str(s.clone())
      }
      ArgValue::Literal(Literal::Int(i)) => ExprValue::Int(*i),
      ArgValue::Literal(Literal::Bool(b)) => ExprValue::Bool(*b),
      ArgValue::Var(name) => lookup(context, name)?,
    };
    Ok(FnArg {
      name: arg.name.clone(),
      value,
    })
  }
}

fn lookup(
  context: &Map<String, Value>,
  name: &str,
) -> anyhow::Result<ExprValue> {
  let Some(value) = context.get(name) else {
    bail!("undefined variable '{name}'");
  };
  Ok(match value {
    Value::String(s) => ExprValue::Str(s.clone()),
    Value::Bool(b) => ExprValue::Bool(*b),
    Value::Number(n) => match n.as_i64() {
      Some(i) => ExprValue::Int(i),
      None => ExprValue::Float(n.as_f64().unwrap_or_default()),
    },
    Value::Null => ExprValue::Str(String::new()),
    other => ExprValue::Str(other.to_string()),
  })
}

/// Start with each stack variable's default, overlay user values.
pub fn merge_variables(
  specs: &IndexMap<String, VariableSpec>,
  user_variables: Option<&Map<String, Value>>,
) -> Map<String, Value> {
  let mut merged = Map::new();
  for (name, spec) in specs {
    merged.insert(
      name.clone(),
      spec.default.clone().unwrap_or(Value::Null),
    );
  }
  if let Some(user_variables) = user_variables {
    for (name, value) in user_variables {
      merged.insert(name.clone(), value.clone());
    }
  }
  merged
}

/// First render pass: resolve generator calls inside the merged
/// variable mapping itself. Values render in insertion order and
/// earlier results are visible to later templates, so shallow
/// cross-variable references work without a fixpoint.
pub fn render_variables(
  renderer: &Renderer,
  merged: Map<String, Value>,
) -> Map<String, Value> {
  let mut rendered = Map::new();
  for (name, value) in merged {
    let value = renderer.render_value(&value, &rendered);
    rendered.insert(name, value);
  }
  rendered
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn ctx(value: Value) -> Map<String, Value> {
    match value {
      Value::Object(map) => map,
      _ => panic!("context must be an object"),
    }
  }

  #[test]
  fn substitutes_variables_in_strings() {
    let renderer = Renderer::default();
    let context = ctx(json!({ "port": 8080, "user": "admin" }));
    assert_eq!(
      renderer.render_str("{{ port }}:80", &context),
      "8080:80"
    );
    assert_eq!(
      renderer.render_str("user={{user}}", &context),
      "user=admin"
    );
  }

  #[test]
  fn missing_variable_leaves_string_unchanged() {
    let renderer = Renderer::default();
    let context = ctx(json!({ "known": "yes" }));
    assert_eq!(
      renderer.render_str("{{ known }}-{{ unknown }}", &context),
      "{{ known }}-{{ unknown }}"
    );
  }

  #[test]
  fn syntax_error_leaves_string_unchanged() {
    let renderer = Renderer::default();
    let context = Map::new();
    assert_eq!(
      renderer.render_str("{{ not closed", &context),
      "{{ not closed"
    );
    assert_eq!(
      renderer.render_str("{{ 1 + 1 }}", &context),
      "{{ 1 + 1 }}"
    );
  }

  #[test]
  fn renders_nested_structures_and_keeps_non_strings() {
    let renderer = Renderer::default();
    let context = ctx(json!({ "image": "nginx:1.25", "port": 8080 }));
    let template = json!({
      "image": "{{ image }}",
      "ports": ["{{ port }}:80"],
      "replicas": 2,
      "enabled": true,
    });
    let rendered = renderer.render_value(&template, &context);
    assert_eq!(
      rendered,
      json!({
        "image": "nginx:1.25",
        "ports": ["8080:80"],
        "replicas": 2,
        "enabled": true,
      })
    );
  }

  #[test]
  fn generator_call_inside_string() {
    let renderer = Renderer::default();
    let rendered = renderer.render_str(
      "pw-{{ generate_secret(8) }}",
      &Map::new(),
    );
    assert_eq!(rendered.len(), "pw-".len() + 8);
    assert!(rendered.starts_with("pw-"));
  }

  #[test]
  fn render_without_generators_is_idempotent() {
    let renderer = Renderer::default();
    let context = ctx(json!({ "name": "app", "port": 9000 }));
    let template = json!({
      "container_name": "{{ name }}",
      "ports": ["{{ port }}:{{ port }}"],
    });
    let once = renderer.render_value(&template, &context);
    let twice = renderer.render_value(&once, &Map::new());
    assert_eq!(once, twice);
  }

  #[test]
  fn merge_overlays_user_values_over_defaults() {
    let specs: IndexMap<String, VariableSpec> =
      serde_json::from_value(json!({
        "port": { "type": "integer", "default": 8080 },
        "user": { "type": "string", "default": "admin" },
      }))
      .unwrap();
    let user = ctx(json!({ "user": "alice", "extra": 1 }));
    let merged = merge_variables(&specs, Some(&user));
    assert_eq!(merged["port"], json!(8080));
    assert_eq!(merged["user"], json!("alice"));
    assert_eq!(merged["extra"], json!(1));
  }

  #[test]
  fn variables_render_once_then_flow_into_template() {
    // Invariant: a secret generated during the variable pass is the
    // value the template sees, not a fresh evaluation.
    let renderer = Renderer::default();
    let specs: IndexMap<String, VariableSpec> =
      serde_json::from_value(json!({
        "db_password": {
          "type": "password",
          "default": "{{ generate_password(16) }}",
        },
      }))
      .unwrap();
    let merged = merge_variables(&specs, None);
    let rendered = render_variables(&renderer, merged);
    let password = rendered["db_password"].as_str().unwrap();
    assert_eq!(password.len(), 16);

    let template = json!({
      "environment": { "POSTGRES_PASSWORD": "{{ db_password }}" }
    });
    let config = renderer.render_value(&template, &rendered);
    assert_eq!(
      config["environment"]["POSTGRES_PASSWORD"]
        .as_str()
        .unwrap(),
      password
    );
  }

  #[test]
  fn variable_pass_resolves_shallow_cross_references() {
    let renderer = Renderer::default();
    let specs: IndexMap<String, VariableSpec> =
      serde_json::from_value(json!({
        "app_name": { "type": "string", "default": "blog" },
        "db_name": {
          "type": "string",
          "default": "{{ app_name }}_db",
        },
      }))
      .unwrap();
    let rendered =
      render_variables(&renderer, merge_variables(&specs, None));
    assert_eq!(rendered["db_name"], json!("blog_db"));
  }

  #[test]
  fn variable_argument_resolves_from_context() {
    let renderer = Renderer::default();
    let context = ctx(json!({ "token": "hello" }));
    assert_eq!(
      renderer.render_str("{{ base64_encode(token) }}", &context),
      "aGVsbG8="
    );
  }
}
