//! The fixed generator library available inside `{{ }}` expressions.
//!
//! Generators are intentionally non-deterministic; the orchestrator
//! renders exactly once per deployment and persists the results so
//! retries reuse identical secrets.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use md5::Md5;
use rand::Rng;
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha512};

use crate::names::{NameKind, NameStyle, generate_codename};

#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
  Str(String),
  Int(i64),
  Float(f64),
  Bool(bool),
}

impl fmt::Display for ExprValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExprValue::Str(s) => f.write_str(s),
      ExprValue::Int(i) => write!(f, "{i}"),
      ExprValue::Float(v) => write!(f, "{v}"),
      ExprValue::Bool(b) => write!(f, "{b}"),
    }
  }
}

/// Resolved arguments for one generator call. Named arguments win
/// over positional ones; positions count unnamed arguments only.
pub struct CallArgs(pub Vec<FnArg>);

pub struct FnArg {
  pub name: Option<String>,
  pub value: ExprValue,
}

impl CallArgs {
  fn find(&self, index: usize, name: &str) -> Option<&ExprValue> {
    self
      .0
      .iter()
      .find(|arg| arg.name.as_deref() == Some(name))
      .map(|arg| &arg.value)
      .or_else(|| {
        self
          .0
          .iter()
          .filter(|arg| arg.name.is_none())
          .nth(index)
          .map(|arg| &arg.value)
      })
  }

  fn int_or(
    &self,
    index: usize,
    name: &str,
    default: i64,
  ) -> anyhow::Result<i64> {
    match self.find(index, name) {
      None => Ok(default),
      Some(ExprValue::Int(i)) => Ok(*i),
      Some(other) => {
        bail!("argument '{name}' must be an integer, got {other}")
      }
    }
  }

  fn bool_or(
    &self,
    index: usize,
    name: &str,
    default: bool,
  ) -> anyhow::Result<bool> {
    match self.find(index, name) {
      None => Ok(default),
      Some(ExprValue::Bool(b)) => Ok(*b),
      Some(other) => {
        bail!("argument '{name}' must be a boolean, got {other}")
      }
    }
  }

  fn str_opt(
    &self,
    index: usize,
    name: &str,
  ) -> anyhow::Result<Option<&str>> {
    match self.find(index, name) {
      None => Ok(None),
      Some(ExprValue::Str(s)) => Ok(Some(s)),
      Some(other) => {
        bail!("argument '{name}' must be a string, got {other}")
      }
    }
  }

  fn str_required(
    &self,
    index: usize,
    name: &str,
  ) -> anyhow::Result<&str> {
    self
      .str_opt(index, name)?
      .with_context(|| format!("missing required argument '{name}'"))
  }
}

pub type GeneratorFn = fn(&CallArgs) -> anyhow::Result<ExprValue>;

pub fn library() -> HashMap<&'static str, GeneratorFn> {
  let mut lib: HashMap<&'static str, GeneratorFn> = HashMap::new();
  lib.insert("generate_password", generate_password);
  lib.insert("generate_secret", generate_secret);
  lib.insert("random_string", random_string);
  lib.insert("generate_uuid", generate_uuid);
  lib.insert("generate_uuid_short", generate_uuid_short);
  lib.insert("base64_encode", base64_encode);
  lib.insert("base64_decode", base64_decode);
  lib.insert("hash_value", hash_value);
  lib.insert("random_port", random_port);
  lib.insert("get_valid_port", get_valid_port);
  lib.insert("env", env);
  lib.insert("now", now);
  lib.insert("random_choice", random_choice);
  lib.insert("generate_animalname", generate_animalname);
  lib.insert("generate_cosmicname", generate_cosmicname);
  lib.insert("generate_mythologyname", generate_mythologyname);
  lib
}

fn sample(charset: &[u8], length: usize) -> String {
  let mut rng = rand::rng();
  (0..length)
    .map(|_| charset[rng.random_range(0..charset.len())] as char)
    .collect()
}

const ALPHANUMERIC: &[u8] =
  b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ALPHA: &[u8] =
  b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const NUMERIC: &[u8] = b"0123456789";
const HEX: &[u8] = b"0123456789abcdef";
const PASSWORD_SPECIAL: &[u8] = b"!@#$%^&*()-_=+";

fn generate_password(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let length = args.int_or(0, "length", 24)?;
  let include_special = args.bool_or(1, "include_special", true)?;
  if length <= 0 {
    bail!("password length must be positive");
  }
  let charset: Vec<u8> = if include_special {
    [ALPHANUMERIC, PASSWORD_SPECIAL].concat()
  } else {
    ALPHANUMERIC.to_vec()
  };
  Ok(ExprValue::Str(sample(&charset, length as usize)))
}

fn generate_secret(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let length = args.int_or(0, "length", 32)?;
  if length <= 0 {
    bail!("secret length must be positive");
  }
  let num_bytes = (length as usize).div_ceil(2);
  let mut bytes = vec![0u8; num_bytes];
  rand::rng().fill(bytes.as_mut_slice());
  let mut hex_string = hex::encode(bytes);
  hex_string.truncate(length as usize);
  Ok(ExprValue::Str(hex_string))
}

fn random_string(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let length = args.int_or(0, "length", 0)?;
  if length <= 0 {
    bail!("random_string requires a positive length");
  }
  let charset = match args.str_opt(1, "charset")?.unwrap_or("alphanumeric")
  {
    "alphanumeric" => ALPHANUMERIC,
    "alpha" => ALPHA,
    "numeric" => NUMERIC,
    "hex" => HEX,
    other => bail!(
      "invalid charset '{other}', options: alphanumeric, alpha, numeric, hex"
    ),
  };
  Ok(ExprValue::Str(sample(charset, length as usize)))
}

fn generate_uuid(_args: &CallArgs) -> anyhow::Result<ExprValue> {
  Ok(ExprValue::Str(uuid::Uuid::new_v4().to_string()))
}

fn generate_uuid_short(_args: &CallArgs) -> anyhow::Result<ExprValue> {
  Ok(ExprValue::Str(uuid::Uuid::new_v4().simple().to_string()))
}

fn base64_encode(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let value = args.str_required(0, "value")?;
  Ok(ExprValue::Str(STANDARD.encode(value.as_bytes())))
}

fn base64_decode(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let value = args.str_required(0, "value")?;
  let bytes = STANDARD
    .decode(value.as_bytes())
    .context("invalid base64 input")?;
  let decoded = String::from_utf8(bytes)
    .context("decoded base64 is not valid utf-8")?;
  Ok(ExprValue::Str(decoded))
}

fn hash_value(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let value = args.str_required(0, "value")?;
  let algorithm = args.str_opt(1, "algorithm")?.unwrap_or("sha256");
  let digest = match algorithm {
    "sha256" => hex::encode(Sha256::digest(value.as_bytes())),
    "sha512" => hex::encode(Sha512::digest(value.as_bytes())),
    "md5" => hex::encode(Md5::digest(value.as_bytes())),
    "sha1" => hex::encode(Sha1::digest(value.as_bytes())),
    other => bail!(
      "invalid algorithm '{other}', options: sha256, sha512, md5, sha1"
    ),
  };
  Ok(ExprValue::Str(digest))
}

fn random_port(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let min_port = args.int_or(0, "min_port", 10000)?;
  let max_port = args.int_or(1, "max_port", 65535)?;
  if !(1..=65535).contains(&min_port)
    || !(1..=65535).contains(&max_port)
    || min_port > max_port
  {
    bail!("invalid port range {min_port}..{max_port}");
  }
  Ok(ExprValue::Int(
    rand::rng().random_range(min_port..=max_port),
  ))
}

/// First port from `start_port` for which a local TCP bind on
/// 0.0.0.0 succeeds. Errors if none is found in `max_attempts`.
fn get_valid_port(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let start_port = args.int_or(0, "start_port", 5432)?;
  let max_attempts = args.int_or(1, "max_attempts", 100)?;
  if !(1..=65535).contains(&start_port) || max_attempts <= 0 {
    bail!("invalid start_port / max_attempts");
  }
  for offset in 0..max_attempts {
    let port = start_port + offset;
    if port > 65535 {
      bail!("no free port found below the valid port range limit (65535)");
    }
    if std::net::TcpListener::bind(("0.0.0.0", port as u16)).is_ok() {
      return Ok(ExprValue::Int(port));
    }
  }
  bail!(
    "no free port found between {start_port} and {}",
    start_port + max_attempts - 1
  )
}

fn env(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let name = args.str_required(0, "name")?;
  let default = args.str_opt(1, "default")?.unwrap_or("");
  Ok(ExprValue::Str(
    std::env::var(name).unwrap_or_else(|_| default.to_string()),
  ))
}

fn now(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let format =
    args.str_opt(0, "format")?.unwrap_or("%Y-%m-%d %H:%M:%S");
  Ok(ExprValue::Str(
    chrono::Utc::now().format(format).to_string(),
  ))
}

fn random_choice(args: &CallArgs) -> anyhow::Result<ExprValue> {
  let options: Vec<&ExprValue> = args
    .0
    .iter()
    .filter(|arg| arg.name.is_none())
    .map(|arg| &arg.value)
    .collect();
  if options.is_empty() {
    bail!("random_choice requires at least one option");
  }
  let pick = options[rand::rng().random_range(0..options.len())];
  Ok(pick.clone())
}

fn codename(
  args: &CallArgs,
  kind: NameKind,
) -> anyhow::Result<ExprValue> {
  let prefix = args.str_opt(0, "name")?.unwrap_or("");
  let style =
    NameStyle::from_option(args.str_opt(1, "style")?)?;
  let codename = generate_codename(kind, style);
  let name = if prefix.is_empty() {
    codename
  } else {
    format!("{prefix}-{codename}")
  };
  Ok(ExprValue::Str(name))
}

fn generate_animalname(args: &CallArgs) -> anyhow::Result<ExprValue> {
  codename(args, NameKind::Animal)
}

fn generate_cosmicname(args: &CallArgs) -> anyhow::Result<ExprValue> {
  codename(args, NameKind::Cosmic)
}

fn generate_mythologyname(
  args: &CallArgs,
) -> anyhow::Result<ExprValue> {
  codename(args, NameKind::Mythology)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn call(args: Vec<FnArg>) -> CallArgs {
    CallArgs(args)
  }

  fn pos(value: ExprValue) -> FnArg {
    FnArg { name: None, value }
  }

  fn named(name: &str, value: ExprValue) -> FnArg {
    FnArg {
      name: Some(name.to_string()),
      value,
    }
  }

  #[test]
  fn password_defaults_and_length() {
    let pw = generate_password(&call(vec![])).unwrap().to_string();
    assert_eq!(pw.len(), 24);

    let pw = generate_password(&call(vec![
      pos(ExprValue::Int(16)),
      named("include_special", ExprValue::Bool(false)),
    ]))
    .unwrap()
    .to_string();
    assert_eq!(pw.len(), 16);
    assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
  }

  #[test]
  fn secret_is_lowercase_hex() {
    let secret = generate_secret(&call(vec![pos(ExprValue::Int(33))]))
      .unwrap()
      .to_string();
    assert_eq!(secret.len(), 33);
    assert!(secret.chars().all(|c| c.is_ascii_hexdigit()
      && !c.is_ascii_uppercase()));
  }

  #[test]
  fn random_string_charsets() {
    let s = random_string(&call(vec![
      pos(ExprValue::Int(12)),
      pos(ExprValue::Str("numeric".to_string())),
    ]))
    .unwrap()
    .to_string();
    assert_eq!(s.len(), 12);
    assert!(s.chars().all(|c| c.is_ascii_digit()));

    assert!(
      random_string(&call(vec![
        pos(ExprValue::Int(4)),
        pos(ExprValue::Str("bogus".to_string())),
      ]))
      .is_err()
    );
  }

  #[test]
  fn uuid_formats() {
    let long = generate_uuid(&call(vec![])).unwrap().to_string();
    assert_eq!(long.len(), 36);
    assert_eq!(long.matches('-').count(), 4);

    let short =
      generate_uuid_short(&call(vec![])).unwrap().to_string();
    assert_eq!(short.len(), 32);
    assert!(!short.contains('-'));
  }

  #[test]
  fn base64_round_trip() {
    for input in ["hello", "", "héllo wörld ✓"] {
      let encoded = base64_encode(&call(vec![pos(ExprValue::Str(
        input.to_string(),
      ))]))
      .unwrap()
      .to_string();
      let decoded =
        base64_decode(&call(vec![pos(ExprValue::Str(encoded))]))
          .unwrap()
          .to_string();
      assert_eq!(decoded, input);
    }
  }

  #[test]
  fn known_base64_vector() {
    let encoded = base64_encode(&call(vec![pos(ExprValue::Str(
      "hello".to_string(),
    ))]))
    .unwrap()
    .to_string();
    assert_eq!(encoded, "aGVsbG8=");
  }

  #[test]
  fn hash_lengths_and_vector() {
    let hashed = hash_value(&call(vec![
      pos(ExprValue::Str("hello".to_string())),
      pos(ExprValue::Str("sha256".to_string())),
    ]))
    .unwrap()
    .to_string();
    assert_eq!(
      hashed,
      "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );

    for (algo, len) in
      [("sha512", 128), ("md5", 32), ("sha1", 40)]
    {
      let hashed = hash_value(&call(vec![
        pos(ExprValue::Str("hello".to_string())),
        pos(ExprValue::Str(algo.to_string())),
      ]))
      .unwrap()
      .to_string();
      assert_eq!(hashed.len(), len, "{algo}");
    }
  }

  #[test]
  fn random_port_in_range() {
    for _ in 0..20 {
      let port = random_port(&call(vec![
        pos(ExprValue::Int(8000)),
        pos(ExprValue::Int(9000)),
      ]))
      .unwrap();
      let ExprValue::Int(port) = port else {
        panic!("expected int")
      };
      assert!((8000..=9000).contains(&port));
    }
  }

  #[test]
  fn get_valid_port_finds_bindable_port() {
    let port = get_valid_port(&call(vec![pos(ExprValue::Int(
      41000,
    ))]))
    .unwrap();
    let ExprValue::Int(port) = port else {
      panic!("expected int")
    };
    assert!((41000..41100).contains(&port));
  }

  #[test]
  fn env_with_default() {
    let value = env(&call(vec![
      pos(ExprValue::Str("WINDFLOW_TEST_UNSET_VAR".to_string())),
      pos(ExprValue::Str("fallback".to_string())),
    ]))
    .unwrap()
    .to_string();
    assert_eq!(value, "fallback");
  }

  #[test]
  fn now_formats() {
    let date = now(&call(vec![pos(ExprValue::Str(
      "%Y-%m-%d".to_string(),
    ))]))
    .unwrap()
    .to_string();
    assert_eq!(date.len(), 10);
  }

  #[test]
  fn random_choice_membership() {
    let options = ["a", "b", "c"];
    let choice = random_choice(&call(
      options
        .iter()
        .map(|o| pos(ExprValue::Str(o.to_string())))
        .collect(),
    ))
    .unwrap()
    .to_string();
    assert!(options.contains(&choice.as_str()));

    assert!(random_choice(&call(vec![])).is_err());
  }

  #[test]
  fn codenames_join_prefix_with_hyphen() {
    let name = generate_animalname(&call(vec![
      pos(ExprValue::Str("web".to_string())),
      pos(ExprValue::Str("ubuntu".to_string())),
    ]))
    .unwrap()
    .to_string();
    assert!(name.starts_with("web-"));
    assert_eq!(name.split('-').count(), 4);

    let bare = generate_cosmicname(&call(vec![])).unwrap().to_string();
    assert_eq!(bare.split('-').count(), 2);
  }
}
