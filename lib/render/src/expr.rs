//! Parser for the restricted expression language allowed inside
//! `{{ }}` markers: a bare variable reference, or a single call into
//! the generator library with literal / variable arguments
//! (positional or `name=value`).

use anyhow::{Context, anyhow, bail};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
  Str(String),
  Int(i64),
  Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
  Literal(Literal),
  /// Resolved against the render context at eval time.
  Var(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
  pub name: Option<String>,
  pub value: ArgValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Var(String),
  Call { name: String, args: Vec<Arg> },
}

pub fn parse(input: &str) -> anyhow::Result<Expr> {
  let mut parser = Parser {
    chars: input.chars().collect(),
    pos: 0,
  };
  parser.skip_ws();
  let name = parser.ident().context("expected identifier")?;
  parser.skip_ws();
  if parser.peek() == Some('(') {
    parser.pos += 1;
    let args = parser.args()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
      bail!("unexpected trailing input after call");
    }
    Ok(Expr::Call { name, args })
  } else if parser.pos == parser.chars.len() {
    Ok(Expr::Var(name))
  } else {
    bail!("unexpected input after identifier '{name}'");
  }
}

struct Parser {
  chars: Vec<char>,
  pos: usize,
}

impl Parser {
  fn peek(&self) -> Option<char> {
    self.chars.get(self.pos).copied()
  }

  fn skip_ws(&mut self) {
    while self.peek().is_some_and(|c| c.is_whitespace()) {
      self.pos += 1;
    }
  }

  fn ident(&mut self) -> Option<String> {
    let start = self.pos;
    if !self
      .peek()
      .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    {
      return None;
    }
    while self
      .peek()
      .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    {
      self.pos += 1;
    }
    Some(self.chars[start..self.pos].iter().collect())
  }

  fn args(&mut self) -> anyhow::Result<Vec<Arg>> {
    let mut args = Vec::new();
    loop {
      self.skip_ws();
      match self.peek() {
        Some(')') => {
          self.pos += 1;
          return Ok(args);
        }
        None => bail!("unclosed argument list"),
        _ => {}
      }
      if !args.is_empty() {
        if self.peek() != Some(',') {
          bail!("expected ',' between arguments");
        }
        self.pos += 1;
        self.skip_ws();
        // Trailing comma before ')'
        if self.peek() == Some(')') {
          self.pos += 1;
          return Ok(args);
        }
      }
      args.push(self.arg()?);
    }
  }

  fn arg(&mut self) -> anyhow::Result<Arg> {
    if let Some(c) = self.peek()
      && (c.is_ascii_alphabetic() || c == '_')
    {
      let ident = self.ident().context("expected identifier")?;
      // Keywords parse as booleans, anything else may be kwarg or var.
      if let Some(bool_value) = parse_bool_keyword(&ident) {
        return Ok(Arg {
          name: None,
          value: ArgValue::Literal(Literal::Bool(bool_value)),
        });
      }
      self.skip_ws();
      if self.peek() == Some('=') {
        self.pos += 1;
        self.skip_ws();
        let value = self.literal_or_var()?;
        return Ok(Arg {
          name: Some(ident),
          value,
        });
      }
      return Ok(Arg {
        name: None,
        value: ArgValue::Var(ident),
      });
    }
    let value = self.literal_or_var()?;
    Ok(Arg { name: None, value })
  }

  fn literal_or_var(&mut self) -> anyhow::Result<ArgValue> {
    match self.peek() {
      Some('\'') | Some('"') => {
        Ok(ArgValue::Literal(Literal::Str(self.string()?)))
      }
      Some(c) if c.is_ascii_digit() || c == '-' => {
        Ok(ArgValue::Literal(Literal::Int(self.integer()?)))
      }
      Some(c) if c.is_ascii_alphabetic() || c == '_' => {
        let ident = self.ident().context("expected identifier")?;
        match parse_bool_keyword(&ident) {
          Some(b) => Ok(ArgValue::Literal(Literal::Bool(b))),
          None => Ok(ArgValue::Var(ident)),
        }
      }
      other => Err(anyhow!("unexpected character {other:?}")),
    }
  }

  fn string(&mut self) -> anyhow::Result<String> {
    let quote = self.peek().context("expected quote")?;
    self.pos += 1;
    let start = self.pos;
    while let Some(c) = self.peek() {
      if c == quote {
        let result = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        return Ok(result);
      }
      self.pos += 1;
    }
    bail!("unterminated string literal");
  }

  fn integer(&mut self) -> anyhow::Result<i64> {
    let start = self.pos;
    if self.peek() == Some('-') {
      self.pos += 1;
    }
    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
      self.pos += 1;
    }
    let text: String = self.chars[start..self.pos].iter().collect();
    text
      .parse()
      .with_context(|| format!("invalid integer literal '{text}'"))
  }
}

fn parse_bool_keyword(ident: &str) -> Option<bool> {
  match ident {
    "true" | "True" => Some(true),
    "false" | "False" => Some(false),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_bare_variable() {
    assert_eq!(parse("port").unwrap(), Expr::Var("port".to_string()));
    assert_eq!(
      parse("  db_name  ").unwrap(),
      Expr::Var("db_name".to_string())
    );
  }

  #[test]
  fn parses_call_without_args() {
    assert_eq!(
      parse("generate_uuid()").unwrap(),
      Expr::Call {
        name: "generate_uuid".to_string(),
        args: vec![]
      }
    );
  }

  #[test]
  fn parses_positional_and_named_args() {
    let expr =
      parse("generate_password(16, include_special=False)").unwrap();
    let Expr::Call { name, args } = expr else {
      panic!("expected call");
    };
    assert_eq!(name, "generate_password");
    assert_eq!(args.len(), 2);
    assert_eq!(
      args[0].value,
      ArgValue::Literal(Literal::Int(16))
    );
    assert_eq!(args[1].name.as_deref(), Some("include_special"));
    assert_eq!(
      args[1].value,
      ArgValue::Literal(Literal::Bool(false))
    );
  }

  #[test]
  fn parses_string_args_with_both_quotes() {
    let expr =
      parse(r#"random_string(8, 'hex')"#).unwrap();
    let Expr::Call { args, .. } = expr else {
      panic!("expected call");
    };
    assert_eq!(
      args[1].value,
      ArgValue::Literal(Literal::Str("hex".to_string()))
    );
    assert!(parse(r#"env("HOME", 'fallback')"#).is_ok());
  }

  #[test]
  fn parses_variable_argument() {
    let expr = parse("base64_encode(password)").unwrap();
    let Expr::Call { args, .. } = expr else {
      panic!("expected call");
    };
    assert_eq!(args[0].value, ArgValue::Var("password".to_string()));
  }

  #[test]
  fn rejects_malformed_input() {
    assert!(parse("").is_err());
    assert!(parse("foo bar").is_err());
    assert!(parse("foo(").is_err());
    assert!(parse("foo('unterminated)").is_err());
    assert!(parse("123").is_err());
  }
}
