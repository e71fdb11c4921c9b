use anyhow::Context;
use async_timing_util::unix_timestamp_ms;
use jsonwebtoken::{
  DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;

#[derive(Serialize, Deserialize)]
pub struct JwtClaims {
  pub id: String,
  pub iat: u128,
  pub exp: u128,
}

pub struct JwtClient {
  header: Header,
  validation: Validation,
  encoding_key: EncodingKey,
  decoding_key: DecodingKey,
  ttl_ms: u128,
}

impl JwtClient {
  pub fn new(config: &CoreConfig) -> JwtClient {
    let secret = if config.jwt_secret.is_empty() {
      // Sessions won't survive a restart without a configured
      // secret, which is fine for single-node defaults.
      random_string(40)
    } else {
      config.jwt_secret.clone()
    };
    JwtClient {
      header: Header::default(),
      validation: Validation::new(Default::default()),
      encoding_key: EncodingKey::from_secret(secret.as_bytes()),
      decoding_key: DecodingKey::from_secret(secret.as_bytes()),
      ttl_ms: config.jwt_ttl_hours as u128 * 60 * 60 * 1000,
    }
  }

  pub fn encode(&self, user_id: String) -> anyhow::Result<String> {
    let iat = unix_timestamp_ms();
    let exp = iat + self.ttl_ms;
    let claims = JwtClaims {
      id: user_id,
      iat,
      exp,
    };
    encode(&self.header, &claims, &self.encoding_key)
      .context("failed at signing claim")
  }

  pub fn decode(&self, jwt: &str) -> anyhow::Result<JwtClaims> {
    decode::<JwtClaims>(jwt, &self.decoding_key, &self.validation)
      .map(|res| res.claims)
      .context("failed to decode token claims")
  }
}

pub fn random_string(length: usize) -> String {
  rand::rng()
    .sample_iter(&rand::distr::Alphanumeric)
    .take(length)
    .map(char::from)
    .collect()
}
