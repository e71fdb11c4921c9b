//! Memorable code-name generation for containers and deployments.
//!
//! Styles:
//! - plain (default): adjective-noun
//! - ubuntu: adjective-noun-xxx
//! - docker: adverb-noun-xxxx
//! - full: prefix-adverb-adjective-noun-xxxx

use anyhow::bail;
use rand::Rng;
use rand::seq::IndexedRandom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
  Animal,
  Cosmic,
  Mythology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameStyle {
  #[default]
  Plain,
  Ubuntu,
  Docker,
  Full,
}

impl NameStyle {
  pub fn from_option(style: Option<&str>) -> anyhow::Result<NameStyle> {
    match style {
      None | Some("") => Ok(NameStyle::Plain),
      Some("ubuntu") => Ok(NameStyle::Ubuntu),
      Some("docker") => Ok(NameStyle::Docker),
      Some("full") => Ok(NameStyle::Full),
      Some(other) => bail!("unknown name style '{other}'"),
    }
  }
}

const PREFIXES: &[&str] = &[
  "alpha", "delta", "gamma", "omega", "proto", "ultra", "nova",
  "prime",
];

const ADVERBS: &[&str] = &[
  "boldly", "bravely", "calmly", "eagerly", "gently", "gladly",
  "keenly", "loudly", "neatly", "proudly", "quickly", "quietly",
  "rarely", "slowly", "softly", "warmly",
];

const ADJECTIVES: &[&str] = &[
  "amber", "ancient", "bold", "brave", "bright", "calm", "clever",
  "crimson", "curious", "eager", "fierce", "gentle", "golden",
  "hidden", "humble", "jolly", "lively", "lucid", "mellow", "noble",
  "quiet", "rapid", "silent", "swift", "vivid", "wild",
];

const ANIMALS: &[&str] = &[
  "badger", "bison", "condor", "coyote", "crane", "dolphin", "eagle",
  "falcon", "ferret", "fox", "gecko", "heron", "ibis", "jaguar",
  "koala", "lemur", "lynx", "marmot", "narwhal", "ocelot", "otter",
  "owl", "panther", "puffin", "raven", "salmon", "tiger", "walrus",
  "weasel", "wolf", "wombat", "zebra",
];

const COSMIC: &[&str] = &[
  "andromeda", "aurora", "callisto", "ceres", "comet", "cosmos",
  "europa", "halley", "io", "luna", "mars", "mercury", "meteor",
  "nebula", "neptune", "orion", "phobos", "pulsar", "quasar",
  "saturn", "sirius", "titan", "vega", "venus",
];

const MYTHOLOGY: &[&str] = &[
  "apollo", "artemis", "athena", "atlas", "baldur", "circe",
  "freyja", "griffin", "hermes", "hydra", "icarus", "janus", "kraken",
  "loki", "medusa", "midas", "odin", "orpheus", "pegasus", "phoenix",
  "selene", "thor", "triton", "zeus",
];

fn pick(words: &[&str]) -> String {
  let mut rng = rand::rng();
  words
    .choose(&mut rng)
    .copied()
    .unwrap_or("unnamed")
    .to_string()
}

fn suffix(length: usize, charset: &[u8]) -> String {
  let mut rng = rand::rng();
  (0..length)
    .map(|_| charset[rng.random_range(0..charset.len())] as char)
    .collect()
}

pub fn generate_codename(kind: NameKind, style: NameStyle) -> String {
  let noun = match kind {
    NameKind::Animal => pick(ANIMALS),
    NameKind::Cosmic => pick(COSMIC),
    NameKind::Mythology => pick(MYTHOLOGY),
  };
  match style {
    NameStyle::Plain => format!("{}-{noun}", pick(ADJECTIVES)),
    NameStyle::Ubuntu => format!(
      "{}-{noun}-{}",
      pick(ADJECTIVES),
      suffix(3, b"0123456789abcdef")
    ),
    NameStyle::Docker => format!(
      "{}-{noun}-{}",
      pick(ADVERBS),
      suffix(4, b"abcdefghijklmnopqrstuvwxyz0123456789")
    ),
    NameStyle::Full => format!(
      "{}-{}-{}-{noun}-{}",
      pick(PREFIXES),
      pick(ADVERBS),
      pick(ADJECTIVES),
      suffix(4, b"abcdefghijklmnopqrstuvwxyz0123456789")
    ),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_style_has_two_segments() {
    let name = generate_codename(NameKind::Animal, NameStyle::Plain);
    assert_eq!(name.split('-').count(), 2);
  }

  #[test]
  fn ubuntu_style_has_three_segments() {
    let name = generate_codename(NameKind::Cosmic, NameStyle::Ubuntu);
    let parts: Vec<&str> = name.split('-').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[2].len(), 3);
  }

  #[test]
  fn docker_style_uses_adverb_and_suffix() {
    let name =
      generate_codename(NameKind::Mythology, NameStyle::Docker);
    let parts: Vec<&str> = name.split('-').collect();
    assert_eq!(parts.len(), 3);
    assert!(ADVERBS.contains(&parts[0]));
    assert_eq!(parts[2].len(), 4);
  }

  #[test]
  fn full_style_has_five_segments() {
    let name = generate_codename(NameKind::Animal, NameStyle::Full);
    assert_eq!(name.split('-').count(), 5);
  }

  #[test]
  fn style_parsing() {
    assert_eq!(
      NameStyle::from_option(None).unwrap(),
      NameStyle::Plain
    );
    assert_eq!(
      NameStyle::from_option(Some("docker")).unwrap(),
      NameStyle::Docker
    );
    assert!(NameStyle::from_option(Some("bogus")).is_err());
  }
}
