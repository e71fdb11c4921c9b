use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
  pub id: String,
  pub username: String,
  pub email: String,
  pub organization_id: String,
  #[serde(default = "default_is_active")]
  pub is_active: bool,
  #[serde(default)]
  pub is_superuser: bool,
  pub created_at: i64,
}

fn default_is_active() -> bool {
  true
}

impl User {
  /// Whether this user may observe the given organization's resources.
  pub fn can_access_organization(&self, organization_id: &str) -> bool {
    self.is_superuser || self.organization_id == organization_id
  }
}
