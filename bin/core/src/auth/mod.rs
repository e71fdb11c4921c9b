use anyhow::{Context, bail};
use windflow_client::entities::user::User;

use crate::state::AppState;

pub mod jwt;

/// Token -> active user, used by both WebSocket endpoints and the
/// http api.
pub fn authenticate_token(
  state: &AppState,
  token: &str,
) -> anyhow::Result<User> {
  let claims = state.jwt.decode(token)?;
  let user = state
    .db
    .get_user(&claims.id)
    .context("token does not belong to a known user")?;
  if !user.is_active {
    bail!("user is not active");
  }
  Ok(user)
}
