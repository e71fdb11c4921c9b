//! In-process store.
//!
//! Persistence proper is an external collaborator; the core only
//! depends on the operations below, served here from concurrent
//! in-memory collections. The orchestrator is the sole writer of
//! deployment status transitions.

use anyhow::{Context, anyhow};
use dashmap::DashMap;
use serde_json::Value;
use windflow_client::entities::{
  deployment::{Deployment, DeploymentStatus},
  stack::Stack,
  target::{ScanStatus, Target},
  user::User,
  windflow_timestamp,
};

pub struct Collection<T> {
  items: DashMap<String, T>,
}

impl<T> Default for Collection<T> {
  fn default() -> Self {
    Collection {
      items: DashMap::new(),
    }
  }
}

impl<T: Clone> Collection<T> {
  pub fn insert(&self, id: String, item: T) {
    self.items.insert(id, item);
  }

  pub fn get(&self, id: &str) -> Option<T> {
    self.items.get(id).map(|entry| entry.clone())
  }

  pub fn remove(&self, id: &str) -> Option<T> {
    self.items.remove(id).map(|(_, item)| item)
  }

  /// Applies `mutate` to the item under the map's entry lock,
  /// returning the updated copy.
  pub fn update(
    &self,
    id: &str,
    mutate: impl FnOnce(&mut T),
  ) -> Option<T> {
    let mut entry = self.items.get_mut(id)?;
    mutate(entry.value_mut());
    Some(entry.clone())
  }

  pub fn all(&self) -> Vec<T> {
    self.items.iter().map(|entry| entry.clone()).collect()
  }

  pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
    self
      .items
      .iter()
      .filter(|entry| predicate(entry.value()))
      .map(|entry| entry.clone())
      .collect()
  }
}

#[derive(Default)]
pub struct DbClient {
  pub deployments: Collection<Deployment>,
  pub stacks: Collection<Stack>,
  pub targets: Collection<Target>,
  pub users: Collection<User>,
}

impl DbClient {
  pub fn new() -> DbClient {
    Default::default()
  }

  // Deployments

  pub fn get_deployment(&self, id: &str) -> anyhow::Result<Deployment> {
    self
      .deployments
      .get(id)
      .with_context(|| format!("no deployment with id {id}"))
  }

  pub fn list_deployments_by_org(&self, org_id: &str) -> Vec<Deployment> {
    self
      .deployments
      .find(|d| d.organization_id == org_id)
  }

  pub fn get_deployment_by_name(
    &self,
    org_id: &str,
    name: &str,
  ) -> Option<Deployment> {
    self
      .deployments
      .find(|d| d.organization_id == org_id && d.name == name)
      .into_iter()
      .next()
  }

  pub fn update_deployment(
    &self,
    id: &str,
    mutate: impl FnOnce(&mut Deployment),
  ) -> anyhow::Result<Deployment> {
    self
      .deployments
      .update(id, |deployment| {
        mutate(deployment);
        deployment.updated_at = windflow_timestamp();
      })
      .with_context(|| format!("no deployment with id {id}"))
  }

  pub fn deployments_by_status(
    &self,
    status: DeploymentStatus,
  ) -> Vec<Deployment> {
    self.deployments.find(|d| d.status == status)
  }

  /// Deployments in one of `statuses` created before `older_than` (ms).
  pub fn stale_deployments(
    &self,
    statuses: &[DeploymentStatus],
    older_than: i64,
  ) -> Vec<Deployment> {
    self.deployments.find(|d| {
      statuses.contains(&d.status) && d.created_at < older_than
    })
  }

  // Stacks

  pub fn get_stack(&self, id: &str) -> anyhow::Result<Stack> {
    self
      .stacks
      .get(id)
      .with_context(|| format!("no stack with id {id}"))
  }

  // Targets

  pub fn get_target(&self, id: &str) -> anyhow::Result<Target> {
    self
      .targets
      .get(id)
      .with_context(|| format!("no target with id {id}"))
  }

  pub fn set_target_scan_status(
    &self,
    id: &str,
    status: ScanStatus,
  ) -> anyhow::Result<Target> {
    self
      .targets
      .update(id, |target| target.status = status)
      .with_context(|| format!("no target with id {id}"))
  }

  /// Accepting a scan overwrites the target's platform / os records
  /// and the capabilities payload.
  pub fn update_target_capabilities(
    &self,
    id: &str,
    payload: Value,
    scan_date: i64,
    success: bool,
  ) -> anyhow::Result<Target> {
    self
      .targets
      .update(id, |target| {
        target.platform_info = serde_json::from_value(
          payload.get("platform").cloned().unwrap_or(Value::Null),
        )
        .ok();
        target.os_info = serde_json::from_value(
          payload.get("os").cloned().unwrap_or(Value::Null),
        )
        .ok();
        target.capabilities = Some(payload);
        target.scan_date = Some(scan_date);
        target.scan_success = Some(success);
        target.status = if success {
          ScanStatus::Completed
        } else {
          ScanStatus::Failed
        };
      })
      .with_context(|| format!("no target with id {id}"))
  }

  // Users

  pub fn get_user(&self, id: &str) -> anyhow::Result<User> {
    self
      .users
      .get(id)
      .with_context(|| format!("no user with id {id}"))
  }

  pub fn get_user_by_email(&self, email: &str) -> Option<User> {
    self
      .users
      .find(|u| u.email == email)
      .into_iter()
      .next()
  }

  pub fn get_user_by_username(&self, username: &str) -> Option<User> {
    self
      .users
      .find(|u| u.username == username)
      .into_iter()
      .next()
  }

  pub fn get_first_active_superuser(&self) -> anyhow::Result<User> {
    let mut superusers = self
      .users
      .find(|u| u.is_active && u.is_superuser);
    superusers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    superusers
      .into_iter()
      .next()
      .ok_or_else(|| anyhow!("no active superuser exists"))
  }
}
