//! Assignment ledger
//!
//! Per-user role assignments and ABAC attributes. Assignments carry their
//! own validity window; expired or deactivated ones are dropped from the
//! repository the next time the user's roles are read.

use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{RbacError, Result};
use crate::store::{AssignmentRepository, AttributeRepository, RoleRepository};
use crate::types::{Assignment, AssignmentConfig, Role, RoleId, UserAttributes, UserId, UserRole};

/// Role assignments and user attributes
pub struct AssignmentLedger {
    assignments: Arc<dyn AssignmentRepository>,
    attributes: Arc<dyn AttributeRepository>,
    roles: Arc<dyn RoleRepository>,
}

impl AssignmentLedger {
    pub fn new(
        assignments: Arc<dyn AssignmentRepository>,
        attributes: Arc<dyn AttributeRepository>,
        roles: Arc<dyn RoleRepository>,
    ) -> Self {
        Self {
            assignments,
            attributes,
            roles,
        }
    }

    /// Assign a role to a user
    ///
    /// The role must be active and unexpired, and must have room for one
    /// more distinct holder unless the user already holds it. Re-assigning a
    /// held role replaces the previous assignment.
    pub async fn assign(
        &self,
        user_id: &str,
        role_id: &str,
        config: AssignmentConfig,
    ) -> Result<Assignment> {
        if user_id.trim().is_empty() {
            return Err(RbacError::InvalidInput("User id must not be empty".to_string()));
        }

        let role = self
            .roles
            .get(role_id)
            .await?
            .ok_or_else(|| RbacError::RoleNotFound(role_id.to_string()))?;

        let now = Utc::now();
        if !role.is_active {
            return Err(RbacError::ConditionsNotMet(format!(
                "Role '{}' is inactive",
                role_id
            )));
        }
        if role.is_expired(now) {
            return Err(RbacError::ConditionsNotMet(format!(
                "Role '{}' has expired",
                role_id
            )));
        }
        if let Some(expires_at) = config.expires_at {
            if expires_at <= now {
                return Err(RbacError::InvalidInput(format!(
                    "Assignment of '{}' would already be expired",
                    role_id
                )));
            }
        }

        if let Some(max_users) = role.max_users {
            self.check_capacity(user_id, &role, max_users).await?;
        }

        let assignment = Assignment {
            role_id: role_id.to_string(),
            assigned_at: now,
            assigned_by: config.assigned_by,
            expires_at: config.expires_at,
            scope: config.scope,
            scope_data: config.scope_data,
            conditions: config.conditions,
            is_active: true,
            metadata: config.metadata,
        };
        self.assignments.upsert(user_id, assignment.clone()).await?;

        info!(
            "Assigned role '{}' to user '{}' (by {})",
            role_id, user_id, assignment.assigned_by
        );
        Ok(assignment)
    }

    /// Revoke every assignment of a role from a user
    pub async fn remove(&self, user_id: &str, role_id: &str) -> Result<bool> {
        let removed = self.assignments.remove(user_id, role_id).await?;
        if removed > 0 {
            info!("Removed role '{}' from user '{}'", role_id, user_id);
        }
        Ok(removed > 0)
    }

    /// Effective assignments of a user, pruning the rest from storage
    pub async fn effective(&self, user_id: &str) -> Result<Vec<Assignment>> {
        self.assignments.prune(user_id, Utc::now()).await
    }

    /// Effective assignments joined with their roles
    ///
    /// Assignments whose role no longer exists are skipped.
    pub async fn user_roles(&self, user_id: &str) -> Result<Vec<UserRole>> {
        let mut user_roles = Vec::new();
        for assignment in self.effective(user_id).await? {
            match self.roles.get(&assignment.role_id).await? {
                Some(role) => user_roles.push(UserRole { assignment, role }),
                None => debug!(
                    "User '{}' holds unknown role '{}'",
                    user_id, assignment.role_id
                ),
            }
        }
        Ok(user_roles)
    }

    /// Distinct users currently holding a role
    pub async fn holders(&self, role_id: &str) -> Result<usize> {
        self.assignments.count_holders(role_id, Utc::now()).await
    }

    /// Users with an assignment of any of the roles
    pub async fn users_with_roles(&self, role_ids: &HashSet<RoleId>) -> Result<Vec<UserId>> {
        self.assignments.users_with_roles(role_ids).await
    }

    /// Drop stale assignments of a deleted role
    pub async fn purge_role(&self, role_id: &str) -> Result<usize> {
        self.assignments.purge_role(role_id).await
    }

    /// Merge attributes into a user's stored set
    pub async fn set_attributes(
        &self,
        user_id: &str,
        attributes: serde_json::Map<String, Value>,
    ) -> Result<UserAttributes> {
        let record = self
            .attributes
            .merge(user_id, attributes, Utc::now())
            .await?;
        debug!(
            "User '{}' now has {} attribute(s)",
            user_id,
            record.attributes.len()
        );
        Ok(record)
    }

    pub async fn attributes(&self, user_id: &str) -> Result<Option<UserAttributes>> {
        self.attributes.get(user_id).await
    }

    pub async fn all_assignments(&self) -> Result<HashMap<UserId, Vec<Assignment>>> {
        self.assignments.all().await
    }

    pub async fn all_attributes(&self) -> Result<HashMap<UserId, UserAttributes>> {
        self.attributes.all().await
    }

    pub async fn replace_all(
        &self,
        assignments: HashMap<UserId, Vec<Assignment>>,
        attributes: HashMap<UserId, UserAttributes>,
    ) -> Result<()> {
        self.assignments.replace_all(assignments).await?;
        self.attributes.replace_all(attributes).await
    }

    async fn check_capacity(&self, user_id: &str, role: &Role, max_users: usize) -> Result<()> {
        let now = Utc::now();
        let already_holds = self
            .assignments
            .get(user_id)
            .await?
            .iter()
            .any(|a| a.role_id == role.id && a.is_effective(now));
        if already_holds {
            return Ok(());
        }

        let holders = self.assignments.count_holders(&role.id, now).await?;
        if holders >= max_users {
            return Err(RbacError::RoleCapacityExceeded {
                role_id: role.id.clone(),
                max_users,
            });
        }
        Ok(())
    }
}
