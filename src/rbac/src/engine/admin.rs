//! Store operations exposed by the engine
//!
//! Each mutation takes the write lock, delegates to its store, invalidates
//! dependent cache entries, then records an audit entry and publishes a
//! notification.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::info;

use super::AccessControlEngine;
use crate::audit::AuditEventType;
use crate::error::{RbacError, Result};
use crate::events::Notification;
use crate::types::{
    Assignment, AssignmentConfig, Permission, PermissionConfig, PermissionId, Role, RoleConfig,
    RoleUpdate, UserAttributes, UserRole,
};

impl AccessControlEngine {
    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    /// Create a role
    pub async fn create_role(&self, id: &str, config: RoleConfig) -> Result<Role> {
        let _guard = self.begin_write().await?;
        let role = self.roles.create(id, config).await?;

        self.audit
            .log(
                AuditEventType::RoleCreated,
                json!({
                    "roleId": role.id,
                    "name": role.name,
                    "parentRole": role.parent_role,
                    "permissions": role.permissions,
                    "createdBy": role.created_by,
                }),
            )
            .await;
        self.events.publish(Notification::RoleCreated { role: role.clone() });
        Ok(role)
    }

    /// Apply a partial update to a role
    pub async fn update_role(&self, id: &str, update: RoleUpdate) -> Result<Role> {
        let _guard = self.begin_write().await?;
        let role = self.roles.update(id, &update).await?;
        self.invalidate_role(id).await?;

        let changes: Vec<String> = update
            .changed_fields()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.audit
            .log(
                AuditEventType::RoleUpdated,
                json!({ "roleId": id, "changes": changes }),
            )
            .await;
        self.events.publish(Notification::RoleUpdated {
            role: role.clone(),
            changes,
        });
        Ok(role)
    }

    /// Move a role under another parent, or make it a root with `None`
    pub async fn set_parent_role(
        &self,
        id: &str,
        parent: Option<&str>,
        allow_system_override: bool,
    ) -> Result<Role> {
        let _guard = self.begin_write().await?;
        let previous = self.roles.get(id).await?.and_then(|r| r.parent_role);
        let role = self.roles.set_parent(id, parent, allow_system_override).await?;
        self.invalidate_role(id).await?;

        let changes = vec!["parentRole".to_string()];
        self.audit
            .log(
                AuditEventType::RoleUpdated,
                json!({
                    "roleId": id,
                    "changes": changes,
                    "previousParent": previous,
                    "parentRole": role.parent_role,
                }),
            )
            .await;
        self.events.publish(Notification::RoleUpdated {
            role: role.clone(),
            changes,
        });
        Ok(role)
    }

    /// Delete a role
    ///
    /// Fails for system roles and for roles any user effectively holds.
    pub async fn delete_role(&self, id: &str) -> Result<()> {
        let _guard = self.begin_write().await?;

        let role = self
            .roles
            .get(id)
            .await?
            .ok_or_else(|| RbacError::RoleNotFound(id.to_string()))?;
        if role.is_system {
            return Err(RbacError::ProtectedRole(id.to_string()));
        }

        let holders = self.ledger.holders(id).await?;
        if holders > 0 {
            return Err(RbacError::RoleInUse {
                role_id: id.to_string(),
                assignments: holders,
            });
        }

        // Collect before the hierarchy edges and stale assignments disappear
        let affected = self.roles.descendants(id).await?;
        let users = self.ledger.users_with_roles(&affected).await?;

        self.roles.delete(id).await?;
        let purged = self.ledger.purge_role(id).await?;

        self.roles.invalidate(&affected);
        for user_id in &users {
            self.decisions.invalidate_user(user_id);
        }

        self.audit
            .log(
                AuditEventType::RoleDeleted,
                json!({
                    "roleId": id,
                    "name": role.name,
                    "detachedChildren": role.children,
                    "purgedAssignments": purged,
                }),
            )
            .await;
        self.events.publish(Notification::RoleDeleted {
            role_id: id.to_string(),
        });
        Ok(())
    }

    /// Grant a permission directly to a role
    ///
    /// Returns false when the role already had it.
    pub async fn assign_permission_to_role(
        &self,
        role_id: &str,
        permission_id: &str,
        allow_system_override: bool,
    ) -> Result<bool> {
        let _guard = self.begin_write().await?;
        let added = self
            .roles
            .add_permission(role_id, permission_id, allow_system_override)
            .await?;
        if !added {
            return Ok(false);
        }
        self.invalidate_role(role_id).await?;

        self.audit
            .log(
                AuditEventType::PermissionAssigned,
                json!({ "roleId": role_id, "permissionId": permission_id }),
            )
            .await;
        self.events.publish(Notification::PermissionAssigned {
            role_id: role_id.to_string(),
            permission_id: permission_id.to_string(),
        });
        Ok(true)
    }

    /// Revoke a directly granted permission from a role
    pub async fn remove_permission_from_role(
        &self,
        role_id: &str,
        permission_id: &str,
        allow_system_override: bool,
    ) -> Result<bool> {
        let _guard = self.begin_write().await?;
        let removed = self
            .roles
            .remove_permission(role_id, permission_id, allow_system_override)
            .await?;
        if !removed {
            return Ok(false);
        }
        self.invalidate_role(role_id).await?;

        self.audit
            .log(
                AuditEventType::PermissionRemoved,
                json!({ "roleId": role_id, "permissionId": permission_id }),
            )
            .await;
        self.events.publish(Notification::PermissionRemoved {
            role_id: role_id.to_string(),
            permission_id: permission_id.to_string(),
        });
        Ok(true)
    }

    pub async fn get_role(&self, id: &str) -> Result<Option<Role>> {
        self.roles.get(id).await
    }

    /// All roles, ordered by level then id
    pub async fn get_all_roles(&self) -> Result<Vec<Role>> {
        self.roles.list().await
    }

    /// Permission ids of a role, optionally including inherited ones
    pub async fn get_role_permissions(
        &self,
        id: &str,
        include_inherited: bool,
    ) -> Result<BTreeSet<PermissionId>> {
        self.roles.permissions_of(id, include_inherited).await
    }

    // ------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------

    /// Create a permission
    pub async fn create_permission(&self, id: &str, config: PermissionConfig) -> Result<Permission> {
        let _guard = self.begin_write().await?;
        let permission = self.permissions.create(id, config).await?;

        self.audit
            .log(
                AuditEventType::PermissionCreated,
                json!({
                    "permissionId": permission.id,
                    "resource": permission.resource,
                    "action": permission.action,
                    "riskLevel": permission.risk_level,
                }),
            )
            .await;
        self.events.publish(Notification::PermissionCreated {
            permission: permission.clone(),
        });
        Ok(permission)
    }

    /// Flag a permission as deprecated
    pub async fn deprecate_permission(&self, id: &str) -> Result<Permission> {
        let _guard = self.begin_write().await?;
        let permission = self.permissions.deprecate(id).await?;

        self.audit
            .log(
                AuditEventType::PermissionDeprecated,
                json!({ "permissionId": id }),
            )
            .await;
        Ok(permission)
    }

    pub async fn get_permission(&self, id: &str) -> Result<Option<Permission>> {
        self.permissions.get(id).await
    }

    /// All permissions, ordered by id
    pub async fn get_all_permissions(&self) -> Result<Vec<Permission>> {
        self.permissions.list().await
    }

    // ------------------------------------------------------------------
    // Assignments and attributes
    // ------------------------------------------------------------------

    /// Assign a role to a user
    pub async fn assign_role_to_user(
        &self,
        user_id: &str,
        role_id: &str,
        config: AssignmentConfig,
    ) -> Result<Assignment> {
        let _guard = self.begin_write().await?;
        let assignment = self.ledger.assign(user_id, role_id, config).await?;
        self.decisions.invalidate_user(user_id);

        self.audit
            .log(
                AuditEventType::RoleAssigned,
                json!({
                    "userId": user_id,
                    "roleId": role_id,
                    "assignedBy": assignment.assigned_by,
                    "expiresAt": assignment.expires_at,
                }),
            )
            .await;
        self.events.publish(Notification::RoleAssigned {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
            assignment: assignment.clone(),
        });
        Ok(assignment)
    }

    /// Revoke a role from a user; false if the user did not hold it
    pub async fn remove_role_from_user(&self, user_id: &str, role_id: &str) -> Result<bool> {
        let _guard = self.begin_write().await?;
        if !self.ledger.remove(user_id, role_id).await? {
            return Ok(false);
        }
        self.decisions.invalidate_user(user_id);

        self.audit
            .log(
                AuditEventType::RoleRemoved,
                json!({ "userId": user_id, "roleId": role_id }),
            )
            .await;
        self.events.publish(Notification::RoleRemoved {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        });
        Ok(true)
    }

    /// Effective assignments of a user joined with their roles
    pub async fn get_user_roles(&self, user_id: &str) -> Result<Vec<UserRole>> {
        self.ledger.user_roles(user_id).await
    }

    /// Merge attributes into a user's stored ABAC attributes
    pub async fn set_user_attributes(
        &self,
        user_id: &str,
        attributes: serde_json::Map<String, Value>,
    ) -> Result<UserAttributes> {
        let _guard = self.begin_write().await?;
        let keys: Vec<String> = attributes.keys().cloned().collect();
        let record = self.ledger.set_attributes(user_id, attributes).await?;
        self.decisions.invalidate_user(user_id);

        info!("Updated attributes {:?} of user '{}'", keys, user_id);
        self.audit
            .log(
                AuditEventType::UserAttributesUpdated,
                json!({ "userId": user_id, "keys": keys }),
            )
            .await;
        Ok(record)
    }

    pub async fn get_user_attributes(&self, user_id: &str) -> Result<Option<UserAttributes>> {
        self.ledger.attributes(user_id).await
    }
}
