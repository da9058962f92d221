//! Permission store
//!
//! Permissions are append-only: once created they are never edited or
//! removed, only flagged as deprecated. Decisions keep honouring a
//! deprecated permission.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::error::{RbacError, Result};
use crate::store::PermissionRepository;
use crate::types::{Permission, PermissionConfig};

/// Permission storage
pub struct PermissionStore {
    permissions: Arc<dyn PermissionRepository>,
}

impl PermissionStore {
    pub fn new(permissions: Arc<dyn PermissionRepository>) -> Self {
        Self { permissions }
    }

    /// Create a permission
    pub async fn create(&self, id: &str, config: PermissionConfig) -> Result<Permission> {
        if id.trim().is_empty() {
            return Err(RbacError::InvalidInput(
                "Permission id must not be empty".to_string(),
            ));
        }
        if config.resource.is_empty() || config.action.is_empty() {
            return Err(RbacError::InvalidInput(format!(
                "Permission '{}' needs a resource and an action",
                id
            )));
        }

        let now = Utc::now();
        let permission = Permission {
            id: id.to_string(),
            name: if config.name.is_empty() {
                format!("{}:{}", config.resource, config.action)
            } else {
                config.name
            },
            description: config.description,
            resource: config.resource,
            action: config.action,
            conditions: config.conditions,
            scope: config.scope,
            risk_level: config.risk_level,
            is_active: true,
            deprecated: false,
            created_at: now,
            updated_at: now,
        };

        if !self.permissions.insert(permission.clone()).await? {
            return Err(RbacError::DuplicatePermission(id.to_string()));
        }

        info!(
            "Created permission '{}' ({} on {}, {:?} risk)",
            permission.id, permission.action, permission.resource, permission.risk_level
        );
        Ok(permission)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Permission>> {
        self.permissions.get(id).await
    }

    /// All permissions, ordered by id
    pub async fn list(&self) -> Result<Vec<Permission>> {
        self.permissions.list().await
    }

    /// Flag a permission as deprecated
    pub async fn deprecate(&self, id: &str) -> Result<Permission> {
        let mut permission = self
            .permissions
            .get(id)
            .await?
            .ok_or_else(|| RbacError::PermissionNotFound(id.to_string()))?;

        if !permission.deprecated {
            permission.deprecated = true;
            permission.updated_at = Utc::now();
            self.permissions.put(permission.clone()).await?;
            info!("Deprecated permission '{}'", id);
        }
        Ok(permission)
    }

    pub async fn replace_all(&self, permissions: Vec<Permission>) -> Result<()> {
        self.permissions.replace_all(permissions).await
    }
}
