//! Role store
//!
//! Role CRUD on top of a [`RoleRepository`], with:
//! - Single-parent hierarchy kept acyclic at write time
//! - `children` links kept in sync with `parent_role`
//! - Inherited permission resolution with a TTL cache
//! - Protection of system roles unless explicitly overridden
//!
//! The store validates and persists. Auditing, notifications and decision
//! cache invalidation are layered on top by the engine.

pub mod hierarchy;

pub use hierarchy::{rebuild_children, RoleGraph};

use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::ResolutionCache;
use crate::error::{RbacError, Result};
use crate::store::{PermissionRepository, RoleRepository};
use crate::types::{PermissionId, Role, RoleConfig, RoleId, RoleUpdate, ScopeKind};

/// Built-in roles: `(id, name, level)`, each the parent of the next
pub const SYSTEM_ROLES: [(&str, &str, i32); 5] = [
    ("guest", "Guest", 0),
    ("user", "User", 10),
    ("manager", "Manager", 50),
    ("admin", "Administrator", 90),
    ("super_admin", "Super Administrator", 100),
];

/// Role storage and hierarchy management
pub struct RoleStore {
    roles: Arc<dyn RoleRepository>,
    permissions: Arc<dyn PermissionRepository>,
    resolutions: ResolutionCache,
    cache_enabled: bool,
}

impl RoleStore {
    /// Create a role store
    pub fn new(
        roles: Arc<dyn RoleRepository>,
        permissions: Arc<dyn PermissionRepository>,
        cache_enabled: bool,
        cache_ttl: Duration,
        cache_capacity: usize,
    ) -> Self {
        Self {
            roles,
            permissions,
            resolutions: ResolutionCache::new(cache_ttl, cache_capacity),
            cache_enabled,
        }
    }

    /// Create a role
    pub async fn create(&self, id: &str, config: RoleConfig) -> Result<Role> {
        if id.trim().is_empty() {
            return Err(RbacError::InvalidInput("Role id must not be empty".to_string()));
        }

        if self.roles.get(id).await?.is_some() {
            return Err(RbacError::DuplicateRole(id.to_string()));
        }

        let mut parent = match &config.parent_role {
            Some(parent_id) => Some(
                self.roles
                    .get(parent_id)
                    .await?
                    .ok_or_else(|| RbacError::RoleNotFound(parent_id.clone()))?,
            ),
            None => None,
        };

        for permission_id in &config.permissions {
            self.require_permission(permission_id).await?;
        }

        let now = Utc::now();
        let role = Role {
            id: id.to_string(),
            name: if config.name.is_empty() {
                id.to_string()
            } else {
                config.name
            },
            description: config.description,
            permissions: config.permissions.into_iter().collect(),
            parent_role: config.parent_role,
            children: BTreeSet::new(),
            level: config.level,
            is_active: config.is_active,
            is_system: config.is_system,
            scope: config.scope,
            scope_data: config.scope_data,
            expires_at: config.expires_at,
            max_users: config.max_users,
            created_at: now,
            updated_at: now,
            created_by: config.created_by,
        };

        if !self.roles.insert(role.clone()).await? {
            return Err(RbacError::DuplicateRole(id.to_string()));
        }

        if let Some(parent) = parent.as_mut() {
            parent.children.insert(role.id.clone());
            self.roles.put(parent.clone()).await?;
        }

        info!("Created role '{}' (level {})", role.id, role.level);
        Ok(role)
    }

    /// Apply a partial update
    pub async fn update(&self, id: &str, update: &RoleUpdate) -> Result<Role> {
        let mut role = self.require_role(id).await?;
        Self::check_protected(&role, update.allow_system_override)?;

        if let Some(name) = &update.name {
            role.name = name.clone();
        }
        if let Some(description) = &update.description {
            role.description = description.clone();
        }
        if let Some(level) = update.level {
            role.level = level;
        }
        if let Some(is_active) = update.is_active {
            role.is_active = is_active;
        }
        if let Some(expires_at) = update.expires_at {
            role.expires_at = expires_at;
        }
        if let Some(max_users) = update.max_users {
            role.max_users = max_users;
        }
        role.updated_at = Utc::now();

        self.roles.put(role.clone()).await?;
        info!("Updated role '{}': {:?}", id, update.changed_fields());
        Ok(role)
    }

    /// Move a role under a new parent, or make it a root
    pub async fn set_parent(
        &self,
        id: &str,
        parent: Option<&str>,
        allow_system_override: bool,
    ) -> Result<Role> {
        let mut role = self.require_role(id).await?;
        Self::check_protected(&role, allow_system_override)?;

        if role.parent_role.as_deref() == parent {
            return Ok(role);
        }

        if let Some(parent_id) = parent {
            self.require_role(parent_id).await?;
            let graph = self.graph().await?;
            graph.check_parent(id, parent_id)?;
        }

        if let Some(old_parent) = role.parent_role.take() {
            if let Some(mut old) = self.roles.get(&old_parent).await? {
                old.children.remove(id);
                self.roles.put(old).await?;
            }
        }

        if let Some(parent_id) = parent {
            let mut new_parent = self.require_role(parent_id).await?;
            new_parent.children.insert(id.to_string());
            self.roles.put(new_parent).await?;
        }

        role.parent_role = parent.map(str::to_string);
        role.updated_at = Utc::now();
        self.roles.put(role.clone()).await?;

        info!("Role '{}' now inherits from {:?}", id, parent);
        Ok(role)
    }

    /// Remove a role and detach it from the hierarchy
    ///
    /// Its children become roots. Callers check for assignments first.
    pub async fn delete(&self, id: &str) -> Result<Role> {
        let role = self.require_role(id).await?;
        Self::check_protected(&role, false)?;

        if let Some(parent_id) = &role.parent_role {
            if let Some(mut parent) = self.roles.get(parent_id).await? {
                parent.children.remove(id);
                self.roles.put(parent).await?;
            }
        }

        for child_id in &role.children {
            if let Some(mut child) = self.roles.get(child_id).await? {
                child.parent_role = None;
                child.updated_at = Utc::now();
                self.roles.put(child).await?;
            }
        }

        self.roles
            .remove(id)
            .await?
            .ok_or_else(|| RbacError::RoleNotFound(id.to_string()))?;

        info!("Deleted role '{}'", id);
        Ok(role)
    }

    /// Grant a permission directly to a role; false if it already had it
    pub async fn add_permission(
        &self,
        role_id: &str,
        permission_id: &str,
        allow_system_override: bool,
    ) -> Result<bool> {
        let mut role = self.require_role(role_id).await?;
        Self::check_protected(&role, allow_system_override)?;
        self.require_permission(permission_id).await?;

        if !role.permissions.insert(permission_id.to_string()) {
            return Ok(false);
        }
        role.updated_at = Utc::now();
        self.roles.put(role).await?;

        debug!("Granted '{}' to role '{}'", permission_id, role_id);
        Ok(true)
    }

    /// Revoke a directly granted permission; false if the role did not have it
    pub async fn remove_permission(
        &self,
        role_id: &str,
        permission_id: &str,
        allow_system_override: bool,
    ) -> Result<bool> {
        let mut role = self.require_role(role_id).await?;
        Self::check_protected(&role, allow_system_override)?;

        if !role.permissions.remove(permission_id) {
            return Ok(false);
        }
        role.updated_at = Utc::now();
        self.roles.put(role).await?;

        debug!("Revoked '{}' from role '{}'", permission_id, role_id);
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Role>> {
        self.roles.get(id).await
    }

    /// All roles, ordered by level then id
    pub async fn list(&self) -> Result<Vec<Role>> {
        self.roles.list().await
    }

    /// Permission ids of a role, optionally with everything it inherits
    pub async fn permissions_of(
        &self,
        id: &str,
        include_inherited: bool,
    ) -> Result<BTreeSet<PermissionId>> {
        let role = self.require_role(id).await?;
        if !include_inherited {
            return Ok(role.permissions);
        }

        if self.cache_enabled {
            if let Some(cached) = self.resolutions.get(&role.id) {
                return Ok(cached);
            }
        }

        let generation = self.resolutions.generation();
        let resolved = self.resolve_inherited(role).await?;

        if self.cache_enabled {
            self.resolutions
                .insert(id.to_string(), resolved.clone(), generation);
        }
        Ok(resolved)
    }

    /// The role plus every role inheriting from it
    pub async fn descendants(&self, id: &str) -> Result<HashSet<RoleId>> {
        Ok(self.graph().await?.descendants(id))
    }

    /// Drop cached resolutions of the given roles
    pub fn invalidate(&self, role_ids: &HashSet<RoleId>) {
        let removed = self.resolutions.invalidate_where(|id| role_ids.contains(id));
        debug!("Invalidated {} cached role resolution(s)", removed);
    }

    pub fn clear_cache(&self) {
        self.resolutions.clear();
    }

    /// Create any missing built-in role
    pub async fn seed_system_roles(&self) -> Result<Vec<Role>> {
        let mut created = Vec::new();
        let mut parent: Option<&str> = None;

        for (id, name, level) in SYSTEM_ROLES {
            if self.roles.get(id).await?.is_none() {
                let mut config = RoleConfig::new(name)
                    .with_description(format!("Built-in {} role", name.to_lowercase()))
                    .with_level(level)
                    .with_scope(ScopeKind::Global, Default::default())
                    .system();
                if let Some(parent) = parent {
                    config = config.with_parent(parent);
                }
                created.push(self.create(id, config).await?);
            }
            parent = Some(id);
        }

        if !created.is_empty() {
            info!("Seeded {} system role(s)", created.len());
        }
        Ok(created)
    }

    /// Replace every role, rejecting a cyclic hierarchy
    pub async fn replace_all(&self, mut roles: Vec<Role>) -> Result<()> {
        let mut seen = HashSet::new();
        for role in &roles {
            if !seen.insert(role.id.as_str()) {
                return Err(RbacError::DuplicateRole(role.id.clone()));
            }
        }

        RoleGraph::from_roles(&roles).detect_cycle()?;
        rebuild_children(&mut roles);

        self.roles.replace_all(roles).await?;
        self.resolutions.clear();
        Ok(())
    }

    async fn resolve_inherited(&self, role: Role) -> Result<BTreeSet<PermissionId>> {
        let mut permissions = role.permissions;
        let mut visited: HashSet<RoleId> = HashSet::from([role.id.clone()]);
        let mut next = role.parent_role;

        while let Some(parent_id) = next {
            if !visited.insert(parent_id.clone()) {
                return Err(RbacError::HierarchyCycle(format!(
                    "'{}' is reachable from itself",
                    parent_id
                )));
            }

            let Some(parent) = self.roles.get(&parent_id).await? else {
                debug!("Role '{}' has a dangling parent '{}'", role.id, parent_id);
                break;
            };
            permissions.extend(parent.permissions);
            next = parent.parent_role;
        }

        Ok(permissions)
    }

    async fn graph(&self) -> Result<RoleGraph> {
        let roles = self.roles.list().await?;
        Ok(RoleGraph::from_roles(&roles))
    }

    async fn require_role(&self, id: &str) -> Result<Role> {
        self.roles
            .get(id)
            .await?
            .ok_or_else(|| RbacError::RoleNotFound(id.to_string()))
    }

    async fn require_permission(&self, id: &str) -> Result<()> {
        match self.permissions.get(id).await? {
            Some(_) => Ok(()),
            None => Err(RbacError::PermissionNotFound(id.to_string())),
        }
    }

    fn check_protected(role: &Role, allow_system_override: bool) -> Result<()> {
        if role.is_system && !allow_system_override {
            return Err(RbacError::ProtectedRole(role.id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryPermissionRepository, InMemoryRoleRepository};
    use crate::types::Permission;

    fn store() -> (RoleStore, Arc<InMemoryPermissionRepository>) {
        let permissions = Arc::new(InMemoryPermissionRepository::new());
        let store = RoleStore::new(
            Arc::new(InMemoryRoleRepository::new()),
            permissions.clone(),
            true,
            Duration::from_secs(60),
            100,
        );
        (store, permissions)
    }

    async fn add_permission(repo: &InMemoryPermissionRepository, id: &str) {
        let now = Utc::now();
        repo.put(Permission {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            resource: "report".to_string(),
            action: id.to_string(),
            conditions: Default::default(),
            scope: ScopeKind::Global,
            risk_level: Default::default(),
            is_active: true,
            deprecated: false,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_create_and_duplicate() {
        let (store, _) = store();
        store.create("clerk", RoleConfig::new("Clerk")).await.unwrap();

        let err = store.create("clerk", RoleConfig::new("Clerk")).await.unwrap_err();
        assert!(matches!(err, RbacError::DuplicateRole(_)));
    }

    #[tokio::test]
    async fn test_create_validates_references() {
        let (store, _) = store();

        let err = store
            .create("x", RoleConfig::new("X").with_parent("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::RoleNotFound(_)));

        let err = store
            .create("y", RoleConfig::new("Y").with_permissions(["nope"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::PermissionNotFound(_)));
    }

    #[tokio::test]
    async fn test_seeded_chain_inherits() {
        let (store, permissions) = store();
        add_permission(&permissions, "read").await;
        add_permission(&permissions, "approve").await;

        let seeded = store.seed_system_roles().await.unwrap();
        assert_eq!(seeded.len(), 5);
        assert!(store.seed_system_roles().await.unwrap().is_empty());

        store.add_permission("guest", "read", true).await.unwrap();
        store.add_permission("manager", "approve", true).await.unwrap();

        let admin = store.permissions_of("admin", true).await.unwrap();
        assert_eq!(admin, BTreeSet::from(["approve".to_string(), "read".to_string()]));

        let user = store.permissions_of("user", true).await.unwrap();
        assert_eq!(user, BTreeSet::from(["read".to_string()]));

        let guest = store.get("guest").await.unwrap().unwrap();
        assert_eq!(guest.children, BTreeSet::from(["user".to_string()]));
        assert!(guest.is_system);
    }

    #[tokio::test]
    async fn test_system_roles_protected() {
        let (store, permissions) = store();
        add_permission(&permissions, "read").await;
        store.seed_system_roles().await.unwrap();

        let err = store.add_permission("admin", "read", false).await.unwrap_err();
        assert!(matches!(err, RbacError::ProtectedRole(_)));

        let err = store.delete("admin").await.unwrap_err();
        assert!(matches!(err, RbacError::ProtectedRole(_)));

        let update = RoleUpdate {
            name: Some("Root".to_string()),
            ..Default::default()
        };
        assert!(store.update("super_admin", &update).await.is_err());

        let update = RoleUpdate {
            allow_system_override: true,
            ..update
        };
        assert_eq!(store.update("super_admin", &update).await.unwrap().name, "Root");
    }

    #[tokio::test]
    async fn test_set_parent_rejects_cycle() {
        let (store, _) = store();
        store.create("a", RoleConfig::new("A")).await.unwrap();
        store.create("b", RoleConfig::new("B").with_parent("a")).await.unwrap();
        store.create("c", RoleConfig::new("C").with_parent("b")).await.unwrap();

        let err = store.set_parent("a", Some("c"), false).await.unwrap_err();
        assert!(matches!(err, RbacError::HierarchyCycle(_)));

        let err = store.set_parent("a", Some("a"), false).await.unwrap_err();
        assert!(matches!(err, RbacError::HierarchyCycle(_)));

        store.set_parent("c", Some("a"), false).await.unwrap();
        let a = store.get("a").await.unwrap().unwrap();
        let b = store.get("b").await.unwrap().unwrap();
        assert_eq!(a.children, BTreeSet::from(["b".to_string(), "c".to_string()]));
        assert!(b.children.is_empty());
    }

    #[tokio::test]
    async fn test_delete_detaches_children() {
        let (store, _) = store();
        store.create("a", RoleConfig::new("A")).await.unwrap();
        store.create("b", RoleConfig::new("B").with_parent("a")).await.unwrap();

        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.get("b").await.unwrap().unwrap().parent_role, None);
    }

    #[tokio::test]
    async fn test_resolution_cache_invalidation() {
        let (store, permissions) = store();
        add_permission(&permissions, "read").await;
        add_permission(&permissions, "write").await;
        store
            .create("base", RoleConfig::new("Base").with_permissions(["read"]))
            .await
            .unwrap();
        store
            .create("derived", RoleConfig::new("Derived").with_parent("base"))
            .await
            .unwrap();

        assert_eq!(store.permissions_of("derived", true).await.unwrap().len(), 1);

        store.add_permission("base", "write", false).await.unwrap();
        let affected = store.descendants("base").await.unwrap();
        assert!(affected.contains("derived"));
        store.invalidate(&affected);

        assert_eq!(store.permissions_of("derived", true).await.unwrap().len(), 2);
        assert!(store.permissions_of("derived", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_rejects_cycle() {
        let (store, _) = store();
        store.create("a", RoleConfig::new("A")).await.unwrap();
        store.create("b", RoleConfig::new("B").with_parent("a")).await.unwrap();

        let mut roles = store.list().await.unwrap();
        for role in roles.iter_mut() {
            if role.id == "a" {
                role.parent_role = Some("b".to_string());
            }
        }

        let err = store.replace_all(roles).await.unwrap_err();
        assert!(matches!(err, RbacError::HierarchyCycle(_)));
        assert_eq!(store.get("a").await.unwrap().unwrap().parent_role, None);
    }
}
