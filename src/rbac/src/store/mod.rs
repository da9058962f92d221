//! Repository interfaces for every persisted entity
//!
//! The engine never touches storage directly: roles, permissions,
//! assignments, user attributes and audit entries each go through an
//! injected repository. The in-memory implementations in [`memory`] back
//! the default engine; a host can swap in database-backed ones without
//! touching decision logic.

pub mod memory;

pub use memory::{
    InMemoryAssignmentRepository, InMemoryAttributeRepository, InMemoryAuditRepository,
    InMemoryPermissionRepository, InMemoryRoleRepository,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::audit::AuditEntry;
use crate::error::Result;
use crate::types::{Assignment, Permission, Role, RoleId, UserAttributes, UserId};

/// Role storage
#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Get a role by ID
    async fn get(&self, id: &str) -> Result<Option<Role>>;

    /// Insert a role if its ID is free; returns false when it already exists
    async fn insert(&self, role: Role) -> Result<bool>;

    /// Store a role, replacing any previous version
    async fn put(&self, role: Role) -> Result<()>;

    /// Remove a role
    async fn remove(&self, id: &str) -> Result<Option<Role>>;

    /// List all roles
    async fn list(&self) -> Result<Vec<Role>>;

    /// Replace the whole role set
    async fn replace_all(&self, roles: Vec<Role>) -> Result<()>;
}

/// Permission storage
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Permission>>;

    /// Insert a permission if its ID is free; returns false when it already exists
    async fn insert(&self, permission: Permission) -> Result<bool>;

    async fn put(&self, permission: Permission) -> Result<()>;

    async fn list(&self) -> Result<Vec<Permission>>;

    async fn replace_all(&self, permissions: Vec<Permission>) -> Result<()>;
}

/// Per-user role assignment ledger
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// All stored assignments of a user, effective or not
    async fn get(&self, user_id: &str) -> Result<Vec<Assignment>>;

    /// Store an assignment, replacing the user's existing one for the same role
    async fn upsert(&self, user_id: &str, assignment: Assignment) -> Result<()>;

    /// Remove every assignment of `role_id` from a user; returns how many were removed
    async fn remove(&self, user_id: &str, role_id: &str) -> Result<usize>;

    /// Drop a user's inactive and expired assignments, returning the survivors
    async fn prune(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Assignment>>;

    /// Distinct users holding an effective assignment of `role_id`
    async fn count_holders(&self, role_id: &str, now: DateTime<Utc>) -> Result<usize>;

    /// Users with any stored assignment of one of `role_ids`
    async fn users_with_roles(&self, role_ids: &HashSet<RoleId>) -> Result<Vec<UserId>>;

    /// Remove all assignments of `role_id` across users; returns how many were removed
    async fn purge_role(&self, role_id: &str) -> Result<usize>;

    async fn all(&self) -> Result<HashMap<UserId, Vec<Assignment>>>;

    async fn replace_all(&self, assignments: HashMap<UserId, Vec<Assignment>>) -> Result<()>;
}

/// Per-user ABAC attributes
#[async_trait]
pub trait AttributeRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<UserAttributes>>;

    /// Merge attributes into the user's record, returning the updated record
    async fn merge(
        &self,
        user_id: &str,
        attributes: serde_json::Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<UserAttributes>;

    async fn all(&self) -> Result<HashMap<UserId, UserAttributes>>;

    async fn replace_all(&self, attributes: HashMap<UserId, UserAttributes>) -> Result<()>;
}

/// Bounded, append-only audit log
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append an entry and drop the oldest entries beyond `max_entries`, atomically
    async fn append(&self, entry: AuditEntry, max_entries: usize) -> Result<()>;

    /// All entries, oldest first
    async fn list(&self) -> Result<Vec<AuditEntry>>;

    /// The `count` most recent entries, oldest first
    async fn recent(&self, count: usize) -> Result<Vec<AuditEntry>>;

    async fn replace_all(&self, entries: Vec<AuditEntry>) -> Result<()>;
}

/// The full set of repositories an engine runs on
#[derive(Clone)]
pub struct Repositories {
    pub roles: Arc<dyn RoleRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub attributes: Arc<dyn AttributeRepository>,
    pub audit: Arc<dyn AuditRepository>,
}

impl Repositories {
    /// In-memory repositories for every entity
    pub fn in_memory() -> Self {
        Self {
            roles: Arc::new(InMemoryRoleRepository::new()),
            permissions: Arc::new(InMemoryPermissionRepository::new()),
            assignments: Arc::new(InMemoryAssignmentRepository::new()),
            attributes: Arc::new(InMemoryAttributeRepository::new()),
            audit: Arc::new(InMemoryAuditRepository::new()),
        }
    }
}

impl Default for Repositories {
    fn default() -> Self {
        Self::in_memory()
    }
}
