//! In-memory repository implementations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    AssignmentRepository, AttributeRepository, AuditRepository, PermissionRepository,
    RoleRepository,
};
use crate::audit::AuditEntry;
use crate::error::Result;
use crate::types::{Assignment, Permission, PermissionId, Role, RoleId, UserAttributes, UserId};

/// In-memory role store
#[derive(Default)]
pub struct InMemoryRoleRepository {
    roles: Arc<RwLock<HashMap<RoleId, Role>>>,
}

impl InMemoryRoleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn get(&self, id: &str) -> Result<Option<Role>> {
        let roles = self.roles.read().await;
        Ok(roles.get(id).cloned())
    }

    async fn insert(&self, role: Role) -> Result<bool> {
        let mut roles = self.roles.write().await;
        if roles.contains_key(&role.id) {
            return Ok(false);
        }
        roles.insert(role.id.clone(), role);
        Ok(true)
    }

    async fn put(&self, role: Role) -> Result<()> {
        let mut roles = self.roles.write().await;
        roles.insert(role.id.clone(), role);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<Option<Role>> {
        let mut roles = self.roles.write().await;
        Ok(roles.remove(id))
    }

    async fn list(&self) -> Result<Vec<Role>> {
        let roles = self.roles.read().await;
        let mut list: Vec<Role> = roles.values().cloned().collect();

        // Lowest privilege first
        list.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn replace_all(&self, roles: Vec<Role>) -> Result<()> {
        let mut stored = self.roles.write().await;
        *stored = roles.into_iter().map(|r| (r.id.clone(), r)).collect();
        Ok(())
    }
}

/// In-memory permission store
#[derive(Default)]
pub struct InMemoryPermissionRepository {
    permissions: Arc<RwLock<HashMap<PermissionId, Permission>>>,
}

impl InMemoryPermissionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionRepository for InMemoryPermissionRepository {
    async fn get(&self, id: &str) -> Result<Option<Permission>> {
        let permissions = self.permissions.read().await;
        Ok(permissions.get(id).cloned())
    }

    async fn insert(&self, permission: Permission) -> Result<bool> {
        let mut permissions = self.permissions.write().await;
        if permissions.contains_key(&permission.id) {
            return Ok(false);
        }
        permissions.insert(permission.id.clone(), permission);
        Ok(true)
    }

    async fn put(&self, permission: Permission) -> Result<()> {
        let mut permissions = self.permissions.write().await;
        permissions.insert(permission.id.clone(), permission);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Permission>> {
        let permissions = self.permissions.read().await;
        let mut list: Vec<Permission> = permissions.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn replace_all(&self, permissions: Vec<Permission>) -> Result<()> {
        let mut stored = self.permissions.write().await;
        *stored = permissions.into_iter().map(|p| (p.id.clone(), p)).collect();
        Ok(())
    }
}

/// In-memory assignment ledger
#[derive(Default)]
pub struct InMemoryAssignmentRepository {
    assignments: Arc<RwLock<HashMap<UserId, Vec<Assignment>>>>,
}

impl InMemoryAssignmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryAssignmentRepository {
    async fn get(&self, user_id: &str) -> Result<Vec<Assignment>> {
        let assignments = self.assignments.read().await;
        Ok(assignments.get(user_id).cloned().unwrap_or_default())
    }

    async fn upsert(&self, user_id: &str, assignment: Assignment) -> Result<()> {
        let mut assignments = self.assignments.write().await;
        let list = assignments.entry(user_id.to_string()).or_default();
        match list.iter_mut().find(|a| a.role_id == assignment.role_id) {
            Some(existing) => *existing = assignment,
            None => list.push(assignment),
        }
        Ok(())
    }

    async fn remove(&self, user_id: &str, role_id: &str) -> Result<usize> {
        let mut assignments = self.assignments.write().await;
        let Some(list) = assignments.get_mut(user_id) else {
            return Ok(0);
        };

        let before = list.len();
        list.retain(|a| a.role_id != role_id);
        let removed = before - list.len();

        if list.is_empty() {
            assignments.remove(user_id);
        }
        Ok(removed)
    }

    async fn prune(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Assignment>> {
        let mut assignments = self.assignments.write().await;
        let Some(list) = assignments.get_mut(user_id) else {
            return Ok(Vec::new());
        };

        list.retain(|a| a.is_effective(now));
        let survivors = list.clone();

        if list.is_empty() {
            assignments.remove(user_id);
        }
        Ok(survivors)
    }

    async fn count_holders(&self, role_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .values()
            .filter(|list| {
                list.iter()
                    .any(|a| a.role_id == role_id && a.is_effective(now))
            })
            .count())
    }

    async fn users_with_roles(&self, role_ids: &HashSet<RoleId>) -> Result<Vec<UserId>> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .iter()
            .filter(|(_, list)| list.iter().any(|a| role_ids.contains(&a.role_id)))
            .map(|(user, _)| user.clone())
            .collect())
    }

    async fn purge_role(&self, role_id: &str) -> Result<usize> {
        let mut assignments = self.assignments.write().await;
        let mut removed = 0;

        for list in assignments.values_mut() {
            let before = list.len();
            list.retain(|a| a.role_id != role_id);
            removed += before - list.len();
        }
        assignments.retain(|_, list| !list.is_empty());

        Ok(removed)
    }

    async fn all(&self) -> Result<HashMap<UserId, Vec<Assignment>>> {
        let assignments = self.assignments.read().await;
        Ok(assignments.clone())
    }

    async fn replace_all(&self, assignments: HashMap<UserId, Vec<Assignment>>) -> Result<()> {
        let mut stored = self.assignments.write().await;
        *stored = assignments;
        Ok(())
    }
}

/// In-memory user attribute store
#[derive(Default)]
pub struct InMemoryAttributeRepository {
    attributes: Arc<RwLock<HashMap<UserId, UserAttributes>>>,
}

impl InMemoryAttributeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttributeRepository for InMemoryAttributeRepository {
    async fn get(&self, user_id: &str) -> Result<Option<UserAttributes>> {
        let attributes = self.attributes.read().await;
        Ok(attributes.get(user_id).cloned())
    }

    async fn merge(
        &self,
        user_id: &str,
        attributes: serde_json::Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<UserAttributes> {
        let mut stored = self.attributes.write().await;
        let record = stored
            .entry(user_id.to_string())
            .or_insert_with(|| UserAttributes {
                attributes: serde_json::Map::new(),
                updated_at: now,
            });

        record.attributes.extend(attributes);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn all(&self) -> Result<HashMap<UserId, UserAttributes>> {
        let attributes = self.attributes.read().await;
        Ok(attributes.clone())
    }

    async fn replace_all(&self, attributes: HashMap<UserId, UserAttributes>) -> Result<()> {
        let mut stored = self.attributes.write().await;
        *stored = attributes;
        Ok(())
    }
}

/// In-memory audit ring buffer
#[derive(Default)]
pub struct InMemoryAuditRepository {
    entries: Arc<RwLock<VecDeque<AuditEntry>>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, entry: AuditEntry, max_entries: usize) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.push_back(entry);

        while entries.len() > max_entries {
            entries.pop_front();
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().cloned().collect())
    }

    async fn recent(&self, count: usize) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        let skip = entries.len().saturating_sub(count);
        Ok(entries.iter().skip(skip).cloned().collect())
    }

    async fn replace_all(&self, entries: Vec<AuditEntry>) -> Result<()> {
        let mut stored = self.entries.write().await;
        *stored = entries.into();
        Ok(())
    }
}
