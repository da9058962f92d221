//! JSON snapshot export and import

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use super::AccessControlEngine;
use crate::audit::{AuditEntry, AuditEventType};
use crate::error::{RbacError, Result};
use crate::roles::RoleGraph;
use crate::types::{Assignment, Permission, Role, UserAttributes, UserId};

/// Audit entries carried by an export
pub const EXPORTED_AUDIT_ENTRIES: usize = 1_000;

/// Full engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,

    #[serde(default)]
    pub assignments: HashMap<UserId, Vec<Assignment>>,

    #[serde(default)]
    pub user_attributes: HashMap<UserId, UserAttributes>,

    /// Most recent audit entries, oldest first
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,

    pub exported_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a snapshot file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RbacError::Storage(format!("failed to read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// Write a snapshot file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?).map_err(|e| {
            RbacError::Storage(format!("failed to write {}: {}", path.as_ref().display(), e))
        })
    }

    /// Reject duplicate ids and cyclic hierarchies before anything is written
    fn validate(&self) -> Result<()> {
        let mut role_ids = HashSet::new();
        for role in &self.roles {
            if !role_ids.insert(role.id.as_str()) {
                return Err(RbacError::DuplicateRole(role.id.clone()));
            }
        }

        let mut permission_ids = HashSet::new();
        for permission in &self.permissions {
            if !permission_ids.insert(permission.id.as_str()) {
                return Err(RbacError::DuplicatePermission(permission.id.clone()));
            }
        }

        RoleGraph::from_roles(&self.roles).detect_cycle()
    }
}

impl AccessControlEngine {
    /// Export the full state
    pub async fn export_data(&self) -> Result<Snapshot> {
        let _guard = self.write_lock.lock().await;

        Ok(Snapshot {
            roles: self.roles.list().await?,
            permissions: self.permissions.list().await?,
            assignments: self.ledger.all_assignments().await?,
            user_attributes: self.ledger.all_attributes().await?,
            audit_log: self.audit.recent(EXPORTED_AUDIT_ENTRIES).await?,
            exported_at: Utc::now(),
        })
    }

    /// Replace the full state with a snapshot
    ///
    /// Role `children` are recomputed from the parent links. Caches, access
    /// history, anomaly records and custom-rule bindings from before the
    /// import are dropped; registered rules stay. A snapshot with a cyclic
    /// hierarchy or duplicate ids is rejected without touching the current
    /// state.
    pub async fn import_data(&self, snapshot: Snapshot) -> Result<()> {
        let _guard = self.begin_write().await?;
        snapshot.validate()?;

        let role_count = snapshot.roles.len();
        let permission_count = snapshot.permissions.len();
        let user_count = snapshot.assignments.len();

        self.roles.replace_all(snapshot.roles).await?;
        self.permissions.replace_all(snapshot.permissions).await?;
        self.ledger
            .replace_all(snapshot.assignments, snapshot.user_attributes)
            .await?;
        self.audit.replace(snapshot.audit_log).await?;

        self.rules.clear_bindings();
        self.clear_runtime_state();

        info!(
            "Imported {} role(s), {} permission(s), {} user(s) from snapshot of {}",
            role_count, permission_count, user_count, snapshot.exported_at
        );
        self.audit
            .log(
                AuditEventType::DataImported,
                json!({
                    "roles": role_count,
                    "permissions": permission_count,
                    "users": user_count,
                    "exportedAt": snapshot.exported_at,
                }),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{AssignmentConfig, Context, PermissionConfig, RoleConfig};

    async fn populated() -> AccessControlEngine {
        let engine = AccessControlEngine::new(EngineConfig::default()).await.unwrap();
        engine
            .create_permission("report.read", PermissionConfig::new("report", "read"))
            .await
            .unwrap();
        engine
            .create_role(
                "reader",
                RoleConfig::new("Reader")
                    .with_parent("user")
                    .with_permissions(["report.read"]),
            )
            .await
            .unwrap();
        engine
            .assign_role_to_user("alice", "reader", AssignmentConfig::default())
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let source = populated().await;
        let snapshot = source.export_data().await.unwrap();
        assert_eq!(snapshot.roles.len(), 6);
        assert_eq!(snapshot.assignments["alice"].len(), 1);

        let json = snapshot.to_json().unwrap();
        let restored = Snapshot::from_json(&json).unwrap();

        let target = AccessControlEngine::new(EngineConfig::default()).await.unwrap();
        target.import_data(restored).await.unwrap();

        assert!(target
            .has_permission("alice", "report.read", &Context::new())
            .await
            .unwrap());
        let user = target.get_role("user").await.unwrap().unwrap();
        assert!(user.children.contains("reader"));
    }

    #[tokio::test]
    async fn test_import_rejects_cycle_and_keeps_state() {
        let engine = populated().await;
        let mut snapshot = engine.export_data().await.unwrap();
        for role in snapshot.roles.iter_mut() {
            if role.id == "guest" {
                role.parent_role = Some("reader".to_string());
            }
        }
        snapshot.permissions.clear();

        let err = engine.import_data(snapshot).await.unwrap_err();
        assert!(matches!(err, RbacError::HierarchyCycle(_)));
        assert_eq!(engine.get_all_permissions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_drops_runtime_state() {
        let engine = populated().await;
        let snapshot = engine.export_data().await.unwrap();

        engine.register_rule("always", |_: &Context| true);
        engine.bind_custom_rule("bob", "report.read", "always").unwrap();
        let empty = Context::new();
        assert!(engine.has_permission("bob", "report.read", &empty).await.unwrap());
        assert!(!engine.has_permission("mallory", "vault.open", &empty).await.unwrap());
        assert!(!engine.get_access_history("bob").is_empty());
        assert_eq!(engine.get_anomaly_report().len(), 1);

        engine.import_data(snapshot).await.unwrap();

        assert!(engine.get_access_history("bob").is_empty());
        assert!(engine.get_anomaly_report().is_empty());
        assert_eq!(engine.cache_stats().entries, 0);
        assert!(!engine.has_permission("bob", "report.read", &empty).await.unwrap());

        // The rule itself is still registered and can be bound again
        engine.bind_custom_rule("bob", "report.read", "always").unwrap();
        assert!(engine.has_permission("bob", "report.read", &empty).await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_file() {
        let engine = populated().await;
        let snapshot = engine.export_data().await.unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        snapshot.save(file.path()).unwrap();
        assert_eq!(Snapshot::load(file.path()).unwrap(), snapshot);
    }
}
