//! Access control engine
//!
//! Ties the stores, the decision cache, the audit log and the anomaly
//! detector together behind one `Send + Sync` facade.
//!
//! # Architecture
//!
//! ```text
//! has_permission → DecisionCache ─hit──────────────────────────┐
//!                      │ miss                                  ↓
//!                      ↓                                 [History/Metrics]
//!                AssignmentLedger → RoleStore → Conditions     ↓
//!                                     (resolution cache)  AnomalyDetector → AuditLog
//! ```
//!
//! Every mutation runs under a single write lock, then invalidates the
//! affected cache entries, records an audit entry and publishes a
//! notification.

mod admin;
pub mod decision;
pub mod history;
pub mod metrics;
pub mod scope;
pub mod snapshot;

pub use history::AccessHistory;
pub use metrics::{EngineMetrics, MetricsCollector};
pub use scope::ScopeSummary;
pub use snapshot::Snapshot;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::audit::{
    AnomalyDetector, AnomalyReportEntry, AuditEntry, AuditFilter, AuditLog,
};
use crate::cache::{CacheStats, DecisionCache};
use crate::config::EngineConfig;
use crate::error::{RbacError, Result};
use crate::events::{EventBus, Notification};
use crate::ledger::AssignmentLedger;
use crate::permissions::PermissionStore;
use crate::roles::RoleStore;
use crate::rules::RuleRegistry;
use crate::store::Repositories;
use crate::types::{AccessAttempt, Context, RoleId};

/// RBAC/ABAC access control engine
pub struct AccessControlEngine {
    config: EngineConfig,

    roles: RoleStore,
    permissions: PermissionStore,
    ledger: AssignmentLedger,

    audit: AuditLog,
    anomalies: AnomalyDetector,
    rules: RuleRegistry,

    decisions: DecisionCache,
    history: AccessHistory,
    metrics: MetricsCollector,
    events: EventBus,

    /// Serializes every mutation
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl AccessControlEngine {
    /// Create an engine backed by in-memory repositories
    pub async fn new(config: EngineConfig) -> Result<Self> {
        Self::with_repositories(config, Repositories::in_memory()).await
    }

    /// Create an engine on top of the given repositories
    ///
    /// Seeds the built-in role chain when `seed_system_roles` is set.
    pub async fn with_repositories(config: EngineConfig, repos: Repositories) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.notification_capacity);
        let engine = Self {
            roles: RoleStore::new(
                repos.roles.clone(),
                repos.permissions.clone(),
                config.enable_cache,
                config.cache_ttl(),
                config.cache_capacity,
            ),
            permissions: PermissionStore::new(repos.permissions.clone()),
            ledger: AssignmentLedger::new(
                repos.assignments.clone(),
                repos.attributes.clone(),
                repos.roles.clone(),
            ),
            audit: AuditLog::new(
                repos.audit.clone(),
                events.clone(),
                config.enable_audit,
                config.max_audit_entries,
            ),
            anomalies: AnomalyDetector::new(config.anomaly_threshold, config.anomaly_cooldown()),
            rules: RuleRegistry::new(),
            decisions: DecisionCache::new(config.cache_ttl(), config.cache_capacity),
            history: AccessHistory::new(config.history_limit),
            metrics: MetricsCollector::new(),
            events,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            config,
        };

        if engine.config.seed_system_roles {
            engine.roles.seed_system_roles().await?;
        }

        info!(
            "AccessControlEngine initialized with cache={}, audit={}, anomaly={}",
            engine.config.enable_cache, engine.config.enable_audit, engine.config.enable_anomaly
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to engine notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// Register (or replace) a named rule
    ///
    /// Cached decisions are dropped since a replaced rule may decide
    /// differently.
    pub fn register_rule<F>(&self, name: impl Into<String>, rule: F)
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.rules.register(name, rule);
        self.decisions.clear();
    }

    /// Remove a named rule
    pub fn unregister_rule(&self, name: &str) -> bool {
        let removed = self.rules.unregister(name);
        if removed {
            self.decisions.clear();
        }
        removed
    }

    /// Bind a registered rule to a `(user, permission)` pair
    pub fn bind_custom_rule(&self, user_id: &str, permission_id: &str, rule_name: &str) -> Result<()> {
        self.ensure_open()?;
        self.rules.bind(user_id, permission_id, rule_name)?;
        self.decisions.invalidate_user(user_id);
        debug!(
            "Bound rule '{}' to ({}, {})",
            rule_name, user_id, permission_id
        );
        Ok(())
    }

    /// Drop every rule bound to a `(user, permission)` pair
    pub fn unbind_custom_rules(&self, user_id: &str, permission_id: &str) -> usize {
        let removed = self.rules.unbind(user_id, permission_id);
        if removed > 0 {
            self.decisions.invalidate_user(user_id);
        }
        removed
    }

    /// A user's recent decisions, oldest first
    pub fn get_access_history(&self, user_id: &str) -> Vec<AccessAttempt> {
        self.history.get(user_id)
    }

    /// Query the audit log
    pub async fn get_audit_log(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.audit.query(filter).await
    }

    /// Users with outstanding denials, most denials first
    pub fn get_anomaly_report(&self) -> Vec<AnomalyReportEntry> {
        self.anomalies.report()
    }

    /// Decision cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.decisions.stats()
    }

    pub async fn metrics(&self) -> EngineMetrics {
        self.metrics.get_metrics().await
    }

    /// Metrics in Prometheus text format
    pub async fn export_metrics(&self) -> String {
        self.metrics.export_prometheus().await
    }

    /// Close the engine
    ///
    /// Later mutations fail with `ShutDown`. Caches, history and anomaly
    /// records are dropped; stored data is left untouched.
    pub async fn shutdown(&self) {
        let _guard = self.write_lock.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.clear_runtime_state();
        info!("AccessControlEngine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop both caches, access history and anomaly records
    fn clear_runtime_state(&self) {
        self.decisions.clear();
        self.roles.clear_cache();
        self.history.clear();
        self.anomalies.clear();
    }

    /// Take the write lock for a mutation
    async fn begin_write(&self) -> Result<MutexGuard<'_, ()>> {
        let guard = self.write_lock.lock().await;
        self.ensure_open()?;
        Ok(guard)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(RbacError::ShutDown);
        }
        Ok(())
    }

    /// Invalidate everything derived from a role and the roles below it
    async fn invalidate_role(&self, role_id: &str) -> Result<()> {
        let affected = self.roles.descendants(role_id).await?;
        self.invalidate_roles(&affected).await
    }

    async fn invalidate_roles(&self, affected: &HashSet<RoleId>) -> Result<()> {
        self.roles.invalidate(affected);

        let users = self.ledger.users_with_roles(affected).await?;
        for user_id in &users {
            self.decisions.invalidate_user(user_id);
        }
        debug!(
            "Invalidated {} role(s) affecting {} user(s)",
            affected.len(),
            users.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_seeds_system_roles() {
        let engine = AccessControlEngine::new(EngineConfig::default()).await.unwrap();
        let roles = engine.get_all_roles().await.unwrap();
        let ids: Vec<&str> = roles.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["guest", "user", "manager", "admin", "super_admin"]);
    }

    #[tokio::test]
    async fn test_seeding_can_be_disabled() {
        let config = EngineConfig {
            seed_system_roles: false,
            ..Default::default()
        };
        let engine = AccessControlEngine::new(config).await.unwrap();
        assert!(engine.get_all_roles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = EngineConfig {
            cache_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            AccessControlEngine::new(config).await,
            Err(RbacError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_blocks_mutations() {
        let engine = AccessControlEngine::new(EngineConfig::default()).await.unwrap();
        engine.shutdown().await;
        engine.shutdown().await;

        assert!(engine.is_shut_down());
        let err = engine
            .create_role("late", crate::types::RoleConfig::new("Late"))
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::ShutDown));
        assert!(engine.get_role("guest").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bind_unknown_rule() {
        let engine = AccessControlEngine::new(EngineConfig::default()).await.unwrap();
        assert!(matches!(
            engine.bind_custom_rule("u1", "p1", "missing"),
            Err(RbacError::InvalidInput(_))
        ));
    }
}
