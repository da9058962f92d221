//! Audit trail for access control mutations and anomalies
//!
//! - **Append-only**: entries are only ever added, in call order
//! - **Bounded**: the repository keeps the most recent `max_audit_entries`
//! - **Severity tagged**: a fixed table maps each event type to a severity
//! - **Best effort**: logging never fails the operation that triggered it

pub mod anomaly;

pub use anomaly::{AnomalyDetector, AnomalyRecord, AnomalyReportEntry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::{EventBus, Notification};
use crate::store::AuditRepository;

/// Types of events recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    PermissionCreated,
    PermissionDeprecated,
    PermissionAssigned,
    PermissionRemoved,
    RoleAssigned,
    RoleRemoved,
    UserAttributesUpdated,
    AnomalyDetected,
    DataImported,
}

impl AuditEventType {
    /// Fixed severity table
    pub fn severity(self) -> Severity {
        match self {
            Self::RoleDeleted | Self::AnomalyDetected | Self::DataImported => Severity::High,
            Self::RoleCreated
            | Self::RoleUpdated
            | Self::RoleAssigned
            | Self::RoleRemoved
            | Self::PermissionRemoved
            | Self::PermissionDeprecated => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// Audit entry severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: String,

    pub timestamp: DateTime<Utc>,

    #[serde(rename = "type")]
    pub event_type: AuditEventType,

    pub payload: Value,

    pub severity: Severity,
}

/// Audit log query; every set field must match
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<AuditEventType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub severity: Option<Severity>,

    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check a single entry against the filter (limit excluded)
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.event_type.map_or(true, |t| entry.event_type == t)
            && self.since.map_or(true, |since| entry.timestamp >= since)
            && self.until.map_or(true, |until| entry.timestamp <= until)
            && self.severity.map_or(true, |s| entry.severity == s)
    }
}

/// Audit log backed by an [`AuditRepository`]
pub struct AuditLog {
    repository: Arc<dyn AuditRepository>,
    events: EventBus,
    enabled: bool,
    max_entries: usize,
}

impl AuditLog {
    /// Create a new audit log
    pub fn new(
        repository: Arc<dyn AuditRepository>,
        events: EventBus,
        enabled: bool,
        max_entries: usize,
    ) -> Self {
        Self {
            repository,
            events,
            enabled,
            max_entries,
        }
    }

    /// Record an event
    ///
    /// No-op when auditing is disabled. Storage failures are logged and
    /// swallowed.
    pub async fn log(&self, event_type: AuditEventType, payload: Value) {
        if !self.enabled {
            return;
        }

        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            payload,
            severity: event_type.severity(),
        };

        if let Err(e) = self.repository.append(entry.clone(), self.max_entries).await {
            warn!("Failed to record audit event {:?}: {}", event_type, e);
            return;
        }

        debug!("Audit event recorded: {:?} ({:?})", event_type, entry.severity);
        self.events.publish(Notification::AuditEvent { entry });
    }

    /// Query the log; results are oldest first
    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .collect();

        if let Some(limit) = filter.limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }

        Ok(entries)
    }

    /// The `count` most recent entries
    pub async fn recent(&self, count: usize) -> Result<Vec<AuditEntry>> {
        self.repository.recent(count).await
    }

    /// Replace the stored log, keeping at most `max_entries`
    pub async fn replace(&self, mut entries: Vec<AuditEntry>) -> Result<()> {
        let skip = entries.len().saturating_sub(self.max_entries);
        entries.drain(..skip);
        self.repository.replace_all(entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAuditRepository;
    use chrono::Duration;
    use serde_json::json;

    fn audit_log(enabled: bool, max_entries: usize) -> (AuditLog, EventBus) {
        let bus = EventBus::new(64);
        let log = AuditLog::new(
            Arc::new(InMemoryAuditRepository::new()),
            bus.clone(),
            enabled,
            max_entries,
        );
        (log, bus)
    }

    #[test]
    fn test_severity_table() {
        assert_eq!(AuditEventType::RoleDeleted.severity(), Severity::High);
        assert_eq!(AuditEventType::AnomalyDetected.severity(), Severity::High);
        assert_eq!(AuditEventType::PermissionAssigned.severity(), Severity::Low);
        assert_eq!(AuditEventType::UserAttributesUpdated.severity(), Severity::Low);
        assert_eq!(AuditEventType::RoleAssigned.severity(), Severity::Medium);
    }

    #[tokio::test]
    async fn test_disabled_log_is_noop() {
        let (log, bus) = audit_log(false, 10);
        let mut rx = bus.subscribe();

        log.log(AuditEventType::RoleCreated, json!({ "roleId": "x" })).await;

        assert!(log.query(&AuditFilter::new()).await.unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_log_publishes_audit_event() {
        let (log, bus) = audit_log(true, 10);
        let mut rx = bus.subscribe();

        log.log(AuditEventType::RoleDeleted, json!({ "roleId": "x" })).await;

        match rx.recv().await.unwrap() {
            Notification::AuditEvent { entry } => {
                assert_eq!(entry.event_type, AuditEventType::RoleDeleted);
                assert_eq!(entry.severity, Severity::High);
            }
            other => panic!("unexpected notification: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_filters_combine_with_and() {
        let (log, _bus) = audit_log(true, 100);
        let start = Utc::now() - Duration::seconds(1);

        log.log(AuditEventType::RoleCreated, json!({})).await;
        log.log(AuditEventType::RoleDeleted, json!({})).await;
        log.log(AuditEventType::PermissionAssigned, json!({})).await;
        log.log(AuditEventType::RoleDeleted, json!({})).await;

        let high = log
            .query(&AuditFilter::new().severity(Severity::High))
            .await
            .unwrap();
        assert_eq!(high.len(), 2);

        let deleted_limited = log
            .query(
                &AuditFilter::new()
                    .event_type(AuditEventType::RoleDeleted)
                    .since(start)
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(deleted_limited.len(), 1);

        let future = log
            .query(&AuditFilter::new().since(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        assert!(future.is_empty());
    }

    #[tokio::test]
    async fn test_ring_buffer_bound() {
        let (log, _bus) = audit_log(true, 5);

        for i in 0..12 {
            log.log(AuditEventType::RoleCreated, json!({ "n": i })).await;
        }

        let entries = log.query(&AuditFilter::new()).await.unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].payload["n"], 7);
        assert_eq!(entries[4].payload["n"], 11);
    }
}
