//! Notifications published to host subscribers
//!
//! Every mutation of the stores and every anomaly is announced on a
//! broadcast channel. Hosts subscribe for side effects such as persistence
//! or alerting; a send with no subscribers is not an error.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::audit::AuditEntry;
use crate::types::{Assignment, Permission, Role};

/// Notification event
///
/// Serialized with an `event` tag carrying the event name
/// (`roleCreated`, `anomalyDetected`, ...).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Notification {
    RoleCreated {
        role: Role,
    },
    RoleUpdated {
        role: Role,
        changes: Vec<String>,
    },
    RoleDeleted {
        role_id: String,
    },
    PermissionCreated {
        permission: Permission,
    },
    PermissionAssigned {
        role_id: String,
        permission_id: String,
    },
    PermissionRemoved {
        role_id: String,
        permission_id: String,
    },
    RoleAssigned {
        user_id: String,
        role_id: String,
        assignment: Assignment,
    },
    RoleRemoved {
        user_id: String,
        role_id: String,
    },
    AuditEvent {
        entry: AuditEntry,
    },
    AnomalyDetected {
        user_id: String,
        denied_attempts: u32,
        permission_id: String,
    },
}

impl Notification {
    /// Event name as seen by subscribers
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoleCreated { .. } => "roleCreated",
            Self::RoleUpdated { .. } => "roleUpdated",
            Self::RoleDeleted { .. } => "roleDeleted",
            Self::PermissionCreated { .. } => "permissionCreated",
            Self::PermissionAssigned { .. } => "permissionAssigned",
            Self::PermissionRemoved { .. } => "permissionRemoved",
            Self::RoleAssigned { .. } => "roleAssigned",
            Self::RoleRemoved { .. } => "roleRemoved",
            Self::AuditEvent { .. } => "auditEvent",
            Self::AnomalyDetected { .. } => "anomalyDetected",
        }
    }
}

/// Broadcast channel for notifications
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` notifications per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publish a notification
    pub fn publish(&self, notification: Notification) {
        let name = notification.name();
        match self.sender.send(notification) {
            Ok(receivers) => trace!("Published {} to {} subscriber(s)", name, receivers),
            Err(_) => trace!("Published {} with no subscribers", name),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        bus.publish(Notification::RoleDeleted {
            role_id: "temp".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(Notification::RoleRemoved {
            user_id: "u1".to_string(),
            role_id: "nurse".to_string(),
        });
        bus.publish(Notification::RoleDeleted {
            role_id: "nurse".to_string(),
        });

        assert_eq!(rx.recv().await.unwrap().name(), "roleRemoved");
        assert_eq!(rx.recv().await.unwrap().name(), "roleDeleted");
    }

    #[test]
    fn test_wire_format() {
        let value = serde_json::to_value(Notification::AnomalyDetected {
            user_id: "u1".to_string(),
            denied_attempts: 3,
            permission_id: "billing.export".to_string(),
        })
        .unwrap();

        assert_eq!(
            value,
            json!({
                "event": "anomalyDetected",
                "userId": "u1",
                "deniedAttempts": 3,
                "permissionId": "billing.export"
            })
        );
    }
}
