//! Permission decisions
//!
//! # Pipeline
//!
//! 1. Check the decision cache
//! 2. Load the user's effective assignments
//! 3. For each assignment on an effective role whose inherited set holds
//!    the permission, evaluate the assignment's and the permission's
//!    conditions against the request context merged with stored attributes
//! 4. Fall back to custom rules bound to the `(user, permission)` pair
//! 5. Cache (a grant no longer than its assignment and role stay valid),
//!    record metrics and history, feed the anomaly detector on denial

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, warn};

use super::{AccessControlEngine, ScopeSummary};
use crate::audit::AuditEventType;
use crate::cache::{instant_at, DecisionKey};
use crate::condition::{evaluate_conditions, merge_context};
use crate::error::{RbacError, Result};
use crate::events::Notification;
use crate::types::{Context, PermissionId};

/// Result of an uncached evaluation
struct Verdict {
    granted: bool,

    /// When the granting assignment or role lapses
    valid_until: Option<DateTime<Utc>>,
}

impl Verdict {
    fn unbounded(granted: bool) -> Self {
        Self {
            granted,
            valid_until: None,
        }
    }
}

impl AccessControlEngine {
    /// Whether a user holds a permission in the given context
    pub async fn has_permission(
        &self,
        user_id: &str,
        permission_id: &str,
        context: &Context,
    ) -> Result<bool> {
        let start = Instant::now();
        let key = DecisionKey::new(user_id, permission_id, context);

        if self.config.enable_cache {
            if let Some(granted) = self.decisions.get(&key) {
                self.metrics.record_cache_hit();
                debug!("Cache hit for ({}, {})", user_id, permission_id);
                self.finish_decision(user_id, permission_id, context, granted, start)
                    .await;
                return Ok(granted);
            }
            self.metrics.record_cache_miss();
        }

        let generation = self.decisions.generation();
        let verdict = match self.evaluate(user_id, permission_id, context).await {
            Ok(verdict) => verdict,
            Err(e) => {
                self.metrics.record_error();
                return Err(e);
            }
        };
        let granted = verdict.granted;

        if self.config.enable_cache {
            let stored = match verdict.valid_until {
                None => self.decisions.insert(key, granted, generation),
                Some(at) => match instant_at(at) {
                    Some(deadline) => self.decisions.insert_until(key, granted, generation, deadline),
                    None => false,
                },
            };
            if !stored {
                debug!("Decision for ({}, {}) not cached", user_id, permission_id);
            }
        }

        self.finish_decision(user_id, permission_id, context, granted, start)
            .await;
        Ok(granted)
    }

    /// Whether the user holds every listed permission
    pub async fn has_all_permissions(
        &self,
        user_id: &str,
        permission_ids: &[&str],
        context: &Context,
    ) -> Result<bool> {
        for permission_id in permission_ids {
            if !self.has_permission(user_id, permission_id, context).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether the user holds at least one listed permission
    pub async fn has_any_permission(
        &self,
        user_id: &str,
        permission_ids: &[&str],
        context: &Context,
    ) -> Result<bool> {
        for permission_id in permission_ids {
            if self.has_permission(user_id, permission_id, context).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every permission the user's roles grant in the given context
    ///
    /// Permissions reachable only through bound custom rules are not
    /// listed.
    pub async fn get_user_effective_permissions(
        &self,
        user_id: &str,
        context: &Context,
    ) -> Result<BTreeSet<PermissionId>> {
        let now = Utc::now();
        let merged = self.merged_context(user_id, context).await?;
        let mut effective = BTreeSet::new();

        for assignment in self.ledger.effective(user_id).await? {
            let Some(role) = self.roles.get(&assignment.role_id).await? else {
                continue;
            };
            if !role.is_effective(now) {
                continue;
            }
            if !evaluate_conditions(&assignment.conditions, &merged, &self.rules) {
                continue;
            }

            for permission_id in self.roles.permissions_of(&role.id, true).await? {
                if effective.contains(&permission_id) {
                    continue;
                }
                let passes = match self.permissions.get(&permission_id).await? {
                    Some(permission) => {
                        evaluate_conditions(&permission.conditions, &merged, &self.rules)
                    }
                    None => true,
                };
                if passes {
                    effective.insert(permission_id);
                }
            }
        }

        Ok(effective)
    }

    /// Whether the user's scopes cover a resource request
    pub async fn can_access_resource(
        &self,
        user_id: &str,
        resource: &str,
        context: &Context,
    ) -> Result<bool> {
        let summary = self.get_user_scope(user_id).await?;
        let allowed = summary.allows(resource, context);
        debug!(
            "Scope check for '{}' on '{}': {}",
            user_id,
            resource,
            if allowed { "ALLOW" } else { "DENY" }
        );
        Ok(allowed)
    }

    /// Summary of where the user's effective roles apply
    pub async fn get_user_scope(&self, user_id: &str) -> Result<ScopeSummary> {
        let user_roles = self.ledger.user_roles(user_id).await?;
        Ok(ScopeSummary::from_user_roles(&user_roles, Utc::now()))
    }

    /// Check a request on behalf of a possibly anonymous caller
    ///
    /// `Unauthenticated` when there is no user, `Forbidden` when the user
    /// lacks the permission.
    pub async fn authorize(
        &self,
        user_id: Option<&str>,
        permission_id: &str,
        context: &Context,
    ) -> Result<()> {
        let user_id = match user_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(RbacError::Unauthenticated),
        };

        if self.has_permission(user_id, permission_id, context).await? {
            Ok(())
        } else {
            Err(RbacError::Forbidden {
                user_id: user_id.to_string(),
                permission_id: permission_id.to_string(),
            })
        }
    }

    async fn evaluate(
        &self,
        user_id: &str,
        permission_id: &str,
        context: &Context,
    ) -> Result<Verdict> {
        let now = Utc::now();
        let merged = self.merged_context(user_id, context).await?;
        let permission = self.permissions.get(permission_id).await?;

        for assignment in self.ledger.effective(user_id).await? {
            let Some(role) = self.roles.get(&assignment.role_id).await? else {
                debug!("Skipping assignment of unknown role '{}'", assignment.role_id);
                continue;
            };
            if !role.is_effective(now) {
                debug!("Role '{}' is inactive or expired", role.id);
                continue;
            }

            let granted = self.roles.permissions_of(&role.id, true).await?;
            if !granted.contains(permission_id) {
                continue;
            }

            if !evaluate_conditions(&assignment.conditions, &merged, &self.rules) {
                debug!("Assignment conditions of '{}' not met", role.id);
                continue;
            }

            if let Some(permission) = &permission {
                if !evaluate_conditions(&permission.conditions, &merged, &self.rules) {
                    debug!("Conditions of permission '{}' not met", permission_id);
                    continue;
                }
                if permission.deprecated {
                    warn!(
                        "Granting deprecated permission '{}' to '{}'",
                        permission_id, user_id
                    );
                }
            }

            debug!("'{}' granted '{}' via role '{}'", user_id, permission_id, role.id);
            return Ok(Verdict {
                granted: true,
                valid_until: [assignment.expires_at, role.expires_at]
                    .into_iter()
                    .flatten()
                    .min(),
            });
        }

        if self.rules.evaluate_bound(user_id, permission_id, &merged) {
            debug!("'{}' granted '{}' by custom rule", user_id, permission_id);
            return Ok(Verdict::unbounded(true));
        }

        Ok(Verdict::unbounded(false))
    }

    async fn merged_context(&self, user_id: &str, context: &Context) -> Result<Context> {
        let stored = self.ledger.attributes(user_id).await?;
        Ok(merge_context(context, stored.as_ref().map(|s| &s.attributes)))
    }

    async fn finish_decision(
        &self,
        user_id: &str,
        permission_id: &str,
        context: &Context,
        granted: bool,
        start: Instant,
    ) {
        self.metrics.record_decision(granted);
        self.metrics.record_latency(start.elapsed()).await;
        self.history.record(user_id, permission_id, granted, context);

        if granted || !self.config.enable_anomaly {
            return;
        }

        if let Some(denied_attempts) = self.anomalies.record_denial(user_id, permission_id) {
            warn!(
                "Anomaly: user '{}' reached {} denied attempts (last: '{}')",
                user_id, denied_attempts, permission_id
            );
            self.metrics.record_anomaly();
            self.audit
                .log(
                    AuditEventType::AnomalyDetected,
                    json!({
                        "userId": user_id,
                        "deniedAttempts": denied_attempts,
                        "permissionId": permission_id,
                    }),
                )
                .await;
            self.events.publish(Notification::AnomalyDetected {
                user_id: user_id.to_string(),
                denied_attempts,
                permission_id: permission_id.to_string(),
            });
        }
    }
}
