//! Scope summary of a user's effective assignments

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::types::{Context, ScopeData, ScopeKind, UserRole};

/// Where a user's grants apply
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSummary {
    pub global: bool,
    pub departments: BTreeSet<String>,
    pub teams: BTreeSet<String>,
    pub resources: BTreeSet<String>,

    /// Remaining scope data keys, later assignments overriding earlier ones
    pub custom: ScopeData,
}

impl ScopeSummary {
    /// Fold the scopes of a user's effective roles
    ///
    /// The assignment's scope wins over its role's; inactive or expired
    /// roles are skipped.
    pub fn from_user_roles(user_roles: &[UserRole], now: chrono::DateTime<chrono::Utc>) -> Self {
        let mut summary = Self::default();

        for UserRole { assignment, role } in user_roles {
            if !role.is_effective(now) {
                continue;
            }

            let (kind, data) = match assignment.scope {
                Some(kind) => (kind, &assignment.scope_data),
                None => (role.scope, &role.scope_data),
            };

            if kind == ScopeKind::Global {
                summary.global = true;
            }
            summary.absorb(data);
        }

        summary
    }

    /// Whether a resource request falls inside the summarised scope
    pub fn allows(&self, resource: &str, context: &Context) -> bool {
        if self.global {
            return true;
        }

        let in_department = context
            .get("department")
            .and_then(Value::as_str)
            .map_or(false, |d| self.departments.contains(d));
        let in_team = context
            .get("team")
            .and_then(Value::as_str)
            .map_or(false, |t| self.teams.contains(t));

        in_department || in_team || self.resources.contains(resource)
    }

    fn absorb(&mut self, data: &ScopeData) {
        for (key, value) in data {
            match key.as_str() {
                "department" | "departments" => collect_ids(value, &mut self.departments),
                "team" | "teams" => collect_ids(value, &mut self.teams),
                "resources" => collect_ids(value, &mut self.resources),
                _ => {
                    self.custom.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Accept a single id or an array of ids
fn collect_ids(value: &Value, into: &mut BTreeSet<String>) {
    match value {
        Value::String(id) => {
            into.insert(id.clone());
        }
        Value::Array(ids) => {
            into.extend(ids.iter().filter_map(Value::as_str).map(str::to_string));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Assignment, Role};
    use chrono::Utc;
    use serde_json::json;

    fn user_role(role_scope: ScopeKind, assignment_scope: Option<ScopeKind>, data: Value) -> UserRole {
        let now = Utc::now();
        let data = data.as_object().cloned().unwrap_or_default();
        UserRole {
            assignment: Assignment {
                role_id: "r".to_string(),
                assigned_at: now,
                assigned_by: "test".to_string(),
                expires_at: None,
                scope: assignment_scope,
                scope_data: if assignment_scope.is_some() { data.clone() } else { ScopeData::new() },
                conditions: Default::default(),
                is_active: true,
                metadata: Default::default(),
            },
            role: Role {
                id: "r".to_string(),
                name: "r".to_string(),
                description: String::new(),
                permissions: Default::default(),
                parent_role: None,
                children: Default::default(),
                level: 0,
                is_active: true,
                is_system: false,
                scope: role_scope,
                scope_data: if assignment_scope.is_none() { data } else { ScopeData::new() },
                expires_at: None,
                max_users: None,
                created_at: now,
                updated_at: now,
                created_by: "test".to_string(),
            },
        }
    }

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_global_role_allows_everything() {
        let summary = ScopeSummary::from_user_roles(
            &[user_role(ScopeKind::Global, None, json!({}))],
            Utc::now(),
        );
        assert!(summary.allows("anything", &Context::new()));
    }

    #[test]
    fn test_department_scope_from_assignment() {
        let summary = ScopeSummary::from_user_roles(
            &[user_role(
                ScopeKind::Global,
                Some(ScopeKind::Department),
                json!({ "departments": ["finance", "hr"], "region": "north" }),
            )],
            Utc::now(),
        );

        assert!(!summary.global);
        assert!(summary.allows("ledger", &ctx(&[("department", json!("hr"))])));
        assert!(!summary.allows("ledger", &ctx(&[("department", json!("it"))])));
        assert_eq!(summary.custom["region"], json!("north"));
    }

    #[test]
    fn test_team_and_resource_lists() {
        let summary = ScopeSummary::from_user_roles(
            &[user_role(
                ScopeKind::Team,
                None,
                json!({ "team": "billing", "resources": ["invoice-42"] }),
            )],
            Utc::now(),
        );

        assert!(summary.allows("x", &ctx(&[("team", json!("billing"))])));
        assert!(summary.allows("invoice-42", &Context::new()));
        assert!(!summary.allows("invoice-43", &Context::new()));
    }

    #[test]
    fn test_inactive_role_ignored() {
        let mut inactive = user_role(ScopeKind::Global, None, json!({}));
        inactive.role.is_active = false;

        let summary = ScopeSummary::from_user_roles(&[inactive], Utc::now());
        assert!(!summary.allows("anything", &Context::new()));
    }
}
