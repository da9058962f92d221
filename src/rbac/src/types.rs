//! Core access control types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Unique role identifier
pub type RoleId = String;

/// Unique permission identifier
pub type PermissionId = String;

/// Unique user identifier
pub type UserId = String;

/// Free-form request context (department, team, custom attributes)
pub type Context = HashMap<String, Value>;

/// Free-form scope qualifiers attached to roles and assignments
pub type ScopeData = serde_json::Map<String, Value>;

/// Attribute-name → expected value map evaluated at decision time
pub type ConditionMap = BTreeMap<String, Condition>;

/// Where a role or assignment grant applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    #[default]
    Global,
    Department,
    Team,
}

/// Risk classification shared by permissions and anomaly reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Expected value of a single ABAC condition
///
/// Deserialized untagged, so a condition map reads naturally in JSON:
///
/// ```json
/// {
///   "department": "finance",
///   "team": ["billing", "payroll"],
///   "shift": { "rule": "business_hours" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// Delegate to a predicate registered in the rule registry
    Rule { rule: String },

    /// Actual value must be one of the listed values
    OneOf(Vec<Value>),

    /// Actual value must equal the expected value (or contain it, when the
    /// actual value is an array)
    Equals(Value),
}

impl Condition {
    /// Equality condition from anything convertible to JSON
    pub fn equals(value: impl Into<Value>) -> Self {
        Self::Equals(value.into())
    }

    /// Membership condition
    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// Named rule condition
    pub fn rule(name: impl Into<String>) -> Self {
        Self::Rule { rule: name.into() }
    }
}

/// Role definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Unique role identifier (e.g., "therapist")
    pub id: RoleId,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Directly granted permission ids
    #[serde(default)]
    pub permissions: BTreeSet<PermissionId>,

    /// Single parent in the hierarchy
    #[serde(default)]
    pub parent_role: Option<RoleId>,

    /// Derived from other roles' `parent_role`, kept in sync by the store
    #[serde(default)]
    pub children: BTreeSet<RoleId>,

    /// Informational privilege ordering
    #[serde(default)]
    pub level: i32,

    pub is_active: bool,

    /// Protected roles cannot be changed without an explicit override
    #[serde(default)]
    pub is_system: bool,

    #[serde(default)]
    pub scope: ScopeKind,

    #[serde(default)]
    pub scope_data: ScopeData,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Maximum number of distinct users holding the role
    #[serde(default)]
    pub max_users: Option<usize>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub created_by: String,
}

impl Role {
    /// Whether the role's activation window has closed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// Active and not expired
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }
}

/// Parameters for creating a role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleConfig {
    pub name: String,
    pub description: String,
    pub permissions: Vec<PermissionId>,
    pub parent_role: Option<RoleId>,
    pub level: i32,
    pub is_active: bool,
    pub is_system: bool,
    pub scope: ScopeKind,
    pub scope_data: ScopeData,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_users: Option<usize>,
    pub created_by: String,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            permissions: Vec::new(),
            parent_role: None,
            level: 0,
            is_active: true,
            is_system: false,
            scope: ScopeKind::Global,
            scope_data: ScopeData::new(),
            expires_at: None,
            max_users: None,
            created_by: "system".to_string(),
        }
    }
}

impl RoleConfig {
    /// Create a role configuration with a display name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_role = Some(parent.into());
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn with_scope(mut self, scope: ScopeKind, data: ScopeData) -> Self {
        self.scope = scope;
        self.scope_data = data;
        self
    }

    pub fn with_max_users(mut self, max_users: usize) -> Self {
        self.max_users = Some(max_users);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = actor.into();
        self
    }
}

/// Partial update of a role's mutable fields
#[derive(Debug, Clone, Default)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub level: Option<i32>,
    pub is_active: Option<bool>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub max_users: Option<Option<usize>>,

    /// Required to modify a system role
    pub allow_system_override: bool,
}

impl RoleUpdate {
    /// Fields of the update that are set, for audit payloads
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.level.is_some() {
            fields.push("level");
        }
        if self.is_active.is_some() {
            fields.push("isActive");
        }
        if self.expires_at.is_some() {
            fields.push("expiresAt");
        }
        if self.max_users.is_some() {
            fields.push("maxUsers");
        }
        fields
    }
}

/// Permission definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Resource name (e.g., "report", "medical_record")
    pub resource: String,

    /// Action name (e.g., "read", "approve")
    pub action: String,

    /// Conditions every grant of this permission must satisfy
    #[serde(default)]
    pub conditions: ConditionMap,

    #[serde(default)]
    pub scope: ScopeKind,

    #[serde(default)]
    pub risk_level: RiskLevel,

    pub is_active: bool,

    #[serde(default)]
    pub deprecated: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a permission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionConfig {
    pub name: String,
    pub description: String,
    pub resource: String,
    pub action: String,
    pub conditions: ConditionMap,
    pub scope: ScopeKind,
    pub risk_level: RiskLevel,
}

impl PermissionConfig {
    /// Create a permission configuration for `action` on `resource`
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        let resource = resource.into();
        let action = action.into();

        Self {
            name: format!("{}:{}", resource, action),
            resource,
            action,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(key.into(), condition);
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_scope(mut self, scope: ScopeKind) -> Self {
        self.scope = scope;
        self
    }
}

/// Binding of a role to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub role_id: RoleId,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: String,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Overrides the role's scope when set
    #[serde(default)]
    pub scope: Option<ScopeKind>,

    #[serde(default)]
    pub scope_data: ScopeData,

    #[serde(default)]
    pub conditions: ConditionMap,

    pub is_active: bool,

    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl Assignment {
    /// Active and not expired
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Parameters for assigning a role to a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssignmentConfig {
    pub assigned_by: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<ScopeKind>,
    pub scope_data: ScopeData,
    pub conditions: ConditionMap,
    pub metadata: serde_json::Map<String, Value>,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            assigned_by: "system".to_string(),
            expires_at: None,
            scope: None,
            scope_data: ScopeData::new(),
            conditions: ConditionMap::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

impl AssignmentConfig {
    pub fn assigned_by(mut self, actor: impl Into<String>) -> Self {
        self.assigned_by = actor.into();
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_scope(mut self, scope: ScopeKind, data: ScopeData) -> Self {
        self.scope = Some(scope);
        self.scope_data = data;
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(key.into(), condition);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Stored ABAC attributes of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAttributes {
    pub attributes: serde_json::Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// Effective assignment joined with its role
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRole {
    pub assignment: Assignment,
    pub role: Role,
}

/// One entry of a user's access history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessAttempt {
    pub permission_id: PermissionId,
    pub granted: bool,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub context: Context,
}
