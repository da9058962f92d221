//! Error types for the access control engine

use thiserror::Error;

/// Access control engine errors
#[derive(Debug, Error)]
pub enum RbacError {
    /// A role with this id already exists
    #[error("Role already exists: {0}")]
    DuplicateRole(String),

    /// A permission with this id already exists
    #[error("Permission already exists: {0}")]
    DuplicatePermission(String),

    /// Role not found
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// Permission not found
    #[error("Permission not found: {0}")]
    PermissionNotFound(String),

    /// Mutation attempted on a system role without override
    #[error("Role '{0}' is a protected system role")]
    ProtectedRole(String),

    /// Role still referenced by effective assignments
    #[error("Role '{role_id}' is assigned to {assignments} user(s)")]
    RoleInUse { role_id: String, assignments: usize },

    /// Role has reached its maximum number of assignees
    #[error("Role '{role_id}' has reached its capacity of {max_users} user(s)")]
    RoleCapacityExceeded { role_id: String, max_users: usize },

    /// Assignment validation failed
    #[error("Assignment conditions not met: {0}")]
    ConditionsNotMet(String),

    /// Role hierarchy would contain a cycle
    #[error("Role hierarchy cycle: {0}")]
    HierarchyCycle(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No user context was supplied
    #[error("Not authenticated")]
    Unauthenticated,

    /// User exists but lacks the permission
    #[error("User '{user_id}' is not allowed '{permission_id}'")]
    Forbidden {
        user_id: String,
        permission_id: String,
    },

    /// Engine has been shut down
    #[error("Access control engine has been shut down")]
    ShutDown,

    /// Repository backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RbacError {
    /// Whether the caller should (re)authenticate rather than give up
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }

    /// Whether the action is categorically disallowed for this user
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }
}

/// Result type for access control operations
pub type Result<T> = std::result::Result<T, RbacError>;
