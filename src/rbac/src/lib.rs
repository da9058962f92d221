//! # Rehab RBAC Engine
//!
//! In-process access control for the rehabilitation-center ERP.
//!
//! ## Features
//!
//! - **Hierarchical roles** with single-parent inheritance, cycle-checked on write
//! - **ABAC conditions** on assignments and permissions, evaluated against
//!   request context merged with stored user attributes
//! - **Temporal assignments** that lapse on their own
//! - **Decision cache** with TTL, targeted invalidation and BLAKE3 keys
//! - **Append-only audit log** with a severity table and filtered queries
//! - **Anomaly detection** on repeated denials
//! - **Async-first design** on the Tokio runtime, with pluggable repositories
//!
//! ## Example
//!
//! ```rust
//! use rehab_rbac::{AccessControlEngine, AssignmentConfig, Context, EngineConfig, PermissionConfig, RoleConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AccessControlEngine::new(EngineConfig::default()).await?;
//!
//!     engine
//!         .create_permission("report.read", PermissionConfig::new("report", "read"))
//!         .await?;
//!     engine
//!         .create_role("analyst", RoleConfig::new("Analyst").with_parent("user").with_permissions(["report.read"]))
//!         .await?;
//!     engine
//!         .assign_role_to_user("alice", "analyst", AssignmentConfig::default())
//!         .await?;
//!
//!     if engine.has_permission("alice", "report.read", &Context::new()).await? {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod cache;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod permissions;
pub mod roles;
pub mod rules;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use audit::{AnomalyReportEntry, AuditEntry, AuditEventType, AuditFilter, Severity};
pub use cache::CacheStats;
pub use config::EngineConfig;
pub use engine::{AccessControlEngine, EngineMetrics, ScopeSummary, Snapshot};
pub use error::{RbacError, Result};
pub use events::Notification;
pub use store::Repositories;
pub use types::{
    AccessAttempt, Assignment, AssignmentConfig, Condition, ConditionMap, Context, Permission,
    PermissionConfig, PermissionId, RiskLevel, Role, RoleConfig, RoleId, RoleUpdate, ScopeKind,
    UserAttributes, UserId, UserRole,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
