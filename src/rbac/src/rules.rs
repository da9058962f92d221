//! Named rule registry
//!
//! Custom predicates are registered once under a name and referenced by
//! that name everywhere else: in `Condition::Rule` entries and in per
//! `(user, permission)` bindings. Only names are ever stored or
//! serialized, never closures.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{RbacError, Result};
use crate::types::Context;

/// Registered predicate over the merged request context
pub type RuleFn = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Registry of named rules and their `(user, permission)` bindings
#[derive(Default)]
pub struct RuleRegistry {
    rules: DashMap<String, RuleFn>,
    bindings: DashMap<(String, String), Vec<String>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a rule
    pub fn register<F>(&self, name: impl Into<String>, rule: F)
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registered rule '{}'", name);
        self.rules.insert(name, Arc::new(rule));
    }

    /// Remove a rule; bindings that name it stop granting
    pub fn unregister(&self, name: &str) -> bool {
        self.rules.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Evaluate a rule by name; `None` when it is not registered
    pub fn evaluate(&self, name: &str, context: &Context) -> Option<bool> {
        // Clone the Arc so the predicate never runs under a shard lock
        let rule = self.rules.get(name).map(|r| Arc::clone(r.value()))?;
        Some(rule(context))
    }

    /// Bind a registered rule to a `(user, permission)` pair
    pub fn bind(&self, user_id: &str, permission_id: &str, rule_name: &str) -> Result<()> {
        if !self.contains(rule_name) {
            return Err(RbacError::InvalidInput(format!(
                "Unknown rule '{}'",
                rule_name
            )));
        }

        let mut names = self
            .bindings
            .entry((user_id.to_string(), permission_id.to_string()))
            .or_default();
        if !names.iter().any(|n| n == rule_name) {
            names.push(rule_name.to_string());
        }
        Ok(())
    }

    /// Drop every rule bound to a `(user, permission)` pair
    pub fn unbind(&self, user_id: &str, permission_id: &str) -> usize {
        self.bindings
            .remove(&(user_id.to_string(), permission_id.to_string()))
            .map_or(0, |(_, names)| names.len())
    }

    /// Rule names bound to a `(user, permission)` pair
    pub fn bound_rules(&self, user_id: &str, permission_id: &str) -> Vec<String> {
        self.bindings
            .get(&(user_id.to_string(), permission_id.to_string()))
            .map(|names| names.value().clone())
            .unwrap_or_default()
    }

    /// Whether any rule bound to the pair grants access
    pub fn evaluate_bound(&self, user_id: &str, permission_id: &str, context: &Context) -> bool {
        self.bound_rules(user_id, permission_id)
            .iter()
            .any(|name| match self.evaluate(name, context) {
                Some(granted) => granted,
                None => {
                    warn!("Bound rule '{}' is no longer registered", name);
                    false
                }
            })
    }

    /// Forget all bindings, keeping registered rules
    pub fn clear_bindings(&self) {
        self.bindings.clear();
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.rules.iter().map(|r| r.key().clone()).collect();
        names.sort();
        f.debug_struct("RuleRegistry")
            .field("rules", &names)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_evaluate() {
        let registry = RuleRegistry::new();
        registry.register("on_call", |ctx: &Context| ctx.get("onCall") == Some(&json!(true)));

        let mut ctx = Context::new();
        assert_eq!(registry.evaluate("on_call", &ctx), Some(false));

        ctx.insert("onCall".to_string(), json!(true));
        assert_eq!(registry.evaluate("on_call", &ctx), Some(true));
        assert_eq!(registry.evaluate("missing", &ctx), None);
    }

    #[test]
    fn test_bind_requires_registered_rule() {
        let registry = RuleRegistry::new();
        let result = registry.bind("u1", "p1", "nope");
        assert!(matches!(result, Err(RbacError::InvalidInput(_))));
    }

    #[test]
    fn test_bound_rules_grant() {
        let registry = RuleRegistry::new();
        registry.register("always", |_: &Context| true);
        registry.register("never", |_: &Context| false);

        registry.bind("u1", "p1", "never").unwrap();
        assert!(!registry.evaluate_bound("u1", "p1", &Context::new()));

        registry.bind("u1", "p1", "always").unwrap();
        registry.bind("u1", "p1", "always").unwrap();
        assert_eq!(registry.bound_rules("u1", "p1").len(), 2);
        assert!(registry.evaluate_bound("u1", "p1", &Context::new()));
        assert!(!registry.evaluate_bound("u2", "p1", &Context::new()));

        assert_eq!(registry.unbind("u1", "p1"), 2);
        assert!(!registry.evaluate_bound("u1", "p1", &Context::new()));
    }

    #[test]
    fn test_unregistered_rule_stops_granting() {
        let registry = RuleRegistry::new();
        registry.register("always", |_: &Context| true);
        registry.bind("u1", "p1", "always").unwrap();

        assert!(registry.unregister("always"));
        assert!(!registry.evaluate_bound("u1", "p1", &Context::new()));
    }
}
