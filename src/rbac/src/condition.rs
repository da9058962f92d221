//! ABAC condition evaluation
//!
//! A condition map passes when every entry passes (AND logic):
//!
//! - `Equals(v)`: the actual value equals `v`, or is an array containing `v`
//! - `OneOf([..])`: the actual value is one of the listed values
//! - `Rule { rule }`: the named rule returns true for the whole context
//!
//! A key missing from the context reads as `null`.

use serde_json::Value;
use tracing::{debug, warn};

use crate::rules::RuleRegistry;
use crate::types::{Condition, ConditionMap, Context};

/// Evaluate every condition against the context
pub fn evaluate_conditions(conditions: &ConditionMap, context: &Context, rules: &RuleRegistry) -> bool {
    conditions
        .iter()
        .all(|(key, condition)| evaluate_condition(key, condition, context, rules))
}

/// Evaluate a single condition
pub fn evaluate_condition(key: &str, condition: &Condition, context: &Context, rules: &RuleRegistry) -> bool {
    let actual = context.get(key).unwrap_or(&Value::Null);

    let passed = match condition {
        Condition::Equals(expected) => match actual {
            Value::Array(items) if !expected.is_array() => items.contains(expected),
            _ => actual == expected,
        },
        Condition::OneOf(allowed) => allowed.contains(actual),
        Condition::Rule { rule } => match rules.evaluate(rule, context) {
            Some(result) => result,
            None => {
                warn!("Condition '{}' references unregistered rule '{}'", key, rule);
                false
            }
        },
    };

    if !passed {
        debug!("Condition '{}' failed", key);
    }
    passed
}

/// Request context overlaid with the user's stored attributes
///
/// Stored attributes win over caller-supplied values of the same key.
pub fn merge_context(context: &Context, attributes: Option<&serde_json::Map<String, Value>>) -> Context {
    let mut merged = context.clone();
    if let Some(attributes) = attributes {
        for (key, value) in attributes {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_equality() {
        let rules = RuleRegistry::new();
        let mut conditions = ConditionMap::new();
        conditions.insert("department".to_string(), Condition::equals("finance"));

        assert!(evaluate_conditions(&conditions, &ctx(&[("department", json!("finance"))]), &rules));
        assert!(!evaluate_conditions(&conditions, &ctx(&[("department", json!("hr"))]), &rules));
        assert!(!evaluate_conditions(&conditions, &Context::new(), &rules));
    }

    #[test]
    fn test_membership() {
        let rules = RuleRegistry::new();
        let mut conditions = ConditionMap::new();
        conditions.insert("team".to_string(), Condition::one_of(["billing", "payroll"]));

        assert!(evaluate_conditions(&conditions, &ctx(&[("team", json!("payroll"))]), &rules));
        assert!(!evaluate_conditions(&conditions, &ctx(&[("team", json!("intake"))]), &rules));
    }

    #[test]
    fn test_equality_against_array_attribute() {
        let rules = RuleRegistry::new();
        let mut conditions = ConditionMap::new();
        conditions.insert("clinics".to_string(), Condition::equals("north"));

        let context = ctx(&[("clinics", json!(["north", "south"]))]);
        assert!(evaluate_conditions(&conditions, &context, &rules));
    }

    #[test]
    fn test_rule_condition() {
        let rules = RuleRegistry::new();
        rules.register("senior", |c: &Context| {
            c.get("seniority").and_then(Value::as_u64).unwrap_or(0) >= 5
        });

        let mut conditions = ConditionMap::new();
        conditions.insert("seniority".to_string(), Condition::rule("senior"));
        assert!(evaluate_conditions(&conditions, &ctx(&[("seniority", json!(7))]), &rules));
        assert!(!evaluate_conditions(&conditions, &ctx(&[("seniority", json!(2))]), &rules));

        conditions.insert("other".to_string(), Condition::rule("unregistered"));
        assert!(!evaluate_conditions(&conditions, &ctx(&[("seniority", json!(7))]), &rules));
    }

    #[test]
    fn test_all_conditions_must_pass() {
        let rules = RuleRegistry::new();
        let mut conditions = ConditionMap::new();
        conditions.insert("department".to_string(), Condition::equals("finance"));
        conditions.insert("level".to_string(), Condition::equals(3));

        let partial = ctx(&[("department", json!("finance")), ("level", json!(2))]);
        assert!(!evaluate_conditions(&conditions, &partial, &rules));

        let full = ctx(&[("department", json!("finance")), ("level", json!(3))]);
        assert!(evaluate_conditions(&conditions, &full, &rules));
    }

    #[test]
    fn test_stored_attributes_win() {
        let context = ctx(&[("department", json!("finance")), ("shift", json!("day"))]);
        let mut stored = serde_json::Map::new();
        stored.insert("department".to_string(), json!("hr"));

        let merged = merge_context(&context, Some(&stored));
        assert_eq!(merged["department"], json!("hr"));
        assert_eq!(merged["shift"], json!("day"));
    }
}
