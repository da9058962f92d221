//! Bounded per-user access history

use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::types::{AccessAttempt, Context};

/// Most recent decisions per user
pub struct AccessHistory {
    entries: DashMap<String, VecDeque<AccessAttempt>>,
    limit: usize,
}

impl AccessHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
        }
    }

    /// Append a decision, dropping the oldest beyond the limit
    pub fn record(&self, user_id: &str, permission_id: &str, granted: bool, context: &Context) {
        if self.limit == 0 {
            return;
        }

        let mut attempts = self.entries.entry(user_id.to_string()).or_default();
        attempts.push_back(AccessAttempt {
            permission_id: permission_id.to_string(),
            granted,
            timestamp: Utc::now(),
            context: context.clone(),
        });
        while attempts.len() > self.limit {
            attempts.pop_front();
        }
    }

    /// A user's history, oldest first
    pub fn get(&self, user_id: &str) -> Vec<AccessAttempt> {
        self.entries
            .get(user_id)
            .map(|attempts| attempts.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_history() {
        let history = AccessHistory::new(3);
        for i in 0..5 {
            history.record("u1", &format!("p{}", i), i % 2 == 0, &Context::new());
        }

        let attempts = history.get("u1");
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].permission_id, "p2");
        assert!(attempts[2].granted);
        assert!(history.get("u2").is_empty());
    }
}
