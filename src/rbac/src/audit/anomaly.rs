//! Denial-based anomaly detection
//!
//! Each denied decision increments a per-user counter. Reaching the
//! threshold flags the user once; the counter resets to zero on the first
//! access after the cool-down following the breach. Resets are applied
//! lazily on read, so there are no timers to cancel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::RiskLevel;

/// Denied permission ids kept per user
const MAX_PATTERNS: usize = 50;

/// Per-user denial state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyRecord {
    pub denied_attempts: u32,
    pub last_check: DateTime<Utc>,

    /// Most recently denied permission ids
    pub patterns: Vec<String>,

    /// When the threshold was reached, if it has been
    pub breached_at: Option<DateTime<Utc>>,
}

impl AnomalyRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            denied_attempts: 0,
            last_check: now,
            patterns: Vec::new(),
            breached_at: None,
        }
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.breached_at {
            Some(breached_at) => (now - breached_at)
                .to_std()
                .map_or(false, |elapsed| elapsed >= cooldown),
            None => false,
        }
    }

    fn reset(&mut self) {
        self.denied_attempts = 0;
        self.patterns.clear();
        self.breached_at = None;
    }
}

/// One line of the anomaly report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReportEntry {
    pub user_id: String,
    pub denied_attempts: u32,
    pub last_check: DateTime<Utc>,
    pub patterns: Vec<String>,
    pub risk: RiskLevel,
}

/// Per-user denial counters
pub struct AnomalyDetector {
    records: DashMap<String, AnomalyRecord>,
    threshold: u32,
    cooldown: Duration,
}

impl AnomalyDetector {
    /// Create a detector flagging users at `threshold` denials
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            records: DashMap::new(),
            threshold,
            cooldown,
        }
    }

    /// Count a denial
    ///
    /// Returns the denial count when this denial reaches the threshold;
    /// later denials before the cool-down has elapsed return `None`.
    pub fn record_denial(&self, user_id: &str, permission_id: &str) -> Option<u32> {
        let now = Utc::now();
        let mut record = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| AnomalyRecord::new(now));

        if record.cooldown_elapsed(now, self.cooldown) {
            record.reset();
        }

        record.denied_attempts = record.denied_attempts.saturating_add(1);
        record.last_check = now;
        record.patterns.push(permission_id.to_string());
        if record.patterns.len() > MAX_PATTERNS {
            record.patterns.remove(0);
        }

        if record.breached_at.is_none() && record.denied_attempts >= self.threshold {
            record.breached_at = Some(now);
            return Some(record.denied_attempts);
        }

        None
    }

    /// Current record of a user, with any due reset applied
    pub fn get(&self, user_id: &str) -> Option<AnomalyRecord> {
        let now = Utc::now();
        let mut record = self.records.get_mut(user_id)?;
        if record.cooldown_elapsed(now, self.cooldown) {
            record.reset();
        }
        Some(record.clone())
    }

    /// Users with outstanding denials, most denials first
    pub fn report(&self) -> Vec<AnomalyReportEntry> {
        let now = Utc::now();
        let mut report: Vec<AnomalyReportEntry> = self
            .records
            .iter_mut()
            .filter_map(|mut entry| {
                if entry.cooldown_elapsed(now, self.cooldown) {
                    entry.reset();
                }
                if entry.denied_attempts == 0 {
                    return None;
                }

                let risk = if entry.denied_attempts >= self.threshold {
                    RiskLevel::High
                } else {
                    RiskLevel::Medium
                };

                Some(AnomalyReportEntry {
                    user_id: entry.key().clone(),
                    denied_attempts: entry.denied_attempts,
                    last_check: entry.last_check,
                    patterns: entry.patterns.clone(),
                    risk,
                })
            })
            .collect();

        report.sort_by(|a, b| {
            b.denied_attempts
                .cmp(&a.denied_attempts)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        report
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_fires_once() {
        let detector = AnomalyDetector::new(3, Duration::from_secs(3600));

        assert_eq!(detector.record_denial("u1", "p"), None);
        assert_eq!(detector.record_denial("u1", "p"), None);
        assert_eq!(detector.record_denial("u1", "p"), Some(3));
        assert_eq!(detector.record_denial("u1", "p"), None);
        assert_eq!(detector.record_denial("u1", "p"), None);

        assert_eq!(detector.get("u1").unwrap().denied_attempts, 5);
    }

    #[test]
    fn test_counters_are_per_user() {
        let detector = AnomalyDetector::new(2, Duration::from_secs(3600));

        detector.record_denial("u1", "p");
        assert_eq!(detector.record_denial("u2", "p"), None);
        assert_eq!(detector.record_denial("u1", "p"), Some(2));
    }

    #[tokio::test]
    async fn test_lazy_reset_after_cooldown() {
        let detector = AnomalyDetector::new(2, Duration::from_millis(50));

        detector.record_denial("u1", "p");
        assert_eq!(detector.record_denial("u1", "p"), Some(2));

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(detector.get("u1").unwrap().denied_attempts, 0);
        assert!(detector.report().is_empty());

        detector.record_denial("u1", "p");
        assert_eq!(detector.record_denial("u1", "p"), Some(2));
    }

    #[test]
    fn test_report_sorted_with_risk() {
        let detector = AnomalyDetector::new(3, Duration::from_secs(3600));

        detector.record_denial("low", "a");
        for _ in 0..4 {
            detector.record_denial("high", "b");
        }
        detector.record_denial("mid", "c");
        detector.record_denial("mid", "c");

        let report = detector.report();
        let users: Vec<&str> = report.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(users, vec!["high", "mid", "low"]);
        assert_eq!(report[0].risk, RiskLevel::High);
        assert_eq!(report[1].risk, RiskLevel::Medium);
        assert_eq!(report[2].patterns, vec!["a".to_string()]);
    }

    #[test]
    fn test_patterns_bounded() {
        let detector = AnomalyDetector::new(1_000, Duration::from_secs(3600));
        for i in 0..(MAX_PATTERNS + 10) {
            detector.record_denial("u1", &format!("p{}", i));
        }

        let record = detector.get("u1").unwrap();
        assert_eq!(record.patterns.len(), MAX_PATTERNS);
        assert_eq!(record.patterns[0], "p10");
    }
}
