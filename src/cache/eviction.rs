//! Cache Eviction Policies
//!
//! Policy-driven victim selection for tiers that exceed their capacity budget.
//! Each policy is a total ordering over entry summaries. Ties are broken by
//! insertion sequence so eviction is deterministic.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::entry::EntrySummary;
use super::tier::TierLimits;

/// Eviction policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed first
    #[default]
    Lru,
    /// Least frequently accessed first
    Lfu,
    /// Oldest insertion first
    Fifo,
    /// Soonest to expire first
    Ttl,
}

impl EvictionPolicy {
    /// Get policy name
    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Fifo => "FIFO",
            EvictionPolicy::Ttl => "TTL",
        }
    }

    /// Compare two entries; `Less` means `a` is evicted before `b`
    pub fn compare(&self, a: &EntrySummary, b: &EntrySummary) -> Ordering {
        let primary = match self {
            EvictionPolicy::Lru => (a.last_accessed_at, a.recency).cmp(&(b.last_accessed_at, b.recency)),
            EvictionPolicy::Lfu => a.access_count.cmp(&b.access_count),
            EvictionPolicy::Fifo => a.created_at.cmp(&b.created_at),
            EvictionPolicy::Ttl => a.expires_at.cmp(&b.expires_at),
        };
        primary.then(a.sequence.cmp(&b.sequence))
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "ttl" => Ok(EvictionPolicy::Ttl),
            other => Err(format!("unknown eviction policy: {}", other)),
        }
    }
}

/// Selects eviction victims under a policy
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionManager {
    policy: EvictionPolicy,
}

impl EvictionManager {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Sort summaries into eviction order
    pub fn order(&self, summaries: &mut [EntrySummary]) {
        let policy = self.policy;
        summaries.sort_by(|a, b| policy.compare(a, b));
    }

    /// Pick victims until the tier is back within `limits`
    ///
    /// Entries for which `is_protected` returns true are skipped and the next
    /// entry in policy order is taken instead. If protected entries alone
    /// exceed the budget the tier stays over budget.
    pub fn select_victims<F>(
        &self,
        mut summaries: Vec<EntrySummary>,
        limits: TierLimits,
        is_protected: F,
    ) -> Vec<EntrySummary>
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = summaries.len() as u64;
        let mut size: u64 = summaries.iter().map(|s| s.size_bytes).sum();
        if !limits.exceeded(entries, size) {
            return Vec::new();
        }

        self.order(&mut summaries);

        let mut victims = Vec::new();
        for summary in summaries {
            if !limits.exceeded(entries, size) {
                break;
            }
            if is_protected(&summary.key) {
                continue;
            }
            entries -= 1;
            size -= summary.size_bytes;
            victims.push(summary);
        }
        victims
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(key: &str, sequence: u64) -> EntrySummary {
        EntrySummary {
            key: key.to_string(),
            size_bytes: 10,
            created_at: 1_000,
            expires_at: 10_000,
            last_accessed_at: 1_000,
            recency: sequence,
            access_count: 0,
            sequence,
            tags: Default::default(),
        }
    }

    fn keys(victims: &[EntrySummary]) -> Vec<&str> {
        victims.iter().map(|v| v.key.as_str()).collect()
    }

    fn room_for(entries: u64) -> TierLimits {
        TierLimits {
            max_size_bytes: u64::MAX,
            max_entries: Some(entries),
        }
    }

    #[test]
    fn test_policy_parse_and_display() {
        assert_eq!("lru".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert_eq!("FIFO".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Fifo);
        assert!("random".parse::<EvictionPolicy>().is_err());
        assert_eq!(EvictionPolicy::Lfu.to_string(), "LFU");
        assert_eq!(EvictionPolicy::default(), EvictionPolicy::Lru);
    }

    #[test]
    fn test_within_budget_evicts_nothing() {
        let manager = EvictionManager::new(EvictionPolicy::Lru);
        let entries = vec![summary("a", 1), summary("b", 2)];
        assert!(manager.select_victims(entries, room_for(2), |_| false).is_empty());
    }

    #[test]
    fn test_lru_evicts_oldest_access() {
        let manager = EvictionManager::new(EvictionPolicy::Lru);
        let mut a = summary("a", 1);
        let mut b = summary("b", 2);
        let mut c = summary("c", 3);
        let d = summary("d", 4);
        a.last_accessed_at = 2_000;
        b.last_accessed_at = 1_500;
        c.last_accessed_at = 3_000;

        let victims = manager.select_victims(vec![a, b, c, d], room_for(3), |_| false);
        // d was never read, so it is the oldest access
        assert_eq!(keys(&victims), vec!["d"]);
    }

    #[test]
    fn test_lru_same_millisecond_uses_recency() {
        let manager = EvictionManager::new(EvictionPolicy::Lru);
        let mut a = summary("a", 1);
        let mut b = summary("b", 2);
        a.recency = 20;
        b.recency = 10;

        let victims = manager.select_victims(vec![a, b], room_for(1), |_| false);
        assert_eq!(keys(&victims), vec!["b"]);
    }

    #[test]
    fn test_lfu_evicts_least_frequent() {
        let manager = EvictionManager::new(EvictionPolicy::Lfu);
        let mut a = summary("a", 1);
        let mut b = summary("b", 2);
        let mut c = summary("c", 3);
        a.access_count = 5;
        b.access_count = 1;
        c.access_count = 3;

        let victims = manager.select_victims(vec![a, b, c], room_for(1), |_| false);
        assert_eq!(keys(&victims), vec!["b", "c"]);
    }

    #[test]
    fn test_fifo_evicts_oldest_insert() {
        let manager = EvictionManager::new(EvictionPolicy::Fifo);
        let mut a = summary("a", 1);
        let mut b = summary("b", 2);
        a.created_at = 5_000;
        b.created_at = 4_000;
        a.last_accessed_at = 1;

        let victims = manager.select_victims(vec![a, b], room_for(1), |_| false);
        assert_eq!(keys(&victims), vec!["b"]);
    }

    #[test]
    fn test_ttl_evicts_soonest_expiry() {
        let manager = EvictionManager::new(EvictionPolicy::Ttl);
        let mut a = summary("a", 1);
        let mut b = summary("b", 2);
        let mut c = summary("c", 3);
        a.expires_at = 9_000;
        b.expires_at = 20_000;
        c.expires_at = 3_000;

        let victims = manager.select_victims(vec![a, b, c], room_for(1), |_| false);
        assert_eq!(keys(&victims), vec!["c", "a"]);
    }

    #[test]
    fn test_ties_break_by_sequence() {
        let manager = EvictionManager::new(EvictionPolicy::Lfu);
        let entries = vec![summary("late", 9), summary("early", 3), summary("mid", 5)];

        let victims = manager.select_victims(entries, room_for(1), |_| false);
        assert_eq!(keys(&victims), vec!["early", "mid"]);
    }

    #[test]
    fn test_protected_entries_are_skipped() {
        let manager = EvictionManager::new(EvictionPolicy::Fifo);
        let entries = vec![summary("refreshing", 1), summary("b", 2), summary("c", 3)];

        let victims = manager.select_victims(entries, room_for(2), |key| key == "refreshing");
        assert_eq!(keys(&victims), vec!["b"]);
    }

    #[test]
    fn test_byte_budget() {
        let manager = EvictionManager::new(EvictionPolicy::Fifo);
        let mut big = summary("big", 1);
        big.size_bytes = 100;
        let entries = vec![big, summary("s1", 2), summary("s2", 3)];

        let limits = TierLimits {
            max_size_bytes: 50,
            max_entries: None,
        };
        let victims = manager.select_victims(entries, limits, |_| false);
        assert_eq!(keys(&victims), vec!["big"]);
    }
}
