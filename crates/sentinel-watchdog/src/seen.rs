//! Deduplication ledger of escalated chunk ids.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ids the watchdog has already escalated, keyed to the chunk's creation
/// time. Entries leave only through [`SeenSet::evict_created_before`].
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    entries: HashMap<Uuid, DateTime<Utc>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id. Returns false if it was already present.
    pub fn insert(&mut self, id: Uuid, created_at: DateTime<Utc>) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, created_at);
        true
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop ids whose chunks were created before `cutoff`. Callers must pick
    /// a cutoff older than the detection recency window so evicted chunks
    /// can no longer be returned as candidates.
    pub fn evict_created_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, created_at| *created_at >= cutoff);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_insert_is_idempotent() {
        let mut seen = SeenSet::new();
        let id = Uuid::new_v4();
        assert!(seen.insert(id, Utc::now()));
        assert!(!seen.insert(id, Utc::now()));
        assert!(seen.contains(&id));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_evict_created_before() {
        let mut seen = SeenSet::new();
        let now = Utc::now();
        let old = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        seen.insert(old, now - Duration::hours(3));
        seen.insert(fresh, now - Duration::minutes(1));

        assert_eq!(seen.evict_created_before(now - Duration::hours(1)), 1);
        assert!(!seen.contains(&old));
        assert!(seen.contains(&fresh));
        assert_eq!(seen.evict_created_before(now - Duration::hours(1)), 0);
    }
}
