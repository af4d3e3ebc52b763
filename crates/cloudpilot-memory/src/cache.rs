//! Read-through TTL cache over the persistent tiers.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Cache entry lifetime.
pub const CACHE_TTL_SECONDS: i64 = 300;

/// Which persistent tier an entry was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Conversation,
    UserPreferences,
    ProjectContext,
    RecentActions,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: DateTime<Utc>,
}

/// Process-local cache keyed by (kind, identifier).
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<(CacheKind, String), CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a cached value if it is still within its TTL.
    pub fn get(&self, kind: CacheKind, id: &str) -> Option<Value> {
        let entry = self.entries.get(&(kind, id.to_string()))?;
        if Utc::now() - entry.stored_at < Duration::seconds(CACHE_TTL_SECONDS) {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn put(&mut self, kind: CacheKind, id: &str, value: Value) {
        self.entries.insert(
            (kind, id.to_string()),
            CacheEntry {
                value,
                stored_at: Utc::now(),
            },
        );
    }

    /// Drops one identifier's entry, or every entry of the kind when `id`
    /// is `None`.
    pub fn invalidate(&mut self, kind: CacheKind, id: Option<&str>) {
        match id {
            Some(id) => {
                self.entries.remove(&(kind, id.to_string()));
            }
            None => self.entries.retain(|(k, _), _| *k != kind),
        }
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn backdate(&mut self, kind: CacheKind, id: &str, seconds: i64) {
        if let Some(entry) = self.entries.get_mut(&(kind, id.to_string())) {
            entry.stored_at = Utc::now() - Duration::seconds(seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_entries_are_served() {
        let mut cache = MemoryCache::new();
        cache.put(CacheKind::Conversation, "session-1", json!({"turns": 3}));
        assert_eq!(
            cache.get(CacheKind::Conversation, "session-1"),
            Some(json!({"turns": 3}))
        );
    }

    #[test]
    fn expired_entries_are_not_served() {
        let mut cache = MemoryCache::new();
        cache.put(CacheKind::UserPreferences, "alice", json!({"region": "eu"}));
        cache.backdate(CacheKind::UserPreferences, "alice", CACHE_TTL_SECONDS + 1);
        assert_eq!(cache.get(CacheKind::UserPreferences, "alice"), None);
    }

    #[test]
    fn invalidation_is_kind_scoped() {
        let mut cache = MemoryCache::new();
        cache.put(CacheKind::Conversation, "s1", json!(1));
        cache.put(CacheKind::Conversation, "s2", json!(2));
        cache.put(CacheKind::ProjectContext, "p1", json!(3));

        cache.invalidate(CacheKind::Conversation, None);
        assert_eq!(cache.get(CacheKind::Conversation, "s1"), None);
        assert_eq!(cache.get(CacheKind::ProjectContext, "p1"), Some(json!(3)));

        cache.invalidate(CacheKind::ProjectContext, Some("p1"));
        assert!(cache.is_empty());
    }
}
