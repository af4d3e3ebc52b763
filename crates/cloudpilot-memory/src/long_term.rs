//! Long-term memory: user preferences, project context, and learned
//! action patterns with a similarity merge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{PatternEntry, Suggestion};

/// Fraction of overlapping keys that must agree for two patterns to merge.
const SIMILARITY_THRESHOLD: f64 = 0.7;
/// Suggestions returned by [`LongTermMemory::smart_suggestions`].
const MAX_SUGGESTIONS: usize = 5;

/// Serializable long-term tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LongTermMemory {
    #[serde(default)]
    pub user_preferences: HashMap<String, Map<String, Value>>,
    #[serde(default)]
    pub project_context: HashMap<String, Map<String, Value>>,
    #[serde(default)]
    pub learning_patterns: HashMap<String, Vec<PatternEntry>>,
    #[serde(default)]
    pub user_patterns: HashMap<String, HashMap<String, Vec<PatternEntry>>>,
}

impl LongTermMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_preferences(&mut self, user_id: &str, preferences: Map<String, Value>) {
        let entry = self.user_preferences.entry(user_id.to_string()).or_default();
        entry.extend(preferences);
        entry.insert(
            "last_updated".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }

    pub fn preferences(&self, user_id: &str) -> Map<String, Value> {
        self.user_preferences.get(user_id).cloned().unwrap_or_default()
    }

    pub fn update_project_context(&mut self, project_id: &str, context: Map<String, Value>) {
        let entry = self.project_context.entry(project_id.to_string()).or_default();
        entry.extend(context);
        entry.insert(
            "last_updated".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }

    pub fn project(&self, project_id: &str) -> Map<String, Value> {
        self.project_context.get(project_id).cloned().unwrap_or_default()
    }

    /// Learns a global pattern, merging with an existing similar entry
    /// instead of duplicating it.
    pub fn learn_pattern(&mut self, pattern_type: &str, data: Map<String, Value>) {
        let now = Utc::now();
        let entries = self.learning_patterns.entry(pattern_type.to_string()).or_default();
        merge_or_insert(entries, data, now);
    }

    /// Learns a per-user pattern with the same merge rule.
    pub fn learn_user_pattern(
        &mut self,
        user_id: &str,
        pattern_type: &str,
        data: Map<String, Value>,
    ) {
        let now = Utc::now();
        let entries = self
            .user_patterns
            .entry(user_id.to_string())
            .or_default()
            .entry(pattern_type.to_string())
            .or_default();
        merge_or_insert(entries, data, now);
    }

    pub fn patterns(&self, pattern_type: &str) -> &[PatternEntry] {
        self.learning_patterns
            .get(pattern_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Top suggestions for a context, combining the user's patterns with
    /// the global patterns of that type, ranked by (frequency, recency).
    pub fn smart_suggestions(&self, user_id: &str, context: &str) -> Vec<Suggestion> {
        let mut all: Vec<Suggestion> = Vec::new();

        if let Some(user_patterns) = self.user_patterns.get(user_id) {
            for (pattern_type, entries) in user_patterns {
                for entry in entries {
                    all.push(Suggestion {
                        scope: "user".to_string(),
                        pattern_type: pattern_type.clone(),
                        data: entry.data.clone(),
                        frequency: entry.frequency,
                        last_seen: entry.recency(),
                    });
                }
            }
        }

        for entry in self.patterns(context) {
            all.push(Suggestion {
                scope: "global".to_string(),
                pattern_type: context.to_string(),
                data: entry.data.clone(),
                frequency: entry.frequency,
                last_seen: entry.recency(),
            });
        }

        all.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then(b.last_seen.cmp(&a.last_seen))
        });
        all.truncate(MAX_SUGGESTIONS);
        all
    }
}

fn merge_or_insert(entries: &mut Vec<PatternEntry>, data: Map<String, Value>, now: DateTime<Utc>) {
    for existing in entries.iter_mut() {
        if patterns_similar(&existing.data, &data) {
            existing.frequency += 1;
            existing.last_seen = Some(now);
            return;
        }
    }
    entries.push(PatternEntry::new(data, now));
}

/// Two patterns are similar when more than 70% of their overlapping keys
/// hold equal values. Disjoint key sets never match.
fn patterns_similar(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    let common: Vec<&String> = a.keys().filter(|key| b.contains_key(*key)).collect();
    if common.is_empty() {
        return false;
    }
    let matching = common
        .iter()
        .filter(|key| a.get(**key) == b.get(**key))
        .count();
    matching as f64 / common.len() as f64 > SIMILARITY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pattern(action: &str, service: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("action".to_string(), json!(action));
        map.insert("service".to_string(), json!(service));
        map
    }

    #[test]
    fn similar_patterns_merge_and_increment_frequency() {
        let mut memory = LongTermMemory::new();
        memory.learn_pattern("list_instances", pattern("list_instances", "compute"));
        memory.learn_pattern("list_instances", pattern("list_instances", "compute"));

        let entries = memory.patterns("list_instances");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].frequency, 2);
        assert!(entries[0].last_seen.is_some());
    }

    #[test]
    fn dissimilar_patterns_stay_separate() {
        let mut memory = LongTermMemory::new();
        memory.learn_pattern("list", pattern("list_instances", "compute"));
        memory.learn_pattern("list", pattern("list_buckets", "objectstorage"));
        assert_eq!(memory.patterns("list").len(), 2);
    }

    #[test]
    fn disjoint_key_sets_never_match() {
        let mut a = Map::new();
        a.insert("action".to_string(), json!("list_instances"));
        let mut b = Map::new();
        b.insert("resource".to_string(), json!("instance"));
        assert!(!patterns_similar(&a, &b));
    }

    #[test]
    fn suggestions_rank_by_frequency_then_recency() {
        let mut memory = LongTermMemory::new();
        memory.learn_pattern("list", pattern("list_buckets", "objectstorage"));
        for _ in 0..3 {
            memory.learn_pattern("list", pattern("list_instances", "compute"));
        }

        let suggestions = memory.smart_suggestions("default_user", "list");
        assert_eq!(suggestions[0].data["action"], "list_instances");
        assert_eq!(suggestions[0].frequency, 3);
    }

    #[test]
    fn preferences_update_stamps_last_updated() {
        let mut memory = LongTermMemory::new();
        let mut prefs = Map::new();
        prefs.insert("region".to_string(), json!("us-ashburn-1"));
        memory.update_preferences("alice", prefs);

        let stored = memory.preferences("alice");
        assert_eq!(stored["region"], "us-ashburn-1");
        assert!(stored.contains_key("last_updated"));
    }
}
