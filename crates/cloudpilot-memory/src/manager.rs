//! The memory façade the engine talks to.
//!
//! Orchestrates the store, cache and both tiers. All operations are
//! best-effort: failures are logged at `warn!` and degrade to empty
//! context so a turn never aborts on memory problems.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::warn;

use crate::cache::{CacheKind, MemoryCache};
use crate::cleanup::{prune_aged_files, MAX_FILE_AGE_DAYS};
use crate::error::MemoryError;
use crate::long_term::LongTermMemory;
use crate::short_term::{ShortTermMemory, ShortTermSnapshot};
use crate::store::MemoryStore;
use crate::types::{ActionRecord, ErrorSample, Suggestion, TurnRecord};

const DEFAULT_USER: &str = "default_user";
const DEFAULT_PROJECT: &str = "default_project";

/// Everything loaded at the start of a turn.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub conversation_context: Value,
    pub user_preferences: Value,
    pub project_context: Value,
    pub recent_actions: Vec<Value>,
}

/// What the engine asks memory to retain at the end of a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcomeRecord {
    pub query: String,
    pub intent: String,
    pub action: String,
    pub service: String,
    pub parameters: Map<String, Value>,
    pub result_summary: String,
    pub success: bool,
    pub preferences: Option<Map<String, Value>>,
}

/// Orchestrates all memory operations behind one façade.
pub struct MemoryManager {
    store: MemoryStore,
    cache: MemoryCache,
    short_term: ShortTermMemory,
    long_term: LongTermMemory,
}

impl MemoryManager {
    /// Opens the memory directory, restoring persisted tiers. Restore
    /// failures degrade to empty tiers.
    pub fn new(memory_dir: impl Into<std::path::PathBuf>) -> Result<Self, MemoryError> {
        let store = MemoryStore::new(memory_dir)?;

        let mut short_term = ShortTermMemory::new();
        match store.load_short_term::<ShortTermSnapshot>() {
            Ok(snapshot) => short_term.restore(snapshot),
            Err(err) => warn!(%err, "short-term memory restore failed"),
        }

        let long_term = match store.load_long_term::<LongTermMemory>() {
            Ok(tier) => tier,
            Err(err) => {
                warn!(%err, "long-term memory restore failed");
                LongTermMemory::new()
            }
        };

        Ok(MemoryManager {
            store,
            cache: MemoryCache::new(),
            short_term,
            long_term,
        })
    }

    /// Loads all memory context for a session, cache first.
    pub fn load_context(&mut self, session_id: &str) -> MemoryContext {
        MemoryContext {
            conversation_context: self.conversation_context(session_id),
            user_preferences: self.user_preferences(DEFAULT_USER),
            project_context: self.project_context(DEFAULT_PROJECT),
            recent_actions: self.recent_actions(session_id),
        }
    }

    fn conversation_context(&mut self, session_id: &str) -> Value {
        if let Some(cached) = self.cache.get(CacheKind::Conversation, session_id) {
            return cached;
        }
        let context = serde_json::to_value(self.short_term.conversation_context())
            .unwrap_or(Value::Null);
        self.cache
            .put(CacheKind::Conversation, session_id, context.clone());
        context
    }

    fn user_preferences(&mut self, user_id: &str) -> Value {
        if let Some(cached) = self.cache.get(CacheKind::UserPreferences, user_id) {
            return cached;
        }
        let all = match self.store.load_user_preferences() {
            Ok(prefs) => prefs,
            Err(err) => {
                warn!(%err, "user preference load failed");
                Map::new()
            }
        };
        let prefs = all
            .get(user_id)
            .cloned()
            .unwrap_or(Value::Object(Map::new()));
        self.cache
            .put(CacheKind::UserPreferences, user_id, prefs.clone());
        prefs
    }

    fn project_context(&mut self, project_id: &str) -> Value {
        if let Some(cached) = self.cache.get(CacheKind::ProjectContext, project_id) {
            return cached;
        }
        let context = Value::Object(self.long_term.project(project_id));
        self.cache
            .put(CacheKind::ProjectContext, project_id, context.clone());
        context
    }

    fn recent_actions(&mut self, session_id: &str) -> Vec<Value> {
        if let Some(Value::Array(cached)) = self.cache.get(CacheKind::RecentActions, session_id) {
            return cached;
        }
        let actions: Vec<Value> = self
            .short_term
            .recent_actions()
            .into_iter()
            .filter_map(|action| serde_json::to_value(action).ok())
            .collect();
        self.cache.put(
            CacheKind::RecentActions,
            session_id,
            Value::Array(actions.clone()),
        );
        actions
    }

    /// Records the turn outcome across every tier and persists to disk.
    pub fn save_turn(&mut self, session_id: &str, record: TurnOutcomeRecord) {
        let now = Utc::now();

        self.short_term.add_turn(TurnRecord {
            timestamp: now,
            query: record.query.clone(),
            intent: record.intent.clone(),
            action: record.action.clone(),
            parameters: record.parameters.clone(),
            result_summary: record.result_summary.clone(),
            success: record.success,
        });
        if !record.action.is_empty() {
            self.short_term.add_action(ActionRecord {
                timestamp: now,
                action: record.action.clone(),
                service: record.service.clone(),
                success: record.success,
            });
        }

        if record.success && !record.action.is_empty() {
            let mut pattern = Map::new();
            pattern.insert("action".to_string(), Value::String(record.action.clone()));
            pattern.insert("service".to_string(), Value::String(record.service.clone()));
            pattern.insert(
                "parameters".to_string(),
                Value::Object(record.parameters.clone()),
            );
            self.long_term
                .learn_pattern(&record.action, pattern.clone());
            self.long_term
                .learn_user_pattern(DEFAULT_USER, &record.action, pattern);
        }

        if let Some(preferences) = record.preferences.clone() {
            self.long_term.update_preferences(DEFAULT_USER, preferences);
            let mut all = self.store.load_user_preferences().unwrap_or_default();
            all.insert(
                DEFAULT_USER.to_string(),
                Value::Object(self.long_term.preferences(DEFAULT_USER)),
            );
            if let Err(err) = self.store.save_user_preferences(&all) {
                warn!(%err, "user preference save failed");
            }
            self.cache
                .invalidate(CacheKind::UserPreferences, Some(DEFAULT_USER));
        }

        if let Err(err) = self.store.save_short_term(&self.short_term.snapshot()) {
            warn!(%err, "short-term memory save failed");
        }
        if let Err(err) = self.store.save_long_term(&self.long_term) {
            warn!(%err, "long-term memory save failed");
        }
        if let Err(err) = self.store.save_conversation_turn(TurnRecord {
            timestamp: now,
            query: record.query,
            intent: record.intent,
            action: record.action,
            parameters: record.parameters,
            result_summary: record.result_summary,
            success: record.success,
        }) {
            warn!(%err, "conversation history save failed");
        }

        self.cache.invalidate(CacheKind::Conversation, Some(session_id));
        self.cache.invalidate(CacheKind::RecentActions, Some(session_id));

        prune_aged_files(self.store.memory_dir(), MAX_FILE_AGE_DAYS);
    }

    /// Appends one error-handler success sample to the bounded log.
    pub fn log_error_sample(&self, sample: ErrorSample) {
        if let Err(err) = self.store.append_error_sample(sample) {
            warn!(%err, "error sample save failed");
        }
    }

    pub fn smart_suggestions(&self, context: &str) -> Vec<Suggestion> {
        self.long_term.smart_suggestions(DEFAULT_USER, context)
    }

    pub fn clear_session(&mut self, session_id: &str) {
        self.short_term.clear_session();
        self.cache.invalidate(CacheKind::Conversation, Some(session_id));
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(query: &str, action: &str, success: bool) -> TurnOutcomeRecord {
        TurnOutcomeRecord {
            query: query.to_string(),
            intent: "oci_operation".to_string(),
            action: action.to_string(),
            service: "compute".to_string(),
            parameters: Map::new(),
            result_summary: "3 items".to_string(),
            success,
            preferences: None,
        }
    }

    #[test]
    fn turn_saved_in_one_manager_is_visible_to_the_next() {
        let dir = tempfile::tempdir().expect("tempdir");

        {
            let mut manager = MemoryManager::new(dir.path()).expect("manager");
            manager.save_turn("session-1", record("list instances", "list_instances", true));
        }

        let mut reopened = MemoryManager::new(dir.path()).expect("manager");
        let context = reopened.load_context("session-1");
        let turns = context.conversation_context["recent_turns"]
            .as_array()
            .expect("recent turns");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0]["query"], "list instances");
        assert_eq!(context.recent_actions.len(), 1);
    }

    #[test]
    fn successful_actions_become_learned_patterns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manager = MemoryManager::new(dir.path()).expect("manager");

        manager.save_turn("s", record("list instances", "list_instances", true));
        manager.save_turn("s", record("list instances again", "list_instances", true));

        let suggestions = manager.smart_suggestions("list_instances");
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0].frequency, 2);
    }

    #[test]
    fn failed_actions_are_not_learned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manager = MemoryManager::new(dir.path()).expect("manager");

        manager.save_turn("s", record("delete bucket", "delete_bucket", false));
        assert!(manager.smart_suggestions("delete_bucket").is_empty());
    }

    #[test]
    fn save_invalidates_the_conversation_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manager = MemoryManager::new(dir.path()).expect("manager");

        // Prime the cache, then save and expect the fresh turn visible.
        let before = manager.load_context("s1");
        assert_eq!(before.conversation_context["total_turns"], 0);

        manager.save_turn("s1", record("list buckets", "list_buckets", true));
        let after = manager.load_context("s1");
        assert_eq!(after.conversation_context["total_turns"], 1);
    }
}
