//! JSON file store for the memory directory.
//!
//! One file per tier, written atomically (write to a temp file in the same
//! directory, then rename) so readers never observe a half-written file.
//! The store is single-writer per process.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cleanup::trim_history;
use crate::error::MemoryError;
use crate::types::{ErrorSample, TurnRecord};

pub const SHORT_TERM_FILE: &str = "short_term.json";
pub const LONG_TERM_FILE: &str = "long_term.json";
pub const USER_PREFERENCES_FILE: &str = "user_preferences.json";
pub const CONVERSATION_HISTORY_FILE: &str = "conversation_history.json";
pub const ERROR_LEARNING_FILE: &str = "error_learning.json";

/// Retained conversation turns on disk.
pub const MAX_HISTORY_ENTRIES: usize = 50;
/// Retained error-handler success samples on disk.
pub const MAX_ERROR_SAMPLES: usize = 50;

/// Persistent JSON store under a memory directory.
pub struct MemoryStore {
    memory_dir: PathBuf,
}

impl MemoryStore {
    /// Opens (and creates if needed) the memory directory.
    pub fn new(memory_dir: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let memory_dir = memory_dir.into();
        fs::create_dir_all(&memory_dir)?;
        Ok(MemoryStore { memory_dir })
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    pub fn save_short_term(&self, data: &impl Serialize) -> Result<(), MemoryError> {
        self.save_json(SHORT_TERM_FILE, data)
    }

    pub fn load_short_term<T: DeserializeOwned + Default>(&self) -> Result<T, MemoryError> {
        self.load_json(SHORT_TERM_FILE)
    }

    pub fn save_long_term(&self, data: &impl Serialize) -> Result<(), MemoryError> {
        self.save_json(LONG_TERM_FILE, data)
    }

    pub fn load_long_term<T: DeserializeOwned + Default>(&self) -> Result<T, MemoryError> {
        self.load_json(LONG_TERM_FILE)
    }

    pub fn save_user_preferences(
        &self,
        prefs: &Map<String, Value>,
    ) -> Result<(), MemoryError> {
        self.save_json(USER_PREFERENCES_FILE, prefs)
    }

    pub fn load_user_preferences(&self) -> Result<Map<String, Value>, MemoryError> {
        self.load_json(USER_PREFERENCES_FILE)
    }

    /// Appends one turn to the conversation history, keeping the most
    /// recent [`MAX_HISTORY_ENTRIES`].
    pub fn save_conversation_turn(&self, record: TurnRecord) -> Result<(), MemoryError> {
        let mut history = self.load_conversation_history()?;
        history.push(record);
        trim_history(&mut history, MAX_HISTORY_ENTRIES);
        self.save_json(CONVERSATION_HISTORY_FILE, &history)
    }

    pub fn load_conversation_history(&self) -> Result<Vec<TurnRecord>, MemoryError> {
        self.load_json(CONVERSATION_HISTORY_FILE)
    }

    /// Appends one error-handler success sample, keeping the most recent
    /// [`MAX_ERROR_SAMPLES`].
    pub fn append_error_sample(&self, sample: ErrorSample) -> Result<(), MemoryError> {
        let mut samples = self.load_error_samples()?;
        samples.push(sample);
        trim_history(&mut samples, MAX_ERROR_SAMPLES);
        self.save_json(ERROR_LEARNING_FILE, &samples)
    }

    pub fn load_error_samples(&self) -> Result<Vec<ErrorSample>, MemoryError> {
        self.load_json(ERROR_LEARNING_FILE)
    }

    fn save_json(&self, file: &str, data: &impl Serialize) -> Result<(), MemoryError> {
        let path = self.memory_dir.join(file);
        let payload = serde_json::to_vec_pretty(data)?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.memory_dir)?;
        temp.write_all(&payload)?;
        temp.flush()?;
        temp.persist(&path).map_err(|err| MemoryError::Persist {
            path: path.clone(),
            reason: err.error.to_string(),
        })?;
        Ok(())
    }

    fn load_json<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T, MemoryError> {
        let path = self.memory_dir.join(file);
        if !path.exists() {
            return Ok(T::default());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(query: &str) -> TurnRecord {
        TurnRecord {
            timestamp: Utc::now(),
            query: query.to_string(),
            intent: "oci_operation".to_string(),
            action: "list_instances".to_string(),
            parameters: Map::new(),
            result_summary: String::new(),
            success: true,
        }
    }

    #[test]
    fn missing_files_load_as_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::new(dir.path()).expect("store");

        let history = store.load_conversation_history().expect("load");
        assert!(history.is_empty());
        let prefs = store.load_user_preferences().expect("load");
        assert!(prefs.is_empty());
    }

    #[test]
    fn conversation_history_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::new(dir.path()).expect("store");

        store.save_conversation_turn(turn("list buckets")).expect("save");
        store.save_conversation_turn(turn("list instances")).expect("save");

        let history = store.load_conversation_history().expect("load");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].query, "list instances");
    }

    #[test]
    fn history_is_capped_at_fifty_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::new(dir.path()).expect("store");

        for i in 0..60 {
            store
                .save_conversation_turn(turn(&format!("query {i}")))
                .expect("save");
        }

        let history = store.load_conversation_history().expect("load");
        assert_eq!(history.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(history[0].query, "query 10");
        assert_eq!(history.last().expect("non-empty").query, "query 59");
    }

    #[test]
    fn error_samples_are_capped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::new(dir.path()).expect("store");

        for i in 0..55 {
            store
                .append_error_sample(ErrorSample {
                    error: format!("error {i}"),
                    response: "try again".to_string(),
                    stage: "executor".to_string(),
                    timestamp: Utc::now(),
                })
                .expect("append");
        }

        let samples = store.load_error_samples().expect("load");
        assert_eq!(samples.len(), MAX_ERROR_SAMPLES);
        assert_eq!(samples[0].error, "error 5");
    }
}
