//! Memory-file aging and history trimming.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// Memory files older than this are pruned.
pub const MAX_FILE_AGE_DAYS: i64 = 30;

/// Removes JSON memory files whose modification time is older than
/// `max_age_days`. Returns the number of files removed; failures are
/// logged and skipped.
pub fn prune_aged_files(memory_dir: &Path, max_age_days: i64) -> usize {
    let cutoff = Utc::now() - Duration::days(max_age_days);
    let entries = match fs::read_dir(memory_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %memory_dir.display(), %err, "memory cleanup skipped");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(modified) = entry
            .metadata()
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(DateTime::<Utc>::from)
        else {
            continue;
        };
        if modified < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(file = %path.display(), "pruned aged memory file");
                    removed += 1;
                }
                Err(err) => warn!(file = %path.display(), %err, "failed to prune memory file"),
            }
        }
    }
    removed
}

/// Keeps only the most recent `max_entries` items of a history list.
pub fn trim_history<T>(history: &mut Vec<T>, max_entries: usize) {
    if history.len() > max_entries {
        let excess = history.len() - max_entries;
        history.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_keeps_the_most_recent_entries() {
        let mut history: Vec<u32> = (0..60).collect();
        trim_history(&mut history, 50);
        assert_eq!(history.len(), 50);
        assert_eq!(history[0], 10);
        assert_eq!(*history.last().expect("non-empty"), 59);
    }

    #[test]
    fn trim_leaves_short_histories_alone() {
        let mut history = vec![1, 2, 3];
        trim_history(&mut history, 50);
        assert_eq!(history, vec![1, 2, 3]);
    }

    #[test]
    fn prune_ignores_fresh_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("short_term.json"), "{}").expect("write");
        fs::write(dir.path().join("notes.txt"), "keep").expect("write");

        let removed = prune_aged_files(dir.path(), MAX_FILE_AGE_DAYS);
        assert_eq!(removed, 0);
        assert!(dir.path().join("short_term.json").exists());
    }
}
