//! Short-term session memory: bounded ring buffers over the current
//! conversation.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ActionRecord, TurnRecord};

/// Turns kept in the session buffer.
pub const MAX_TURNS: usize = 20;
/// Actions kept in the session buffer.
pub const MAX_ACTIONS: usize = 10;
/// Turns and actions surfaced as recent context.
pub const RECENT_WINDOW: usize = 5;

/// Serializable snapshot of the short-term tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShortTermSnapshot {
    #[serde(default)]
    pub conversation_history: Vec<TurnRecord>,
    #[serde(default)]
    pub recent_actions: Vec<ActionRecord>,
    #[serde(default)]
    pub current_context: Map<String, Value>,
}

/// Context summary handed to the supervisor and presentation stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationContext {
    pub recent_turns: Vec<TurnRecord>,
    pub total_turns: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_start: Option<DateTime<Utc>>,
}

/// Bounded in-process session memory.
#[derive(Debug, Default)]
pub struct ShortTermMemory {
    conversation_history: VecDeque<TurnRecord>,
    recent_actions: VecDeque<ActionRecord>,
    current_context: Map<String, Value>,
}

impl ShortTermMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_turn(&mut self, turn: TurnRecord) {
        self.conversation_history.push_back(turn);
        while self.conversation_history.len() > MAX_TURNS {
            self.conversation_history.pop_front();
        }
    }

    pub fn add_action(&mut self, action: ActionRecord) {
        self.recent_actions.push_back(action);
        while self.recent_actions.len() > MAX_ACTIONS {
            self.recent_actions.pop_front();
        }
    }

    /// The last [`RECENT_WINDOW`] turns with session metadata.
    pub fn conversation_context(&self) -> ConversationContext {
        let recent_turns = self
            .conversation_history
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .rev()
            .cloned()
            .collect();
        ConversationContext {
            recent_turns,
            total_turns: self.conversation_history.len(),
            session_start: self.conversation_history.front().map(|t| t.timestamp),
        }
    }

    /// The last [`RECENT_WINDOW`] actions.
    pub fn recent_actions(&self) -> Vec<ActionRecord> {
        self.recent_actions
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .rev()
            .cloned()
            .collect()
    }

    pub fn update_context(&mut self, context: Map<String, Value>) {
        self.current_context.extend(context);
    }

    pub fn clear_session(&mut self) {
        self.conversation_history.clear();
        self.recent_actions.clear();
        self.current_context.clear();
    }

    pub fn snapshot(&self) -> ShortTermSnapshot {
        ShortTermSnapshot {
            conversation_history: self.conversation_history.iter().cloned().collect(),
            recent_actions: self.recent_actions.iter().cloned().collect(),
            current_context: self.current_context.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: ShortTermSnapshot) {
        self.conversation_history = snapshot.conversation_history.into();
        self.recent_actions = snapshot.recent_actions.into();
        self.current_context = snapshot.current_context;
        while self.conversation_history.len() > MAX_TURNS {
            self.conversation_history.pop_front();
        }
        while self.recent_actions.len() > MAX_ACTIONS {
            self.recent_actions.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(query: &str) -> TurnRecord {
        TurnRecord {
            timestamp: Utc::now(),
            query: query.to_string(),
            intent: String::new(),
            action: String::new(),
            parameters: Map::new(),
            result_summary: String::new(),
            success: true,
        }
    }

    #[test]
    fn turn_buffer_keeps_only_the_last_twenty() {
        let mut memory = ShortTermMemory::new();
        for i in 0..25 {
            memory.add_turn(turn(&format!("query {i}")));
        }
        let context = memory.conversation_context();
        assert_eq!(context.total_turns, MAX_TURNS);
        assert_eq!(context.recent_turns.len(), RECENT_WINDOW);
        assert_eq!(context.recent_turns.last().expect("turns").query, "query 24");
    }

    #[test]
    fn action_buffer_keeps_only_the_last_ten() {
        let mut memory = ShortTermMemory::new();
        for i in 0..15 {
            memory.add_action(ActionRecord {
                timestamp: Utc::now(),
                action: format!("action {i}"),
                service: "compute".to_string(),
                success: true,
            });
        }
        let recent = memory.recent_actions();
        assert_eq!(recent.len(), RECENT_WINDOW);
        assert_eq!(recent.last().expect("actions").action, "action 14");
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut memory = ShortTermMemory::new();
        memory.add_turn(turn("list buckets"));
        let snapshot = memory.snapshot();

        let mut restored = ShortTermMemory::new();
        restored.restore(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn clear_session_empties_all_buffers() {
        let mut memory = ShortTermMemory::new();
        memory.add_turn(turn("list buckets"));
        memory.clear_session();
        assert_eq!(memory.conversation_context().total_turns, 0);
        assert!(memory.recent_actions().is_empty());
    }
}
