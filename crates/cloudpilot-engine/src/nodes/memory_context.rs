//! Turn-entry memory loading.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::debug;

use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{StateUpdate, TurnState};
use cloudpilot_memory::MemoryManager;

use crate::nodes::Stage;

/// Loads conversation context, preferences and recent actions before the
/// supervisor runs. Memory failures surface as empty context, never as a
/// turn failure.
pub struct MemoryContextNode {
    memory: Arc<Mutex<MemoryManager>>,
}

impl MemoryContextNode {
    pub fn new(memory: Arc<Mutex<MemoryManager>>) -> Self {
        MemoryContextNode { memory }
    }
}

#[async_trait]
impl Stage for MemoryContextNode {
    fn name(&self) -> StageName {
        StageName::MemoryContext
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        let context = match self.memory.lock() {
            Ok(mut memory) => memory.load_context(&state.session_id),
            Err(_) => Default::default(),
        };
        debug!(
            recent_actions = context.recent_actions.len(),
            "memory context loaded"
        );

        // Deliberately leaves last_node untouched: the supervisor treats
        // an absent last_node as the start of a fresh turn.
        StateUpdate {
            conversation_context: Some(context.conversation_context),
            user_preferences: Some(context.user_preferences),
            project_context: Some(context.project_context),
            recent_actions: Some(context.recent_actions),
            next_step: Some(StageName::Supervisor),
            ..Default::default()
        }
    }
}
