//! Turn-exit memory persistence.

use async_trait::async_trait;
use serde_json::Map;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{StateUpdate, TurnState};
use cloudpilot_memory::{MemoryManager, TurnOutcomeRecord};

use crate::nodes::Stage;

/// Persists the turn outcome: conversation history, recent actions, and
/// learned patterns. The terminal stage of every turn.
pub struct MemorySaveNode {
    memory: Arc<Mutex<MemoryManager>>,
}

impl MemorySaveNode {
    pub fn new(memory: Arc<Mutex<MemoryManager>>) -> Self {
        MemorySaveNode { memory }
    }

    fn record_from(state: &TurnState) -> TurnOutcomeRecord {
        let (action, service, parameters) = match &state.plan {
            Some(plan) => {
                let step = plan.steps().next();
                (
                    plan.action().to_string(),
                    step.map(|s| s.service.clone()).unwrap_or_default(),
                    step.map(|s| {
                        s.params
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect()
                    })
                    .unwrap_or_else(Map::new),
                )
            }
            None => (String::new(), String::new(), Map::new()),
        };

        let result_summary = state
            .presentation
            .as_ref()
            .map(|p| p.summary.chars().take(200).collect())
            .unwrap_or_default();
        let success = state.execution_error.is_none()
            && state.plan_error.is_none()
            && !state.action_cancelled
            && state.presentation.as_ref().map(|p| !p.awaits_user_input()).unwrap_or(false);

        TurnOutcomeRecord {
            query: state.user_input.clone(),
            intent: state.intent.clone().unwrap_or_else(|| "oci_operation".to_string()),
            action,
            service,
            parameters,
            result_summary,
            success,
            preferences: None,
        }
    }
}

#[async_trait]
impl Stage for MemorySaveNode {
    fn name(&self) -> StageName {
        StageName::MemorySave
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        let record = Self::record_from(state);
        match self.memory.lock() {
            Ok(mut memory) => {
                memory.save_turn(&state.session_id, record);
                debug!("turn saved to memory");
            }
            Err(_) => warn!("memory manager lock poisoned, turn not saved"),
        }

        // Terminal: no next_step.
        StateUpdate {
            memory_saved: Some(true),
            last_node: Some(StageName::MemorySave),
            ..Default::default()
        }
    }
}
