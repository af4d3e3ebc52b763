//! The supervisor: the deterministic central router of the turn.
//!
//! Every routing decision is a table over `(last_node, state)`: fresh
//! turns start the pipeline, planner output is gated on missing
//! parameters and confirmation, user replies resume suspended plans, and
//! the verifier/executor retry budgets are spent here. The recursion
//! guard runs on every entry.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use cloudpilot_core::error::retryable_error;
use cloudpilot_core::plan::Plan;
use cloudpilot_core::presentation::Presentation;
use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{
    ErrorContext, StateUpdate, TurnState, MAX_EXECUTION_RETRIES, MAX_PLANNER_RETRIES,
    MAX_VERIFY_RETRIES,
};

use crate::capabilities::LmCall;
use crate::nodes::planner::compute_missing;
use crate::nodes::presentation::parse_parameter_response;
use crate::nodes::Stage;

/// Replies that confirm a destructive operation.
const AFFIRMATIVE_RESPONSES: &[&str] = &["yes", "y", "confirm", "proceed"];

/// The diagnostic shown when the recursion cap is reached.
pub const RECURSION_LIMIT_MESSAGE: &str =
    "I've reached the maximum processing limit. Please try a simpler request or restart the conversation.";

pub struct Supervisor {
    lm: Arc<dyn LmCall>,
}

impl Supervisor {
    pub fn new(lm: Arc<dyn LmCall>) -> Self {
        Supervisor { lm }
    }

    fn is_affirmative(response: &str) -> bool {
        let normalized = response.trim().to_lowercase();
        AFFIRMATIVE_RESPONSES.contains(&normalized.as_str())
    }

    /// Fresh turn: clear any interactive leftovers and start the pipeline.
    fn fresh_turn(update: StateUpdate) -> StateUpdate {
        StateUpdate {
            pending_plan: Some(None),
            missing_parameters: Some(Vec::new()),
            parameter_gathering_required: Some(false),
            compartment_selection_required: Some(false),
            confirmation_required: Some(false),
            sub_task: Some(None),
            next_step: Some(StageName::Normalizer),
            ..update
        }
    }

    /// Routing after the planner reported, including the single planner
    /// retry and the parameter/confirmation gate.
    fn after_planner(&self, state: &TurnState, update: StateUpdate) -> StateUpdate {
        if state.plan_error.is_some() || state.plan.is_none() {
            if state.planner_retries < MAX_PLANNER_RETRIES {
                debug!("planning failed, retrying once");
                return StateUpdate {
                    planner_retries: Some(state.planner_retries + 1),
                    plan_error: Some(None),
                    next_step: Some(StageName::Planner),
                    ..update
                };
            }
            return StateUpdate {
                next_step: Some(StageName::Presentation),
                ..update
            };
        }

        let plan = state.plan.as_ref().expect("plan present");
        let missing = plan.missing_parameters().to_vec();
        let gate_on_missing =
            !missing.is_empty() && (plan.action().starts_with("create_") || plan.is_multi());

        if gate_on_missing {
            if missing == ["compartment_id"] {
                debug!("sole missing compartment_id, dispatching listing sub-task");
                return StateUpdate {
                    pending_plan: Some(Some(plan.clone())),
                    missing_parameters: Some(missing),
                    sub_task: Some(Some("list_compartments".to_string())),
                    next_step: Some(StageName::Planner),
                    ..update
                };
            }
            debug!(?missing, "routing to parameter gathering");
            return StateUpdate {
                pending_plan: Some(Some(plan.clone())),
                missing_parameters: Some(missing),
                parameter_gathering_required: Some(true),
                next_step: Some(StageName::Presentation),
                ..update
            };
        }

        if plan.requires_confirmation() {
            debug!("routing to confirmation");
            return StateUpdate {
                pending_plan: Some(Some(plan.clone())),
                confirmation_required: Some(true),
                next_step: Some(StageName::Presentation),
                ..update
            };
        }

        StateUpdate {
            next_step: Some(StageName::Codegen),
            ..update
        }
    }

    /// A reply arrived for a suspended turn.
    async fn after_presentation(&self, state: &TurnState, update: StateUpdate) -> StateUpdate {
        if let Some(response) = &state.confirmation_response {
            if Self::is_affirmative(response) {
                debug!("confirmation accepted, promoting pending plan");
                let mut plan = state.pending_plan.clone();
                if let Some(plan) = plan.as_mut() {
                    match plan {
                        Plan::Single(step) => step.requires_confirmation = false,
                        Plan::Multi(multi) => multi.requires_confirmation = false,
                    }
                }
                return StateUpdate {
                    plan: Some(plan),
                    pending_plan: Some(None),
                    confirmation_response: Some(None),
                    confirmation_required: Some(false),
                    requires_confirmation: Some(false),
                    next_step: Some(StageName::Codegen),
                    ..update
                };
            }
            debug!("confirmation declined, cancelling");
            return StateUpdate {
                action_cancelled: Some(true),
                cancellation_reason: Some("You declined the confirmation.".to_string()),
                confirmation_response: Some(None),
                confirmation_required: Some(false),
                pending_plan: Some(None),
                next_step: Some(StageName::Presentation),
                ..update
            };
        }

        if let Some(response) = state.parameter_selection_response.clone() {
            return self.merge_parameters(state, &response, update).await;
        }

        // Nothing interactive pending: start over.
        Self::fresh_turn(update)
    }

    /// Merges a parameter reply into the pending plan and re-gates.
    async fn merge_parameters(
        &self,
        state: &TurnState,
        response: &str,
        update: StateUpdate,
    ) -> StateUpdate {
        let Some(mut plan) = state.pending_plan.clone() else {
            return Self::fresh_turn(update);
        };

        let extracted = parse_parameter_response(
            response,
            &state.missing_parameters,
            state.compartment_data.as_deref(),
            self.lm.as_ref(),
        )
        .await;
        debug!(count = extracted.len(), "merged parameters from reply");

        for step in plan.steps_mut() {
            for (key, value) in &extracted {
                if !step.params.contains_key(key) && !value.is_null() {
                    step.params.insert(key.clone(), value.clone());
                }
            }
        }

        let missing = compute_missing(&plan);
        plan.set_missing_parameters(missing.clone());

        if !missing.is_empty() {
            return StateUpdate {
                pending_plan: Some(Some(plan)),
                missing_parameters: Some(missing),
                parameter_selection_response: Some(None),
                parameter_gathering_required: Some(true),
                compartment_selection_required: Some(false),
                next_step: Some(StageName::Presentation),
                ..update
            };
        }

        if plan.requires_confirmation() {
            return StateUpdate {
                pending_plan: Some(Some(plan)),
                missing_parameters: Some(Vec::new()),
                parameter_selection_response: Some(None),
                parameter_gathering_required: Some(false),
                compartment_selection_required: Some(false),
                confirmation_required: Some(true),
                next_step: Some(StageName::Presentation),
                ..update
            };
        }

        StateUpdate {
            plan: Some(Some(plan)),
            pending_plan: Some(None),
            missing_parameters: Some(Vec::new()),
            parameter_selection_response: Some(None),
            parameter_gathering_required: Some(false),
            compartment_selection_required: Some(false),
            next_step: Some(StageName::Codegen),
            ..update
        }
    }

    /// Verifier failure: spend the verify budget or surface the critique.
    fn after_verifier(state: &TurnState, update: StateUpdate) -> StateUpdate {
        if state.feedback.is_none() {
            return StateUpdate {
                next_step: Some(StageName::Executor),
                ..update
            };
        }
        if state.verify_retries < MAX_VERIFY_RETRIES {
            debug!("verification failed, regenerating once");
            return StateUpdate {
                verify_retries: Some(state.verify_retries + 1),
                next_step: Some(StageName::Codegen),
                ..update
            };
        }
        warn!("verification retry budget exhausted");
        StateUpdate {
            execution_error: Some(state.feedback.clone().map(|critique| {
                format!("generated program failed verification: {critique}")
            })),
            feedback: Some(None),
            error_context: Some(None),
            next_step: Some(StageName::Presentation),
            ..update
        }
    }

    /// Executor failure: retry retryable errors once, surface the rest.
    fn after_executor(state: &TurnState, update: StateUpdate) -> StateUpdate {
        let Some(error) = &state.execution_error else {
            return StateUpdate {
                next_step: Some(StageName::Presentation),
                ..update
            };
        };
        if retryable_error(error) && state.execution_retries < MAX_EXECUTION_RETRIES {
            debug!(%error, "retryable execution error, regenerating once");
            return StateUpdate {
                execution_retries: Some(state.execution_retries + 1),
                feedback: Some(Some(error.clone())),
                error_context: Some(Some(ErrorContext::RuntimeError)),
                execution_error: Some(None),
                next_step: Some(StageName::Codegen),
                ..update
            };
        }
        debug!(%error, "surfacing execution error");
        StateUpdate {
            next_step: Some(StageName::Presentation),
            ..update
        }
    }
}

#[async_trait]
impl Stage for Supervisor {
    fn name(&self) -> StageName {
        StageName::Supervisor
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        let recursion_count = state.recursion_count + 1;
        let update = StateUpdate {
            recursion_count: Some(recursion_count),
            ..Default::default()
        };

        if recursion_count >= state.max_recursion {
            warn!(recursion_count, "recursion limit reached, forcing end");
            return StateUpdate {
                presentation: Some(Presentation::chat(RECURSION_LIMIT_MESSAGE)),
                last_node: Some(StageName::Supervisor),
                next_step: Some(StageName::Presentation),
                ..update
            };
        }

        match state.last_node {
            None => Self::fresh_turn(update),
            Some(StageName::Normalizer) => {
                // The normalizer routes directly; respect a decision that
                // arrives here instead.
                if state.intent.as_deref() == Some("general_chat") {
                    StateUpdate {
                        next_step: Some(StageName::Presentation),
                        ..update
                    }
                } else if state.use_retrieval {
                    StateUpdate {
                        next_step: Some(StageName::Retriever),
                        ..update
                    }
                } else {
                    StateUpdate {
                        next_step: Some(StageName::Planner),
                        ..update
                    }
                }
            }
            Some(StageName::Planner) => self.after_planner(state, update),
            Some(StageName::Presentation) => self.after_presentation(state, update).await,
            Some(StageName::Verifier) => Self::after_verifier(state, update),
            Some(StageName::Executor) => Self::after_executor(state, update),
            Some(StageName::Codegen) => {
                // Codegen reports here only on failure.
                if state.plan_error.is_some() {
                    self.after_planner(state, update)
                } else {
                    StateUpdate {
                        next_step: Some(StageName::Verifier),
                        ..update
                    }
                }
            }
            _ => StateUpdate {
                next_step: Some(StageName::Presentation),
                ..update
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affirmative_tokens_are_recognized() {
        for token in ["yes", "Y", "  CONFIRM  ", "proceed"] {
            assert!(Supervisor::is_affirmative(token), "{token}");
        }
        for token in ["no", "nope", "cancel", "yess"] {
            assert!(!Supervisor::is_affirmative(token), "{token}");
        }
    }
}
