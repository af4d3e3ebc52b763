//! Per-turn agent state and the partial overlays stages emit.
//!
//! The turn state is the authoritative record passed between stages. Each
//! stage receives the cumulative state read-only and returns a
//! [`StateUpdate`] overlay; the graph driver merges overlays in emission
//! order, so later writes win. Fields that a stage may *clear* (not just
//! set) are modelled as `Option<Option<T>>` in the overlay: `None` leaves
//! the field untouched, `Some(None)` clears it, `Some(Some(v))` sets it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::Plan;
use crate::presentation::Presentation;
use crate::results::{AttrMap, ResultItem};
use crate::stage::StageName;

/// Hard cap on stage entries per turn.
pub const MAX_RECURSION: u32 = 20;
/// Verifier-driven codegen retries per plan.
pub const MAX_VERIFY_RETRIES: u32 = 1;
/// Executor-driven codegen retries per plan (retryable errors only).
pub const MAX_EXECUTION_RETRIES: u32 = 1;
/// Planner retries on a planning failure.
pub const MAX_PLANNER_RETRIES: u32 = 1;

/// Strategy the turn ended up executing under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    DirectFetch,
    MultiStep,
    RetrievalChain,
    RetrievalFallbackToPlanner,
    LlmFallback,
}

/// Where the presented data came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    RetrievalCache,
    LiveApi,
}

/// Which kind of failure a codegen correction retry is fixing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorContext {
    SyntaxError,
    RuntimeError,
}

/// One prior exchange in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: String,
    pub text: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        ChatTurn {
            role: role.into(),
            text: text.into(),
        }
    }
}

/// The authoritative per-turn record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnState {
    // Session
    pub user_input: String,
    pub normalized_query: String,
    pub session_id: String,
    pub use_retrieval: bool,
    pub chat_history: Vec<ChatTurn>,
    pub intent: Option<String>,

    // Planning
    pub plan: Option<Plan>,
    pub pending_plan: Option<Plan>,
    pub missing_parameters: Vec<String>,
    pub plan_error: Option<String>,

    // Interaction
    pub requires_confirmation: bool,
    pub confirmation_required: bool,
    pub confirmation_response: Option<String>,
    pub parameter_gathering_required: bool,
    pub parameter_selection_response: Option<String>,
    pub compartment_selection_required: bool,
    pub compartment_data: Option<Vec<AttrMap>>,
    pub action_cancelled: bool,
    pub cancellation_reason: Option<String>,

    // Execution
    pub execution_result: Option<Vec<ResultItem>>,
    pub execution_error: Option<String>,
    pub feedback: Option<String>,
    pub error_context: Option<ErrorContext>,
    pub execution_strategy: Option<ExecutionStrategy>,
    pub data_source: Option<DataSource>,

    // Sub-task dispatch (compartment listing for interactive selection)
    pub sub_task: Option<String>,
    pub sub_task_result: Option<String>,

    // Routing and budgets
    pub last_node: Option<StageName>,
    pub next_step: Option<StageName>,
    pub recursion_count: u32,
    pub max_recursion: u32,
    pub verify_retries: u32,
    pub execution_retries: u32,
    pub planner_retries: u32,

    // Output
    pub presentation: Option<Presentation>,
    pub memory_saved: bool,
    pub timings: IndexMap<String, f64>,

    // Memory context loaded at turn start
    pub conversation_context: Option<Value>,
    pub user_preferences: Option<Value>,
    pub project_context: Option<Value>,
    pub recent_actions: Vec<Value>,
}

impl TurnState {
    pub fn new(
        user_input: impl Into<String>,
        session_id: impl Into<String>,
        use_retrieval: bool,
    ) -> Self {
        TurnState {
            user_input: user_input.into(),
            normalized_query: String::new(),
            session_id: session_id.into(),
            use_retrieval,
            chat_history: Vec::new(),
            intent: None,
            plan: None,
            pending_plan: None,
            missing_parameters: Vec::new(),
            plan_error: None,
            requires_confirmation: false,
            confirmation_required: false,
            confirmation_response: None,
            parameter_gathering_required: false,
            parameter_selection_response: None,
            compartment_selection_required: false,
            compartment_data: None,
            action_cancelled: false,
            cancellation_reason: None,
            execution_result: None,
            execution_error: None,
            feedback: None,
            error_context: None,
            execution_strategy: None,
            data_source: None,
            sub_task: None,
            sub_task_result: None,
            last_node: None,
            next_step: None,
            recursion_count: 0,
            max_recursion: MAX_RECURSION,
            verify_retries: 0,
            execution_retries: 0,
            planner_retries: 0,
            presentation: None,
            memory_saved: false,
            timings: IndexMap::new(),
            conversation_context: None,
            user_preferences: None,
            project_context: None,
            recent_actions: Vec::new(),
        }
    }

    /// The query downstream stages should reason over: the normalized form
    /// when set, the raw input otherwise.
    pub fn effective_query(&self) -> &str {
        if self.normalized_query.is_empty() {
            &self.user_input
        } else {
            &self.normalized_query
        }
    }

    /// Appends a missing parameter, preserving insertion order without
    /// duplicates.
    pub fn push_missing_parameter(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.missing_parameters.contains(&name) {
            self.missing_parameters.push(name);
        }
    }
}

/// The partial overlay one stage emits.
///
/// `Option<Option<T>>` fields distinguish "untouched" from "cleared".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub user_input: Option<String>,
    pub normalized_query: Option<String>,
    pub intent: Option<Option<String>>,

    pub plan: Option<Option<Plan>>,
    pub pending_plan: Option<Option<Plan>>,
    pub missing_parameters: Option<Vec<String>>,
    pub plan_error: Option<Option<String>>,

    pub requires_confirmation: Option<bool>,
    pub confirmation_required: Option<bool>,
    pub confirmation_response: Option<Option<String>>,
    pub parameter_gathering_required: Option<bool>,
    pub parameter_selection_response: Option<Option<String>>,
    pub compartment_selection_required: Option<bool>,
    pub compartment_data: Option<Vec<AttrMap>>,
    pub action_cancelled: Option<bool>,
    pub cancellation_reason: Option<String>,

    pub execution_result: Option<Vec<ResultItem>>,
    pub execution_error: Option<Option<String>>,
    pub feedback: Option<Option<String>>,
    pub error_context: Option<Option<ErrorContext>>,
    pub execution_strategy: Option<ExecutionStrategy>,
    pub data_source: Option<DataSource>,

    pub sub_task: Option<Option<String>>,
    pub sub_task_result: Option<Option<String>>,

    pub last_node: Option<StageName>,
    pub next_step: Option<StageName>,
    pub recursion_count: Option<u32>,
    pub verify_retries: Option<u32>,
    pub execution_retries: Option<u32>,
    pub planner_retries: Option<u32>,

    pub presentation: Option<Presentation>,
    pub memory_saved: Option<bool>,
    /// Per-stage elapsed seconds, appended to the cumulative timings map.
    pub timings: Vec<(String, f64)>,

    pub conversation_context: Option<Value>,
    pub user_preferences: Option<Value>,
    pub project_context: Option<Value>,
    pub recent_actions: Option<Vec<Value>>,
}

impl StateUpdate {
    /// An overlay that only routes to the next stage.
    pub fn route(next: StageName) -> Self {
        StateUpdate {
            next_step: Some(next),
            ..Default::default()
        }
    }

    pub fn with_last_node(mut self, stage: StageName) -> Self {
        self.last_node = Some(stage);
        self
    }

    pub fn with_timing(mut self, stage: impl Into<String>, seconds: f64) -> Self {
        self.timings.push((stage.into(), seconds));
        self
    }

    /// Merges this overlay into the cumulative state. Later writes win.
    pub fn apply(self, state: &mut TurnState) {
        // `set!` assigns the overlay's inner value; for `Option<Option<T>>`
        // overlays over `Option<T>` state fields this makes `Some(None)` a
        // clear. `set_some!` wraps set-only fields.
        macro_rules! set {
            ($field:ident) => {
                if let Some(value) = self.$field {
                    state.$field = value;
                }
            };
        }
        macro_rules! set_some {
            ($field:ident) => {
                if let Some(value) = self.$field {
                    state.$field = Some(value);
                }
            };
        }

        set!(user_input);
        set!(normalized_query);
        set!(intent);

        set!(plan);
        set!(pending_plan);
        set!(missing_parameters);
        set!(plan_error);

        set!(requires_confirmation);
        set!(confirmation_required);
        set!(confirmation_response);
        set!(parameter_gathering_required);
        set!(parameter_selection_response);
        set!(compartment_selection_required);
        set_some!(compartment_data);
        set!(action_cancelled);
        set_some!(cancellation_reason);

        set_some!(execution_result);
        set!(execution_error);
        set!(feedback);
        set!(error_context);
        set_some!(execution_strategy);
        set_some!(data_source);

        set!(sub_task);
        set!(sub_task_result);

        set_some!(last_node);
        set_some!(next_step);
        set!(recursion_count);
        set!(verify_retries);
        set!(execution_retries);
        set!(planner_retries);

        set_some!(presentation);
        set!(memory_saved);
        for (stage, seconds) in self.timings {
            state.timings.insert(stage, seconds);
        }

        set_some!(conversation_context);
        set_some!(user_preferences);
        set_some!(project_context);
        set!(recent_actions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanStep;

    fn base_state() -> TurnState {
        TurnState::new("list running instances", "session-1", false)
    }

    #[test]
    fn untouched_fields_survive_an_overlay() {
        let mut state = base_state();
        state.recursion_count = 3;

        StateUpdate {
            normalized_query: Some("list running instances".to_string()),
            next_step: Some(StageName::Planner),
            ..Default::default()
        }
        .apply(&mut state);

        assert_eq!(state.recursion_count, 3);
        assert_eq!(state.next_step, Some(StageName::Planner));
        assert_eq!(state.normalized_query, "list running instances");
    }

    #[test]
    fn some_none_clears_a_clearable_field() {
        let mut state = base_state();
        state.pending_plan = Some(Plan::Single(PlanStep::new("create_bucket", "objectstorage")));
        state.plan_error = Some("boom".to_string());

        StateUpdate {
            pending_plan: Some(None),
            plan_error: Some(None),
            ..Default::default()
        }
        .apply(&mut state);

        assert!(state.pending_plan.is_none());
        assert!(state.plan_error.is_none());
    }

    #[test]
    fn later_overlays_win() {
        let mut state = base_state();
        StateUpdate {
            next_step: Some(StageName::Planner),
            ..Default::default()
        }
        .apply(&mut state);
        StateUpdate {
            next_step: Some(StageName::Codegen),
            ..Default::default()
        }
        .apply(&mut state);
        assert_eq!(state.next_step, Some(StageName::Codegen));
    }

    #[test]
    fn timings_accumulate_across_overlays() {
        let mut state = base_state();
        StateUpdate::default()
            .with_timing("planner", 1.5)
            .apply(&mut state);
        StateUpdate::default()
            .with_timing("codegen", 0.8)
            .apply(&mut state);

        assert_eq!(state.timings.len(), 2);
        assert_eq!(state.timings["planner"], 1.5);
        assert_eq!(state.timings["codegen"], 0.8);
    }

    #[test]
    fn push_missing_parameter_preserves_order_without_duplicates() {
        let mut state = base_state();
        state.push_missing_parameter("compartment_id");
        state.push_missing_parameter("name");
        state.push_missing_parameter("compartment_id");
        assert_eq!(state.missing_parameters, vec!["compartment_id", "name"]);
    }

    #[test]
    fn effective_query_prefers_the_normalized_form() {
        let mut state = base_state();
        assert_eq!(state.effective_query(), "list running instances");
        state.normalized_query = "list instances where lifecycle_state == RUNNING".to_string();
        assert_eq!(
            state.effective_query(),
            "list instances where lifecycle_state == RUNNING"
        );
    }
}
