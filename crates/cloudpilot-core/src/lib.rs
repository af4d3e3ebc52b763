pub mod document;
pub mod error;
pub mod plan;
pub mod presentation;
pub mod program;
pub mod results;
pub mod stage;
pub mod state;

// Re-export commonly used types
pub use document::Document;
pub use error::{retryable_error, CoreError};
pub use plan::{FilterKind, FilterOp, MultiStepPlan, Plan, PlanFilter, PlanStep, SafetyTier};
pub use presentation::{OutputFormat, Presentation};
pub use program::{ActionProgram, ProgramStep};
pub use results::{coerce_to_attr_map, AttrMap, ResultItem};
pub use stage::StageName;
pub use state::{
    ChatTurn, DataSource, ErrorContext, ExecutionStrategy, StateUpdate, TurnState,
    MAX_EXECUTION_RETRIES, MAX_PLANNER_RETRIES, MAX_RECURSION, MAX_VERIFY_RETRIES,
};
