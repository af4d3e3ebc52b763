//! Pipeline stages.
//!
//! Each stage is a pure function over the cumulative turn state: it
//! receives the state read-only and returns a partial overlay. Stages
//! never panic a turn; failures become state fields the supervisor and
//! presentation preparer know how to route.

use async_trait::async_trait;

use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{StateUpdate, TurnState};

pub mod codegen;
pub mod executor;
pub mod intent;
pub mod memory_context;
pub mod memory_save;
pub mod normalizer;
pub mod planner;
pub mod presentation;
pub mod retriever;
pub mod templates;
pub mod verifier;

pub use codegen::CodegenNode;
pub use executor::ExecutorNode;
pub use memory_context::MemoryContextNode;
pub use memory_save::MemorySaveNode;
pub use normalizer::NormalizerNode;
pub use planner::PlannerNode;
pub use presentation::PresentationNode;
pub use retriever::RetrieverNode;
pub use verifier::VerifierNode;

/// One runnable stage of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Runs the stage against the cumulative state, returning its overlay.
    async fn run(&self, state: &TurnState) -> StateUpdate;
}

/// Extracts the first JSON object from a model reply, tolerating fences
/// and surrounding prose.
pub(crate) fn json_from_reply(reply: &str) -> Option<serde_json::Value> {
    let stripped = cloudpilot_codegen::strip_fences(reply);
    let object = cloudpilot_codegen::extract_json_object(&stripped)?;
    serde_json::from_str(object).ok()
}
