//! The verification stage: the control gate between code generation and
//! execution.

use async_trait::async_trait;
use tracing::{debug, warn};

use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{ErrorContext, StateUpdate, TurnState};
use cloudpilot_verify::verify_plan;

use crate::nodes::Stage;

/// Statically checks every artifact in the plan. Pass → executor; fail →
/// supervisor with the critique as correction feedback.
pub struct VerifierNode;

#[async_trait]
impl Stage for VerifierNode {
    fn name(&self) -> StageName {
        StageName::Verifier
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        let Some(plan) = &state.plan else {
            return StateUpdate {
                feedback: Some(Some("no plan reached verification".to_string())),
                error_context: Some(Some(ErrorContext::SyntaxError)),
                next_step: Some(StageName::Supervisor),
                ..Default::default()
            }
            .with_last_node(StageName::Verifier);
        };

        let report = verify_plan(plan);
        if report.passed {
            debug!("artifact verification passed");
            return StateUpdate::route(StageName::Executor).with_last_node(StageName::Verifier);
        }

        let critique = report.critique();
        warn!(%critique, "artifact verification failed");
        StateUpdate {
            feedback: Some(Some(critique)),
            error_context: Some(Some(ErrorContext::SyntaxError)),
            next_step: Some(StageName::Supervisor),
            ..Default::default()
        }
        .with_last_node(StageName::Verifier)
    }
}
