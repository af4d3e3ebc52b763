//! The code-generation stage: turns the active plan into action-program
//! artifacts, batching same-action multi-step plans.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use cloudpilot_codegen::{
    batch_program, batchable, build_codegen_prompt, finalize_program, CorrectionKind,
};
use cloudpilot_core::plan::{Plan, PlanStep, SafetyTier};
use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{ErrorContext, StateUpdate, TurnState};

use crate::capabilities::{CloudConfig, LmCall, Message};
use crate::nodes::Stage;
use crate::prompts::PromptLibrary;

/// Generates executable artifacts for the plan and routes to the verifier.
pub struct CodegenNode {
    lm: Arc<dyn LmCall>,
    prompts: Arc<PromptLibrary>,
    config: Arc<CloudConfig>,
}

impl CodegenNode {
    pub fn new(
        lm: Arc<dyn LmCall>,
        prompts: Arc<PromptLibrary>,
        config: Arc<CloudConfig>,
    ) -> Self {
        CodegenNode {
            lm,
            prompts,
            config,
        }
    }

    fn failure(message: String) -> StateUpdate {
        warn!(%message, "code generation failed");
        StateUpdate {
            plan_error: Some(Some(message)),
            next_step: Some(StageName::Supervisor),
            ..Default::default()
        }
        .with_last_node(StageName::Codegen)
    }

    fn correction(state: &TurnState) -> Option<(CorrectionKind, &str)> {
        let feedback = state.feedback.as_deref()?;
        let kind = match state.error_context {
            Some(ErrorContext::SyntaxError) => CorrectionKind::Syntax,
            Some(ErrorContext::RuntimeError) | None => CorrectionKind::Runtime,
        };
        Some((kind, feedback))
    }

    /// One model round trip for one step, followed by finalization.
    async fn generate_step(
        &self,
        step: &mut PlanStep,
        state: &TurnState,
        multi_step: bool,
    ) -> Result<(), String> {
        let (base, service_section) = self.prompts.codegen_prompts(&step.service);
        let prompt = build_codegen_prompt(
            &base,
            service_section.as_deref(),
            step,
            &state.user_input,
            multi_step,
            Self::correction(state),
        );

        let messages = [
            Message::system(prompt),
            Message::user(format!(
                "Generate the action program for '{}' with params {}. User wants: {}",
                step.action,
                serde_json::to_string(&step.params).unwrap_or_default(),
                state.user_input
            )),
        ];
        let reply = self.lm.call(&messages, "codegen", false).await;
        if reply.is_failure() {
            return Err(reply.text);
        }

        let program = finalize_program(&reply.text, step, &self.config.tenancy)
            .map_err(|err| err.to_string())?;
        step.artifact = Some(program);
        Ok(())
    }
}

#[async_trait]
impl Stage for CodegenNode {
    fn name(&self) -> StageName {
        StageName::Codegen
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        let Some(plan) = state.plan.clone() else {
            return Self::failure("no plan available for code generation".to_string());
        };

        // A regeneration (correction feedback present) always re-emits
        // artifacts; otherwise an already-generated plan passes through.
        if state.feedback.is_none() && plan.steps().all(|step| step.artifact.is_some()) {
            return StateUpdate::route(StageName::Verifier).with_last_node(StageName::Codegen);
        }

        let generated = match plan {
            Plan::Multi(multi) if batchable(&multi.steps) => {
                debug!(steps = multi.steps.len(), "batching same-action multi-step plan");
                match batch_program(&multi.steps, &self.config.tenancy) {
                    Ok(program) => {
                        let first = &multi.steps[0];
                        let mut batched = PlanStep {
                            action: format!("batch_{}", first.action),
                            service: first.service.clone(),
                            params: first.params.clone(),
                            safety_tier: SafetyTier::Destructive,
                            requires_confirmation: multi.requires_confirmation,
                            ..Default::default()
                        };
                        batched.artifact = Some(program);
                        Plan::Single(batched)
                    }
                    Err(err) => return Self::failure(err.to_string()),
                }
            }
            Plan::Multi(mut multi) => {
                for (index, step) in multi.steps.iter_mut().enumerate() {
                    if let Err(err) = self.generate_step(step, state, true).await {
                        return Self::failure(format!("step {} codegen failed: {err}", index + 1));
                    }
                }
                Plan::Multi(multi)
            }
            Plan::Single(mut step) => {
                if let Err(err) = self.generate_step(&mut step, state, false).await {
                    return Self::failure(err);
                }
                Plan::Single(step)
            }
        };

        StateUpdate {
            plan: Some(Some(generated)),
            plan_error: Some(None),
            feedback: Some(None),
            error_context: Some(None),
            next_step: Some(StageName::Verifier),
            ..Default::default()
        }
        .with_last_node(StageName::Codegen)
    }
}
