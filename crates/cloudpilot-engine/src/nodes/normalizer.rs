//! Query normalization and executable-intent routing.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{StateUpdate, TurnState};

use crate::capabilities::{LmCall, Message};
use crate::nodes::{json_from_reply, Stage};
use crate::prompts::PromptLibrary;

/// Normalizes the raw query (typo correction, standardization) and routes:
/// non-executable intents go straight to presentation as general chat,
/// executable ones follow the retrieval toggle.
pub struct NormalizerNode {
    lm: Arc<dyn LmCall>,
    prompts: Arc<PromptLibrary>,
}

impl NormalizerNode {
    pub fn new(lm: Arc<dyn LmCall>, prompts: Arc<PromptLibrary>) -> Self {
        NormalizerNode { lm, prompts }
    }

    fn toggle_route(state: &TurnState) -> StageName {
        if state.use_retrieval {
            StageName::Retriever
        } else {
            StageName::Planner
        }
    }

    fn fallback(state: &TurnState) -> StateUpdate {
        StateUpdate {
            normalized_query: Some(state.user_input.clone()),
            next_step: Some(Self::toggle_route(state)),
            ..Default::default()
        }
        .with_last_node(StageName::Normalizer)
    }
}

#[async_trait]
impl Stage for NormalizerNode {
    fn name(&self) -> StageName {
        StageName::Normalizer
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        let user_input = state.user_input.trim();
        if user_input.is_empty() {
            return StateUpdate::route(StageName::Presentation)
                .with_last_node(StageName::Normalizer);
        }

        let prompt = match self.prompts.load("normalizer") {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(%err, "normalizer prompt missing, using fallback routing");
                return Self::fallback(state);
            }
        };

        let messages = [Message::system(prompt), Message::user(user_input)];
        let reply = self.lm.call(&messages, "normalizer", true).await;
        if reply.is_failure() {
            warn!("normalizer model call failed, using fallback routing");
            return Self::fallback(state);
        }

        let Some(parsed) = json_from_reply(&reply.text) else {
            warn!("normalizer reply had no JSON, using fallback routing");
            return Self::fallback(state);
        };

        let normalized_query = parsed
            .get("normalized_query")
            .and_then(|v| v.as_str())
            .unwrap_or(user_input)
            .to_string();
        let is_executable = parsed
            .get("is_executable")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        debug!(%normalized_query, is_executable, "normalizer decision");

        if !is_executable {
            return StateUpdate {
                user_input: Some(normalized_query.clone()),
                normalized_query: Some(normalized_query),
                intent: Some(Some("general_chat".to_string())),
                next_step: Some(StageName::Presentation),
                ..Default::default()
            }
            .with_last_node(StageName::Normalizer);
        }

        StateUpdate {
            user_input: Some(normalized_query.clone()),
            normalized_query: Some(normalized_query),
            next_step: Some(Self::toggle_route(state)),
            ..Default::default()
        }
        .with_last_node(StageName::Normalizer)
    }
}
