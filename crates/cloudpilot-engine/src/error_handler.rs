//! Fast model-authored error explanations.
//!
//! Any stage failure can be turned into two or three sentences of
//! user-facing guidance. Responses that look actionable are appended to a
//! bounded learning log; a failing model degrades to a canned message.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::debug;

use cloudpilot_core::state::TurnState;
use cloudpilot_memory::{ErrorSample, MemoryManager};

use crate::capabilities::{LmCall, Message};

/// The message used when the explanation model itself fails.
pub const FALLBACK_MESSAGE: &str =
    "I encountered an issue while processing your request. Please try again or rephrase your request.";

/// Cues that mark an explanation as actionable enough to learn from.
const GOOD_INDICATORS: &[&str] = &[
    "try",
    "instead",
    "suggest",
    "help",
    "alternative",
    "check",
    "verify",
    "retry",
    "again",
];

/// Produces user-facing guidance for a stage failure.
pub struct FastErrorHandler {
    lm: Arc<dyn LmCall>,
    memory: Arc<Mutex<MemoryManager>>,
}

impl FastErrorHandler {
    pub fn new(lm: Arc<dyn LmCall>, memory: Arc<Mutex<MemoryManager>>) -> Self {
        FastErrorHandler { lm, memory }
    }

    /// Explains one failure in at most three sentences of prose. Never
    /// surfaces stack traces or provider identifiers.
    pub async fn handle(&self, error: &str, state: &TurnState, stage: &str) -> String {
        let prompt = format!(
            "You are a helpful assistant. A user encountered an error while trying to: \"{}\"\n\n\
             Error: {error}\nStage: {stage}\nPrevious step: {}\n\n\
             Provide a brief, helpful response (2-3 sentences max):\n\
             1. What went wrong in simple terms\n\
             2. What they can try instead\n\
             3. Whether they should retry\n\n\
             Be friendly and actionable. Don't mention technical details.",
            state.user_input,
            state
                .last_node
                .map(|stage| stage.as_str())
                .unwrap_or("none"),
        );

        let reply = self
            .lm
            .call(&[Message::user(prompt)], "fast_error_handler", true)
            .await;
        if reply.is_failure() {
            return FALLBACK_MESSAGE.to_string();
        }

        let message = reply.text.trim().to_string();
        if is_good_response(&message) {
            debug!(%stage, "recording error-handler success sample");
            let sample = ErrorSample {
                error: truncate(error, 100),
                response: truncate(&message, 200),
                stage: stage.to_string(),
                timestamp: Utc::now(),
            };
            if let Ok(memory) = self.memory.lock() {
                memory.log_error_sample(sample);
            }
        }
        message
    }
}

fn is_good_response(response: &str) -> bool {
    let lower = response.to_lowercase();
    GOOD_INDICATORS
        .iter()
        .any(|indicator| lower.contains(indicator))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actionable_responses_are_recognized() {
        assert!(is_good_response("You could try listing buckets instead."));
        assert!(is_good_response("Please CHECK your credentials and retry."));
        assert!(!is_good_response("Something went wrong."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 100), "short");
        let truncated = truncate("ééééé", 3);
        assert!(truncated.len() <= 3);
    }
}
