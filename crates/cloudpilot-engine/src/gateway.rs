//! Language-model gateway: per-stage model tiers, an ordered provider
//! fallback chain, and per-call timing.
//!
//! Providers expose an OpenAI-compatible `/chat/completions` endpoint.
//! Rate-limit signatures trigger early rotation to the next provider; a
//! provider that rate-limits is demoted for the rest of the session. When
//! every provider fails the gateway returns the `[ERROR: …]` sentinel,
//! which callers must treat as a stage failure.

use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::capabilities::{LmCall, LmReply, Message};

/// Textual signatures that mean "rotate providers now".
const RATE_LIMIT_SIGNATURES: &[&str] = &["resource_exhausted", "429", "quota"];

/// Model tier a stage runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Powerful,
}

/// The tier each stage declares. Planning, code generation and the final
/// summary need the powerful tier; classification-style stages run fast.
pub fn stage_tier(stage: &str) -> ModelTier {
    match stage {
        "normalizer"
        | "intent_analyzer"
        | "retriever_intent"
        | "supervisor"
        | "parameter_extraction"
        | "fast_error_handler" => ModelTier::Fast,
        _ => ModelTier::Powerful,
    }
}

/// One provider endpoint with its model pair.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub fast_model: String,
    pub powerful_model: String,
}

impl ProviderConfig {
    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Powerful => &self.powerful_model,
        }
    }
}

/// The provider chain behind the [`LmCall`] capability.
pub struct LmGateway {
    providers: Vec<ProviderConfig>,
    http: reqwest::Client,
    demoted: DashMap<String, ()>,
}

impl LmGateway {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        LmGateway {
            providers,
            http: reqwest::Client::new(),
            demoted: DashMap::new(),
        }
    }

    /// Providers in call order: healthy ones first, demoted ones as a
    /// second chance.
    fn ordered_providers(&self) -> Vec<&ProviderConfig> {
        let (healthy, demoted): (Vec<_>, Vec<_>) = self
            .providers
            .iter()
            .partition(|p| !self.demoted.contains_key(&p.name));
        healthy.into_iter().chain(demoted).collect()
    }

    async fn chat_once(
        &self,
        provider: &ProviderConfig,
        model: &str,
        messages: &[Message],
    ) -> Result<String, String> {
        let endpoint = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));
        let body = json!({
            "model": model,
            "messages": messages,
        });

        let response = self
            .http
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", provider.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| format!("response read failed: {err}"))?;

        if !status.is_success() {
            return Err(format!("provider returned {status}: {text}"));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|err| format!("response parse failed: {err}"))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| "response missing assistant content".to_string())
    }
}

fn is_rate_limited(error: &str) -> bool {
    let lower = error.to_lowercase();
    RATE_LIMIT_SIGNATURES
        .iter()
        .any(|signature| lower.contains(signature))
}

#[async_trait]
impl LmCall for LmGateway {
    async fn call(&self, messages: &[Message], stage: &str, use_fast: bool) -> LmReply {
        let started = Instant::now();
        let tier = if use_fast {
            ModelTier::Fast
        } else {
            stage_tier(stage)
        };

        let mut last_error = "no providers configured".to_string();
        for provider in self.ordered_providers() {
            let model = provider.model_for(tier);
            debug!(provider = %provider.name, %model, %stage, "language-model call");
            match self.chat_once(provider, model, messages).await {
                Ok(text) => {
                    return LmReply {
                        text,
                        seconds: started.elapsed().as_secs_f64(),
                    }
                }
                Err(err) => {
                    if is_rate_limited(&err) {
                        warn!(provider = %provider.name, %stage, "provider rate limited, rotating");
                        self.demoted.insert(provider.name.clone(), ());
                    } else {
                        warn!(provider = %provider.name, %stage, %err, "provider call failed");
                    }
                    last_error = format!("{}: {err}", provider.name);
                }
            }
        }

        LmReply {
            text: format!("[ERROR: all providers failed for stage '{stage}': {last_error}]"),
            seconds: started.elapsed().as_secs_f64(),
        }
    }
}

/// OpenAI-compatible embedding client behind the [`Embedder`] capability.
pub struct EmbeddingClient {
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        EmbeddingClient {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::capabilities::Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::error::EngineError> {
        let endpoint = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({"model": self.model, "input": text}))
            .send()
            .await
            .map_err(|err| crate::error::EngineError::Embedding(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(crate::error::EngineError::Embedding(format!(
                "provider returned {status}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| crate::error::EngineError::Embedding(err.to_string()))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| {
                crate::error::EngineError::Embedding("response carried no embedding".to_string())
            })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tiers_split_fast_and_powerful() {
        assert_eq!(stage_tier("normalizer"), ModelTier::Fast);
        assert_eq!(stage_tier("fast_error_handler"), ModelTier::Fast);
        assert_eq!(stage_tier("planner"), ModelTier::Powerful);
        assert_eq!(stage_tier("codegen"), ModelTier::Powerful);
        assert_eq!(stage_tier("final_presentation_summary"), ModelTier::Powerful);
    }

    #[test]
    fn rate_limit_signatures_match_case_insensitively() {
        assert!(is_rate_limited("HTTP 429 Too Many Requests"));
        assert!(is_rate_limited("RESOURCE_EXHAUSTED: try later"));
        assert!(is_rate_limited("daily quota exceeded"));
        assert!(!is_rate_limited("connection refused"));
    }

    #[tokio::test]
    async fn empty_chain_returns_the_sentinel() {
        let gateway = LmGateway::new(Vec::new());
        let reply = gateway
            .call(&[Message::user("hello")], "planner", false)
            .await;
        assert!(reply.is_failure());
        assert!(reply.text.contains("planner"));
    }
}
