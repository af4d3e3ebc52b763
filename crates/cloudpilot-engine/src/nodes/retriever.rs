//! The retrieval path: intent-filtered semantic search over previously
//! indexed tenancy documents, with a planner fallback on miss.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use cloudpilot_core::results::ResultItem;
use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{DataSource, ExecutionStrategy, StateUpdate, TurnState};

use crate::capabilities::{Embedder, LmCall, Message, MetadataFilter, OperationRef, VectorStore};
use crate::nodes::Stage;

/// Documents requested per search.
const TOP_K: usize = 5;

/// The closed intent label set and the operations each maps to.
const INTENT_OPERATIONS: &[(&str, &[&str])] = &[
    ("list users", &["identity.list_users"]),
    ("list groups", &["identity.list_groups"]),
    ("list policies", &["identity.list_policies"]),
    ("list instances", &["compute.list_instances"]),
    (
        "list volumes",
        &["blockstorage.list_volumes", "blockstorage.list_boot_volumes"],
    ),
    ("list buckets", &["objectstorage.list_buckets"]),
    ("list vcns", &["virtualnetwork.list_vcns"]),
    ("list subnets", &["virtualnetwork.list_subnets"]),
    ("list security lists", &["virtualnetwork.list_security_lists"]),
    ("list route tables", &["virtualnetwork.list_route_tables"]),
    ("list load balancers", &["loadbalancer.list_load_balancers"]),
];

/// Answers from the document index when it can, otherwise falls back to
/// live planning while preserving the normalized query.
pub struct RetrieverNode {
    lm: Arc<dyn LmCall>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl RetrieverNode {
    pub fn new(
        lm: Arc<dyn LmCall>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        RetrieverNode {
            lm,
            embedder,
            store,
        }
    }

    /// Asks the model to pick at most one label from the closed set and
    /// builds the exact metadata filter for it. Any failure degrades to an
    /// unfiltered search.
    async fn intent_filter(&self, query: &str) -> Option<MetadataFilter> {
        let labels: Vec<&str> = INTENT_OPERATIONS.iter().map(|(label, _)| *label).collect();
        let prompt = format!(
            "Given the user's query, find the single best matching intent from the list.\n\
             Respond with ONLY the intent string, for example: 'list instances'.\n\
             If no clear match exists, respond with \"None\".\n\n\
             User query: \"{query}\"\n\nPossible intents:\n{}",
            serde_json::to_string_pretty(&labels).unwrap_or_default()
        );
        let messages = [
            Message::system("You are an expert at matching user queries to predefined intents."),
            Message::user(prompt),
        ];

        let reply = self.lm.call(&messages, "retriever_intent", true).await;
        if reply.is_failure() {
            warn!("retrieval intent model failed, searching unfiltered");
            return None;
        }

        let matched = reply.text.trim().trim_matches('"').trim_matches('\'').to_lowercase();
        if matched == "none" {
            debug!("no retrieval intent matched");
            return None;
        }

        let operations = INTENT_OPERATIONS
            .iter()
            .find(|(label, _)| *label == matched)?
            .1
            .iter()
            .filter_map(|label| OperationRef::parse(label))
            .collect::<Vec<_>>();
        if operations.is_empty() {
            return None;
        }
        debug!(intent = %matched, "retrieval intent matched");
        Some(MetadataFilter { operations })
    }

    fn planner_fallback(state: &TurnState) -> StateUpdate {
        StateUpdate {
            normalized_query: Some(state.effective_query().to_string()),
            execution_strategy: Some(ExecutionStrategy::RetrievalFallbackToPlanner),
            next_step: Some(StageName::Planner),
            ..Default::default()
        }
        .with_last_node(StageName::Retriever)
    }
}

#[async_trait]
impl Stage for RetrieverNode {
    fn name(&self) -> StageName {
        StageName::Retriever
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        let query = state.effective_query().to_string();
        if query.trim().is_empty() {
            return Self::planner_fallback(state);
        }

        let filter = self.intent_filter(&query).await;

        let embedding = match self.embedder.embed(&query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(%err, "query embedding failed, falling back to planner");
                return Self::planner_fallback(state);
            }
        };

        let results = match self.store.search(&embedding, TOP_K, filter.as_ref()).await {
            Ok(results) => results,
            Err(err) => {
                warn!(%err, "vector search failed, falling back to planner");
                return Self::planner_fallback(state);
            }
        };

        // A hit is any non-empty document; relevance is not thresholded.
        let found = results
            .documents
            .iter()
            .any(|doc| !doc.trim().is_empty());
        debug!(count = results.documents.len(), found, "retrieval search complete");

        if !found {
            return Self::planner_fallback(state);
        }

        let items: Vec<ResultItem> = results
            .metadatas
            .into_iter()
            .map(ResultItem::Ok)
            .collect();

        StateUpdate {
            execution_result: Some(items),
            execution_strategy: Some(ExecutionStrategy::RetrievalChain),
            data_source: Some(DataSource::RetrievalCache),
            next_step: Some(StageName::Presentation),
            ..Default::default()
        }
        .with_last_node(StageName::Retriever)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_intent_label_parses_into_operation_refs() {
        for (label, operations) in INTENT_OPERATIONS {
            assert!(!operations.is_empty(), "{label} has no operations");
            for op in *operations {
                assert!(
                    OperationRef::parse(op).is_some(),
                    "{op} should parse as service.operation"
                );
            }
        }
    }

    #[test]
    fn volumes_map_to_both_volume_operations() {
        let (_, operations) = INTENT_OPERATIONS
            .iter()
            .find(|(label, _)| *label == "list volumes")
            .expect("label");
        assert_eq!(operations.len(), 2);
    }
}
