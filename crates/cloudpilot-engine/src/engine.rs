//! Engine assembly and the turn-based entry point.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use cloudpilot_core::presentation::Presentation;
use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{ChatTurn, TurnState};
use cloudpilot_memory::MemoryManager;

use crate::cancel::CancelToken;
use crate::capabilities::{
    CachingEmbedder, CloudClientFactory, CloudConfig, CredentialBlob, Embedder, LmCall,
    VectorStore,
};
use crate::error::EngineError;
use crate::error_handler::FastErrorHandler;
use crate::graph::{DriverOutcome, GraphDriver, StageObserver};
use crate::nodes::{
    CodegenNode, ExecutorNode, MemoryContextNode, MemorySaveNode, NormalizerNode, PlannerNode,
    PresentationNode, RetrieverNode, VerifierNode,
};
use crate::prompts::PromptLibrary;
use crate::supervisor::Supervisor;

/// Filesystem configuration of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub memory_dir: PathBuf,
    pub prompts_dir: PathBuf,
}

/// One turn's input at the engine boundary.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub user_input: String,
    pub session_id: String,
    pub use_retrieval: bool,
    pub chat_history: Vec<ChatTurn>,
}

/// How a turn ended, with the full final state.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(Box<TurnState>),
    AwaitingInput(Box<TurnState>),
    Cancelled(Box<TurnState>),
}

impl TurnOutcome {
    pub fn state(&self) -> &TurnState {
        match self {
            TurnOutcome::Completed(state)
            | TurnOutcome::AwaitingInput(state)
            | TurnOutcome::Cancelled(state) => state,
        }
    }

    pub fn presentation(&self) -> Option<&Presentation> {
        self.state().presentation.as_ref()
    }

    fn from_driver(outcome: DriverOutcome) -> Self {
        match outcome {
            DriverOutcome::Completed(state) => TurnOutcome::Completed(state),
            DriverOutcome::Suspended(state) => TurnOutcome::AwaitingInput(state),
            DriverOutcome::Cancelled(state) => TurnOutcome::Cancelled(state),
        }
    }
}

/// The assembled orchestration engine. One instance serves one user.
pub struct Engine {
    driver: GraphDriver,
}

impl Engine {
    /// Wires the stage pipeline around the supplied capabilities.
    pub fn new(
        config: EngineConfig,
        credentials: &CredentialBlob,
        lm: Arc<dyn LmCall>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        factory: Arc<dyn CloudClientFactory>,
    ) -> Result<Self, EngineError> {
        let cloud_config = Arc::new(CloudConfig::build(credentials)?);
        let memory = Arc::new(Mutex::new(MemoryManager::new(&config.memory_dir)?));
        let prompts = Arc::new(PromptLibrary::new(&config.prompts_dir));
        let error_handler = Arc::new(FastErrorHandler::new(Arc::clone(&lm), Arc::clone(&memory)));
        // Process-wide embedding cache.
        let embedder: Arc<dyn Embedder> = Arc::new(CachingEmbedder::new(embedder));

        let driver = GraphDriver::new(vec![
            Arc::new(MemoryContextNode::new(Arc::clone(&memory))),
            Arc::new(Supervisor::new(Arc::clone(&lm))),
            Arc::new(NormalizerNode::new(Arc::clone(&lm), Arc::clone(&prompts))),
            Arc::new(RetrieverNode::new(
                Arc::clone(&lm),
                embedder,
                vector_store,
            )),
            Arc::new(PlannerNode::new(
                Arc::clone(&lm),
                Arc::clone(&prompts),
                cloud_config.tenancy.clone(),
            )),
            Arc::new(CodegenNode::new(
                Arc::clone(&lm),
                Arc::clone(&prompts),
                Arc::clone(&cloud_config),
            )),
            Arc::new(VerifierNode),
            Arc::new(ExecutorNode::new(factory, Arc::clone(&cloud_config))),
            Arc::new(PresentationNode::new(
                Arc::clone(&lm),
                Arc::clone(&prompts),
                error_handler,
            )),
            Arc::new(MemorySaveNode::new(memory)),
        ]);

        Ok(Engine { driver })
    }

    /// Runs one fresh turn to completion or suspension.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        cancel: &CancelToken,
        observer: Option<&StageObserver>,
    ) -> TurnOutcome {
        let mut state = TurnState::new(request.user_input, request.session_id, request.use_retrieval);
        state.chat_history = request.chat_history;
        self.drive(state, StageName::MemoryContext, cancel, observer)
            .await
    }

    /// Low-level entry: drives an explicit state from a starting stage.
    pub async fn drive(
        &self,
        state: TurnState,
        start: StageName,
        cancel: &CancelToken,
        observer: Option<&StageObserver>,
    ) -> TurnOutcome {
        let outcome = self.driver.run(state, start, cancel, observer).await;
        TurnOutcome::from_driver(outcome)
    }

    /// Resumes a suspended turn with the user's reply.
    ///
    /// The reply lands in the field matching the suspension kind; the
    /// pipeline re-enters at the supervisor.
    pub async fn resume_turn(
        &self,
        mut state: TurnState,
        reply: &str,
        cancel: &CancelToken,
        observer: Option<&StageObserver>,
    ) -> TurnOutcome {
        let awaiting_confirmation = state
            .presentation
            .as_ref()
            .map(|p| p.confirmation_required)
            .unwrap_or(false);

        if awaiting_confirmation {
            state.confirmation_response = Some(reply.to_string());
        } else {
            state.parameter_selection_response = Some(reply.to_string());
        }

        // A resumed invocation gets a fresh entry budget and output slot.
        state.presentation = None;
        state.memory_saved = false;
        state.recursion_count = 0;
        state.next_step = None;
        state.last_node = Some(StageName::Presentation);

        self.drive(state, StageName::Supervisor, cancel, observer)
            .await
    }
}
