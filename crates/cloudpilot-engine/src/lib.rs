//! The agent orchestration engine: a graph-driven turn pipeline that
//! translates natural-language tenancy requests into verified, executed
//! cloud operations and a single presentation object per turn.
//!
//! The engine consumes capability seams (`LmCall`, `Embedder`,
//! `VectorStore`, `CloudClientFactory`) and owns everything between the
//! turn entry point and the presentation: normalization, intent analysis,
//! template/model planning, the safety-and-confirmation gate, action
//! program generation with bounded self-correction, the retrieval path,
//! and the layered memory subsystem.

pub mod cancel;
pub mod capabilities;
pub mod engine;
pub mod error;
pub mod error_handler;
pub mod gateway;
pub mod graph;
pub mod nodes;
pub mod prompts;
pub mod supervisor;

pub use cancel::CancelToken;
pub use capabilities::{
    CloudClientFactory, CloudConfig, CredentialBlob, Embedder, KeyMaterial, LmCall, LmReply,
    MemoryVectorStore, Message, MetadataFilter, OperationRef, Role, SearchResults, ServiceClient,
};
pub use engine::{Engine, EngineConfig, TurnOutcome, TurnRequest};
pub use error::EngineError;
pub use error_handler::FastErrorHandler;
pub use gateway::{EmbeddingClient, LmGateway, ProviderConfig};
pub use graph::{DriverOutcome, GraphDriver, StageObserver};
pub use prompts::PromptLibrary;
