//! Engine error types.

use thiserror::Error;

/// Errors produced by the engine and its capability seams.
///
/// Stage implementations never surface these to the user directly; they are
/// converted into turn-state fields (`plan_error`, `execution_error`) and
/// rendered as prose by the presentation preparer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Memory subsystem failure (always degraded, never fatal to a turn).
    #[error(transparent)]
    Memory(#[from] cloudpilot_memory::MemoryError),

    /// Code generation failure.
    #[error(transparent)]
    Codegen(#[from] cloudpilot_codegen::CodegenError),

    /// Invalid or incomplete engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A named prompt file was not found.
    #[error("prompt not found: '{0}'")]
    PromptMissing(String),

    /// A language-model provider request failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// The embedding capability failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The vector store capability failed.
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// A cloud client could not be constructed.
    #[error("unknown service: '{0}'")]
    UnknownService(String),
}
