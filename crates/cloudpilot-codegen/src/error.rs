//! Code generation error types.

use thiserror::Error;

/// Errors produced while turning a model response into an action program.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// The model returned an empty response.
    #[error("empty code generation response")]
    EmptyResponse,

    /// No JSON object could be extracted from the response.
    #[error("no JSON object found in code generation response")]
    NoJsonFound,

    /// The extracted JSON did not decode into an action program.
    #[error("action program parse failed: {reason}")]
    ParseFailed { reason: String },

    /// The plan shape cannot be code-generated.
    #[error("unsupported plan format: {reason}")]
    UnsupportedPlan { reason: String },
}
