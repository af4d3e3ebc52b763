//! Stage identifiers for the turn pipeline.

use serde::{Deserialize, Serialize};

/// One stage of the turn pipeline.
///
/// `UserInputRequired` is not a runnable stage: the presentation preparer
/// sets it as `next_step` to tell the graph driver to suspend the turn and
/// hand control back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    MemoryContext,
    Supervisor,
    Normalizer,
    Retriever,
    Planner,
    Codegen,
    Verifier,
    Executor,
    Presentation,
    MemorySave,
    UserInputRequired,
}

impl StageName {
    /// Stable snake_case name used in timings and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::MemoryContext => "memory_context",
            StageName::Supervisor => "supervisor",
            StageName::Normalizer => "normalizer",
            StageName::Retriever => "retriever",
            StageName::Planner => "planner",
            StageName::Codegen => "codegen",
            StageName::Verifier => "verifier",
            StageName::Executor => "executor",
            StageName::Presentation => "presentation",
            StageName::MemorySave => "memory_save",
            StageName::UserInputRequired => "user_input_required",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_serialize_as_snake_case() {
        let encoded = serde_json::to_value(StageName::MemoryContext).expect("should serialize");
        assert_eq!(encoded, serde_json::json!("memory_context"));

        let decoded: StageName =
            serde_json::from_value(serde_json::json!("retriever")).expect("should deserialize");
        assert_eq!(decoded, StageName::Retriever);
    }

    #[test]
    fn display_matches_serde_name() {
        assert_eq!(StageName::MemorySave.to_string(), "memory_save");
        assert_eq!(StageName::UserInputRequired.to_string(), "user_input_required");
    }
}
