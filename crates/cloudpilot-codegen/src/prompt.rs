//! Code-generation prompt assembly.
//!
//! The prompt is the base codegen instructions, optionally extended with a
//! per-service section, the serialized plan, the user query, and — on a
//! retry — a correction section carrying the previous failure.

use cloudpilot_core::plan::PlanStep;

/// Used when the prompt directory has no `codegen/base.md`.
pub const FALLBACK_BASE_PROMPT: &str = "You are an expert cloud action-program generator. \
Respond with ONLY a JSON object of the form {\"steps\": [...]} using the operations \
resolve_namespace, list_resources, call, filter and for_each. Obtain data through the \
declared service operations, honor all_compartments, and never invent services.";

/// Which failure a correction retry is fixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionKind {
    /// The previous program failed static verification.
    Syntax,
    /// The previous program failed during execution.
    Runtime,
}

/// Assembles the full system prompt for one generation call.
pub fn build_codegen_prompt(
    base_prompt: &str,
    service_prompt: Option<&str>,
    step: &PlanStep,
    user_query: &str,
    multi_step: bool,
    correction: Option<(CorrectionKind, &str)>,
) -> String {
    let mut prompt = base_prompt.trim_end().to_string();

    if let Some(service_section) = service_prompt {
        prompt.push_str("\n\n");
        prompt.push_str(service_section.trim_end());
    }

    if multi_step {
        prompt.push_str(
            "\n\n## Multi-Step Query Instructions\n\
             This request needs several dependent operations. Fetch the primary \
             resources first, enrich them with follow-up `call` steps inside a \
             `for_each`, and keep only the resources matching the request.",
        );
    }

    let plan_json = serde_json::to_string_pretty(step)
        .unwrap_or_else(|_| "{}".to_string());
    prompt.push_str("\n\n## Current Task\nConvert this plan into an executable action program:\n\n```json\n");
    prompt.push_str(&plan_json);
    prompt.push_str("\n```\n\n## User Query Context\nUser query: \"");
    prompt.push_str(user_query);
    prompt.push_str(
        "\"\n\nRespond with ONLY the action-program JSON. Use literal parameter values \
         from the plan, honor `all_compartments`, and encode requested filtering as \
         `filter` steps.",
    );

    if let Some((kind, feedback)) = correction {
        let heading = match kind {
            CorrectionKind::Syntax => {
                "## CORRECTION REQUEST - VERIFICATION FAILURE\n\
                 Your previous program failed static verification. Fix the structural issues:"
            }
            CorrectionKind::Runtime => {
                "## CORRECTION REQUEST - RUNTIME FAILURE\n\
                 Your previous program failed during execution. Analyze the error and fix the logic:"
            }
        };
        prompt.push_str("\n\n");
        prompt.push_str(heading);
        prompt.push('\n');
        prompt.push_str(feedback);
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_plan_and_query() {
        let step = PlanStep::new("list_instances", "compute");
        let prompt = build_codegen_prompt(
            FALLBACK_BASE_PROMPT,
            None,
            &step,
            "list running instances",
            false,
            None,
        );
        assert!(prompt.contains("list_instances"));
        assert!(prompt.contains("list running instances"));
        assert!(!prompt.contains("CORRECTION REQUEST"));
    }

    #[test]
    fn correction_section_names_the_failure_kind() {
        let step = PlanStep::new("list_instances", "compute");
        let prompt = build_codegen_prompt(
            FALLBACK_BASE_PROMPT,
            Some("## Compute patterns"),
            &step,
            "list instances",
            false,
            Some((CorrectionKind::Runtime, "TypeError: item is not a map")),
        );
        assert!(prompt.contains("RUNTIME FAILURE"));
        assert!(prompt.contains("TypeError: item is not a map"));
        assert!(prompt.contains("## Compute patterns"));
    }

    #[test]
    fn multi_step_section_is_optional() {
        let step = PlanStep::new("list_instances", "compute");
        let without = build_codegen_prompt(FALLBACK_BASE_PROMPT, None, &step, "q", false, None);
        let with = build_codegen_prompt(FALLBACK_BASE_PROMPT, None, &step, "q", true, None);
        assert!(!without.contains("Multi-Step Query Instructions"));
        assert!(with.contains("Multi-Step Query Instructions"));
    }
}
