//! End-to-end program finalization and multi-step batching.

use indexmap::IndexMap;
use serde_json::Value;

use cloudpilot_core::plan::{PlanStep, SafetyTier};
use cloudpilot_core::program::{ActionProgram, ProgramStep};

use crate::error::CodegenError;
use crate::parse::parse_program;
use crate::rewrite::{postprocess_program, service_for_action};

/// Actions that can be collapsed into one batched program when every step
/// of a multi-step plan shares them.
const BATCHABLE_ACTIONS: &[&str] = &[
    "create_bucket",
    "delete_bucket",
    "create_volume",
    "create_instance",
];

/// Verbs that mark an action destructive regardless of the model's claim.
const DESTRUCTIVE_VERBS: &[&str] = &["delete", "terminate", "detach", "stop"];

/// Parses a raw model response and applies every rewrite pass.
///
/// The returned program is ready for the verifier. The plan step's service
/// is resolved from the action table when the plan omitted it.
pub fn finalize_program(
    response: &str,
    step: &mut PlanStep,
    tenancy: &str,
) -> Result<ActionProgram, CodegenError> {
    if step.service.is_empty() || step.service == "unknown" {
        if let Some(service) = service_for_action(&step.action) {
            step.service = service.to_string();
        }
    }

    let mut program = parse_program(response)?;
    if program.is_empty() {
        return Err(CodegenError::ParseFailed {
            reason: "program has no steps".to_string(),
        });
    }
    postprocess_program(&mut program, step, tenancy);

    if default_safety_tier(&step.action) == SafetyTier::Destructive {
        step.safety_tier = SafetyTier::Destructive;
    }

    Ok(program)
}

/// Whether a multi-step plan's steps can be collapsed into one batch.
///
/// Requires at least two steps, all sharing the same batchable action and
/// service.
pub fn batchable(steps: &[PlanStep]) -> bool {
    if steps.len() < 2 {
        return false;
    }
    let first = &steps[0];
    if !BATCHABLE_ACTIONS.contains(&first.action.as_str()) {
        return false;
    }
    steps
        .iter()
        .all(|step| step.action == first.action && step.service == first.service)
}

/// Builds the batched program for same-action steps directly: one call per
/// resource, sharing namespace resolution. No model round trip is needed
/// because every step is structurally identical.
pub fn batch_program(steps: &[PlanStep], tenancy: &str) -> Result<ActionProgram, CodegenError> {
    let first = steps.first().ok_or_else(|| CodegenError::UnsupportedPlan {
        reason: "multi-step plan has no steps".to_string(),
    })?;

    let service = if first.service.is_empty() {
        service_for_action(&first.action)
            .ok_or_else(|| CodegenError::UnsupportedPlan {
                reason: format!("no service known for action '{}'", first.action),
            })?
            .to_string()
    } else {
        first.service.clone()
    };

    let mut program_steps = Vec::with_capacity(steps.len() + 1);
    if service == "objectstorage" {
        program_steps.push(ProgramStep::ResolveNamespace {
            service: service.clone(),
        });
    }

    for step in steps {
        let mut params: IndexMap<String, Value> = step.params.clone();
        if !params.contains_key("compartment_id") {
            if let Some(compartment) = first.params.get("compartment_id") {
                params.insert("compartment_id".to_string(), compartment.clone());
            } else {
                params.insert(
                    "compartment_id".to_string(),
                    Value::String(tenancy.to_string()),
                );
            }
        }
        program_steps.push(ProgramStep::Call {
            service: service.clone(),
            operation: step.action.clone(),
            params,
        });
    }

    Ok(ActionProgram::new(program_steps))
}

/// Safe for listing and fetching, destructive for mutating verbs.
pub fn default_safety_tier(action: &str) -> SafetyTier {
    let lower = action.to_lowercase();
    if DESTRUCTIVE_VERBS.iter().any(|verb| lower.contains(verb)) {
        SafetyTier::Destructive
    } else {
        SafetyTier::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket_step(name: &str) -> PlanStep {
        let mut step = PlanStep::new("create_bucket", "objectstorage");
        step.params.insert("name".to_string(), json!(name));
        step.params.insert(
            "compartment_id".to_string(),
            json!("ocid1.compartment.oc1..c"),
        );
        step
    }

    #[test]
    fn finalize_resolves_a_missing_service() {
        let mut step = PlanStep::new("list_buckets", "");
        let response = r#"{"steps": [{"op": "list_resources", "service": "object_storage",
            "operation": "list_buckets", "all_compartments": true}]}"#;

        let program =
            finalize_program(response, &mut step, "ocid1.tenancy.oc1..t").expect("program");
        assert_eq!(step.service, "objectstorage");
        assert!(program.resolves_namespace("objectstorage"));
    }

    #[test]
    fn finalize_rejects_an_empty_program() {
        let mut step = PlanStep::new("list_instances", "compute");
        let err = finalize_program(r#"{"steps": []}"#, &mut step, "t")
            .expect_err("empty program must fail");
        assert!(matches!(err, CodegenError::ParseFailed { .. }));
    }

    #[test]
    fn identical_create_bucket_steps_are_batchable() {
        let steps = vec![bucket_step("a"), bucket_step("b"), bucket_step("c")];
        assert!(batchable(&steps));

        let program = batch_program(&steps, "ocid1.tenancy.oc1..t").expect("batch");
        // Namespace resolution plus one call per bucket.
        assert_eq!(program.steps.len(), 4);
        assert!(matches!(&program.steps[0], ProgramStep::ResolveNamespace { .. }));
        let ProgramStep::Call { params, .. } = &program.steps[2] else {
            panic!("expected call");
        };
        assert_eq!(params["name"], json!("b"));
    }

    #[test]
    fn mixed_actions_are_not_batchable() {
        let steps = vec![
            bucket_step("a"),
            PlanStep::new("list_buckets", "objectstorage"),
        ];
        assert!(!batchable(&steps));
        assert!(!batchable(&steps[..1]));
    }

    #[test]
    fn destructive_verbs_set_the_tier() {
        assert_eq!(default_safety_tier("list_instances"), SafetyTier::Safe);
        assert_eq!(default_safety_tier("delete_bucket"), SafetyTier::Destructive);
        assert_eq!(default_safety_tier("stop_instance"), SafetyTier::Destructive);
        // Creation is gated by confirmation, not the verb table.
        assert_eq!(default_safety_tier("create_bucket"), SafetyTier::Safe);
    }
}
