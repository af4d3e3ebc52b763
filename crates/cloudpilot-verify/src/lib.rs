//! Static verification of generated action programs.
//!
//! The verifier is the control gate between code generation and execution:
//! it rejects structurally defective programs before any cloud call is
//! made, and its failure report doubles as the critique string handed back
//! to the code generator for its single correction retry.

pub mod rules;

use serde::{Deserialize, Serialize};

use cloudpilot_core::plan::Plan;

pub use rules::{approved_service, APPROVED_SERVICES};

/// Stable machine-readable failure codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifyFailureCode {
    MissingArtifact,
    EmptyProgram,
    UnknownService,
    UnresolvedPlaceholder,
    ForbiddenParameter,
    EmptyFilterField,
    EmptyForEachBody,
    DestructiveCallInSafePlan,
}

/// One verification failure with its critique text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyFailure {
    pub code: VerifyFailureCode,
    pub message: String,
}

impl VerifyFailure {
    pub fn new(code: VerifyFailureCode, message: impl Into<String>) -> Self {
        VerifyFailure {
            code,
            message: message.into(),
        }
    }
}

/// The verifier's verdict over a whole plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerifyReport {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<VerifyFailure>,
}

impl VerifyReport {
    /// The critique string fed back to the code generator.
    pub fn critique(&self) -> String {
        self.failures
            .iter()
            .map(|failure| failure.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Verifies every artifact in a plan.
///
/// Each step of the plan must carry an artifact; each artifact must pass
/// every structural rule.
pub fn verify_plan(plan: &Plan) -> VerifyReport {
    let mut failures = Vec::new();

    for (index, step) in plan.steps().enumerate() {
        match &step.artifact {
            None => failures.push(VerifyFailure::new(
                VerifyFailureCode::MissingArtifact,
                format!("step {index} ('{}') has no generated artifact", step.action),
            )),
            Some(program) => {
                rules::check_program(program, step, &mut failures);
            }
        }
    }

    VerifyReport {
        passed: failures.is_empty(),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudpilot_core::plan::{PlanStep, SafetyTier};
    use cloudpilot_core::program::{ActionProgram, ProgramStep};
    use indexmap::IndexMap;
    use serde_json::json;

    fn list_program(service: &str) -> ActionProgram {
        ActionProgram::new(vec![ProgramStep::ListResources {
            service: service.to_string(),
            operation: "list_instances".to_string(),
            params: IndexMap::new(),
            all_compartments: true,
        }])
    }

    fn plan_with(program: ActionProgram) -> Plan {
        let mut step = PlanStep::new("list_instances", "compute");
        step.artifact = Some(program);
        Plan::Single(step)
    }

    #[test]
    fn a_clean_program_passes() {
        let report = verify_plan(&plan_with(list_program("compute")));
        assert!(report.passed, "failures: {}", report.critique());
    }

    #[test]
    fn a_missing_artifact_fails() {
        let plan = Plan::Single(PlanStep::new("list_instances", "compute"));
        let report = verify_plan(&plan);
        assert!(!report.passed);
        assert_eq!(report.failures[0].code, VerifyFailureCode::MissingArtifact);
    }

    #[test]
    fn an_unknown_service_fails_with_critique() {
        let report = verify_plan(&plan_with(list_program("warpdrive")));
        assert!(!report.passed);
        assert_eq!(report.failures[0].code, VerifyFailureCode::UnknownService);
        assert!(report.critique().contains("warpdrive"));
    }

    #[test]
    fn include_root_on_compartment_listing_fails() {
        let program = ActionProgram::new(vec![ProgramStep::ListResources {
            service: "identity".to_string(),
            operation: "list_compartments".to_string(),
            params: IndexMap::from([("include_root".to_string(), json!(true))]),
            all_compartments: false,
        }]);
        let report = verify_plan(&plan_with(program));
        assert!(!report.passed);
        assert_eq!(
            report.failures[0].code,
            VerifyFailureCode::ForbiddenParameter
        );
    }

    #[test]
    fn unresolved_placeholders_fail_outside_for_each() {
        let program = ActionProgram::new(vec![ProgramStep::Call {
            service: "objectstorage".to_string(),
            operation: "create_bucket".to_string(),
            params: IndexMap::from([("name".to_string(), json!("${name}"))]),
        }]);
        let report = verify_plan(&plan_with(program));
        assert!(!report.passed);
        assert_eq!(
            report.failures[0].code,
            VerifyFailureCode::UnresolvedPlaceholder
        );
    }

    #[test]
    fn item_placeholders_inside_for_each_are_fine() {
        let program = ActionProgram::new(vec![
            ProgramStep::ListResources {
                service: "compute".to_string(),
                operation: "list_instances".to_string(),
                params: IndexMap::new(),
                all_compartments: true,
            },
            ProgramStep::ForEach {
                collection: "results".to_string(),
                body: vec![ProgramStep::Call {
                    service: "virtualnetwork".to_string(),
                    operation: "get_vnic".to_string(),
                    params: IndexMap::from([("vnic_id".to_string(), json!("${item.vnic_id}"))]),
                }],
            },
        ]);
        let report = verify_plan(&plan_with(program));
        assert!(report.passed, "failures: {}", report.critique());
    }

    #[test]
    fn destructive_calls_need_a_destructive_plan() {
        let program = ActionProgram::new(vec![ProgramStep::Call {
            service: "objectstorage".to_string(),
            operation: "delete_bucket".to_string(),
            params: IndexMap::from([("name".to_string(), json!("demo"))]),
        }]);
        let mut step = PlanStep::new("delete_bucket", "objectstorage");
        step.artifact = Some(program.clone());
        let report = verify_plan(&Plan::Single(step.clone()));
        assert!(!report.passed);
        assert_eq!(
            report.failures[0].code,
            VerifyFailureCode::DestructiveCallInSafePlan
        );

        step.safety_tier = SafetyTier::Destructive;
        step.artifact = Some(program);
        assert!(verify_plan(&Plan::Single(step)).passed);
    }
}
