//! The structural rules applied to every generated program.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde_json::Value;

use cloudpilot_core::plan::{PlanStep, SafetyTier};
use cloudpilot_core::program::{ActionProgram, ProgramStep};

use crate::{VerifyFailure, VerifyFailureCode};

/// Service names a program is allowed to touch. Only approved clients can
/// ever be constructed.
pub static APPROVED_SERVICES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        // Identity & security
        "identity",
        "cloudguard",
        "audit",
        "bastion",
        "vault",
        // Core IaaS
        "compute",
        "blockstorage",
        "virtualnetwork",
        "loadbalancer",
        "network_load_balancer",
        // Storage
        "objectstorage",
        "file_storage",
        // Database
        "database",
        "mysql",
        "nosql",
        // Monitoring & management
        "monitoring",
        "events",
        "functions",
        "limits",
        "logging",
        "optimizer",
        // Networking
        "dns",
        "email",
        // Containers
        "container_engine",
        "container_instances",
    ])
});

/// Operations that mutate tenancy state.
const DESTRUCTIVE_PREFIXES: &[&str] = &[
    "create_", "delete_", "update_", "launch_", "terminate_", "stop_", "start_", "detach_",
];

pub fn approved_service(name: &str) -> bool {
    APPROVED_SERVICES.contains(name)
}

/// Runs every rule against one program, appending failures.
pub fn check_program(program: &ActionProgram, plan_step: &PlanStep, failures: &mut Vec<VerifyFailure>) {
    if program.is_empty() {
        failures.push(VerifyFailure::new(
            VerifyFailureCode::EmptyProgram,
            format!("artifact for '{}' has no steps", plan_step.action),
        ));
        return;
    }
    check_steps(&program.steps, plan_step, false, failures);
}

fn check_steps(
    steps: &[ProgramStep],
    plan_step: &PlanStep,
    inside_for_each: bool,
    failures: &mut Vec<VerifyFailure>,
) {
    for step in steps {
        if let Some(service) = step.service() {
            if !approved_service(service) {
                failures.push(VerifyFailure::new(
                    VerifyFailureCode::UnknownService,
                    format!("service '{service}' is not an approved client"),
                ));
            }
        }

        match step {
            ProgramStep::ListResources { operation, params, .. }
            | ProgramStep::Call { operation, params, .. } => {
                if operation == "list_compartments" && params.contains_key("include_root") {
                    failures.push(VerifyFailure::new(
                        VerifyFailureCode::ForbiddenParameter,
                        "'include_root' is not accepted by list_compartments",
                    ));
                }
                for (key, value) in params {
                    check_placeholder(key, value, inside_for_each, failures);
                }
                if is_destructive_operation(operation)
                    && plan_step.safety_tier != SafetyTier::Destructive
                {
                    failures.push(VerifyFailure::new(
                        VerifyFailureCode::DestructiveCallInSafePlan,
                        format!("destructive operation '{operation}' in a plan marked safe"),
                    ));
                }
            }
            ProgramStep::Filter { field, .. } => {
                if field.trim().is_empty() {
                    failures.push(VerifyFailure::new(
                        VerifyFailureCode::EmptyFilterField,
                        "filter step has an empty field",
                    ));
                }
            }
            ProgramStep::ForEach { collection, body } => {
                if body.is_empty() {
                    failures.push(VerifyFailure::new(
                        VerifyFailureCode::EmptyForEachBody,
                        format!("for_each over '{collection}' has an empty body"),
                    ));
                }
                check_steps(body, plan_step, true, failures);
            }
            ProgramStep::ResolveNamespace { .. } => {}
        }
    }
}

/// `${item.*}` bindings are legal inside `for_each`; anything else must
/// have been substituted before verification.
fn check_placeholder(
    key: &str,
    value: &Value,
    inside_for_each: bool,
    failures: &mut Vec<VerifyFailure>,
) {
    let Some(text) = value.as_str() else { return };
    if !text.starts_with("${") || !text.ends_with('}') {
        return;
    }
    if inside_for_each && text.starts_with("${item.") {
        return;
    }
    failures.push(VerifyFailure::new(
        VerifyFailureCode::UnresolvedPlaceholder,
        format!("parameter '{key}' carries an unresolved placeholder {text}"),
    ));
}

fn is_destructive_operation(operation: &str) -> bool {
    DESTRUCTIVE_PREFIXES
        .iter()
        .any(|prefix| operation.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_set_covers_the_planned_services() {
        for service in [
            "identity",
            "compute",
            "blockstorage",
            "virtualnetwork",
            "objectstorage",
            "loadbalancer",
            "database",
            "monitoring",
        ] {
            assert!(approved_service(service), "{service} should be approved");
        }
        assert!(!approved_service("core"));
        assert!(!approved_service("object_storage"));
    }

    #[test]
    fn destructive_prefixes_classify_operations() {
        assert!(is_destructive_operation("create_bucket"));
        assert!(is_destructive_operation("terminate_instance"));
        assert!(!is_destructive_operation("list_instances"));
        assert!(!is_destructive_operation("get_namespace"));
    }
}
