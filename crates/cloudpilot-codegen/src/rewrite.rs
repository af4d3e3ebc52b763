//! Deterministic rewrite passes over a parsed action program.
//!
//! Model output repeats a handful of known mistakes: wrong service
//! aliases, unresolved parameter placeholders, the unsupported
//! `include_root` flag, and forgotten namespace resolution for
//! object-storage operations. Each pass fixes one of those; the order in
//! [`postprocess_program`] is fixed.

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use cloudpilot_core::plan::PlanStep;
use cloudpilot_core::program::{ActionProgram, ProgramStep};

/// Alias → canonical client-name mapping, carried verbatim.
static SERVICE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("core", "compute"),
        ("block_storage", "blockstorage"),
        ("virtual_network", "virtualnetwork"),
        ("object_storage", "objectstorage"),
        ("load_balancer", "loadbalancer"),
    ])
});

/// Fallback action → service mapping used when a plan omits the service.
static ACTION_SERVICES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("list_instances", "compute"),
        ("get_instance", "compute"),
        ("start_instance", "compute"),
        ("stop_instance", "compute"),
        ("terminate_instance", "compute"),
        ("list_volumes", "blockstorage"),
        ("list_buckets", "objectstorage"),
        ("create_bucket", "objectstorage"),
        ("delete_bucket", "objectstorage"),
        ("list_compartments", "identity"),
        ("list_users", "identity"),
        ("list_groups", "identity"),
        ("list_vcns", "virtualnetwork"),
        ("list_subnets", "virtualnetwork"),
        ("list_alarms", "monitoring"),
        ("list_databases", "database"),
        ("list_load_balancers", "loadbalancer"),
    ])
});

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{([A-Za-z0-9_.]+)\}$").expect("valid regex"));

/// Maps a (possibly aliased) service name to its canonical form.
pub fn canonical_service(name: &str) -> String {
    let lower = name.to_lowercase();
    SERVICE_ALIASES
        .get(lower.as_str())
        .map(|canonical| canonical.to_string())
        .unwrap_or(lower)
}

/// The canonical service for a known action, when the plan omits it.
pub fn service_for_action(action: &str) -> Option<&'static str> {
    ACTION_SERVICES.get(action).copied()
}

/// Applies every rewrite pass in fixed order.
pub fn postprocess_program(program: &mut ActionProgram, step: &PlanStep, tenancy: &str) {
    canonicalize_services(&mut program.steps);
    substitute_placeholders(&mut program.steps, &step.params, tenancy);
    strip_include_root(&mut program.steps);
    ensure_namespace(program, step);
    enforce_all_compartments(&mut program.steps, step);
    apply_plan_filters(program, step);
}

fn canonicalize_services(steps: &mut [ProgramStep]) {
    for step in steps {
        match step {
            ProgramStep::ResolveNamespace { service }
            | ProgramStep::ListResources { service, .. }
            | ProgramStep::Call { service, .. } => {
                *service = canonical_service(service);
            }
            ProgramStep::ForEach { body, .. } => canonicalize_services(body),
            ProgramStep::Filter { .. } => {}
        }
    }
}

/// Replaces `${key}` parameter values with literals from the plan.
/// `${item.*}` placeholders are execution-time bindings and pass through.
fn substitute_placeholders(
    steps: &mut [ProgramStep],
    params: &IndexMap<String, Value>,
    tenancy: &str,
) {
    for step in steps {
        match step {
            ProgramStep::ListResources { params: step_params, .. }
            | ProgramStep::Call { params: step_params, .. } => {
                for value in step_params.values_mut() {
                    substitute_value(value, params, tenancy);
                }
            }
            ProgramStep::ForEach { body, .. } => substitute_placeholders(body, params, tenancy),
            _ => {}
        }
    }
}

fn substitute_value(value: &mut Value, params: &IndexMap<String, Value>, tenancy: &str) {
    let Some(text) = value.as_str() else { return };
    let Some(captures) = PLACEHOLDER.captures(text) else {
        return;
    };
    let key = &captures[1];
    if key.starts_with("item.") {
        return;
    }
    if key == "tenancy" || key.ends_with(".tenancy") || key.ends_with("compartment_id") {
        if let Some(replacement) = params.get("compartment_id") {
            *value = replacement.clone();
            return;
        }
        *value = Value::String(tenancy.to_string());
        return;
    }
    if let Some(replacement) = params.get(key) {
        *value = replacement.clone();
    }
}

/// `include_root` is not accepted by compartment listings; drop it.
fn strip_include_root(steps: &mut [ProgramStep]) {
    for step in steps {
        match step {
            ProgramStep::ListResources { operation, params, .. }
            | ProgramStep::Call { operation, params, .. } => {
                if operation == "list_compartments" {
                    params.shift_remove("include_root");
                }
            }
            ProgramStep::ForEach { body, .. } => strip_include_root(body),
            _ => {}
        }
    }
}

/// Bucket operations need the namespace resolved first.
fn ensure_namespace(program: &mut ActionProgram, step: &PlanStep) {
    let touches_buckets = step.service == "objectstorage"
        || step.action.to_lowercase().contains("bucket")
        || program.steps.iter().any(|s| {
            s.operation()
                .map(|op| op.contains("bucket"))
                .unwrap_or(false)
        });

    if touches_buckets && !program.resolves_namespace("objectstorage") {
        program.steps.insert(
            0,
            ProgramStep::ResolveNamespace {
                service: "objectstorage".to_string(),
            },
        );
    }
}

/// List plans scoped to all compartments must fan out in the program too.
fn enforce_all_compartments(steps: &mut [ProgramStep], plan_step: &PlanStep) {
    if !plan_step.is_list() || !plan_step.all_compartments() {
        return;
    }
    for step in steps {
        if let ProgramStep::ListResources { all_compartments, .. } = step {
            *all_compartments = true;
        }
    }
}

/// Encodes plan filters the model left out as trailing `filter` steps.
fn apply_plan_filters(program: &mut ActionProgram, step: &PlanStep) {
    if !step.filter_in_code {
        return;
    }
    for filter in &step.filters {
        let already_encoded = program.steps.iter().any(|s| {
            matches!(s, ProgramStep::Filter { field, .. } if *field == filter.field)
        });
        if !already_encoded {
            program.steps.push(ProgramStep::Filter {
                field: filter.field.clone(),
                operator: filter.operator,
                value: filter.value.clone(),
                nested_field: filter.nested_field.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudpilot_core::plan::PlanFilter;
    use serde_json::json;

    fn list_step(service: &str, operation: &str) -> ProgramStep {
        ProgramStep::ListResources {
            service: service.to_string(),
            operation: operation.to_string(),
            params: IndexMap::new(),
            all_compartments: false,
        }
    }

    #[test]
    fn aliases_map_to_canonical_names() {
        assert_eq!(canonical_service("core"), "compute");
        assert_eq!(canonical_service("Object_Storage"), "objectstorage");
        assert_eq!(canonical_service("compute"), "compute");
        assert_eq!(canonical_service("identity"), "identity");
    }

    #[test]
    fn placeholders_resolve_from_plan_params() {
        let mut step = PlanStep::new("create_bucket", "objectstorage");
        step.params
            .insert("name".to_string(), json!("demo-bucket"));
        step.params
            .insert("compartment_id".to_string(), json!("ocid1.compartment.oc1..c"));

        let mut program = ActionProgram::new(vec![ProgramStep::Call {
            service: "object_storage".to_string(),
            operation: "create_bucket".to_string(),
            params: IndexMap::from([
                ("name".to_string(), json!("${name}")),
                ("compartment_id".to_string(), json!("${compartment_id}")),
            ]),
        }]);

        postprocess_program(&mut program, &step, "ocid1.tenancy.oc1..root");

        // Namespace gets injected ahead of the canonicalized call.
        assert!(matches!(
            &program.steps[0],
            ProgramStep::ResolveNamespace { service } if service == "objectstorage"
        ));
        let ProgramStep::Call { service, params, .. } = &program.steps[1] else {
            panic!("expected call step");
        };
        assert_eq!(service, "objectstorage");
        assert_eq!(params["name"], json!("demo-bucket"));
        assert_eq!(params["compartment_id"], json!("ocid1.compartment.oc1..c"));
    }

    #[test]
    fn tenancy_placeholder_falls_back_to_credentials() {
        let step = PlanStep::new("list_compartments", "identity");
        let mut program = ActionProgram::new(vec![ProgramStep::ListResources {
            service: "identity".to_string(),
            operation: "list_compartments".to_string(),
            params: IndexMap::from([
                ("compartment_id".to_string(), json!("${tenancy}")),
                ("include_root".to_string(), json!(true)),
            ]),
            all_compartments: false,
        }]);

        postprocess_program(&mut program, &step, "ocid1.tenancy.oc1..root");

        let ProgramStep::ListResources { params, .. } = &program.steps[0] else {
            panic!("expected list step");
        };
        assert_eq!(params["compartment_id"], json!("ocid1.tenancy.oc1..root"));
        assert!(!params.contains_key("include_root"));
    }

    #[test]
    fn item_placeholders_are_left_for_execution_time() {
        let step = PlanStep::new("list_instances", "compute");
        let mut program = ActionProgram::new(vec![ProgramStep::ForEach {
            collection: "results".to_string(),
            body: vec![ProgramStep::Call {
                service: "virtualnetwork".to_string(),
                operation: "get_vnic".to_string(),
                params: IndexMap::from([("vnic_id".to_string(), json!("${item.vnic_id}"))]),
            }],
        }]);

        postprocess_program(&mut program, &step, "ocid1.tenancy.oc1..root");

        let ProgramStep::ForEach { body, .. } = &program.steps[0] else {
            panic!("expected for_each");
        };
        let ProgramStep::Call { params, .. } = &body[0] else {
            panic!("expected call");
        };
        assert_eq!(params["vnic_id"], json!("${item.vnic_id}"));
    }

    #[test]
    fn plan_filters_are_appended_once() {
        let mut step = PlanStep::new("list_instances", "compute");
        step.params.insert("all_compartments".to_string(), json!(true));
        step.filter_in_code = true;
        step.filters = vec![PlanFilter::equality("lifecycle_state", "RUNNING")];

        let mut program = ActionProgram::new(vec![list_step("compute", "list_instances")]);
        postprocess_program(&mut program, &step, "t");

        assert_eq!(program.steps.len(), 2);
        assert!(matches!(
            &program.steps[0],
            ProgramStep::ListResources { all_compartments: true, .. }
        ));
        assert!(matches!(
            &program.steps[1],
            ProgramStep::Filter { field, .. } if field == "lifecycle_state"
        ));

        // A second pass must not duplicate the filter.
        postprocess_program(&mut program, &step, "t");
        assert_eq!(program.steps.len(), 2);
    }

    #[test]
    fn known_actions_resolve_their_service() {
        assert_eq!(service_for_action("list_buckets"), Some("objectstorage"));
        assert_eq!(service_for_action("list_compartments"), Some("identity"));
        assert_eq!(service_for_action("unknown_action"), None);
    }
}
