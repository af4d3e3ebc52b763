//! The action program: the executable artifact produced by the code
//! generator and interpreted by the executor.
//!
//! Instead of evaluating model-authored source code, the engine dispatches a
//! sequence of typed steps against the cloud client factory. The serialized
//! program doubles as the correction artifact: on a failed run the offending
//! step and error text are handed back to the model.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::FilterOp;
use crate::CoreError;

/// One interpreted step of an action program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProgramStep {
    /// Resolve the object-storage namespace before bucket operations.
    ResolveNamespace { service: String },

    /// List resources of one operation, optionally fanning out over the
    /// tenancy root plus every active compartment.
    ListResources {
        service: String,
        operation: String,
        #[serde(default)]
        params: IndexMap<String, Value>,
        #[serde(default)]
        all_compartments: bool,
    },

    /// Invoke a single service operation.
    Call {
        service: String,
        operation: String,
        #[serde(default)]
        params: IndexMap<String, Value>,
    },

    /// Keep accumulated results matching a predicate.
    Filter {
        field: String,
        #[serde(default)]
        operator: FilterOp,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nested_field: Option<String>,
    },

    /// Run a sub-program once per accumulated result, with `${item.*}`
    /// placeholders resolved from the current element.
    ForEach {
        collection: String,
        body: Vec<ProgramStep>,
    },
}

impl ProgramStep {
    /// The service this step touches, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            ProgramStep::ResolveNamespace { service }
            | ProgramStep::ListResources { service, .. }
            | ProgramStep::Call { service, .. } => Some(service),
            ProgramStep::Filter { .. } | ProgramStep::ForEach { .. } => None,
        }
    }

    /// The operation this step invokes, if any.
    pub fn operation(&self) -> Option<&str> {
        match self {
            ProgramStep::ListResources { operation, .. }
            | ProgramStep::Call { operation, .. } => Some(operation),
            _ => None,
        }
    }

    pub fn params(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            ProgramStep::ListResources { params, .. } | ProgramStep::Call { params, .. } => {
                Some(params)
            }
            _ => None,
        }
    }
}

/// An ordered executable program.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionProgram {
    pub steps: Vec<ProgramStep>,
}

impl ActionProgram {
    pub fn new(steps: Vec<ProgramStep>) -> Self {
        ActionProgram { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every service name referenced anywhere in the program, including
    /// nested `for_each` bodies.
    pub fn services(&self) -> Vec<&str> {
        fn collect<'a>(steps: &'a [ProgramStep], out: &mut Vec<&'a str>) {
            for step in steps {
                if let Some(service) = step.service() {
                    out.push(service);
                }
                if let ProgramStep::ForEach { body, .. } = step {
                    collect(body, out);
                }
            }
        }
        let mut services = Vec::new();
        collect(&self.steps, &mut services);
        services
    }

    /// Whether any step resolves the namespace for `service`.
    pub fn resolves_namespace(&self, service: &str) -> bool {
        self.steps.iter().any(|step| {
            matches!(step, ProgramStep::ResolveNamespace { service: s } if s == service)
        })
    }

    /// The serialized artifact handed to the model for correction retries.
    pub fn to_artifact(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{\"steps\": []}".to_string())
    }

    pub fn from_json(value: Value) -> Result<Self, CoreError> {
        serde_json::from_value(value).map_err(|err| CoreError::InvalidProgram {
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn program_round_trips_all_step_kinds() {
        let program = ActionProgram::new(vec![
            ProgramStep::ResolveNamespace {
                service: "objectstorage".to_string(),
            },
            ProgramStep::ListResources {
                service: "compute".to_string(),
                operation: "list_instances".to_string(),
                params: IndexMap::new(),
                all_compartments: true,
            },
            ProgramStep::Filter {
                field: "lifecycle_state".to_string(),
                operator: FilterOp::Eq,
                value: json!("RUNNING"),
                nested_field: None,
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

        let encoded = serde_json::to_value(&program).expect("program should serialize");
        assert_eq!(encoded["steps"][0]["op"], "resolve_namespace");
        assert_eq!(encoded["steps"][1]["op"], "list_resources");
        assert_eq!(encoded["steps"][3]["op"], "for_each");

        let decoded =
            ActionProgram::from_json(encoded).expect("program should deserialize");
        assert_eq!(decoded, program);
    }

    #[test]
    fn services_walks_nested_bodies() {
        let program = ActionProgram::new(vec![ProgramStep::ForEach {
            collection: "results".to_string(),
            body: vec![ProgramStep::Call {
                service: "virtualnetwork".to_string(),
                operation: "get_vnic".to_string(),
                params: IndexMap::new(),
            }],
        }]);
        assert_eq!(program.services(), vec!["virtualnetwork"]);
    }

    #[test]
    fn unknown_op_is_rejected() {
        let err = ActionProgram::from_json(json!({
            "steps": [{"op": "exec_python", "code": "print()"}]
        }))
        .expect_err("unknown op must not decode");
        assert!(matches!(err, CoreError::InvalidProgram { .. }));
    }
}
