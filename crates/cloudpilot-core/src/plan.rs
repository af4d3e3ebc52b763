//! Execution plan model shared between the planner, code generator,
//! verifier and executor.
//!
//! A plan is either a single step or an ordered list of steps; the two
//! shapes are distinguished by the presence of a `steps` key, matching the
//! JSON the planner model is asked to produce. After the verifier accepts a
//! plan it is immutable except for the code generator's `artifact` overlay.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::program::ActionProgram;

/// Read-only vs mutating classification of a plan or step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTier {
    #[default]
    Safe,
    Destructive,
}

/// Predicate operator for result filtering.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterOp {
    #[default]
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "contains")]
    Contains,
}

/// Structured filter classification carried from the template tables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    SimpleEquality,
    SimpleContains,
    NestedCheck,
    CompartmentFilter,
    ObjectCountCheck,
}

/// One filter predicate attached to a plan step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanFilter {
    pub field: String,
    #[serde(default)]
    pub operator: FilterOp,
    pub value: Value,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<FilterKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_field: Option<String>,
}

impl PlanFilter {
    pub fn equality(field: impl Into<String>, value: impl Into<Value>) -> Self {
        PlanFilter {
            field: field.into(),
            operator: FilterOp::Eq,
            value: value.into(),
            kind: Some(FilterKind::SimpleEquality),
            nested_field: None,
        }
    }
}

/// One executable operation against a cloud service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanStep {
    pub action: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub params: IndexMap<String, Value>,
    #[serde(default)]
    pub safety_tier: SafetyTier,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_parameters: Vec<String>,
    #[serde(default)]
    pub filter_in_code: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<PlanFilter>,
    /// Set by the code generator; absent until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ActionProgram>,
}

impl PlanStep {
    pub fn new(action: impl Into<String>, service: impl Into<String>) -> Self {
        PlanStep {
            action: action.into(),
            service: service.into(),
            ..Default::default()
        }
    }

    /// Whether this step is a `list_*` operation.
    pub fn is_list(&self) -> bool {
        self.action.to_lowercase().starts_with("list_")
    }

    /// Whether this step is a `create_*` or `deploy_*` operation.
    pub fn is_deployment(&self) -> bool {
        self.action.starts_with("create_") || self.action.starts_with("deploy_")
    }

    pub fn all_compartments(&self) -> bool {
        self.params
            .get("all_compartments")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// An ordered multi-step plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiStepPlan {
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub safety_tier: SafetyTier,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_parameters: Vec<String>,
}

/// A plan emitted by the planner.
///
/// Untagged on purpose: planner-model output carries a `steps` array for
/// multi-step plans and a top-level `action` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Plan {
    Multi(MultiStepPlan),
    Single(PlanStep),
}

impl Plan {
    pub fn is_multi(&self) -> bool {
        matches!(self, Plan::Multi(_))
    }

    pub fn safety_tier(&self) -> SafetyTier {
        match self {
            Plan::Single(step) => step.safety_tier,
            Plan::Multi(plan) => plan.safety_tier,
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        match self {
            Plan::Single(step) => step.requires_confirmation,
            Plan::Multi(plan) => plan.requires_confirmation,
        }
    }

    pub fn missing_parameters(&self) -> &[String] {
        match self {
            Plan::Single(step) => &step.missing_parameters,
            Plan::Multi(plan) => &plan.missing_parameters,
        }
    }

    pub fn set_missing_parameters(&mut self, missing: Vec<String>) {
        match self {
            Plan::Single(step) => step.missing_parameters = missing,
            Plan::Multi(plan) => plan.missing_parameters = missing,
        }
    }

    /// The primary action name: the single step's action, or the first
    /// step's action for a multi-step plan.
    pub fn action(&self) -> &str {
        match self {
            Plan::Single(step) => &step.action,
            Plan::Multi(plan) => plan
                .steps
                .first()
                .map(|step| step.action.as_str())
                .unwrap_or(""),
        }
    }

    /// Iterate the steps of either shape in declared order.
    pub fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        match self {
            Plan::Single(step) => std::slice::from_ref(step).iter(),
            Plan::Multi(plan) => plan.steps.iter(),
        }
    }

    pub fn steps_mut(&mut self) -> impl Iterator<Item = &mut PlanStep> {
        match self {
            Plan::Single(step) => std::slice::from_mut(step).iter_mut(),
            Plan::Multi(plan) => plan.steps.iter_mut(),
        }
    }

    /// Decode planner-model JSON into a plan.
    pub fn from_json(value: Value) -> Result<Self, crate::CoreError> {
        serde_json::from_value(value).map_err(|err| crate::CoreError::InvalidPlan {
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_step_plan_round_trips() {
        let plan = Plan::Single(PlanStep {
            action: "list_instances".to_string(),
            service: "compute".to_string(),
            params: IndexMap::from([
                ("compartment_id".to_string(), json!("ocid1.tenancy.oc1..root")),
                ("all_compartments".to_string(), json!(true)),
            ]),
            filter_in_code: true,
            filters: vec![PlanFilter::equality("lifecycle_state", "RUNNING")],
            ..Default::default()
        });

        let encoded = serde_json::to_value(&plan).expect("plan should serialize");
        assert_eq!(encoded["action"], "list_instances");
        assert_eq!(encoded["filters"][0]["operator"], "==");

        let decoded = Plan::from_json(encoded).expect("plan should deserialize");
        assert!(!decoded.is_multi());
        assert_eq!(decoded.action(), "list_instances");
    }

    #[test]
    fn steps_key_selects_the_multi_step_shape() {
        let decoded = Plan::from_json(json!({
            "steps": [
                {"action": "create_bucket", "service": "objectstorage",
                 "params": {"name": "a", "compartment_id": "ocid1.compartment.oc1..c"}},
                {"action": "create_bucket", "service": "objectstorage",
                 "params": {"name": "b", "compartment_id": "ocid1.compartment.oc1..c"}}
            ],
            "requires_confirmation": true,
            "safety_tier": "destructive"
        }))
        .expect("multi-step plan should deserialize");

        assert!(decoded.is_multi());
        assert_eq!(decoded.steps().count(), 2);
        assert_eq!(decoded.safety_tier(), SafetyTier::Destructive);
        assert!(decoded.requires_confirmation());
    }

    #[test]
    fn planner_output_with_extra_keys_still_decodes() {
        // Planner models decorate plans with rationale fields; those must
        // not break decoding.
        let decoded = Plan::from_json(json!({
            "action": "list_buckets",
            "service": "objectstorage",
            "params": {},
            "reasoning": "user asked for buckets"
        }))
        .expect("plan with extra keys should deserialize");
        assert_eq!(decoded.action(), "list_buckets");
    }

    #[test]
    fn deployment_and_list_detection() {
        let create = PlanStep::new("create_bucket", "objectstorage");
        let list = PlanStep::new("list_instances", "compute");
        assert!(create.is_deployment());
        assert!(!create.is_list());
        assert!(list.is_list());
        assert!(!list.is_deployment());
    }
}
