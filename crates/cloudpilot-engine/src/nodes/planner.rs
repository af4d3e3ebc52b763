//! The planner: template fast-path, model-authored multi-step planning,
//! and programmatic parameter verification.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use cloudpilot_core::plan::{Plan, PlanStep, SafetyTier};
use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{ExecutionStrategy, StateUpdate, TurnState};

use crate::capabilities::{LmCall, Message};
use crate::nodes::intent::{self, ExecutionType, IntentAnalysis};
use crate::nodes::templates::{template_plan, TemplatePlan};
use crate::nodes::{json_from_reply, Stage};
use crate::prompts::PromptLibrary;

/// Required parameters for the known destructive actions. For these the
/// programmatically computed missing set overrides whatever the model
/// claimed.
const DESTRUCTIVE_REQUIRED_PARAMS: &[(&str, &[&str])] = &[
    (
        "create_instance",
        &["compartment_id", "shape", "image_id", "subnet_id"],
    ),
    ("create_bucket", &["compartment_id", "name"]),
    ("create_volume", &["compartment_id", "size_in_gbs"]),
    (
        "create_load_balancer",
        &["compartment_id", "shape_name", "subnet_ids"],
    ),
    ("delete_bucket", &["name"]),
];

/// Declared required parameters for a known destructive action.
pub fn required_parameters(action: &str) -> Option<&'static [&'static str]> {
    DESTRUCTIVE_REQUIRED_PARAMS
        .iter()
        .find(|(known, _)| *known == action)
        .map(|(_, params)| *params)
}

/// Computes the authoritative missing-parameter set for a plan.
///
/// Known destructive actions use the declared table; multi-step plans
/// require `compartment_id` on their first step; unknown destructive
/// actions keep the model's own claim; safe actions have no missing set.
pub fn compute_missing(plan: &Plan) -> Vec<String> {
    match plan {
        Plan::Multi(multi) => {
            let first_has_compartment = multi
                .steps
                .first()
                .map(|step| step.params.contains_key("compartment_id"))
                .unwrap_or(false);
            if first_has_compartment {
                Vec::new()
            } else {
                vec!["compartment_id".to_string()]
            }
        }
        Plan::Single(step) => match required_parameters(&step.action) {
            Some(required) => required
                .iter()
                .filter(|param| !step.params.contains_key(**param))
                .map(|param| param.to_string())
                .collect(),
            None => step.missing_parameters.clone(),
        },
    }
}

/// List operations default to the whole tenancy unless explicitly scoped.
fn enforce_all_compartments(plan: &mut Plan) {
    for step in plan.steps_mut() {
        if step.is_list() && !step.all_compartments() {
            step.params
                .insert("all_compartments".to_string(), json!(true));
        }
    }
}

/// Applies safety flags and the parameter verification rule.
fn apply_safety_flags(plan: &mut Plan, analysis: &IntentAnalysis) {
    let is_deployment = match plan {
        Plan::Single(step) => step.is_deployment(),
        Plan::Multi(_) => false,
    };
    let is_multi = plan.is_multi();

    if analysis.is_mutating && (is_deployment || is_multi) {
        let missing = compute_missing(plan);
        match plan {
            Plan::Single(step) => {
                step.requires_confirmation = true;
                step.safety_tier = SafetyTier::Destructive;
                step.missing_parameters = missing;
            }
            Plan::Multi(multi) => {
                multi.requires_confirmation = true;
                multi.safety_tier = SafetyTier::Destructive;
                multi.missing_parameters = missing;
            }
        }
    } else {
        match plan {
            Plan::Single(step) => {
                step.safety_tier = SafetyTier::Safe;
                step.missing_parameters.clear();
            }
            Plan::Multi(multi) => {
                multi.safety_tier = SafetyTier::Safe;
                multi.missing_parameters.clear();
            }
        }
    }
}

/// Converts a matched template into an executable plan.
fn plan_from_template(template: &TemplatePlan, analysis: &IntentAnalysis, tenancy: &str) -> Plan {
    let service = template
        .service
        .clone()
        .unwrap_or_else(|| analysis.oci_service.clone());

    let mut params: IndexMap<String, Value> = IndexMap::new();
    if analysis.action != "create" {
        // Creation leaves the compartment to parameter gathering.
        params.insert("compartment_id".to_string(), json!(tenancy));
        params.insert(
            "all_compartments".to_string(),
            json!(template.all_compartments),
        );
    }

    let mut step = PlanStep {
        action: template.api_method.clone(),
        service,
        params,
        ..Default::default()
    };
    if template.requires_filtering {
        step.filter_in_code = true;
        step.filters = template.filters.clone();
    }
    Plan::Single(step)
}

/// Routing after planning: gather / confirm via the supervisor, or go
/// straight to code generation.
fn route_after_planning(plan: &Plan) -> StageName {
    let missing = plan.missing_parameters();
    let gate_on_missing =
        !missing.is_empty() && (plan.action().starts_with("create_") || plan.is_multi());
    if gate_on_missing || plan.requires_confirmation() {
        StageName::Supervisor
    } else {
        StageName::Codegen
    }
}

/// Emits structured execution plans: a compile-time template when the
/// analysis is a confident direct fetch, model planning otherwise.
pub struct PlannerNode {
    lm: Arc<dyn LmCall>,
    prompts: Arc<PromptLibrary>,
    tenancy: String,
}

impl PlannerNode {
    pub fn new(lm: Arc<dyn LmCall>, prompts: Arc<PromptLibrary>, tenancy: String) -> Self {
        PlannerNode {
            lm,
            prompts,
            tenancy,
        }
    }

    /// The fixed sub-task plan listing compartments for interactive
    /// selection; the pending plan and missing set ride along untouched.
    fn compartment_listing(&self) -> StateUpdate {
        let plan = Plan::Single(PlanStep {
            action: "list_compartments".to_string(),
            service: "identity".to_string(),
            params: IndexMap::from([
                ("compartment_id".to_string(), json!(self.tenancy.clone())),
                ("all_compartments".to_string(), json!(true)),
            ]),
            ..Default::default()
        });
        StateUpdate {
            plan: Some(Some(plan)),
            sub_task: Some(None),
            sub_task_result: Some(Some("compartment_listing".to_string())),
            next_step: Some(StageName::Codegen),
            ..Default::default()
        }
        .with_last_node(StageName::Planner)
    }

    fn plan_failure(&self, strategy: ExecutionStrategy, message: String) -> StateUpdate {
        warn!(%message, "planning failed");
        StateUpdate {
            plan: Some(None),
            plan_error: Some(Some(message)),
            execution_strategy: Some(strategy),
            next_step: Some(StageName::Supervisor),
            ..Default::default()
        }
        .with_last_node(StageName::Planner)
    }

    async fn handle_direct_fetch(
        &self,
        analysis: &IntentAnalysis,
        state: &TurnState,
        query: &str,
    ) -> StateUpdate {
        match template_plan(analysis) {
            Some(template) => {
                debug!(pattern = ?template.pattern_name, "template plan matched");
                let mut plan = plan_from_template(&template, analysis, &self.tenancy);
                enforce_all_compartments(&mut plan);
                apply_safety_flags(&mut plan, analysis);
                StateUpdate {
                    plan: Some(Some(plan)),
                    execution_strategy: Some(ExecutionStrategy::DirectFetch),
                    next_step: Some(StageName::Codegen),
                    ..Default::default()
                }
                .with_last_node(StageName::Planner)
            }
            None => {
                debug!("no template matched, falling back to model planning");
                self.handle_model_planning(analysis, state, query, ExecutionStrategy::LlmFallback)
                    .await
            }
        }
    }

    async fn handle_model_planning(
        &self,
        analysis: &IntentAnalysis,
        state: &TurnState,
        query: &str,
        strategy: ExecutionStrategy,
    ) -> StateUpdate {
        let prompt_template = self
            .prompts
            .load("planner_enhanced")
            .or_else(|_| self.prompts.load("planner"));
        let prompt_template = match prompt_template {
            Ok(prompt) => prompt,
            Err(err) => return self.plan_failure(strategy, err.to_string()),
        };

        let analysis_json = serde_json::to_string_pretty(analysis).unwrap_or_default();
        let prompt = prompt_template
            .replace("{intent}", &analysis_json)
            .replace("{classification}", &analysis_json)
            .replace("{query}", query);

        let messages = [
            Message::system(prompt),
            Message::user(format!("Generate a plan for: {query}")),
        ];
        let reply = self.lm.call(&messages, "planner", false).await;
        if reply.is_failure() {
            return self.plan_failure(strategy, reply.text);
        }

        let Some(value) = json_from_reply(&reply.text) else {
            return self.plan_failure(strategy, "planner reply contained no JSON".to_string());
        };
        let mut plan = match Plan::from_json(value) {
            Ok(plan) => plan,
            Err(err) => return self.plan_failure(strategy, err.to_string()),
        };

        enforce_all_compartments(&mut plan);
        if analysis.is_mutating {
            self.extract_embedded_parameters(&mut plan, state).await;
        }
        apply_safety_flags(&mut plan, analysis);

        let next = route_after_planning(&plan);
        StateUpdate {
            plan: Some(Some(plan)),
            plan_error: Some(None),
            execution_strategy: Some(strategy),
            next_step: Some(next),
            ..Default::default()
        }
        .with_last_node(StageName::Planner)
    }

    /// Pulls parameter values the user embedded in the request ("create a
    /// bucket named demo") into the plan before the missing set is
    /// computed. Best-effort: a failed extraction changes nothing.
    async fn extract_embedded_parameters(&self, plan: &mut Plan, state: &TurnState) {
        let candidates: Vec<&str> = plan
            .steps()
            .flat_map(|step| required_parameters(&step.action).unwrap_or(&[]).iter())
            .copied()
            .collect();
        if candidates.is_empty() {
            return;
        }

        let Ok(prompt_template) = self.prompts.load("require_parameter") else {
            return;
        };
        let prompt = prompt_template
            .replace("{parameters}", &candidates.join(", "))
            .replace("{query}", &state.user_input);

        let messages = [
            Message::system(prompt),
            Message::user(state.user_input.clone()),
        ];
        let reply = self.lm.call(&messages, "parameter_extraction", true).await;
        if reply.is_failure() {
            return;
        }
        let Some(value) = json_from_reply(&reply.text) else {
            return;
        };
        let Some(extracted) = value.get("extracted_parameters").and_then(Value::as_object) else {
            return;
        };

        for step in plan.steps_mut() {
            for (key, param_value) in extracted {
                if param_value.is_null() {
                    continue;
                }
                let relevant = required_parameters(&step.action)
                    .map(|required| required.contains(&key.as_str()))
                    .unwrap_or(false);
                if relevant && !step.params.contains_key(key) {
                    step.params.insert(key.clone(), param_value.clone());
                }
            }
        }
    }
}

#[async_trait]
impl Stage for PlannerNode {
    fn name(&self) -> StageName {
        StageName::Planner
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        if state.sub_task.as_deref() == Some("list_compartments") {
            debug!("planner handling compartment-listing sub-task");
            return self.compartment_listing();
        }

        let query = state.effective_query().to_string();
        let analysis = intent::analyze(&query, self.lm.as_ref(), &self.prompts).await;
        debug!(
            resource = %analysis.primary_resource,
            action = %analysis.action,
            execution_type = ?analysis.execution_type,
            method = %analysis.analysis_method,
            "intent analysis complete"
        );

        match analysis.execution_type {
            ExecutionType::DirectFetch => self.handle_direct_fetch(&analysis, state, &query).await,
            ExecutionType::MultiStepRequired => {
                self.handle_model_planning(&analysis, state, &query, ExecutionStrategy::MultiStep)
                    .await
            }
            ExecutionType::Unknown => {
                self.handle_model_planning(&analysis, state, &query, ExecutionStrategy::LlmFallback)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudpilot_core::plan::{MultiStepPlan, PlanFilter};

    fn analysis_for(query: &str) -> IntentAnalysis {
        intent::quick_analysis(query)
    }

    #[test]
    fn create_bucket_missing_set_is_computed_not_trusted() {
        let mut step = PlanStep::new("create_bucket", "objectstorage");
        // The model claimed nothing was missing.
        step.missing_parameters = Vec::new();
        let mut plan = Plan::Single(step);

        let mut analysis = analysis_for("create a bucket");
        analysis.is_mutating = true;
        apply_safety_flags(&mut plan, &analysis);

        assert_eq!(
            plan.missing_parameters(),
            &["compartment_id".to_string(), "name".to_string()]
        );
        assert!(plan.requires_confirmation());
        assert_eq!(plan.safety_tier(), SafetyTier::Destructive);
    }

    #[test]
    fn supplied_parameters_shrink_the_missing_set() {
        let mut step = PlanStep::new("create_bucket", "objectstorage");
        step.params.insert("name".to_string(), json!("demo"));
        let mut plan = Plan::Single(step);

        let mut analysis = analysis_for("create a bucket named demo");
        analysis.is_mutating = true;
        apply_safety_flags(&mut plan, &analysis);

        assert_eq!(plan.missing_parameters(), &["compartment_id".to_string()]);
    }

    #[test]
    fn unknown_destructive_actions_trust_the_model() {
        let mut step = PlanStep::new("update_dns_zone", "dns");
        step.missing_parameters = vec!["zone_id".to_string()];
        let plan = Plan::Single(step);
        assert_eq!(compute_missing(&plan), vec!["zone_id".to_string()]);
    }

    #[test]
    fn safe_actions_clear_the_missing_set() {
        let mut step = PlanStep::new("list_instances", "compute");
        step.missing_parameters = vec!["compartment_id".to_string()];
        let mut plan = Plan::Single(step);

        let analysis = analysis_for("list instances");
        apply_safety_flags(&mut plan, &analysis);

        assert!(plan.missing_parameters().is_empty());
        assert_eq!(plan.safety_tier(), SafetyTier::Safe);
    }

    #[test]
    fn multi_step_plans_need_a_first_step_compartment() {
        let multi = Plan::Multi(MultiStepPlan {
            steps: vec![PlanStep::new("create_bucket", "objectstorage")],
            requires_confirmation: false,
            safety_tier: SafetyTier::Safe,
            missing_parameters: Vec::new(),
        });
        assert_eq!(compute_missing(&multi), vec!["compartment_id".to_string()]);

        let mut with_compartment = PlanStep::new("create_bucket", "objectstorage");
        with_compartment
            .params
            .insert("compartment_id".to_string(), json!("ocid1.compartment.oc1..c"));
        let multi = Plan::Multi(MultiStepPlan {
            steps: vec![with_compartment],
            requires_confirmation: false,
            safety_tier: SafetyTier::Safe,
            missing_parameters: Vec::new(),
        });
        assert!(compute_missing(&multi).is_empty());
    }

    #[test]
    fn list_steps_get_all_compartments_by_default() {
        let mut plan = Plan::Single(PlanStep::new("list_vcns", "virtualnetwork"));
        enforce_all_compartments(&mut plan);
        let step = plan.steps().next().expect("step");
        assert!(step.all_compartments());
    }

    #[test]
    fn template_conversion_carries_filters() {
        let analysis = analysis_for("list running instances");
        let template = template_plan(&analysis).expect("template");
        let plan = plan_from_template(&template, &analysis, "ocid1.tenancy.oc1..t");

        let step = plan.steps().next().expect("step");
        assert_eq!(step.action, "list_instances");
        assert_eq!(step.service, "compute");
        assert!(step.filter_in_code);
        assert_eq!(
            step.filters,
            vec![PlanFilter::equality("lifecycle_state", "RUNNING")]
        );
        assert_eq!(step.params["compartment_id"], json!("ocid1.tenancy.oc1..t"));
    }

    #[test]
    fn gated_plans_route_via_the_supervisor() {
        let mut gated = PlanStep::new("create_bucket", "objectstorage");
        gated.missing_parameters = vec!["compartment_id".to_string()];
        assert_eq!(
            route_after_planning(&Plan::Single(gated)),
            StageName::Supervisor
        );

        let mut confirmed = PlanStep::new("delete_bucket", "objectstorage");
        confirmed.requires_confirmation = true;
        confirmed.params.insert("name".to_string(), json!("demo"));
        assert_eq!(
            route_after_planning(&Plan::Single(confirmed)),
            StageName::Supervisor
        );

        let safe = PlanStep::new("list_instances", "compute");
        assert_eq!(
            route_after_planning(&Plan::Single(safe)),
            StageName::Codegen
        );
    }
}
