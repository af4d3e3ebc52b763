//! The presentation preparer: the single output object of every turn.
//!
//! Data-returning turns get a trimmed table and a model-authored summary
//! with the actual values called out. Interactive turns (confirmation,
//! parameter gathering, compartment selection) format the prompt the
//! caller displays and suspend the turn.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use cloudpilot_core::plan::Plan;
use cloudpilot_core::presentation::{OutputFormat, Presentation};
use cloudpilot_core::results::{AttrMap, ResultItem};
use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{DataSource, StateUpdate, TurnState};

use crate::capabilities::{LmCall, Message};
use crate::error_handler::FastErrorHandler;
use crate::nodes::{json_from_reply, Stage};
use crate::prompts::PromptLibrary;

/// Display columns, most important first.
const PRIORITY_COLUMNS: &[&str] = &[
    "display_name",
    "name",
    "id",
    "lifecycle_state",
    "state",
    "shape",
    "size_in_gbs",
    "region",
    "availability_domain",
    "compartment_id",
    "time_created",
    "email",
    "protocol",
    "port",
    "public_ips",
    "has_public_ip",
    "public_ip",
];

/// Meta fields never worth a column.
const UNWANTED_COLUMNS: &[&str] = &["attribute_map", "swagger_types"];

/// Display column cap.
const MAX_COLUMNS: usize = 10;

static OCID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ocid1\.[a-zA-Z0-9._-]+").expect("valid regex"));

/// Selects up to [`MAX_COLUMNS`] display columns: priority columns in
/// list order first, the remainder alphabetical.
pub fn select_columns(data: &[AttrMap]) -> Vec<String> {
    let mut all: Vec<String> = Vec::new();
    for item in data {
        for key in item.keys() {
            if !all.contains(key) && !UNWANTED_COLUMNS.contains(&key.as_str()) {
                all.push(key.clone());
            }
        }
    }

    let mut selected: Vec<String> = PRIORITY_COLUMNS
        .iter()
        .filter(|column| all.iter().any(|key| key == *column))
        .map(|column| column.to_string())
        .collect();

    let mut remaining: Vec<String> = all
        .into_iter()
        .filter(|key| !selected.contains(key))
        .collect();
    remaining.sort();
    selected.extend(remaining);
    selected.truncate(MAX_COLUMNS);
    selected
}

/// Parses a parameter-gathering reply into parameter values.
///
/// Tried in order: a numeric compartment pick, model extraction,
/// `key: value` lines, and a bare OCID for `compartment_id`.
pub async fn parse_parameter_response(
    input: &str,
    missing: &[String],
    compartment_data: Option<&[AttrMap]>,
    lm: &dyn LmCall,
) -> Map<String, Value> {
    let mut selected = Map::new();

    if let Some(compartments) = compartment_data {
        if let Ok(pick) = input.trim().parse::<usize>() {
            if pick >= 1 && pick <= compartments.len() {
                if let Some(id) = compartments[pick - 1].get("id") {
                    selected.insert("compartment_id".to_string(), id.clone());
                    return selected;
                }
            }
        }
    }

    if !missing.is_empty() {
        let prompt = format!(
            "Extract the required parameters from the user's response.\n\n\
             User response: \"{input}\"\nMissing parameters: {missing:?}\n\n\
             Look for compartment OCIDs, resource names, and any other required values.\n\
             Respond with JSON: {{\"extracted_parameters\": {{\"param_name\": \"value\"}}}}"
        );
        let reply = lm
            .call(&[Message::user(prompt)], "parameter_extraction", true)
            .await;
        if !reply.is_failure() {
            if let Some(value) = json_from_reply(&reply.text) {
                if let Some(extracted) =
                    value.get("extracted_parameters").and_then(Value::as_object)
                {
                    for (key, param_value) in extracted {
                        if missing.contains(key) && !param_value.is_null() {
                            selected.insert(key.clone(), param_value.clone());
                        }
                    }
                    if !selected.is_empty() {
                        return selected;
                    }
                }
            }
        }
    }

    for line in input.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if missing.iter().any(|param| param == key) {
                selected.insert(
                    key.to_string(),
                    Value::String(value.trim().to_string()),
                );
            }
        }
    }

    if selected.is_empty() && missing.iter().any(|param| param == "compartment_id") {
        if let Some(ocid) = OCID_PATTERN.find(input) {
            selected.insert(
                "compartment_id".to_string(),
                Value::String(ocid.as_str().to_string()),
            );
        }
    }

    selected
}

/// Prepares the turn's presentation object.
pub struct PresentationNode {
    lm: Arc<dyn LmCall>,
    prompts: Arc<PromptLibrary>,
    error_handler: Arc<FastErrorHandler>,
}

impl PresentationNode {
    pub fn new(
        lm: Arc<dyn LmCall>,
        prompts: Arc<PromptLibrary>,
        error_handler: Arc<FastErrorHandler>,
    ) -> Self {
        PresentationNode {
            lm,
            prompts,
            error_handler,
        }
    }

    fn complete(presentation: Presentation) -> StateUpdate {
        StateUpdate {
            presentation: Some(presentation),
            next_step: Some(StageName::MemorySave),
            ..Default::default()
        }
        .with_last_node(StageName::Presentation)
    }

    fn suspend(presentation: Presentation) -> StateUpdate {
        StateUpdate {
            presentation: Some(presentation),
            next_step: Some(StageName::UserInputRequired),
            ..Default::default()
        }
        .with_last_node(StageName::Presentation)
    }

    async fn summarize(&self, state: &TurnState, data: &[AttrMap], columns: &[String]) -> String {
        let base_prompt = self
            .prompts
            .load("presentation")
            .unwrap_or_else(|_| "You are an expert cloud analyst. Analyze the data.".to_string());

        let preview: Vec<Map<String, Value>> = data
            .iter()
            .map(|item| {
                columns
                    .iter()
                    .filter_map(|column| {
                        item.get(column).map(|value| (column.clone(), value.clone()))
                    })
                    .collect()
            })
            .collect();
        let preview_text = format!(
            "Total items: {}\nSample: {}",
            data.len(),
            serde_json::to_string_pretty(&preview).unwrap_or_default()
        );

        let prompt = format!(
            "{base_prompt}\n\n## Task\nAnalyze the following data in context of the user query.\n\n\
             User query:\n{}\n\nData (preview):\n{preview_text}\n\n\
             Include the specific values the user asked for, not just counts. \
             Summarize your findings and highlight important insights.",
            state.user_input
        );
        let messages = [
            Message::system(prompt),
            Message::user(format!(
                "Answer the query using the data above: {}",
                state.user_input
            )),
        ];
        let reply = self
            .lm
            .call(&messages, "final_presentation_summary", false)
            .await;
        if reply.is_failure() {
            warn!("summary model failed, using count fallback");
            return format!("Found {} matching resources.", data.len());
        }
        reply.text
    }

    async fn general_chat(&self, state: &TurnState) -> Presentation {
        let base_prompt = self.prompts.load("presentation").unwrap_or_default();
        let prompt = format!(
            "{base_prompt}\n\n## Input Context\n{{\"user_query\": \"{}\"}}",
            state.user_input
        );
        let reply = self
            .lm
            .call(&[Message::user(prompt)], "final_presentation_chat", false)
            .await;
        if reply.is_failure() {
            return Presentation::chat(FALLBACK_CHAT_MESSAGE);
        }
        Presentation::chat(reply.text.trim())
    }

    fn confirmation_prompt(pending: &Plan) -> Presentation {
        let action = pending.action().replace('_', " ").to_uppercase();
        let (service, params) = match pending.steps().next() {
            Some(step) => (
                step.service.clone(),
                serde_json::to_string_pretty(&step.params).unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };
        let summary = format!(
            "**SAFETY CONFIRMATION REQUIRED**\n\n\
             I am about to perform a **{action}** operation in the **{service}** service.\n\n\
             **Operation details:**\n{params}\n\n\
             **Are you sure you want to proceed with this operation?**\n\n\
             Type **\"yes\"** to confirm or **\"no\"** to cancel."
        );
        Presentation {
            summary,
            format: OutputFormat::Chat,
            confirmation_required: true,
            pending_plan: Some(pending.clone()),
            ..Default::default()
        }
    }

    fn gathering_prompt(pending: &Plan, missing: &[String]) -> Presentation {
        let action = pending.action().replace('_', " ").to_uppercase();
        let service = pending
            .steps()
            .next()
            .map(|step| step.service.clone())
            .unwrap_or_default();

        let mut summary = format!(
            "**PARAMETER GATHERING REQUIRED**\n\n\
             I need additional information to complete your **{action}** operation in the \
             **{service}** service.\n\n**Missing parameters:** {}\n",
            missing.join(", ")
        );
        for param in missing {
            let guidance = match param.as_str() {
                "compartment_id" => Some(
                    "Provide the compartment OCID where the resource should live. \
                     You can find compartment OCIDs by running: \"list compartments\"",
                ),
                "shape" => Some(
                    "Provide the shape name (for example \"VM.Standard.E2.1.Micro\"). \
                     You can find available shapes by running: \"list shapes\"",
                ),
                "image_id" => Some(
                    "Provide the image OCID. You can find available images by running: \"list images\"",
                ),
                "subnet_id" => Some(
                    "Provide the subnet OCID. You can find subnet OCIDs by running: \"list subnets\"",
                ),
                _ => None,
            };
            if let Some(guidance) = guidance {
                summary.push_str(&format!("\n**{param}:** {guidance}\n"));
            }
        }
        summary.push_str(
            "\n**Example response:**\ncompartment_id: ocid1.compartment.oc1..your_compartment\nname: my-resource",
        );

        Presentation {
            summary,
            format: OutputFormat::Chat,
            parameter_gathering_required: true,
            missing_parameters: missing.to_vec(),
            pending_plan: Some(pending.clone()),
            ..Default::default()
        }
    }

    fn compartment_selection(
        pending: Option<&Plan>,
        missing: &[String],
        compartments: &[AttrMap],
    ) -> Presentation {
        let mut summary = String::from(
            "**COMPARTMENT SELECTION REQUIRED**\n\nI need to know which compartment to use.\n\n",
        );
        if compartments.is_empty() {
            summary.push_str(
                "I couldn't retrieve the compartment list. Please provide the OCID directly:\n\
                 compartment_id: ocid1.compartment.oc1..your_compartment",
            );
        } else {
            summary.push_str("**Available compartments:**\n");
            for (index, compartment) in compartments.iter().enumerate() {
                let name = compartment
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown");
                let id = compartment
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                summary.push_str(&format!("{}. **{name}** (`{id}`)\n", index + 1));
            }
            summary.push_str(
                "\nType the number (for example `1`) to select a compartment, or provide the \
                 OCID directly: `compartment_id: ocid1.compartment.oc1..your_compartment`",
            );
        }

        Presentation {
            summary,
            format: OutputFormat::Chat,
            compartment_selection_required: true,
            missing_parameters: missing.to_vec(),
            pending_plan: pending.cloned(),
            ..Default::default()
        }
    }

    fn cancellation(state: &TurnState) -> Presentation {
        let reason = state
            .cancellation_reason
            .clone()
            .unwrap_or_else(|| "The operation was cancelled.".to_string());
        let mut presentation = Presentation::chat(format!(
            "**OPERATION CANCELLED**\n\n{reason}\n\nNo changes have been made to your tenancy."
        ));
        presentation.action_cancelled = true;
        presentation
    }

    fn plan_error_prose(plan_error: &str) -> Presentation {
        let lower = plan_error.to_lowercase();
        let message = if lower.contains("multiple") || lower.contains("steps") {
            "I had trouble processing that multi-resource request. You can try creating one \
             resource at a time (for example \"create a bucket named demo\"), or list what \
             already exists first."
        } else if lower.contains("unsupported") || lower.contains("format") {
            "I had trouble understanding that request. Try a simpler phrasing, such as \
             \"create a bucket named demo\" or \"list instances\"."
        } else if lower.contains("plan") {
            "I couldn't put together a plan for that request just now. Simple operations like \
             \"list buckets\" or \"list compartments\" should still work; please try again in a \
             moment."
        } else {
            "I ran into an issue working out how to handle that request. Breaking it into \
             smaller steps usually helps, or try a different operation."
        };
        Presentation::chat(message)
    }
}

const FALLBACK_CHAT_MESSAGE: &str =
    "I'm having trouble answering right now. Simple operations like \"list buckets\" or \
     \"list compartments\" are a good place to start.";

#[async_trait]
impl Stage for PresentationNode {
    fn name(&self) -> StageName {
        StageName::Presentation
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        // A preset presentation (recursion guard) passes through. Only the
        // supervisor ever routes here with one already set.
        if let Some(preset) = &state.presentation {
            return Self::complete(preset.clone());
        }

        if state.confirmation_required {
            if let Some(pending) = &state.pending_plan {
                return Self::suspend(Self::confirmation_prompt(pending));
            }
        }

        if state.action_cancelled {
            return Self::complete(Self::cancellation(state));
        }

        if state.parameter_gathering_required {
            if let Some(pending) = &state.pending_plan {
                return Self::suspend(Self::gathering_prompt(pending, &state.missing_parameters));
            }
        }

        if state.sub_task_result.as_deref() == Some("compartment_listing") {
            let compartments: Vec<AttrMap> = state
                .execution_result
                .as_deref()
                .unwrap_or(&[])
                .iter()
                .filter(|item| !item.is_error())
                .map(|item| item.attrs().clone())
                .collect();
            debug!(count = compartments.len(), "presenting compartment selection");
            let presentation = Self::compartment_selection(
                state.pending_plan.as_ref(),
                &state.missing_parameters,
                &compartments,
            );
            let mut update = Self::suspend(presentation);
            update.compartment_data = Some(compartments);
            update.compartment_selection_required = Some(true);
            update.sub_task_result = Some(None);
            return update;
        }

        if let Some(plan_error) = &state.plan_error {
            return Self::complete(Self::plan_error_prose(plan_error));
        }

        if let Some(execution_error) = &state.execution_error {
            let message = self
                .error_handler
                .handle(execution_error, state, "executor")
                .await;
            return Self::complete(Presentation::chat(message));
        }

        if state.intent.as_deref() == Some("general_chat") {
            return Self::complete(self.general_chat(state).await);
        }

        // Data-returning turn.
        let items = state.execution_result.clone().unwrap_or_default();
        let data: Vec<AttrMap> = items.iter().map(|item| item.attrs().clone()).collect();

        if data.is_empty() {
            let summary = if state.data_source == Some(DataSource::RetrievalCache) {
                "I searched the indexed tenancy data but couldn't find resources matching your query."
            } else {
                "No matching resources were found."
            };
            return Self::complete(Presentation::chat(summary));
        }

        let columns = select_columns(&data);
        let trimmed: Vec<AttrMap> = data
            .iter()
            .map(|item| {
                columns
                    .iter()
                    .filter_map(|column| {
                        item.get(column).map(|value| (column.clone(), value.clone()))
                    })
                    .collect()
            })
            .collect();

        let summary = self.summarize(state, &data, &columns).await;
        Self::complete(Presentation::table(summary, trimmed, columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attr(pairs: &[(&str, Value)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn priority_columns_come_first_in_list_order() {
        let data = vec![attr(&[
            ("zzz_custom", json!(1)),
            ("shape", json!("VM.Standard3.Flex")),
            ("display_name", json!("web-1")),
            ("lifecycle_state", json!("RUNNING")),
            ("attribute_map", json!({})),
        ])];
        let columns = select_columns(&data);
        assert_eq!(columns[0], "display_name");
        assert_eq!(columns[1], "lifecycle_state");
        assert_eq!(columns[2], "shape");
        assert!(columns.contains(&"zzz_custom".to_string()));
        assert!(!columns.contains(&"attribute_map".to_string()));
    }

    #[test]
    fn column_selection_caps_at_ten() {
        let mut pairs: Vec<(String, Value)> = (0..15)
            .map(|i| (format!("field_{i:02}"), json!(i)))
            .collect();
        pairs.push(("display_name".to_string(), json!("x")));
        let map: AttrMap = pairs.into_iter().collect();
        let columns = select_columns(&[map]);
        assert_eq!(columns.len(), MAX_COLUMNS);
        assert_eq!(columns[0], "display_name");
    }

    #[test]
    fn plan_error_prose_maps_error_families() {
        let multi = PresentationNode::plan_error_prose("could not expand steps");
        assert!(multi.summary.contains("one resource at a time"));

        let generic = PresentationNode::plan_error_prose("boom");
        assert_eq!(generic.format, OutputFormat::Chat);
    }

    #[test]
    fn confirmation_prompt_carries_the_pending_plan() {
        let plan = Plan::Single(cloudpilot_core::plan::PlanStep::new(
            "create_bucket",
            "objectstorage",
        ));
        let presentation = PresentationNode::confirmation_prompt(&plan);
        assert!(presentation.confirmation_required);
        assert!(presentation.summary.contains("CREATE BUCKET"));
        assert!(presentation.pending_plan.is_some());
    }

    #[test]
    fn compartment_selection_numbers_the_list() {
        let compartments = vec![
            attr(&[("name", json!("dev")), ("id", json!("ocid1.compartment.oc1..dev"))]),
            attr(&[("name", json!("prod")), ("id", json!("ocid1.compartment.oc1..prod"))]),
        ];
        let presentation =
            PresentationNode::compartment_selection(None, &["compartment_id".to_string()], &compartments);
        assert!(presentation.compartment_selection_required);
        assert!(presentation.summary.contains("1. **dev**"));
        assert!(presentation.summary.contains("2. **prod**"));
    }
}
