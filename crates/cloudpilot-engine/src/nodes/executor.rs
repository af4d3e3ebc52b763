//! The executor: interprets verified action programs against the cloud
//! client factory and normalizes everything it returns.
//!
//! Results handed onward are always attribute maps. Multi-step plans run
//! sequentially in declared order; one failing step records an error item
//! and never aborts its siblings. Program-level failures are classified
//! retryable or terminal by the supervisor.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use cloudpilot_core::plan::FilterOp;
use cloudpilot_core::program::{ActionProgram, ProgramStep};
use cloudpilot_core::results::{AttrMap, ResultItem};
use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{DataSource, StateUpdate, TurnState};

use crate::capabilities::{CloudClientFactory, CloudConfig, ServiceClient};
use crate::nodes::Stage;

/// Runs the plan's artifacts against the client factory.
pub struct ExecutorNode {
    factory: Arc<dyn CloudClientFactory>,
    config: Arc<CloudConfig>,
}

impl ExecutorNode {
    pub fn new(factory: Arc<dyn CloudClientFactory>, config: Arc<CloudConfig>) -> Self {
        ExecutorNode { factory, config }
    }

    fn failure(message: String) -> StateUpdate {
        warn!(%message, "execution failed");
        StateUpdate {
            execution_error: Some(Some(message)),
            next_step: Some(StageName::Supervisor),
            ..Default::default()
        }
        .with_last_node(StageName::Executor)
    }
}

#[async_trait]
impl Stage for ExecutorNode {
    fn name(&self) -> StageName {
        StageName::Executor
    }

    async fn run(&self, state: &TurnState) -> StateUpdate {
        let Some(plan) = &state.plan else {
            return Self::failure("no plan to execute".to_string());
        };
        if self.config.tenancy.is_empty() {
            return Self::failure("missing tenancy in credentials".to_string());
        }

        let mut runner = ProgramRunner {
            factory: self.factory.as_ref(),
            config: &self.config,
            namespace: self.config.namespace.clone(),
        };

        let steps: Vec<_> = plan.steps().collect();
        let mut items: Vec<ResultItem> = Vec::new();
        let mut step_errors: Vec<String> = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            let Some(program) = &step.artifact else {
                step_errors.push(format!("step {} has no artifact", index + 1));
                continue;
            };
            match runner.run_program(program).await {
                Ok(step_items) => items.extend(step_items),
                Err(err) => {
                    debug!(step = index + 1, %err, "program step failed");
                    step_errors.push(err.clone());
                    // Sibling steps keep running; the failure is recorded
                    // as a result item for presentation.
                    if steps.len() > 1 {
                        items.push(ResultItem::error(format!(
                            "step {} ({}) failed: {err}",
                            index + 1,
                            step.action
                        )));
                    }
                }
            }
        }

        // Only an entirely failed run surfaces as an execution error
        // (eligible for the codegen retry).
        let all_failed = !step_errors.is_empty() && items.iter().all(ResultItem::is_error);
        if all_failed {
            return Self::failure(step_errors.join("; "));
        }

        debug!(count = items.len(), "execution complete");
        StateUpdate {
            execution_result: Some(items),
            execution_error: Some(None),
            data_source: Some(DataSource::LiveApi),
            next_step: Some(StageName::Presentation),
            ..Default::default()
        }
        .with_last_node(StageName::Executor)
    }
}

/// One program execution with its accumulated results.
struct ProgramRunner<'a> {
    factory: &'a dyn CloudClientFactory,
    config: &'a CloudConfig,
    namespace: Option<String>,
}

impl ProgramRunner<'_> {
    async fn run_program(&mut self, program: &ActionProgram) -> Result<Vec<ResultItem>, String> {
        let mut results: Vec<AttrMap> = Vec::new();
        let call_count = program
            .steps
            .iter()
            .filter(|step| matches!(step, ProgramStep::Call { .. }))
            .count();

        for step in &program.steps {
            match step {
                ProgramStep::ResolveNamespace { service } => {
                    self.resolve_namespace(service).await?;
                }
                ProgramStep::ListResources {
                    service,
                    operation,
                    params,
                    all_compartments,
                } => {
                    let listed = self
                        .list_resources(service, operation, params, *all_compartments)
                        .await?;
                    results.extend(listed);
                }
                ProgramStep::Call {
                    service,
                    operation,
                    params,
                } => match self.call(service, operation, params, None).await {
                    Ok(returned) => results.extend(returned),
                    Err(err) => {
                        // A lone call propagates (retry-eligible); batched
                        // calls record the failure and keep going.
                        if call_count <= 1 {
                            return Err(err);
                        }
                        results.push(error_map(&err));
                    }
                },
                ProgramStep::Filter {
                    field,
                    operator,
                    value,
                    nested_field,
                } => {
                    results.retain(|item| {
                        filter_matches(item, field, *operator, value, nested_field.as_deref())
                    });
                }
                ProgramStep::ForEach { collection: _, body } => {
                    self.run_for_each(&mut results, body).await;
                }
            }
        }

        Ok(results
            .into_iter()
            .map(|map| ResultItem::from_value(Value::Object(map)))
            .collect())
    }

    /// Runs the body once per accumulated item, merging each call's first
    /// returned map into the item. A failing item is skipped, not fatal.
    async fn run_for_each(&mut self, results: &mut [AttrMap], body: &[ProgramStep]) {
        for item in results.iter_mut() {
            for step in body {
                let ProgramStep::Call {
                    service,
                    operation,
                    params,
                } = step
                else {
                    continue;
                };
                match self.call(service, operation, params, Some(item)).await {
                    Ok(returned) => {
                        if let Some(first) = returned.into_iter().next() {
                            for (key, value) in first {
                                item.entry(key).or_insert(value);
                            }
                        }
                    }
                    Err(err) => {
                        debug!(%operation, %err, "for_each enrichment skipped an item");
                        break;
                    }
                }
            }
        }
    }

    async fn resolve_namespace(&mut self, service: &str) -> Result<(), String> {
        if self.namespace.is_some() {
            return Ok(());
        }
        let client = self.client(service)?;
        let returned = client
            .invoke("get_namespace", &Map::new())
            .await
            .map_err(|err| err.to_string())?;
        let namespace = returned
            .first()
            .and_then(|map| {
                map.get("namespace")
                    .or_else(|| map.get("value"))
                    .and_then(Value::as_str)
            })
            .map(str::to_string)
            .ok_or_else(|| "namespace resolution returned no value".to_string())?;
        self.namespace = Some(namespace);
        Ok(())
    }

    async fn list_resources(
        &mut self,
        service: &str,
        operation: &str,
        params: &IndexMap<String, Value>,
        all_compartments: bool,
    ) -> Result<Vec<AttrMap>, String> {
        // Compartment listings are tenancy-wide already; fanning them out
        // per compartment would duplicate every row.
        let all_compartments = all_compartments && operation != "list_compartments";
        let compartments = if all_compartments {
            self.active_compartments().await
        } else {
            let scoped = params
                .get("compartment_id")
                .and_then(Value::as_str)
                .unwrap_or(&self.config.tenancy);
            vec![scoped.to_string()]
        };
        let fanned_out = compartments.len() > 1;

        let mut collected = Vec::new();
        for compartment in compartments {
            let mut call_params = params.clone();
            call_params.insert("compartment_id".to_string(), Value::String(compartment));
            call_params.shift_remove("all_compartments");
            match self.call(service, operation, &call_params, None).await {
                Ok(returned) => collected.extend(returned),
                Err(err) if fanned_out => {
                    // Expected during tenancy fan-out; skip the compartment.
                    debug!(%operation, %err, "compartment listing skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(collected)
    }

    /// Tenancy root plus every active descendant, root first, no
    /// duplicates. Falls back to the root alone on failure.
    async fn active_compartments(&self) -> Vec<String> {
        let tenancy = self.config.tenancy.clone();
        let client = match self.client("identity") {
            Ok(client) => client,
            Err(_) => return vec![tenancy],
        };

        let mut params = Map::new();
        params.insert("compartment_id".to_string(), Value::String(tenancy.clone()));
        params.insert("compartment_id_in_subtree".to_string(), Value::Bool(true));
        params.insert("access_level".to_string(), Value::String("ANY".to_string()));

        let listed = match client.invoke("list_compartments", &params).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(%err, "compartment resolution failed, using tenancy root");
                return vec![tenancy];
            }
        };

        let mut compartments = vec![tenancy];
        for item in listed {
            let active = item
                .get("lifecycle_state")
                .and_then(Value::as_str)
                .map(|s| s == "ACTIVE")
                .unwrap_or(false);
            if !active {
                continue;
            }
            if let Some(id) = item.get("id").and_then(Value::as_str) {
                if !compartments.iter().any(|existing| existing == id) {
                    compartments.push(id.to_string());
                }
            }
        }
        compartments
    }

    async fn call(
        &mut self,
        service: &str,
        operation: &str,
        params: &IndexMap<String, Value>,
        item: Option<&AttrMap>,
    ) -> Result<Vec<AttrMap>, String> {
        let client = self.client(service)?;

        let mut call_params: AttrMap = Map::new();
        for (key, value) in params {
            call_params.insert(key.clone(), resolve_item_binding(value, item));
        }
        if service == "objectstorage" && !call_params.contains_key("namespace_name") {
            if let Some(namespace) = &self.namespace {
                call_params.insert(
                    "namespace_name".to_string(),
                    Value::String(namespace.clone()),
                );
            }
        }

        match client.invoke(operation, &call_params).await {
            Ok(returned) => Ok(returned),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err.to_string()),
        }
    }

    fn client(&self, service: &str) -> Result<Arc<dyn ServiceClient>, String> {
        self.factory
            .client(service, self.config)
            .map_err(|err| err.to_string())
    }
}

/// Resolves `${item.field}` bindings against the current element.
fn resolve_item_binding(value: &Value, item: Option<&AttrMap>) -> Value {
    let Some(item) = item else {
        return value.clone();
    };
    let Some(text) = value.as_str() else {
        return value.clone();
    };
    let Some(field) = text
        .strip_prefix("${item.")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return value.clone();
    };
    item.get(field).cloned().unwrap_or(Value::Null)
}

fn filter_matches(
    item: &AttrMap,
    field: &str,
    operator: FilterOp,
    expected: &Value,
    nested_field: Option<&str>,
) -> bool {
    let Some(actual) = item.get(field) else {
        return false;
    };

    if let Some(nested) = nested_field {
        // Nested check: any element of an array field whose nested field
        // contains the expected value.
        let Some(elements) = actual.as_array() else {
            return false;
        };
        return elements.iter().any(|element| {
            element
                .get(nested)
                .map(|value| value_contains(value, expected))
                .unwrap_or(false)
        });
    }

    match operator {
        FilterOp::Eq => values_equal(actual, expected),
        FilterOp::Contains => value_contains(actual, expected),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

fn value_contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(text) => expected
            .as_str()
            .map(|needle| text.contains(needle))
            .unwrap_or(false),
        Value::Array(elements) => elements.iter().any(|element| values_equal(element, expected)),
        _ => false,
    }
}

fn error_map(message: &str) -> AttrMap {
    let mut map = Map::new();
    map.insert("error".to_string(), Value::String(message.to_string()));
    map
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
    fn equality_filter_is_case_insensitive_for_strings() {
        let item = attr(&[("lifecycle_state", json!("Running"))]);
        assert!(filter_matches(
            &item,
            "lifecycle_state",
            FilterOp::Eq,
            &json!("RUNNING"),
            None
        ));
        assert!(!filter_matches(
            &item,
            "lifecycle_state",
            FilterOp::Eq,
            &json!("STOPPED"),
            None
        ));
    }

    #[test]
    fn nested_filter_walks_rule_arrays() {
        let item = attr(&[(
            "ingress_security_rules",
            json!([{"source": "10.0.0.0/8"}, {"source": "0.0.0.0/0"}]),
        )]);
        assert!(filter_matches(
            &item,
            "ingress_security_rules",
            FilterOp::Contains,
            &json!("0.0.0.0/0"),
            Some("source")
        ));
    }

    #[test]
    fn missing_fields_never_match() {
        let item = attr(&[("display_name", json!("web-1"))]);
        assert!(!filter_matches(
            &item,
            "lifecycle_state",
            FilterOp::Eq,
            &json!("RUNNING"),
            None
        ));
    }

    #[test]
    fn item_bindings_resolve_from_the_current_element() {
        let item = attr(&[("vnic_id", json!("ocid1.vnic.oc1..v"))]);
        assert_eq!(
            resolve_item_binding(&json!("${item.vnic_id}"), Some(&item)),
            json!("ocid1.vnic.oc1..v")
        );
        assert_eq!(
            resolve_item_binding(&json!("literal"), Some(&item)),
            json!("literal")
        );
        assert_eq!(
            resolve_item_binding(&json!("${item.absent}"), Some(&item)),
            Value::Null
        );
    }
}
