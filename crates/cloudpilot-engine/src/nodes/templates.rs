//! Template-based planning for common list queries.
//!
//! A compile-time table maps recognized resources to their list
//! operations, and a handful of named direct-fetch patterns carry built-in
//! filters. Template plans never cost a model call.

use serde_json::json;

use cloudpilot_core::plan::{FilterKind, FilterOp, PlanFilter};

use super::intent::IntentAnalysis;

/// Resource → list API method.
const API_METHODS: &[(&str, &str)] = &[
    // Compute
    ("instance", "list_instances"),
    ("image", "list_images"),
    ("shape", "list_shapes"),
    // Storage
    ("volume", "list_volumes"),
    ("boot_volume", "list_boot_volumes"),
    ("bucket", "list_buckets"),
    // Networking
    ("vcn", "list_vcns"),
    ("subnet", "list_subnets"),
    ("security_list", "list_security_lists"),
    ("route_table", "list_route_tables"),
    ("network_security_group", "list_network_security_groups"),
    // Load balancer
    ("load_balancer", "list_load_balancers"),
    ("backend_set", "list_backend_sets"),
    // Database
    ("database", "list_db_systems"),
    ("autonomous_database", "list_autonomous_databases"),
    // Identity
    ("user", "list_users"),
    ("group", "list_groups"),
    ("policy", "list_policies"),
    ("compartment", "list_compartments"),
    // Monitoring
    ("alarm", "list_alarms"),
    ("metric", "list_metrics"),
    // Cloud guard
    ("detector", "list_detectors"),
    ("problem", "list_problems"),
    // Advisor
    ("recommendation", "list_recommendations"),
];

/// Template plan shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    DirectFetch,
    SimpleList,
    ListWithFilter,
}

/// A matched template, ready to convert into a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePlan {
    pub kind: TemplateKind,
    pub pattern_name: Option<String>,
    pub api_method: String,
    /// Set by named patterns; standard templates take the analyzer's
    /// service.
    pub service: Option<String>,
    pub requires_filtering: bool,
    pub filters: Vec<PlanFilter>,
    pub all_compartments: bool,
}

/// Returns a template plan when the analysis matches one, `None` to fall
/// through to model planning. Only list actions are templated.
pub fn template_plan(analysis: &IntentAnalysis) -> Option<TemplatePlan> {
    if analysis.action != "list" {
        return None;
    }

    if let Some(pattern) = direct_fetch_pattern(analysis) {
        return Some(pattern);
    }

    let api_method = API_METHODS
        .iter()
        .find(|(resource, _)| *resource == analysis.primary_resource)
        .map(|(_, method)| method.to_string())?;

    if analysis.requires_filtering {
        let filters = analysis
            .filter_conditions
            .iter()
            .filter_map(|condition| parse_filter_condition(condition))
            .collect();
        Some(TemplatePlan {
            kind: TemplateKind::ListWithFilter,
            pattern_name: None,
            api_method,
            service: None,
            requires_filtering: true,
            filters,
            all_compartments: true,
        })
    } else {
        Some(TemplatePlan {
            kind: TemplateKind::SimpleList,
            pattern_name: None,
            api_method,
            service: None,
            requires_filtering: false,
            filters: Vec::new(),
            all_compartments: true,
        })
    }
}

fn condition_mentions(conditions: &[String], cues: &[&str]) -> bool {
    conditions.iter().any(|condition| {
        let lower = condition.to_lowercase();
        cues.iter().any(|cue| lower.contains(cue))
    })
}

/// The named patterns with built-in filters.
fn direct_fetch_pattern(analysis: &IntentAnalysis) -> Option<TemplatePlan> {
    let conditions = &analysis.filter_conditions;

    let named = |name: &str, method: &str, service: &str, field: &str, value: &str| TemplatePlan {
        kind: TemplateKind::DirectFetch,
        pattern_name: Some(name.to_string()),
        api_method: method.to_string(),
        service: Some(service.to_string()),
        requires_filtering: true,
        filters: vec![PlanFilter::equality(field, value)],
        all_compartments: true,
    };

    match analysis.primary_resource.as_str() {
        "instance" if condition_mentions(conditions, &["running", "active"]) => Some(named(
            "running_instances",
            "list_instances",
            "compute",
            "lifecycle_state",
            "RUNNING",
        )),
        "instance" if condition_mentions(conditions, &["stopped", "inactive"]) => Some(named(
            "stopped_instances",
            "list_instances",
            "compute",
            "lifecycle_state",
            "STOPPED",
        )),
        "user" if condition_mentions(conditions, &["active"]) => Some(named(
            "active_users",
            "list_users",
            "identity",
            "lifecycle_state",
            "ACTIVE",
        )),
        "volume" if condition_mentions(conditions, &["available"]) => Some(named(
            "available_volumes",
            "list_volumes",
            "blockstorage",
            "lifecycle_state",
            "AVAILABLE",
        )),
        "bucket"
            if condition_mentions(
                conditions,
                &["empty", "no files", "no objects", "unused", "vacant", "bare", "clean"],
            ) =>
        {
            Some(TemplatePlan {
                kind: TemplateKind::ListWithFilter,
                pattern_name: Some("empty_buckets".to_string()),
                api_method: "list_buckets".to_string(),
                service: Some("objectstorage".to_string()),
                requires_filtering: true,
                filters: vec![PlanFilter {
                    field: "objects".to_string(),
                    operator: FilterOp::Eq,
                    value: json!("empty"),
                    kind: Some(FilterKind::ObjectCountCheck),
                    nested_field: None,
                }],
                all_compartments: true,
            })
        }
        _ => None,
    }
}

/// Parses one free-text filter condition into a structured filter.
pub fn parse_filter_condition(condition: &str) -> Option<PlanFilter> {
    let lower = condition.to_lowercase();

    if lower.contains("stopped") || lower.contains("inactive") {
        return Some(PlanFilter::equality("lifecycle_state", "STOPPED"));
    }
    if lower.contains("running") || lower.contains("active") {
        return Some(PlanFilter::equality("lifecycle_state", "RUNNING"));
    }
    if lower.contains("available") {
        return Some(PlanFilter::equality("lifecycle_state", "AVAILABLE"));
    }
    if lower.contains("ingress") && condition.contains("0.0.0.0/0") {
        return Some(PlanFilter {
            field: "ingress_security_rules".to_string(),
            operator: FilterOp::Contains,
            value: json!("0.0.0.0/0"),
            kind: Some(FilterKind::NestedCheck),
            nested_field: Some("source".to_string()),
        });
    }
    if let Some((_, rest)) = lower.split_once("shape") {
        let value = rest.trim().trim_matches(['"', '\'']).to_string();
        if !value.is_empty() {
            return Some(PlanFilter {
                field: "shape".to_string(),
                operator: FilterOp::Contains,
                value: json!(value),
                kind: Some(FilterKind::SimpleContains),
                nested_field: None,
            });
        }
    }
    if let Some((_, rest)) = lower.split_once("compartment") {
        let value = rest.trim().trim_matches(['"', '\'']).to_string();
        if !value.is_empty() {
            return Some(PlanFilter {
                field: "compartment_name".to_string(),
                operator: FilterOp::Eq,
                value: json!(value),
                kind: Some(FilterKind::CompartmentFilter),
                nested_field: None,
            });
        }
    }
    None
}
