//! Unified intent analysis and query classification.
//!
//! A fast pattern pass handles the common phrasings without a model call;
//! anything it is unsure about goes to a single-shot model prompt. The
//! analysis carries both the intent (resource, action, filters) and the
//! execution classification (direct fetch vs multi-step).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::{LmCall, Message};
use crate::nodes::json_from_reply;
use crate::prompts::PromptLibrary;

/// Execution classification of a query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionType {
    #[serde(rename = "DIRECT_FETCH")]
    DirectFetch,
    #[serde(rename = "MULTI_STEP_REQUIRED")]
    MultiStepRequired,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// Analyzer confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// The combined analysis result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentAnalysis {
    pub primary_resource: String,
    pub action: String,
    #[serde(default)]
    pub requires_filtering: bool,
    #[serde(default)]
    pub filter_conditions: Vec<String>,
    #[serde(default = "default_complexity")]
    pub complexity: String,
    #[serde(default = "default_steps")]
    pub estimated_steps: u32,
    pub oci_service: String,
    #[serde(default)]
    pub is_mutating: bool,
    pub execution_type: ExecutionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    pub confidence: Confidence,
    pub analysis_method: String,
}

fn default_complexity() -> String {
    "simple".to_string()
}

fn default_steps() -> u32 {
    1
}

/// Phrase → (resource, service). Ordered so multi-word phrases match
/// before their single-word prefixes.
const RESOURCE_MAP: &[(&str, &str, &str)] = &[
    ("instances", "instance", "compute"),
    ("instance", "instance", "compute"),
    ("volumes", "volume", "blockstorage"),
    ("volume", "volume", "blockstorage"),
    ("buckets", "bucket", "objectstorage"),
    ("bucket", "bucket", "objectstorage"),
    ("vcns", "vcn", "virtualnetwork"),
    ("vcn", "vcn", "virtualnetwork"),
    ("subnets", "subnet", "virtualnetwork"),
    ("subnet", "subnet", "virtualnetwork"),
    ("security lists", "security_list", "virtualnetwork"),
    ("security list", "security_list", "virtualnetwork"),
    ("route tables", "route_table", "virtualnetwork"),
    ("load balancers", "load_balancer", "loadbalancer"),
    ("databases", "database", "database"),
    ("database", "database", "database"),
    ("users", "user", "identity"),
    ("user", "user", "identity"),
    ("groups", "group", "identity"),
    ("policies", "policy", "identity"),
    ("compartments", "compartment", "identity"),
];

/// Cues that mean one API call will not be enough.
const MULTI_STEP_INDICATORS: &[&str] = &[
    "with public ip",
    "public ip",
    "public_ip",
    "without backup",
    "no backup",
    "unused",
    "attached to",
    "connected to",
    "disconnected",
    "having",
    "containing",
    "with rules",
    "ssl",
    "certificate",
    "encrypted",
];

/// Single-call operations the quick pass recognizes directly.
const DIRECT_FETCH_PATTERNS: &[(&str, &str)] = &[
    ("list_users", "users"),
    ("list_groups", "groups"),
    ("list_instances", "instances"),
    ("list_volumes", "volumes"),
    ("list_vcns", "vcns"),
    ("list_security_lists", "security lists"),
    ("list_load_balancers", "load balancers"),
    ("list_buckets", "buckets"),
];

static ACTION_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(list|show|display)\b").expect("valid regex"));
static ACTION_GET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(get|describe|details?)\b").expect("valid regex"));
static ACTION_CREATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(create|launch|start)\b").expect("valid regex"));
static ACTION_DELETE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(delete|terminate|remove)\b").expect("valid regex"));
static ACTION_STOP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(stop|shutdown)\b").expect("valid regex"));
static ACTION_UPDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(update|modify|change)\b").expect("valid regex"));
static FILTER_CUES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(where|with|containing|filter|having)\b").expect("valid regex"));

const MUTATING_ACTIONS: &[&str] = &["create", "delete", "stop", "terminate", "update", "remove"];

/// Fast pattern-based pass. No model call.
pub fn quick_analysis(query: &str) -> IntentAnalysis {
    let lower = query.to_lowercase();

    let action = if ACTION_LIST.is_match(&lower) {
        Some("list")
    } else if ACTION_GET.is_match(&lower) {
        Some("get")
    } else if ACTION_CREATE.is_match(&lower) {
        Some("create")
    } else if ACTION_DELETE.is_match(&lower) {
        Some("delete")
    } else if ACTION_STOP.is_match(&lower) {
        Some("stop")
    } else if ACTION_UPDATE.is_match(&lower) {
        Some("update")
    } else {
        None
    };

    let is_mutating = action
        .map(|a| MUTATING_ACTIONS.contains(&a))
        .unwrap_or(false);

    let (resource, service) = RESOURCE_MAP
        .iter()
        .find(|(phrase, _, _)| lower.contains(phrase))
        .map(|(_, resource, service)| (Some(*resource), Some(*service)))
        .unwrap_or((None, None));

    let mut requires_filtering = FILTER_CUES.is_match(&lower);
    let mut filter_conditions = Vec::new();
    if requires_filtering {
        if let Some((_, filter_part)) = lower.split_once("where") {
            filter_conditions.push(filter_part.trim().to_string());
        }
        if lower.contains("ingress") && query.contains("0.0.0.0/0") {
            filter_conditions.push("ingress_rules contains source 0.0.0.0/0".to_string());
        }
    }
    if lower.contains("stopped") || lower.contains("inactive") {
        requires_filtering = true;
        filter_conditions.push("lifecycle_state == STOPPED".to_string());
    }
    if lower.contains("running") || lower.contains("active") {
        requires_filtering = true;
        filter_conditions.push("lifecycle_state == RUNNING".to_string());
    }
    if resource == Some("bucket")
        && ["empty", "no files", "no objects", "unused"]
            .iter()
            .any(|cue| lower.contains(cue))
    {
        requires_filtering = true;
        filter_conditions.push("objects == empty".to_string());
    }

    let has_multi_step_cues = MULTI_STEP_INDICATORS
        .iter()
        .any(|cue| lower.contains(cue));

    let matched_pattern = DIRECT_FETCH_PATTERNS
        .iter()
        .find(|(_, resource_phrase)| {
            let action_match = ["list", "show", "display", "get all"]
                .iter()
                .any(|verb| lower.contains(verb));
            action_match && lower.contains(resource_phrase)
        })
        .map(|(pattern, _)| pattern.to_string());

    let (execution_type, mut confidence) = if has_multi_step_cues {
        (ExecutionType::MultiStepRequired, Confidence::High)
    } else if matched_pattern.is_some() {
        (ExecutionType::DirectFetch, Confidence::High)
    } else {
        (ExecutionType::Unknown, Confidence::Low)
    };

    let mut complexity = "simple";
    let mut estimated_steps = 1;
    if requires_filtering {
        complexity = "medium";
        estimated_steps = 2;
    }
    if filter_conditions.len() > 2 || lower.contains(" and ") {
        complexity = "complex";
        estimated_steps = 3;
    }

    if action.is_none() || resource.is_none() {
        confidence = Confidence::Low;
    }

    IntentAnalysis {
        primary_resource: resource.unwrap_or("unknown").to_string(),
        action: action.unwrap_or("list").to_string(),
        requires_filtering,
        filter_conditions,
        complexity: complexity.to_string(),
        estimated_steps,
        oci_service: service.unwrap_or("unknown").to_string(),
        is_mutating,
        execution_type,
        matched_pattern,
        confidence,
        analysis_method: "pattern_matching".to_string(),
    }
}

/// The safe fallback when both the quick pass and the model are unusable.
fn fallback_analysis() -> IntentAnalysis {
    IntentAnalysis {
        primary_resource: "unknown".to_string(),
        action: "list".to_string(),
        requires_filtering: false,
        filter_conditions: Vec::new(),
        complexity: "simple".to_string(),
        estimated_steps: 1,
        oci_service: "compute".to_string(),
        is_mutating: false,
        execution_type: ExecutionType::MultiStepRequired,
        matched_pattern: None,
        confidence: Confidence::Low,
        analysis_method: "fallback".to_string(),
    }
}

/// Full hybrid analysis: quick pass first, model for the uncertain rest.
pub async fn analyze(query: &str, lm: &dyn LmCall, prompts: &PromptLibrary) -> IntentAnalysis {
    let quick = quick_analysis(query);
    if quick.confidence == Confidence::High {
        debug!(execution_type = ?quick.execution_type, "quick analysis decided");
        return quick;
    }

    let Ok(prompt_template) = prompts.load("enhanced_intent_analyzer") else {
        return fallback_analysis();
    };
    let prompt = prompt_template.replace("{query}", query);

    let messages = [
        Message::system(prompt),
        Message::user(format!("Analyze and classify: \"{query}\"")),
    ];
    let reply = lm.call(&messages, "intent_analyzer", true).await;
    if reply.is_failure() {
        return fallback_analysis();
    }

    let Some(value) = json_from_reply(&reply.text) else {
        return fallback_analysis();
    };
    match serde_json::from_value::<IntentAnalysis>(value) {
        Ok(mut analysis) => {
            analysis.confidence = Confidence::High;
            analysis.analysis_method = "llm".to_string();
            analysis
        }
        Err(err) => {
            debug!(%err, "intent analysis parse failed, using fallback");
            fallback_analysis()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_instances_is_a_confident_direct_fetch() {
        let analysis = quick_analysis("list running instances");
        assert_eq!(analysis.primary_resource, "instance");
        assert_eq!(analysis.action, "list");
        assert_eq!(analysis.oci_service, "compute");
        assert_eq!(analysis.execution_type, ExecutionType::DirectFetch);
        assert_eq!(analysis.confidence, Confidence::High);
        assert!(analysis
            .filter_conditions
            .contains(&"lifecycle_state == RUNNING".to_string()));
        assert!(!analysis.is_mutating);
    }

    #[test]
    fn public_ip_queries_are_multi_step() {
        let analysis = quick_analysis("show instances with public ip");
        assert_eq!(analysis.execution_type, ExecutionType::MultiStepRequired);
        assert_eq!(analysis.confidence, Confidence::High);
    }

    #[test]
    fn create_is_mutating() {
        let analysis = quick_analysis("create a bucket");
        assert_eq!(analysis.action, "create");
        assert!(analysis.is_mutating);
        assert_eq!(analysis.primary_resource, "bucket");
        assert_eq!(analysis.oci_service, "objectstorage");
    }

    #[test]
    fn multi_word_resources_win_over_prefixes() {
        let analysis = quick_analysis("list security lists with open ingress");
        assert_eq!(analysis.primary_resource, "security_list");
        assert_eq!(analysis.oci_service, "virtualnetwork");
    }

    #[test]
    fn unknown_resource_lowers_confidence() {
        let analysis = quick_analysis("do something with my tenancy");
        assert_eq!(analysis.confidence, Confidence::Low);
    }

    #[test]
    fn empty_bucket_cue_adds_the_filter_condition() {
        let analysis = quick_analysis("list empty buckets");
        assert!(analysis
            .filter_conditions
            .contains(&"objects == empty".to_string()));
        assert!(analysis.requires_filtering);
    }

    #[test]
    fn llm_contract_fields_deserialize() {
        let value = serde_json::json!({
            "primary_resource": "instance",
            "action": "list",
            "requires_filtering": true,
            "filter_conditions": ["lifecycle_state == RUNNING"],
            "complexity": "medium",
            "estimated_steps": 2,
            "oci_service": "compute",
            "is_mutating": false,
            "execution_type": "DIRECT_FETCH",
            "confidence": "high",
            "analysis_method": "llm"
        });
        let analysis: IntentAnalysis =
            serde_json::from_value(value).expect("contract should deserialize");
        assert_eq!(analysis.execution_type, ExecutionType::DirectFetch);
    }
}
