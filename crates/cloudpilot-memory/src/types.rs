//! Persisted record types shared across the memory tiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One completed conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnRecord {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub result_summary: String,
    #[serde(default)]
    pub success: bool,
}

/// One executed cloud action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub success: bool,
}

/// One learned pattern with usage statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternEntry {
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub frequency: u32,
}

impl PatternEntry {
    pub fn new(data: Map<String, Value>, now: DateTime<Utc>) -> Self {
        PatternEntry {
            data,
            timestamp: now,
            last_seen: None,
            frequency: 1,
        }
    }

    /// The recency used for suggestion ranking.
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_seen.unwrap_or(self.timestamp)
    }
}

/// A ranked suggestion assembled from learned patterns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    /// `"user"` for per-user patterns, `"global"` otherwise.
    pub scope: String,
    pub pattern_type: String,
    pub data: Map<String, Value>,
    pub frequency: u32,
    pub last_seen: DateTime<Utc>,
}

/// One retained error-handler success sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSample {
    pub error: String,
    pub response: String,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
}
