//! The presentation object: the single output of a turn.

use serde::{Deserialize, Serialize};

use crate::plan::Plan;
use crate::results::AttrMap;

/// How the front end should render the turn's data.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Chat,
    Table,
}

/// The prepared output of one turn, plus the interactive flags that tell
/// the caller whether the turn is suspended awaiting user input.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Presentation {
    pub summary: String,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<AttrMap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default)]
    pub confirmation_required: bool,
    #[serde(default)]
    pub parameter_gathering_required: bool,
    #[serde(default)]
    pub compartment_selection_required: bool,
    #[serde(default)]
    pub action_cancelled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_plan: Option<Plan>,
}

impl Presentation {
    /// A plain chat message with no data payload.
    pub fn chat(summary: impl Into<String>) -> Self {
        Presentation {
            summary: summary.into(),
            format: OutputFormat::Chat,
            ..Default::default()
        }
    }

    /// A tabular payload with pre-selected columns.
    pub fn table(summary: impl Into<String>, data: Vec<AttrMap>, columns: Vec<String>) -> Self {
        Presentation {
            summary: summary.into(),
            format: OutputFormat::Table,
            data,
            columns,
            ..Default::default()
        }
    }

    /// Whether this presentation suspends the turn for user input.
    pub fn awaits_user_input(&self) -> bool {
        self.confirmation_required
            || self.parameter_gathering_required
            || self.compartment_selection_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactive_flags_mark_suspension() {
        let mut p = Presentation::chat("please confirm");
        assert!(!p.awaits_user_input());
        p.confirmation_required = true;
        assert!(p.awaits_user_input());
    }

    #[test]
    fn table_defaults_keep_flags_clear() {
        let p = Presentation::table("3 instances", Vec::new(), vec!["display_name".to_string()]);
        assert_eq!(p.format, OutputFormat::Table);
        assert!(!p.action_cancelled);
    }
}
