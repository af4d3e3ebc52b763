//! Model-response parsing: fence stripping and JSON extraction.
//!
//! Models wrap JSON in code fences, prefix it with language hints, or
//! surround it with prose. Parsing tolerates all of that and extracts the
//! first balanced JSON object.

use once_cell::sync::Lazy;
use regex::Regex;

use cloudpilot_core::program::ActionProgram;

use crate::error::CodegenError;

static LANGUAGE_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(json|python)\s*\r?\n").expect("valid regex"));

/// Removes the first code fence (and an optional language hint) from a
/// response, returning the inner text. Responses without fences pass
/// through with only the language hint stripped.
pub fn strip_fences(response: &str) -> String {
    let text = response.trim();
    if let Some(open) = text.find("```") {
        let after_open = &text[open + 3..];
        let inner = match after_open.find("```") {
            Some(close) => &after_open[..close],
            None => after_open,
        };
        LANGUAGE_HINT.replace(inner, "").trim().to_string()
    } else {
        LANGUAGE_HINT.replace(text, "").trim().to_string()
    }
}

/// Extracts the first balanced top-level JSON object from a string.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses a raw model response into an action program.
pub fn parse_program(response: &str) -> Result<ActionProgram, CodegenError> {
    if response.trim().is_empty() {
        return Err(CodegenError::EmptyResponse);
    }

    let stripped = strip_fences(response);
    let json_text = extract_json_object(&stripped).ok_or(CodegenError::NoJsonFound)?;

    let value: serde_json::Value =
        serde_json::from_str(json_text).map_err(|err| CodegenError::ParseFailed {
            reason: err.to_string(),
        })?;
    ActionProgram::from_json(value).map_err(|err| CodegenError::ParseFailed {
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM_JSON: &str = r#"{"steps": [{"op": "list_resources", "service": "compute",
        "operation": "list_instances", "all_compartments": true}]}"#;

    #[test]
    fn fenced_response_with_language_hint_parses() {
        let response = format!("```json\n{PROGRAM_JSON}\n```");
        let program = parse_program(&response).expect("program should parse");
        assert_eq!(program.steps.len(), 1);
    }

    #[test]
    fn prose_around_the_object_is_tolerated() {
        let response = format!("Here is the program you asked for:\n{PROGRAM_JSON}\nLet me know!");
        let program = parse_program(&response).expect("program should parse");
        assert_eq!(program.services(), vec!["compute"]);
    }

    #[test]
    fn nested_braces_inside_strings_do_not_break_extraction() {
        let text = r#"note {"steps": [], "comment": "braces {inside} a string"} trailing"#;
        let object = extract_json_object(text).expect("object");
        assert!(object.ends_with('}'));
        let value: serde_json::Value = serde_json::from_str(object).expect("valid json");
        assert_eq!(value["comment"], "braces {inside} a string");
    }

    #[test]
    fn empty_response_is_a_distinct_error() {
        assert!(matches!(parse_program("   "), Err(CodegenError::EmptyResponse)));
        assert!(matches!(
            parse_program("no json here"),
            Err(CodegenError::NoJsonFound)
        ));
    }
}
