//! Execution result items and the attribute-map data contract.
//!
//! Every item the executor hands to the presentation preparer is an
//! attribute map; SDK-native objects never cross that boundary. Primitives
//! are wrapped as `{value, type}` maps, and failed conversions become
//! error maps so one bad item never poisons a result set.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A flat attribute map, the only shape presentation ever observes.
pub type AttrMap = Map<String, Value>;

/// One sanitized execution result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultItem {
    Ok(AttrMap),
    Error(AttrMap),
}

impl ResultItem {
    /// Builds an error item from a message, optionally tagged with the
    /// originating step.
    pub fn error(message: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("error".to_string(), Value::String(message.into()));
        ResultItem::Error(map)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResultItem::Error(_))
    }

    pub fn attrs(&self) -> &AttrMap {
        match self {
            ResultItem::Ok(map) | ResultItem::Error(map) => map,
        }
    }

    pub fn into_attrs(self) -> AttrMap {
        match self {
            ResultItem::Ok(map) | ResultItem::Error(map) => map,
        }
    }

    /// Coerces any JSON value into a result item.
    ///
    /// Maps pass through (an `error` key marks them as errors); everything
    /// else becomes a `{value, type}` wrapper.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                if map.contains_key("error") {
                    ResultItem::Error(map)
                } else {
                    ResultItem::Ok(map)
                }
            }
            other => ResultItem::Ok(coerce_to_attr_map(other)),
        }
    }
}

impl Serialize for ResultItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.attrs().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResultItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(ResultItem::from_value(value))
    }
}

/// Wraps a non-map value as a `{value, type}` attribute map.
pub fn coerce_to_attr_map(value: Value) -> AttrMap {
    let type_name = match &value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    let rendered = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut map = Map::new();
    map.insert("value".to_string(), Value::String(rendered));
    map.insert("type".to_string(), Value::String(type_name.to_string()));
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_pass_through_unchanged() {
        let item = ResultItem::from_value(json!({"display_name": "web-1", "shape": "VM.Standard3.Flex"}));
        assert!(!item.is_error());
        assert_eq!(item.attrs()["display_name"], "web-1");
    }

    #[test]
    fn error_key_marks_an_error_item() {
        let item = ResultItem::from_value(json!({"error": "bucket already exists", "name": "demo"}));
        assert!(item.is_error());
    }

    #[test]
    fn primitives_are_wrapped_as_value_type_maps() {
        let item = ResultItem::from_value(json!("idcs-namespace"));
        assert_eq!(item.attrs()["value"], "idcs-namespace");
        assert_eq!(item.attrs()["type"], "string");

        let item = ResultItem::from_value(json!(42));
        assert_eq!(item.attrs()["value"], "42");
        assert_eq!(item.attrs()["type"], "number");
    }

    #[test]
    fn serde_round_trip_preserves_classification() {
        let items = vec![
            ResultItem::from_value(json!({"name": "a"})),
            ResultItem::error("creation failed"),
        ];
        let encoded = serde_json::to_value(&items).expect("items should serialize");
        let decoded: Vec<ResultItem> =
            serde_json::from_value(encoded).expect("items should deserialize");
        assert!(!decoded[0].is_error());
        assert!(decoded[1].is_error());
    }
}
