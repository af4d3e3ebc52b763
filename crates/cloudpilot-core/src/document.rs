//! Tenancy document schema: the contract with the external scanner that
//! populates the vector store.

use serde::{Deserialize, Serialize};

/// One indexed tenancy document.
///
/// The engine queries these by `(service, operation)` metadata and by
/// embedding similarity over the free-text findings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub resource_type: String,
    pub service: String,
    pub operation: String,
    #[serde(default)]
    pub ocid: String,
    #[serde(default)]
    pub compartment_id: String,
    #[serde(default)]
    pub name: String,
    /// Free-text findings used for embedding similarity.
    #[serde(default)]
    pub findings: String,
}

impl Document {
    /// The text embedded for similarity search.
    pub fn searchable_text(&self) -> String {
        format!(
            "service: {}\noperation: {}\nname: {}\n{}",
            self.service, self.operation, self.name, self.findings
        )
    }

    /// Whether the document matches a `(service, operation)` pair.
    pub fn matches_operation(&self, service: &str, operation: &str) -> bool {
        self.service == service && self.operation == operation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn searchable_text_carries_findings() {
        let doc = Document {
            resource_type: "bucket".to_string(),
            service: "objectstorage".to_string(),
            operation: "list_buckets".to_string(),
            name: "public-assets".to_string(),
            findings: "public access enabled".to_string(),
            ..Default::default()
        };
        let text = doc.searchable_text();
        assert!(text.contains("objectstorage"));
        assert!(text.contains("public access enabled"));
        assert!(doc.matches_operation("objectstorage", "list_buckets"));
        assert!(!doc.matches_operation("compute", "list_instances"));
    }
}
