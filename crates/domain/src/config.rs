use crate::document::Document;
use serde_json::Value;

pub const AUTOCREATE_ROLE: &str = "autocreate";

/// A config document, viewed through the fields the resolver and cascade
/// logic understand. See [`Device`](crate::device::Device) for why this
/// wraps a [`Document`] instead of a closed struct.
#[derive(Debug, Clone, PartialEq)]
pub struct Config(Document);

impl Config {
    pub fn new(doc: Document) -> Self {
        Self(doc)
    }

    pub fn into_document(self) -> Document {
        self.0
    }

    pub fn document(&self) -> &Document {
        &self.0
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.0
    }

    pub fn id(&self) -> Option<&str> {
        self.0.id()
    }

    pub fn parent_ids(&self) -> Vec<String> {
        self.0
            .get("parent_ids")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn raw_config(&self) -> Document {
        self.0
            .get("raw_config")
            .and_then(Value::as_object)
            .map(|m| Document::from_map(m.clone()))
            .unwrap_or_default()
    }

    pub fn role(&self) -> Option<&str> {
        self.0.get_str("role")
    }

    pub fn is_autocreate(&self) -> bool {
        self.role() == Some(AUTOCREATE_ROLE)
    }

    pub fn transient(&self) -> bool {
        self.0.get_bool("transient").unwrap_or(false)
    }

    pub fn deletable(&self) -> bool {
        self.0.get_bool("deletable").unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_from(value: serde_json::Value) -> Config {
        Config::new(Document::from_map(value.as_object().unwrap().clone()))
    }

    #[test]
    fn deletable_defaults_true() {
        let c = config_from(json!({"id": "base"}));
        assert!(c.deletable());
    }

    #[test]
    fn parent_ids_parse_in_order() {
        let c = config_from(json!({"id": "c1", "parent_ids": ["p1", "p2"]}));
        assert_eq!(c.parent_ids(), vec!["p1".to_string(), "p2".to_string()]);
    }

    #[test]
    fn autocreate_role_detected() {
        let c = config_from(json!({"id": "c1", "role": "autocreate"}));
        assert!(c.is_autocreate());
    }
}
