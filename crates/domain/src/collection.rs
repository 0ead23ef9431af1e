use crate::document::Document;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

/// A single selector clause. `{config: {$in: [...]}}` and
/// `{ip: X, id: {$ne: Y}}` are both expressible as a `Vec<Selector>`
/// whose clauses are implicitly ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Eq(String, Value),
    In(String, Vec<Value>),
    Ne(String, Value),
}

impl Selector {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Selector::Eq(field, value) => doc.get(field) == Some(value),
            Selector::In(field, values) => doc
                .get(field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            Selector::Ne(field, value) => doc.get(field) != Some(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub fields: Option<Vec<String>>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub sort: Option<(String, SortOrder)>,
}

/// Persistent mapping for one collection (`devices` or `configs`, §4.1).
///
/// The engine depends only on this trait; the on-disk JSON-file layout
/// (§6) is one implementation among possible others.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Collection: Send + Sync {
    async fn insert(&self, doc: Document) -> Result<String>;
    async fn update(&self, doc: Document) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn retrieve(&self, id: &str) -> Result<Option<Document>>;
    async fn find(&self, selectors: Vec<Selector>, options: FindOptions) -> Result<Vec<Document>>;
    async fn find_one(&self, selectors: Vec<Selector>) -> Result<Option<Document>>;
    async fn ensure_index(&self, field: &str) -> Result<()>;
}

/// Extra operations the `configs` collection exposes beyond the base
/// contract: descendant tracking and raw-config resolution (§4.1, §4.6).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigCollection: Collection {
    async fn get_descendants(&self, id: &str) -> Result<HashSet<String>>;
    async fn get_raw_config(&self, id: &str, base: &Document) -> Result<Option<Document>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_map(value.as_object().unwrap().clone())
    }

    #[test]
    fn eq_selector_matches_exact_value() {
        let sel = Selector::Eq("ip".into(), json!("1.2.3.4"));
        assert!(sel.matches(&doc(json!({"ip": "1.2.3.4"}))));
        assert!(!sel.matches(&doc(json!({"ip": "5.6.7.8"}))));
    }

    #[test]
    fn ne_selector_excludes_given_id() {
        let sel = Selector::Ne("id".into(), json!("dev1"));
        assert!(!sel.matches(&doc(json!({"id": "dev1"}))));
        assert!(sel.matches(&doc(json!({"id": "dev2"}))));
    }

    #[test]
    fn in_selector_matches_any_listed_value() {
        let sel = Selector::In("config".into(), vec![json!("c1"), json!("c2")]);
        assert!(sel.matches(&doc(json!({"config": "c2"}))));
        assert!(!sel.matches(&doc(json!({"config": "c3"}))));
    }
}
