//! Hand-rolled in-memory fakes for the engine's own unit tests.
//!
//! Exercising the orchestration logic (device/config lifecycle, plugin
//! manager, identification pipeline) against a real trait implementation
//! is simpler and more honest than mocking every call site; this module
//! is the one small stand-in for what would otherwise be the
//! infrastructure crate's JSON-file collection.

use async_trait::async_trait;
use provd_domain::{Collection, ConfigCollection, Document, EngineError, FindOptions, Result, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryCollection {
    docs: Mutex<HashMap<String, Document>>,
    next_id: Mutex<u64>,
}

impl InMemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, doc: Document) {
        let id = doc.id().expect("seeded doc must carry an id").to_string();
        self.docs.lock().unwrap().insert(id, doc);
    }

    pub async fn all(&self) -> Vec<Document> {
        self.docs.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl Collection for InMemoryCollection {
    async fn insert(&self, mut doc: Document) -> Result<String> {
        let mut docs = self.docs.lock().unwrap();
        let id = match doc.id() {
            Some(id) => id.to_string(),
            None => {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                let generated = format!("auto-{}", *next);
                doc.set_id(generated.clone());
                generated
            }
        };
        if docs.contains_key(&id) {
            return Err(EngineError::InvalidId(format!("duplicate id {id}")));
        }
        docs.insert(id.clone(), doc);
        Ok(id)
    }

    async fn update(&self, doc: Document) -> Result<()> {
        let id = doc
            .id()
            .ok_or_else(|| EngineError::InvalidId("missing id".into()))?
            .to_string();
        let mut docs = self.docs.lock().unwrap();
        if !docs.contains_key(&id) {
            return Err(EngineError::InvalidId(id));
        }
        docs.insert(id, doc);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut docs = self.docs.lock().unwrap();
        if docs.remove(id).is_none() {
            return Err(EngineError::InvalidId(id.to_string()));
        }
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.lock().unwrap().get(id).cloned())
    }

    async fn find(&self, selectors: Vec<Selector>, options: FindOptions) -> Result<Vec<Document>> {
        let docs = self.docs.lock().unwrap();
        let mut matched: Vec<Document> = docs
            .values()
            .filter(|doc| selectors.iter().all(|s| s.matches(doc)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id().cmp(&b.id()));
        if let Some(skip) = options.skip {
            matched = matched.into_iter().skip(skip).collect();
        }
        if let Some(limit) = options.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn find_one(&self, selectors: Vec<Selector>) -> Result<Option<Document>> {
        Ok(self.find(selectors, FindOptions::default()).await?.into_iter().next())
    }

    async fn ensure_index(&self, _field: &str) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ConfigCollection for InMemoryCollection {
    async fn get_descendants(&self, id: &str) -> Result<HashSet<String>> {
        let docs = self.docs.lock().unwrap();
        let mut descendants = HashSet::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for doc in docs.values() {
                let config = provd_domain::Config::new(doc.clone());
                if config.parent_ids().contains(&current) {
                    if let Some(child_id) = config.id() {
                        if descendants.insert(child_id.to_string()) {
                            frontier.push(child_id.to_string());
                        }
                    }
                }
            }
        }
        Ok(descendants)
    }

    async fn get_raw_config(&self, id: &str, base: &Document) -> Result<Option<Document>> {
        crate::resolver::resolve_raw_config(self, id, base).await
    }
}
