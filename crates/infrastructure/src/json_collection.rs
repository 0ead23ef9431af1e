//! `Collection`/`ConfigCollection` backed by one JSON file per document
//! under a configured directory, with an in-memory index mirroring it.

use async_trait::async_trait;
use provd_domain::{Collection, Config, ConfigCollection, Document, EngineError, FindOptions, Result, Selector};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// A directory of `{id}.json` files, kept warm in an in-memory map.
///
/// Every mutation is written through: the in-memory map is updated only
/// after the on-disk write succeeds, so a crash mid-write never leaves
/// the cache ahead of the store it's supposed to mirror.
pub struct JsonFileCollection {
    dir: PathBuf,
    docs: RwLock<HashMap<String, Document>>,
}

impl JsonFileCollection {
    /// Loads every `*.json` file under `dir` into memory, creating `dir`
    /// if it does not yet exist.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut docs = HashMap::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            let doc: Document = match serde_json::from_slice(&bytes) {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable document");
                    continue;
                }
            };
            if let Some(id) = doc.id() {
                docs.insert(id.to_string(), doc);
            }
        }
        debug!(dir = %dir.display(), count = docs.len(), "loaded collection from disk");

        Ok(Self { dir, docs: RwLock::new(docs) })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Serializes `doc` to a sibling temp file, then renames it over the
    /// target path so readers never observe a partially written file.
    async fn write_atomic(&self, id: &str, doc: &Document) -> Result<()> {
        let target = self.path_for(id);
        let tmp = self.dir.join(format!(".{id}.json.tmp"));
        let bytes = serde_json::to_vec_pretty(doc)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn remove_file(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Collection for JsonFileCollection {
    async fn insert(&self, mut doc: Document) -> Result<String> {
        let mut docs = self.docs.write().await;
        let id = match doc.id() {
            Some(id) => id.to_string(),
            None => {
                let generated = Uuid::new_v4().to_string();
                doc.set_id(generated.clone());
                generated
            }
        };
        if docs.contains_key(&id) {
            return Err(EngineError::InvalidId(format!("duplicate id {id}")));
        }
        self.write_atomic(&id, &doc).await?;
        docs.insert(id.clone(), doc);
        Ok(id)
    }

    async fn update(&self, doc: Document) -> Result<()> {
        let id = doc.id().ok_or_else(|| EngineError::InvalidId("missing id".into()))?.to_string();
        let mut docs = self.docs.write().await;
        if !docs.contains_key(&id) {
            return Err(EngineError::InvalidId(id));
        }
        self.write_atomic(&id, &doc).await?;
        docs.insert(id, doc);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut docs = self.docs.write().await;
        if !docs.contains_key(id) {
            return Err(EngineError::InvalidId(id.to_string()));
        }
        self.remove_file(id).await?;
        docs.remove(id);
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn find(&self, selectors: Vec<Selector>, options: FindOptions) -> Result<Vec<Document>> {
        let docs = self.docs.read().await;
        let mut matched: Vec<Document> = docs
            .values()
            .filter(|doc| selectors.iter().all(|s| s.matches(doc)))
            .cloned()
            .collect();

        if let Some((field, order)) = &options.sort {
            matched.sort_by(|a, b| {
                let ord = a.get(field).map(|v| v.to_string()).cmp(&b.get(field).map(|v| v.to_string()));
                match order {
                    provd_domain::SortOrder::Asc => ord,
                    provd_domain::SortOrder::Desc => ord.reverse(),
                }
            });
        } else {
            matched.sort_by(|a, b| a.id().cmp(&b.id()));
        }

        if let Some(skip) = options.skip {
            matched = matched.into_iter().skip(skip).collect();
        }
        if let Some(limit) = options.limit {
            matched.truncate(limit);
        }
        if let Some(fields) = &options.fields {
            matched = matched
                .into_iter()
                .map(|doc| {
                    let mut projected = Document::new();
                    for field in fields {
                        if let Some(value) = doc.get(field) {
                            projected.set(field.clone(), value.clone());
                        }
                    }
                    if let Some(id) = doc.id() {
                        projected.set_id(id.to_string());
                    }
                    projected
                })
                .collect();
        }
        Ok(matched)
    }

    async fn find_one(&self, selectors: Vec<Selector>) -> Result<Option<Document>> {
        Ok(self.find(selectors, FindOptions::default()).await?.into_iter().next())
    }

    async fn ensure_index(&self, _field: &str) -> Result<()> {
        // The in-memory map is already a full scan over a small working
        // set; no secondary index structure is maintained on disk.
        Ok(())
    }
}

#[async_trait]
impl ConfigCollection for JsonFileCollection {
    async fn get_descendants(&self, id: &str) -> Result<HashSet<String>> {
        let docs = self.docs.read().await;
        let mut descendants = HashSet::new();
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for doc in docs.values() {
                let config = Config::new(doc.clone());
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
        provd_engine::resolver::resolve_raw_config(self, id, base).await
    }
}

/// Opens the `devices` and `configs` sub-directories of `root` as
/// `JsonFileCollection`s, ready to hand to the engine.
pub async fn open_collections(root: impl AsRef<Path>) -> Result<(Arc<JsonFileCollection>, Arc<JsonFileCollection>)> {
    let root = root.as_ref();
    let devices = Arc::new(JsonFileCollection::open(root.join("devices")).await?);
    let configs = Arc::new(JsonFileCollection::open(root.join("configs")).await?);
    Ok((devices, configs))
}
