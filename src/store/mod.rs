use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{info, warn};

use crate::engine::{SearchIndex, SearchResults};
use crate::error::{BrightError, Result};
use crate::models::{Document, IndexConfig};

const CONFIG_FILE: &str = "configs.json";

#[derive(Clone)]
struct IndexEntry {
    engine: Arc<SearchIndex>,
    config: IndexConfig,
    write_lock: Arc<Mutex<()>>,
}

/// Manages the lifecycle of all indexes under one data directory.
///
/// Locking is two-level: the store-wide `RwLock` guards the map itself and
/// is never held while a per-index write lock is taken; per-index locks
/// serialize batch mutations on one index without blocking cross-index
/// traffic. Readers rely on the engine's snapshot searchers.
pub struct IndexStore {
    indexes: RwLock<HashMap<String, IndexEntry>>,
    data_dir: PathBuf,
    config_file: PathBuf,
}

impl IndexStore {
    /// Open the store, loading `configs.json` and recovering every listed
    /// index. A single corrupt index is recreated empty with a warning;
    /// startup never aborts because of one bad directory.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        let store = Self {
            indexes: RwLock::new(HashMap::new()),
            config_file: data_dir.join(CONFIG_FILE),
            data_dir,
        };
        store.load_configs()?;
        Ok(store)
    }

    fn load_configs(&self) -> Result<()> {
        let configs: HashMap<String, IndexConfig> = match std::fs::read(&self.config_file) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut indexes = self.indexes.write();
        for (id, config) in configs {
            match self.open_or_recreate(&config) {
                Ok(engine) => {
                    indexes.insert(
                        id,
                        IndexEntry {
                            engine: Arc::new(engine),
                            config,
                            write_lock: Arc::new(Mutex::new(())),
                        },
                    );
                }
                Err(e) => {
                    warn!(index = %id, error = %e, "failed to recover index, skipping");
                }
            }
        }

        info!(count = indexes.len(), "index store loaded");
        Ok(())
    }

    fn index_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(id)
    }

    fn open_or_recreate(&self, config: &IndexConfig) -> Result<SearchIndex> {
        let path = self.index_path(&config.id);
        if path.exists() {
            match SearchIndex::open(&path, &config.exclude_attributes) {
                Ok(engine) => return Ok(engine),
                Err(e) => {
                    warn!(index = %config.id, error = %e, "index directory unreadable, recreating empty");
                    std::fs::remove_dir_all(&path)?;
                }
            }
        }
        SearchIndex::create(&path, &config.exclude_attributes)
    }

    fn save_configs_locked(&self, indexes: &HashMap<String, IndexEntry>) -> Result<()> {
        let configs: HashMap<&String, &IndexConfig> =
            indexes.iter().map(|(id, e)| (id, &e.config)).collect();
        let data = serde_json::to_vec_pretty(&configs)?;

        // Rewrite atomically: a crash mid-write must not lose the map.
        let tmp = self.config_file.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.config_file)?;
        Ok(())
    }

    fn entry(&self, id: &str) -> Result<IndexEntry> {
        self.indexes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| BrightError::IndexNotFound(id.to_string()))
    }

    // ---- structural operations -------------------------------------------

    pub fn create_index(&self, config: IndexConfig) -> Result<()> {
        let mut indexes = self.indexes.write();
        if indexes.contains_key(&config.id) {
            return Err(BrightError::IndexAlreadyExists(config.id));
        }

        let engine = self.open_or_recreate(&config)?;
        indexes.insert(
            config.id.clone(),
            IndexEntry {
                engine: Arc::new(engine),
                config,
                write_lock: Arc::new(Mutex::new(())),
            },
        );
        self.save_configs_locked(&indexes)
    }

    pub fn delete_index(&self, id: &str) -> Result<()> {
        let mut indexes = self.indexes.write();
        let entry = indexes
            .remove(id)
            .ok_or_else(|| BrightError::IndexNotFound(id.to_string()))?;
        drop(entry);

        let path = self.index_path(id);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        self.save_configs_locked(&indexes)
    }

    /// Replace an index's configuration. The id is immutable.
    pub fn update_index(&self, id: &str, mut config: IndexConfig) -> Result<IndexConfig> {
        let mut indexes = self.indexes.write();
        let entry = indexes
            .get_mut(id)
            .ok_or_else(|| BrightError::IndexNotFound(id.to_string()))?;

        config.id = id.to_string();
        entry
            .engine
            .set_excluded_attributes(&config.exclude_attributes);
        entry.config = config.clone();
        self.save_configs_locked(&indexes)?;
        Ok(config)
    }

    pub fn get_index(&self, id: &str) -> Result<IndexConfig> {
        Ok(self.entry(id)?.config)
    }

    pub fn index_exists(&self, id: &str) -> bool {
        self.indexes.read().contains_key(id)
    }

    /// List configurations ordered by id
    pub fn list_indexes(&self, limit: usize, offset: usize) -> Vec<IndexConfig> {
        let indexes = self.indexes.read();
        let mut configs: Vec<IndexConfig> =
            indexes.values().map(|e| e.config.clone()).collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs.into_iter().skip(offset).take(limit).collect()
    }

    pub fn get_all_configs(&self) -> HashMap<String, IndexConfig> {
        self.indexes
            .read()
            .iter()
            .map(|(id, e)| (id.clone(), e.config.clone()))
            .collect()
    }

    /// Replace the whole configuration map (snapshot restore). Engines for
    /// new ids are rebuilt from disk or created empty; indexes absent from
    /// the restored map are closed and removed.
    pub fn restore_configs(&self, configs: HashMap<String, IndexConfig>) -> Result<()> {
        let mut indexes = self.indexes.write();

        let stale: Vec<String> = indexes
            .keys()
            .filter(|id| !configs.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            indexes.remove(&id);
            let path = self.index_path(&id);
            if path.exists() {
                std::fs::remove_dir_all(&path)?;
            }
        }

        for (id, config) in configs {
            match indexes.get_mut(&id) {
                Some(entry) => {
                    entry
                        .engine
                        .set_excluded_attributes(&config.exclude_attributes);
                    entry.config = config;
                }
                None => match self.open_or_recreate(&config) {
                    Ok(engine) => {
                        indexes.insert(
                            id,
                            IndexEntry {
                                engine: Arc::new(engine),
                                config,
                                write_lock: Arc::new(Mutex::new(())),
                            },
                        );
                    }
                    Err(e) => {
                        warn!(index = %id, error = %e, "failed to rebuild index during restore");
                    }
                },
            }
        }

        self.save_configs_locked(&indexes)
    }

    // ---- document operations ---------------------------------------------

    /// Upsert documents into one batch commit. Every document must carry a
    /// non-null value at the index's primary key.
    pub fn add_documents(&self, index_id: &str, documents: &[Document]) -> Result<usize> {
        let entry = self.entry(index_id)?;

        let mut batch = Vec::with_capacity(documents.len());
        for document in documents {
            let id = document_id(document, &entry.config.primary_key)?;
            batch.push((id, document.clone()));
        }

        let _guard = entry.write_lock.lock();
        entry.engine.upsert_batch(&batch)?;
        Ok(batch.len())
    }

    /// Delete a single document. A missing document is not an error.
    pub fn delete_document(&self, index_id: &str, document_id: &str) -> Result<()> {
        let entry = self.entry(index_id)?;
        let _guard = entry.write_lock.lock();
        entry.engine.delete_ids(&[document_id.to_string()])
    }

    /// Delete by explicit ids, or by filter when no ids are given. Both
    /// empty is refused.
    pub fn delete_documents(&self, index_id: &str, filter: &str, ids: &[String]) -> Result<usize> {
        let entry = self.entry(index_id)?;
        let _guard = entry.write_lock.lock();

        if !ids.is_empty() {
            entry.engine.delete_ids(ids)?;
            Ok(ids.len())
        } else if !filter.is_empty() {
            entry.engine.delete_matching(filter)
        } else {
            Err(BrightError::InvalidArgument(
                "must provide ids or filter parameter to delete documents".to_string(),
            ))
        }
    }

    /// Shallow-merge `updates` over the stored document and re-upsert.
    /// Returns the merged document.
    pub fn update_document(
        &self,
        index_id: &str,
        document_id: &str,
        updates: &Document,
    ) -> Result<Document> {
        let entry = self.entry(index_id)?;
        let _guard = entry.write_lock.lock();

        let mut merged = entry
            .engine
            .get_by_id(document_id)?
            .ok_or_else(|| BrightError::DocumentNotFound(document_id.to_string()))?;
        for (key, value) in updates {
            merged.insert(key.clone(), value.clone());
        }

        entry
            .engine
            .upsert_batch(&[(document_id.to_string(), merged.clone())])?;
        Ok(merged)
    }

    pub fn get_document(&self, index_id: &str, document_id: &str) -> Result<Option<Document>> {
        self.entry(index_id)?.engine.get_by_id(document_id)
    }

    pub fn search(
        &self,
        index_id: &str,
        query: &str,
        limit: usize,
        offset: usize,
        sort: &[String],
    ) -> Result<SearchResults> {
        self.entry(index_id)?.engine.search(query, limit, offset, sort)
    }

    pub fn doc_count(&self, index_id: &str) -> Result<u64> {
        Ok(self.entry(index_id)?.engine.doc_count())
    }
}

/// Coerce a document's primary-key value to its engine-level id.
/// Canonical-string formatting: integers print unpadded, booleans print
/// `true`/`false`, null is an error.
pub fn coerce_document_id(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(BrightError::NullPrimaryKey),
        other => Ok(other.to_string()),
    }
}

fn document_id(document: &Document, primary_key: &str) -> Result<String> {
    match document.get(primary_key) {
        Some(Value::Null) | None => Err(BrightError::MissingPrimaryKey(primary_key.to_string())),
        Some(value) => coerce_document_id(value),
    }
}

/// Detect the primary key of a sample document set: the single attribute
/// whose lowercase name ends in `id`. Zero or multiple candidates is an
/// error; the multiple-candidate message lists them sorted.
pub fn detect_primary_key(documents: &[Document]) -> Result<String> {
    let mut candidates: Vec<String> = documents
        .iter()
        .flat_map(|doc| doc.keys())
        .filter(|key| key.to_lowercase().ends_with("id"))
        .cloned()
        .collect();
    candidates.sort();
    candidates.dedup();

    match candidates.len() {
        0 => Err(BrightError::NoPrimaryKeyCandidate),
        1 => Ok(candidates.remove(0)),
        _ => Err(BrightError::MultiplePrimaryKeyCandidates(candidates)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_detect_primary_key_single_candidate() {
        let docs = vec![doc(&[("userId", json!("u1")), ("name", json!("a"))])];
        assert_eq!(detect_primary_key(&docs).unwrap(), "userId");
    }

    #[test]
    fn test_detect_primary_key_no_candidate() {
        let docs = vec![doc(&[("name", json!("a"))])];
        assert!(matches!(
            detect_primary_key(&docs),
            Err(BrightError::NoPrimaryKeyCandidate)
        ));
    }

    #[test]
    fn test_detect_primary_key_empty_set() {
        assert!(matches!(
            detect_primary_key(&[]),
            Err(BrightError::NoPrimaryKeyCandidate)
        ));
    }

    #[test]
    fn test_detect_primary_key_multiple_candidates_sorted() {
        let docs = vec![doc(&[("userId", json!("u1")), ("id", json!(1))])];
        match detect_primary_key(&docs) {
            Err(BrightError::MultiplePrimaryKeyCandidates(candidates)) => {
                assert_eq!(candidates, vec!["id".to_string(), "userId".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_coerce_document_id() {
        assert_eq!(coerce_document_id(&json!("abc")).unwrap(), "abc");
        assert_eq!(coerce_document_id(&json!(42)).unwrap(), "42");
        assert_eq!(coerce_document_id(&json!(true)).unwrap(), "true");
        assert!(matches!(
            coerce_document_id(&Value::Null),
            Err(BrightError::NullPrimaryKey)
        ));
    }

    #[test]
    fn test_create_duplicate_index_fails() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();

        store
            .create_index(IndexConfig::new("books", "isbn"))
            .unwrap();
        assert!(matches!(
            store.create_index(IndexConfig::new("books", "isbn")),
            Err(BrightError::IndexAlreadyExists(_))
        ));
    }

    #[test]
    fn test_add_documents_requires_primary_key() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        store
            .create_index(IndexConfig::new("books", "isbn"))
            .unwrap();

        let err = store
            .add_documents("books", &[doc(&[("title", json!("no isbn"))])])
            .unwrap_err();
        assert!(matches!(err, BrightError::MissingPrimaryKey(_)));
    }

    #[test]
    fn test_delete_documents_requires_ids_or_filter() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        store
            .create_index(IndexConfig::new("books", "isbn"))
            .unwrap();

        assert!(matches!(
            store.delete_documents("books", "", &[]),
            Err(BrightError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_update_index_keeps_id() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        store
            .create_index(IndexConfig::new("books", "isbn"))
            .unwrap();

        let updated = store
            .update_index("books", IndexConfig::new("renamed", "ref"))
            .unwrap();
        assert_eq!(updated.id, "books");
        assert_eq!(updated.primary_key, "ref");
    }

    #[test]
    fn test_configs_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = IndexStore::open(dir.path()).unwrap();
            store
                .create_index(IndexConfig::new("books", "isbn"))
                .unwrap();
            store
                .create_index(IndexConfig::new("users", "userId"))
                .unwrap();
        }

        let store = IndexStore::open(dir.path()).unwrap();
        let listed = store.list_indexes(20, 0);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "books");
        assert_eq!(listed[1].id, "users");
    }

    #[test]
    fn test_list_indexes_pagination() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        for id in ["a", "b", "c", "d"] {
            store.create_index(IndexConfig::new(id, "id")).unwrap();
        }

        let page = store.list_indexes(2, 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "c");
        assert_eq!(page[1].id, "d");

        assert!(store.list_indexes(10, 10).is_empty());
    }

    #[test]
    fn test_restore_configs_drops_stale_and_creates_missing() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        store
            .create_index(IndexConfig::new("stale", "id"))
            .unwrap();

        let mut configs = HashMap::new();
        configs.insert("fresh".to_string(), IndexConfig::new("fresh", "id"));
        store.restore_configs(configs).unwrap();

        assert!(!store.index_exists("stale"));
        assert!(store.index_exists("fresh"));
    }
}
