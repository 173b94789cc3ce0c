// ---------------------------------------------------------------------------
// Tree storage: one JSON record per tree, keyed by integer id
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::document::Envelope;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTree {
    pub id: u64,
    pub tree_name: String,
    #[serde(default)]
    pub tree_data: Option<String>,
}

impl StoredTree {
    pub fn envelope(&self) -> Envelope {
        Envelope {
            name: self.tree_name.clone(),
            body: self.tree_data.clone().unwrap_or_default(),
        }
    }

    pub fn set_envelope(&mut self, envelope: Envelope) {
        self.tree_name = envelope.name;
        self.tree_data = Some(envelope.body);
    }
}

/// Persistence boundary. Writes replace a record wholesale; callers are
/// responsible for serializing read-modify-write cycles on the same id.
pub trait TreeStore {
    /// All records, ordered by id.
    fn list(&self) -> StoreResult<Vec<StoredTree>>;
    fn get(&self, id: u64) -> StoreResult<StoredTree>;
    /// Stores a new record under the next free id.
    fn create(&mut self, envelope: Envelope) -> StoreResult<StoredTree>;
    /// Overwrites an existing record.
    fn put(&mut self, tree: &StoredTree) -> StoreResult<()>;
    fn delete(&mut self, id: u64) -> StoreResult<()>;
}

// --- File-backed store ---

/// Name of the file holding the id high-water mark. Its stem is not numeric,
/// so record scans never pick it up.
const META_FILE: &str = "meta.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreMeta {
    next_id: u64,
}

/// One JSON record per tree. Ids are never reused: the next id is kept in
/// `meta.json` and only ever grows.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        info!("tree store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> StoreResult<T> {
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt { path: path.to_path_buf(), source })
    }

    /// Writes through a temp file and rename so a failed write never leaves a
    /// half-written file behind.
    fn write_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let content = serde_json::to_string_pretty(value)
            .map_err(|source| StoreError::Corrupt { path: path.to_path_buf(), source })?;
        std::fs::write(&tmp, content).map_err(|e| StoreError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    fn write_record(&self, tree: &StoredTree) -> StoreResult<()> {
        Self::write_json(&self.record_path(tree.id), tree)
    }

    /// Next unused id. Takes the larger of the stored mark and the highest
    /// record on disk, so a missing meta file cannot lead to reuse.
    fn next_id(&self) -> StoreResult<u64> {
        let path = self.dir.join(META_FILE);
        let meta: StoreMeta = if path.is_file() { Self::read_json(&path)? } else { StoreMeta::default() };
        let after_last = self.ids()?.last().map_or(1, |max| max + 1);
        Ok(meta.next_id.max(after_last))
    }

    fn ids(&self) -> StoreResult<Vec<u64>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

impl TreeStore for FileStore {
    fn list(&self) -> StoreResult<Vec<StoredTree>> {
        self.ids()?
            .into_iter()
            .map(|id| Self::read_json::<StoredTree>(&self.record_path(id)))
            .collect()
    }

    fn get(&self, id: u64) -> StoreResult<StoredTree> {
        let path = self.record_path(id);
        if !path.is_file() {
            return Err(StoreError::TreeNotFound(id));
        }
        Self::read_json::<StoredTree>(&path)
    }

    fn create(&mut self, envelope: Envelope) -> StoreResult<StoredTree> {
        let id = self.next_id()?;
        Self::write_json(&self.dir.join(META_FILE), &StoreMeta { next_id: id + 1 })?;
        let mut tree = StoredTree { id, tree_name: String::new(), tree_data: None };
        tree.set_envelope(envelope);
        self.write_record(&tree)?;
        info!("created tree {id} '{}'", tree.tree_name);
        Ok(tree)
    }

    fn put(&mut self, tree: &StoredTree) -> StoreResult<()> {
        if !self.record_path(tree.id).is_file() {
            return Err(StoreError::TreeNotFound(tree.id));
        }
        self.write_record(tree)?;
        info!("updated tree {} '{}'", tree.id, tree.tree_name);
        Ok(())
    }

    fn delete(&mut self, id: u64) -> StoreResult<()> {
        let path = self.record_path(id);
        if !path.is_file() {
            return Err(StoreError::TreeNotFound(id));
        }
        std::fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        info!("deleted tree {id}");
        Ok(())
    }
}

// --- In-memory store ---

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    trees: BTreeMap<u64, StoredTree>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TreeStore for MemoryStore {
    fn list(&self) -> StoreResult<Vec<StoredTree>> {
        Ok(self.trees.values().cloned().collect())
    }

    fn get(&self, id: u64) -> StoreResult<StoredTree> {
        self.trees.get(&id).cloned().ok_or(StoreError::TreeNotFound(id))
    }

    fn create(&mut self, envelope: Envelope) -> StoreResult<StoredTree> {
        self.next_id += 1;
        let mut tree = StoredTree { id: self.next_id, tree_name: String::new(), tree_data: None };
        tree.set_envelope(envelope);
        self.trees.insert(tree.id, tree.clone());
        Ok(tree)
    }

    fn put(&mut self, tree: &StoredTree) -> StoreResult<()> {
        match self.trees.get_mut(&tree.id) {
            Some(slot) => {
                *slot = tree.clone();
                Ok(())
            }
            None => Err(StoreError::TreeNotFound(tree.id)),
        }
    }

    fn delete(&mut self, id: u64) -> StoreResult<()> {
        self.trees.remove(&id).map(|_| ()).ok_or(StoreError::TreeNotFound(id))
    }
}
