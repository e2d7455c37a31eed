use crate::store::Tables;
use atomicwrites::{AtomicFile, OverwriteBehavior};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use storefront_core::{Distance, Document, IndexConfig, Vector, VectorIndex};
use thiserror::Error;
use tracing::{debug, info, warn};

const SNAPSHOT_FILENAME: &str = "storefront.snapshot";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode snapshot {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to write snapshot {path:?}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("invalid document {id} in index {index}: {reason}")]
    Document {
        index: String,
        id: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<SnapshotError> for storefront_core::Error {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::Io(e) => storefront_core::Error::Io(e),
            SnapshotError::Encode(_) | SnapshotError::Decode { .. } | SnapshotError::Document { .. } => {
                storefront_core::Error::Serialization(e.to_string())
            }
            SnapshotError::Write { .. } => storefront_core::Error::Storage(e.to_string()),
        }
    }
}

/// Everything persisted: relational tables plus every vector index.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotData {
    pub tables: Tables,
    pub indexes: Vec<IndexSnapshot>,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub name: String,
    pub vector_dim: usize,
    pub distance: Distance,
    pub overfetch_factor: usize,
    pub documents: Vec<DocumentSnapshot>,
}

/// Metadata is kept as JSON text; bincode cannot decode `serde_json::Value`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: String,
    pub version: u64,
    pub vector: Vec<f32>,
    pub metadata_json: Option<String>,
}

impl IndexSnapshot {
    pub fn capture(index: &VectorIndex) -> Self {
        let config = index.config();
        let mut documents: Vec<DocumentSnapshot> = index
            .documents()
            .into_iter()
            .map(|doc| DocumentSnapshot {
                id: doc.id.0,
                version: doc.version,
                vector: doc.vector.into_inner(),
                metadata_json: doc.metadata.map(|m| m.to_string()),
            })
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            name: config.name.clone(),
            vector_dim: config.vector_dim,
            distance: config.distance,
            overfetch_factor: config.overfetch_factor,
            documents,
        }
    }

    pub fn restore(self) -> Result<VectorIndex, SnapshotError> {
        let index = VectorIndex::new(IndexConfig {
            name: self.name.clone(),
            vector_dim: self.vector_dim,
            distance: self.distance,
            overfetch_factor: self.overfetch_factor,
        });

        let mut documents = Vec::with_capacity(self.documents.len());
        for snapshot in self.documents {
            let metadata = snapshot
                .metadata_json
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()
                .map_err(|e| SnapshotError::Document {
                    index: self.name.clone(),
                    id: snapshot.id.clone(),
                    reason: e.to_string(),
                })?;
            let mut document = Document::new(snapshot.id, Vector::new(snapshot.vector), metadata);
            document.version = snapshot.version;
            documents.push(document);
        }

        // batch_upsert would bump versions; insert one by one to keep them.
        for document in documents {
            let id = document.id.to_string();
            index
                .insert_new(document)
                .map_err(|e| SnapshotError::Document {
                    index: self.name.clone(),
                    id,
                    reason: e.to_string(),
                })?;
        }

        Ok(index)
    }
}

/// Whole-state snapshots written atomically to `<data_dir>/storefront.snapshot`
pub struct SnapshotPersistence {
    snapshot_path: PathBuf,
    save_in_progress: AtomicBool,
    last_save_time: AtomicI64,
}

impl SnapshotPersistence {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            snapshot_path: data_dir.as_ref().join(SNAPSHOT_FILENAME),
            save_in_progress: AtomicBool::new(false),
            last_save_time: AtomicI64::new(0),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Encode and write a snapshot. Returns `false` without writing if
    /// another save is still running.
    pub fn save(&self, snapshot: &SnapshotData) -> Result<bool, SnapshotError> {
        if self.save_in_progress.swap(true, Ordering::Acquire) {
            debug!("snapshot save already in progress");
            return Ok(false);
        }

        let result = self.write(snapshot);
        self.save_in_progress.store(false, Ordering::Release);
        result?;

        self.last_save_time.store(snapshot.created_at, Ordering::Release);
        info!(
            path = ?self.snapshot_path,
            customers = snapshot.tables.customers.len(),
            indexes = snapshot.indexes.len(),
            "snapshot saved"
        );
        Ok(true)
    }

    fn write(&self, snapshot: &SnapshotData) -> Result<(), SnapshotError> {
        let data = bincode::serialize(snapshot).map_err(SnapshotError::Encode)?;
        AtomicFile::new(&self.snapshot_path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(&data))
            .map_err(|e| SnapshotError::Write {
                path: self.snapshot_path.clone(),
                reason: e.to_string(),
            })
    }

    /// Load the snapshot from disk (on startup). A missing file is not an error.
    pub fn load(&self) -> Result<Option<SnapshotData>, SnapshotError> {
        if !self.snapshot_path.exists() {
            warn!(path = ?self.snapshot_path, "no snapshot found, starting empty");
            return Ok(None);
        }

        let data = std::fs::read(&self.snapshot_path)?;
        let snapshot: SnapshotData =
            bincode::deserialize(&data).map_err(|source| SnapshotError::Decode {
                path: self.snapshot_path.clone(),
                source,
            })?;
        self.last_save_time.store(snapshot.created_at, Ordering::Release);
        Ok(Some(snapshot))
    }

    pub fn is_save_in_progress(&self) -> bool {
        self.save_in_progress.load(Ordering::Acquire)
    }

    /// Unix seconds of the last snapshot written or loaded, 0 if none.
    pub fn last_save_time(&self) -> i64 {
        self.last_save_time.load(Ordering::Acquire)
    }
}
