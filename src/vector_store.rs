use std::{
    cmp::Ordering,
    path::Path,
    sync::{Mutex, PoisonError},
};

use rayon::prelude::*;
use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{
    embedding::{Embedder, cosine_similarity},
    error::Result,
    processor::FileCategory,
};

/// File path -> encoded embedding.
const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");
/// File path -> JSON-encoded [`StoredDocument`].
const DOCUMENTS: TableDefinition<&str, &str> =
    TableDefinition::new("documents");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

pub const DEFAULT_TOP_K: usize = 10;

/// Metadata kept next to each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_name: String,
    pub file_type: String,
    pub category: FileCategory,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    text: String,
    metadata: DocumentMetadata,
    model: String,
}

/// A stored record, as returned by [`VectorStore::get`].
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub embedding: Vec<f32>,
}

/// One nearest-neighbour result.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    /// Cosine distance, `1 - cos`.
    pub distance: f32,
    pub similarity: f32,
}

/// Persistent store of text embeddings keyed by sandbox-relative path.
///
/// Binary format per vector entry:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
///
/// Queries scan every record; the store is sized for a personal sandbox.
pub struct VectorStore {
    db: Database,
    embedder: Mutex<Box<dyn Embedder>>,
    default_k: usize,
}

impl VectorStore {
    pub fn open(path: &Path, embedder: Box<dyn Embedder>) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(DOCUMENTS)?;
        txn.commit()?;

        Ok(Self {
            db,
            embedder: Mutex::new(embedder),
            default_k: DEFAULT_TOP_K,
        })
    }

    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    pub fn model_id(&self) -> String {
        self.embedder().model_id().to_string()
    }

    fn embedder(&self) -> std::sync::MutexGuard<'_, Box<dyn Embedder>> {
        self.embedder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder().embed(text)
    }

    /// Embed `text` and upsert it under `id`.
    ///
    /// Blank text is skipped and `false` returned; nothing is written.
    pub fn add_document(
        &self,
        id: &str,
        text: &str,
        metadata: &DocumentMetadata,
    ) -> Result<bool> {
        if text.trim().is_empty() {
            tracing::debug!(id, "skipping blank document");
            return Ok(false);
        }

        let (embedding, model) = {
            let mut embedder = self.embedder();
            (embedder.embed(text)?, embedder.model_id().to_string())
        };
        let stored = serde_json::to_string(&StoredDocument {
            text: text.to_string(),
            metadata: metadata.clone(),
            model,
        })?;

        let byte_len =
            HEADER_SIZE + std::mem::size_of_val(embedding.as_slice());
        let txn = self.db.begin_write()?;
        {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut guard = vectors.insert_reserve(id, byte_len)?;
            let dest = guard.as_mut();
            dest[0..HEADER_SIZE]
                .copy_from_slice(&(embedding.len() as u32).to_le_bytes());
            dest[HEADER_SIZE..]
                .copy_from_slice(bytemuck::cast_slice(&embedding));
        }
        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            documents.insert(id, stored.as_str())?;
        }
        txn.commit()?;
        Ok(true)
    }

    /// The `k` records closest to `query`, nearest first.
    ///
    /// `k = None` uses the store's default. A blank query matches nothing.
    pub fn search(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<VectorHit>> {
        let k = k.unwrap_or(self.default_k);
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embed(query)?;

        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let mut candidates = Vec::new();
        for entry in vectors.iter()? {
            let (key, value) = entry?;
            let id = key.value();
            match decode_vector(value.value()) {
                Some(v) if v.len() == query_vec.len() => {
                    candidates.push((id.to_string(), v));
                }
                Some(v) => {
                    tracing::debug!(
                        id,
                        stored = v.len(),
                        query = query_vec.len(),
                        "skipping vector with mismatched dimension"
                    );
                }
                None => tracing::debug!(id, "skipping malformed vector"),
            }
        }

        let mut scored: Vec<(String, f32)> = candidates
            .into_par_iter()
            .map(|(id, v)| {
                let distance = 1.0 - cosine_similarity(&query_vec, &v);
                (id, distance)
            })
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        let documents = txn.open_table(DOCUMENTS)?;
        let mut hits = Vec::with_capacity(scored.len());
        for (id, distance) in scored {
            let Some(doc) = documents.get(id.as_str())? else {
                continue;
            };
            let stored: StoredDocument = serde_json::from_str(doc.value())?;
            hits.push(VectorHit {
                id,
                text: stored.text,
                metadata: stored.metadata,
                distance,
                similarity: 1.0 - distance,
            });
        }
        tracing::debug!(query, hits = hits.len(), "vector search");
        Ok(hits)
    }

    /// Remove a record. Storage errors are logged and reported as `false`.
    pub fn delete(&self, id: &str) -> bool {
        match self.try_delete(id) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(id, error = %e, "failed to delete vector");
                false
            }
        }
    }

    fn try_delete(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut documents = txn.open_table(DOCUMENTS)?;
            let a = vectors.remove(id)?.is_some();
            let b = documents.remove(id)?.is_some();
            a || b
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Fetch a record. Storage errors are logged and reported as `None`.
    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        match self.try_get(id) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(id, error = %e, "failed to read vector");
                None
            }
        }
    }

    fn try_get(&self, id: &str) -> Result<Option<VectorRecord>> {
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let documents = txn.open_table(DOCUMENTS)?;

        let Some(raw) = vectors.get(id)? else {
            return Ok(None);
        };
        let Some(embedding) = decode_vector(raw.value()) else {
            return Ok(None);
        };
        let Some(doc) = documents.get(id)? else {
            return Ok(None);
        };
        let stored: StoredDocument = serde_json::from_str(doc.value())?;

        Ok(Some(VectorRecord {
            id: id.to_string(),
            text: stored.text,
            metadata: stored.metadata,
            embedding,
        }))
    }

    pub fn count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        Ok(table.len()?)
    }

    /// Drop every record.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(DOCUMENTS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(DOCUMENTS)?;
        txn.commit()?;
        Ok(())
    }
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    let header = bytes.get(0..HEADER_SIZE)?;
    let dimension = u32::from_le_bytes(header.try_into().ok()?) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension * 4 {
        return None;
    }
    Some(bytemuck::pod_collect_to_vec(body))
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("default_k", &self.default_k)
            .finish_non_exhaustive()
    }
}
