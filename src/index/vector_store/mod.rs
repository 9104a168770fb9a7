
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AnnIndex, ChunkMetadata, Document, DocumentChunk, IndexConfig, IndexError, IndexKind,
    IndexStats, RecordId, RecordState, SearchResult, renumber,
};

const SNAPSHOT_VERSION: u32 = 1;

/// Embedding vectors plus the metadata that ties each one to a chunk of a
/// document.
///
/// Record ids are assigned sequentially and never reused. Removing a document
/// only drops its metadata; the vectors stay in the nearest-neighbor structure
/// as orphans and are skipped by every lookup.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    config: IndexConfig,
    ann: AnnIndex,
    metadata: BTreeMap<RecordId, ChunkMetadata>,
    /// doc_id to its record ids, in insertion order
    documents: BTreeMap<String, Vec<RecordId>>,
    next_id: RecordId,
}

/// Sidecar persisted next to the nearest-neighbor structure
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    dimension: usize,
    index_kind: IndexKind,
    config: IndexConfig,
    next_id: RecordId,
    metadata: BTreeMap<RecordId, ChunkMetadata>,
    documents: BTreeMap<String, Vec<RecordId>>,
}

impl VectorIndex {
    #[inline]
    pub fn new(dimension: usize, config: IndexConfig) -> Result<Self, IndexError> {
        let ann = AnnIndex::new(dimension, &config)?;
        info!(
            "Created {} vector index with dimension {}",
            config.kind, dimension
        );
        Ok(Self {
            config,
            ann,
            metadata: BTreeMap::new(),
            documents: BTreeMap::new(),
            next_id: 0,
        })
    }

    /// Exact index with default settings
    #[inline]
    pub fn flat(dimension: usize) -> Result<Self, IndexError> {
        Self::new(dimension, IndexConfig::default())
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.ann.dimension()
    }

    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Stored vectors, including orphans
    #[inline]
    pub fn len(&self) -> usize {
        self.ann.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ann.is_empty()
    }

    /// Add one document's chunk embeddings, returning its doc_id
    #[inline]
    pub fn add_document_embeddings(
        &mut self,
        embeddings: &[Vec<f32>],
        file_path: &str,
        file_type: &str,
        chunk_texts: &[String],
        doc_id: Option<&str>,
    ) -> Result<String, IndexError> {
        self.add_document_embeddings_at(
            embeddings,
            file_path,
            file_type,
            chunk_texts,
            doc_id,
            Utc::now(),
        )
    }

    /// Like [`Self::add_document_embeddings`] with an explicit creation time
    #[inline]
    pub fn add_document_embeddings_at(
        &mut self,
        embeddings: &[Vec<f32>],
        file_path: &str,
        file_type: &str,
        chunk_texts: &[String],
        doc_id: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<String, IndexError> {
        if embeddings.is_empty() {
            return Err(IndexError::EmptyInput);
        }
        if embeddings.len() != chunk_texts.len() {
            return Err(IndexError::LengthMismatch {
                embeddings: embeddings.len(),
                texts: chunk_texts.len(),
            });
        }
        let expected = self.dimension();
        if let Some(bad) = embeddings.iter().find(|v| v.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
        if let Some(position) = embeddings
            .iter()
            .position(|v| v.iter().any(|x| !x.is_finite()))
        {
            return Err(IndexError::NonFinite { position });
        }

        let doc_id = doc_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let first_id = self.next_id;
        self.ann.add(first_id, embeddings)?;

        let existing = self.documents.get(&doc_id).map_or(0, Vec::len);
        let first_index = self
            .documents
            .get(&doc_id)
            .and_then(|ids| ids.iter().rev().find_map(|id| self.metadata.get(id)))
            .map_or(0, |m| m.chunk_index + 1);
        let total = existing + embeddings.len();
        let created_at = created_at.to_rfc3339();

        let ids = self.documents.entry(doc_id.clone()).or_default();
        for (offset, (id, text)) in (first_id..).zip(chunk_texts).enumerate() {
            self.metadata.insert(
                id,
                ChunkMetadata {
                    doc_id: doc_id.clone(),
                    file_path: file_path.to_string(),
                    file_type: file_type.to_string(),
                    chunk_index: first_index + offset,
                    chunk_text: text.clone(),
                    total_chunks_in_document: total,
                    created_at: created_at.clone(),
                    extra: BTreeMap::new(),
                },
            );
            ids.push(id);
        }
        self.next_id = first_id + embeddings.len() as RecordId;

        if existing > 0 {
            for id in ids.iter() {
                if let Some(meta) = self.metadata.get_mut(id) {
                    meta.total_chunks_in_document = total;
                }
            }
        }

        debug!(
            "Added {} embeddings for document {} (ids {}..{})",
            embeddings.len(),
            doc_id,
            first_id,
            self.next_id
        );
        Ok(doc_id)
    }

    /// Nearest chunks to `query`, ascending by L2 distance.
    ///
    /// Over-fetches `2k` candidates so that filtering still leaves room for
    /// `k` results; orphaned records are dropped silently.
    #[inline]
    pub fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        score_threshold: Option<f32>,
        filter_doc_ids: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if self.ann.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let fetch = k.saturating_mul(2).min(self.ann.len());
        let neighbors = self.ann.search(query, fetch)?;

        let mut results: Vec<SearchResult> = neighbors
            .into_iter()
            .filter_map(|n| {
                self.metadata
                    .get(&n.id)
                    .map(|meta| SearchResult::new(n.id, n.distance, meta))
            })
            .filter(|r| filter_doc_ids.is_none_or(|ids| ids.contains(&r.doc_id)))
            .filter(|r| score_threshold.is_none_or(|t| r.score <= t))
            .take(k)
            .collect();
        renumber(&mut results);

        Ok(results)
    }

    /// Live chunks of a document ordered by chunk index; empty if unknown
    #[inline]
    pub fn get_document_chunks(&self, doc_id: &str) -> Vec<DocumentChunk> {
        let Some(ids) = self.documents.get(doc_id) else {
            return Vec::new();
        };

        let mut chunks: Vec<DocumentChunk> = ids
            .iter()
            .filter_map(|id| {
                self.metadata.get(id).map(|meta| DocumentChunk {
                    record_id: *id,
                    metadata: meta.clone(),
                })
            })
            .collect();
        chunks.sort_by_key(|c| c.metadata.chunk_index);
        chunks
    }

    /// Logically delete a document. Returns false if it was never known.
    #[inline]
    pub fn remove_document(&mut self, doc_id: &str) -> bool {
        let Some(ids) = self.documents.remove(doc_id) else {
            debug!("Document {} not found, nothing to remove", doc_id);
            return false;
        };

        for id in &ids {
            self.metadata.remove(id);
        }
        info!(
            "Removed document {} ({} vectors orphaned)",
            doc_id,
            ids.len()
        );
        true
    }

    #[inline]
    pub fn record(&self, id: RecordId) -> RecordState<'_> {
        match self.metadata.get(&id) {
            Some(meta) => RecordState::Live(meta),
            None if id < self.next_id => RecordState::Orphaned,
            None => RecordState::Unknown,
        }
    }

    #[inline]
    pub fn document(&self, doc_id: &str) -> Option<Document> {
        let ids = self.documents.get(doc_id)?;
        let first = ids.iter().find_map(|id| self.metadata.get(id))?;
        Some(Document {
            doc_id: doc_id.to_string(),
            file_path: first.file_path.clone(),
            file_type: first.file_type.clone(),
            total_chunks: first.total_chunks_in_document,
            created_at: first.created_at.clone(),
        })
    }

    #[inline]
    pub fn documents(&self) -> Vec<Document> {
        self.documents
            .keys()
            .filter_map(|doc_id| self.document(doc_id))
            .collect()
    }

    #[inline]
    pub fn get_stats(&self) -> IndexStats {
        let total_vectors = self.ann.len();
        let total_chunks = self.metadata.len();
        IndexStats {
            total_vectors,
            dimension: self.dimension(),
            total_documents: self.documents.len(),
            total_chunks,
            index_kind: self.ann.kind(),
            is_trained: self.ann.is_trained(),
            synthetic_training: self.ann.synthetic_training(),
            orphaned_vectors: total_vectors.saturating_sub(total_chunks),
            graph_levels: self.ann.graph_levels(),
        }
    }

    /// Train an approximate index on the vectors stored so far
    #[inline]
    pub fn train(&mut self) -> Result<(), IndexError> {
        self.ann.train()
    }

    /// Write `<path>.ann.json` and `<path>.meta.json`
    #[inline]
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            dimension: self.dimension(),
            index_kind: self.ann.kind(),
            config: self.config.clone(),
            next_id: self.next_id,
            metadata: self.metadata.clone(),
            documents: self.documents.clone(),
        };

        let (ann_path, meta_path) = snapshot_paths(path);
        fs::write(&ann_path, serde_json::to_vec(&self.ann)?)?;
        fs::write(&meta_path, serde_json::to_vec_pretty(&snapshot)?)?;

        info!(
            "Saved index with {} vectors to {}",
            self.ann.len(),
            path.display()
        );
        Ok(())
    }

    /// Restore an index written by [`Self::save`]
    #[inline]
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let (ann_path, meta_path) = snapshot_paths(path);
        if !ann_path.exists() || !meta_path.exists() {
            return Err(IndexError::Persistence(format!(
                "No index snapshot at {}",
                path.display()
            )));
        }

        let ann: AnnIndex = serde_json::from_slice(&fs::read(&ann_path)?)?;
        let snapshot: Snapshot = serde_json::from_slice(&fs::read(&meta_path)?)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(IndexError::Persistence(format!(
                "Unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if ann.dimension() == 0 || ann.dimension() != snapshot.dimension {
            return Err(IndexError::Persistence(format!(
                "Dimension {} in sidecar does not match stored index dimension {}",
                snapshot.dimension,
                ann.dimension()
            )));
        }
        if ann.kind() != snapshot.index_kind {
            return Err(IndexError::Persistence(format!(
                "Sidecar describes a {} index but a {} index was stored",
                snapshot.index_kind,
                ann.kind()
            )));
        }
        if (ann.len() as RecordId) > snapshot.next_id {
            warn!(
                "Stored index holds {} vectors but next id is {}",
                ann.len(),
                snapshot.next_id
            );
        }

        info!(
            "Loaded index with {} vectors from {}",
            ann.len(),
            path.display()
        );
        Ok(Self {
            config: snapshot.config,
            ann,
            metadata: snapshot.metadata,
            documents: snapshot.documents,
            next_id: snapshot.next_id,
        })
    }
}

/// File names for the two halves of a snapshot
#[inline]
pub fn snapshot_paths(path: &Path) -> (PathBuf, PathBuf) {
    let with_suffix = |suffix: &str| {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    };
    (with_suffix(".ann.json"), with_suffix(".meta.json"))
}

/// Whether a snapshot exists at `path`
#[inline]
pub fn snapshot_exists(path: &Path) -> bool {
    let (ann_path, meta_path) = snapshot_paths(path);
    ann_path.exists() && meta_path.exists()
}
