// Vector index module
// Nearest-neighbor storage for chunk embeddings plus per-record metadata

pub mod ann;
pub mod vector_store;


use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ann::AnnIndex;
pub use vector_store::VectorIndex;

/// Sequential record identifier, never reused
pub type RecordId = u64;

/// A vector index shared between one writer and many readers
pub type SharedIndex = Arc<RwLock<VectorIndex>>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("No embeddings supplied")]
    EmptyInput,
    #[error("Got {embeddings} embeddings for {texts} chunk texts")]
    LengthMismatch { embeddings: usize, texts: usize },
    #[error("Vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Embedding {position} has a NaN or infinite component")]
    NonFinite { position: usize },
    #[error("Index has not been trained")]
    NotTrained,
    #[error("Invalid index configuration: {0}")]
    InvalidConfig(String),
    #[error("Snapshot error: {0}")]
    Persistence(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact brute-force L2 search
    #[default]
    Flat,
    /// Inverted file with a k-means coarse quantizer
    Ivf,
    /// Hierarchical navigable small world graph
    Hnsw,
}

impl IndexKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Ivf => "ivf",
            Self::Hnsw => "hnsw",
        }
    }
}

impl fmt::Display for IndexKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub kind: IndexKind,
    /// Number of inverted lists (IVF only)
    pub nlist: usize,
    /// Lists visited per query (IVF only)
    pub nprobe: usize,
    /// Train on generated vectors when too few real ones are available
    pub allow_synthetic_training: bool,
    /// Seeds IVF training and HNSW level draws
    pub training_seed: u64,
    /// Links per node on the upper graph layers, twice that on layer 0 (HNSW only)
    pub m: usize,
    /// Beam width while inserting (HNSW only)
    pub ef_construction: usize,
    /// Beam width while searching (HNSW only)
    pub ef_search: usize,
}

impl Default for IndexConfig {
    #[inline]
    fn default() -> Self {
        Self {
            kind: IndexKind::Flat,
            nlist: 100,
            nprobe: 10,
            allow_synthetic_training: true,
            training_seed: 42,
            m: 32,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// Metadata stored alongside every vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub file_path: String,
    pub file_type: String,
    /// Position of the chunk within its document
    pub chunk_index: usize,
    pub chunk_text: String,
    pub total_chunks_in_document: usize,
    /// RFC 3339 timestamp
    pub created_at: String,
    /// Fields not known when the index was built
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// What a record id currently refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState<'a> {
    /// Owned by a document
    Live(&'a ChunkMetadata),
    /// Vector still stored but its document was removed
    Orphaned,
    /// Never assigned
    Unknown,
}

impl RecordState<'_> {
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

/// Summary of one indexed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub doc_id: String,
    pub file_path: String,
    pub file_type: String,
    pub total_chunks: usize,
    pub created_at: String,
}

/// A live chunk of a document, as returned by document lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentChunk {
    pub record_id: RecordId,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Stored vectors, including orphaned ones
    pub total_vectors: usize,
    pub dimension: usize,
    pub total_documents: usize,
    /// Live chunks
    pub total_chunks: usize,
    pub index_kind: IndexKind,
    pub is_trained: bool,
    /// Training used generated vectors, so search quality is approximate
    pub synthetic_training: bool,
    pub orphaned_vectors: usize,
    /// Graph layers, for HNSW indexes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_levels: Option<usize>,
}

/// Qualitative bucket for a raw L2 score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceCategory {
    High,
    Medium,
    Low,
    VeryLow,
}

impl RelevanceCategory {
    #[inline]
    pub fn from_score(score: f32) -> Self {
        if score < 0.3 {
            Self::High
        } else if score < 0.6 {
            Self::Medium
        } else if score < 0.9 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very_low",
        }
    }
}

impl fmt::Display for RelevanceCategory {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// L2 distance, lower is better
    pub score: f32,
    /// 1-based position in the result list
    pub rank: usize,
    pub record_id: RecordId,
    pub doc_id: String,
    pub chunk_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
    pub relevance_category: RelevanceCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl SearchResult {
    #[inline]
    pub fn new(record_id: RecordId, score: f32, metadata: &ChunkMetadata) -> Self {
        Self {
            score,
            rank: 0,
            record_id,
            doc_id: metadata.doc_id.clone(),
            chunk_text: metadata.chunk_text.clone(),
            metadata: Some(metadata.clone()),
            relevance_category: RelevanceCategory::from_score(score),
            snippet: None,
        }
    }

    #[inline]
    pub fn chunk_index(&self) -> Option<usize> {
        self.metadata.as_ref().map(|m| m.chunk_index)
    }

    #[inline]
    pub fn set_score(&mut self, score: f32) {
        self.score = score;
        self.relevance_category = RelevanceCategory::from_score(score);
    }
}

/// Assign 1-based ranks in list order
#[inline]
pub fn renumber(results: &mut [SearchResult]) {
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
}

/// Wrap an index for shared use
#[inline]
pub fn shared(index: VectorIndex) -> SharedIndex {
    Arc::new(RwLock::new(index))
}

/// Euclidean distance between two equally sized vectors
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}
