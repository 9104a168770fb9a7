// Embeddings module
// Text chunking plus the capability that turns chunk text into vectors

pub mod chunking;
pub mod ollama;

use anyhow::{Result, anyhow};

pub use chunking::{
    Chunk, ChunkingConfig, ChunkingOutcome, TextChunker, TokenEstimator, WordHeuristic,
    estimate_token_count,
};
pub use ollama::OllamaClient;

/// Vectors produced for one batch of texts
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
    /// One vector per input text, in input order
    pub vectors: Vec<Vec<f32>>,
    pub dimension: usize,
    /// Tokens consumed by the provider
    pub token_usage: usize,
}

/// Turns text into embedding vectors.
///
/// All vectors returned for one call share the same dimension.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    /// Embed a single query string
    #[inline]
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Embedder returned no vector for query"))
    }
}
