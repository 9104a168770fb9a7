// Indexer module
// Multi-document ingestion: read, chunk, embed and add to the shared index


use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::embeddings::{ChunkingOutcome, Embedder, TextChunker};
use crate::index::SharedIndex;
use crate::{DocsError, Result};

/// Formats that need a dedicated extractor before they can be chunked
const BINARY_FORMATS: [&str; 4] = ["pdf", "docx", "doc", "odt"];

/// Already extracted text of one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub file_path: String,
    pub file_type: String,
    pub text: String,
    /// Reuse an existing doc_id to append to that document
    pub doc_id: Option<String>,
}

impl SourceDocument {
    #[inline]
    pub fn new(file_path: impl Into<String>, file_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            file_type: file_type.into(),
            text: text.into(),
            doc_id: None,
        }
    }

    #[inline]
    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }
}

/// Read a UTF-8 text file, deriving its type from the extension
#[inline]
pub fn read_source(path: &Path) -> anyhow::Result<SourceDocument> {
    let file_type = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or_else(|| "txt".to_string(), str::to_lowercase);

    if BINARY_FORMATS.contains(&file_type.as_str()) {
        return Err(anyhow!(
            "{} files need text extraction first: {}",
            file_type,
            path.display()
        ));
    }

    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} as UTF-8 text", path.display()))?;

    Ok(SourceDocument::new(path.display().to_string(), file_type, text))
}

/// What happened to one document during ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentOutcome {
    pub file_path: String,
    pub doc_id: Option<String>,
    pub chunks_indexed: usize,
    pub chunks_excluded: usize,
    pub token_usage: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentOutcome {
    #[inline]
    pub fn failed(file_path: impl Into<String>, error: &DocsError) -> Self {
        Self {
            file_path: file_path.into(),
            doc_id: None,
            chunks_indexed: 0,
            chunks_excluded: 0,
            token_usage: 0,
            error: Some(error.to_string()),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub documents: Vec<DocumentOutcome>,
}

impl IngestReport {
    #[inline]
    pub fn succeeded(&self) -> usize {
        self.documents.iter().filter(|d| d.is_success()).count()
    }

    #[inline]
    pub fn failed(&self) -> usize {
        self.documents.len() - self.succeeded()
    }

    #[inline]
    pub fn chunks_indexed(&self) -> usize {
        self.documents.iter().map(|d| d.chunks_indexed).sum()
    }
}

/// Chunks documents, embeds the chunks and adds them to a shared index.
///
/// Embedding runs without holding the index lock; only the final add takes
/// the write lock.
pub struct Indexer<E: Embedder> {
    chunker: TextChunker,
    embedder: E,
    index: SharedIndex,
}

impl<E: Embedder> Indexer<E> {
    #[inline]
    pub fn new(chunker: TextChunker, embedder: E, index: SharedIndex) -> Self {
        Self {
            chunker,
            embedder,
            index,
        }
    }

    #[inline]
    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    #[inline]
    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Ingest every document; a failure is recorded on that document only
    #[inline]
    pub fn ingest(&self, documents: &[SourceDocument]) -> IngestReport {
        self.ingest_each(documents, |_| {})
    }

    /// Like [`Self::ingest`], reporting each outcome as it completes
    #[inline]
    pub fn ingest_each<F>(&self, documents: &[SourceDocument], mut on_document: F) -> IngestReport
    where
        F: FnMut(&DocumentOutcome),
    {
        let mut report = IngestReport::default();

        for document in documents {
            let outcome = self
                .ingest_document(document)
                .unwrap_or_else(|e| {
                    error!("Failed to ingest {}: {}", document.file_path, e);
                    DocumentOutcome::failed(document.file_path.clone(), &e)
                });
            on_document(&outcome);
            report.documents.push(outcome);
        }

        info!(
            "Ingested {} of {} documents ({} chunks)",
            report.succeeded(),
            report.documents.len(),
            report.chunks_indexed()
        );
        report
    }

    /// Read and ingest files from disk. With a `doc_id`, every file is
    /// appended to that document.
    #[inline]
    pub fn ingest_paths<F>(
        &self,
        paths: &[PathBuf],
        doc_id: Option<&str>,
        mut on_document: F,
    ) -> IngestReport
    where
        F: FnMut(&DocumentOutcome),
    {
        let mut report = IngestReport::default();

        for path in paths {
            let source = read_source(path).map(|document| match doc_id {
                Some(id) => document.with_doc_id(id),
                None => document,
            });
            let outcome = match source {
                Ok(document) => self.ingest_document(&document).unwrap_or_else(|e| {
                    error!("Failed to ingest {}: {}", path.display(), e);
                    DocumentOutcome::failed(document.file_path.clone(), &e)
                }),
                Err(e) => {
                    warn!("Skipping {}: {:#}", path.display(), e);
                    DocumentOutcome::failed(path.display().to_string(), &DocsError::Other(e))
                }
            };
            on_document(&outcome);
            report.documents.push(outcome);
        }

        info!(
            "Ingested {} of {} files ({} chunks)",
            report.succeeded(),
            report.documents.len(),
            report.chunks_indexed()
        );
        report
    }

    /// Chunk, embed and add one document
    #[inline]
    pub fn ingest_document(&self, document: &SourceDocument) -> Result<DocumentOutcome> {
        let source_id = document
            .doc_id
            .as_deref()
            .unwrap_or(document.file_path.as_str());
        let outcome: ChunkingOutcome = self.chunker.chunk(&document.text, source_id);

        if outcome.is_empty() {
            return Err(DocsError::Other(anyhow!(
                "No indexable content in {} ({} chunks rejected)",
                document.file_path,
                outcome.excluded
            )));
        }

        let texts = outcome.texts();
        debug!(
            "Embedding {} chunks from {}",
            texts.len(),
            document.file_path
        );
        let batch = self
            .embedder
            .embed(&texts)
            .map_err(|e| DocsError::Embedding(format!("{e:#}")))?;

        if batch.vectors.len() != texts.len() {
            return Err(DocsError::Embedding(format!(
                "Embedder returned {} vectors for {} chunks",
                batch.vectors.len(),
                texts.len()
            )));
        }

        let doc_id = self.index.write().add_document_embeddings(
            &batch.vectors,
            &document.file_path,
            &document.file_type,
            &texts,
            document.doc_id.as_deref(),
        )?;

        info!(
            "Indexed {} as {}: {} chunks ({} excluded)",
            document.file_path,
            doc_id,
            texts.len(),
            outcome.excluded
        );

        Ok(DocumentOutcome {
            file_path: document.file_path.clone(),
            doc_id: Some(doc_id),
            chunks_indexed: texts.len(),
            chunks_excluded: outcome.excluded,
            token_usage: batch.token_usage,
            error: None,
        })
    }
}
