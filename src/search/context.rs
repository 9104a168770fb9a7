use serde::Serialize;
use tracing::debug;

use super::{SearchAnalytics, SearchCoordinator, SearchOptions};
use crate::index::{IndexError, RecordId, SearchResult};

/// A chunk inside the window around a hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextChunk {
    pub record_id: RecordId,
    pub chunk_index: usize,
    pub chunk_text: String,
    /// The hit itself
    pub is_match: bool,
    /// Signed offset from the hit's chunk index
    pub context_position: isize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandedResult {
    pub result: SearchResult,
    pub context_chunks: Vec<ContextChunk>,
    /// Window text in chunk order, joined with single spaces
    pub context_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSearchResponse {
    pub results: Vec<ExpandedResult>,
    pub analytics: SearchAnalytics,
    pub context_window: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Widens hits with their neighbouring chunks from the same document
#[derive(Debug, Clone, Copy)]
pub struct ContextExpander<'a> {
    coordinator: SearchCoordinator<'a>,
}

impl<'a> ContextExpander<'a> {
    #[inline]
    pub fn new(coordinator: SearchCoordinator<'a>) -> Self {
        Self { coordinator }
    }

    /// Attach chunks within `window` positions of the hit
    #[inline]
    pub fn expand(&self, result: &SearchResult, window: usize) -> ExpandedResult {
        let chunks = self.coordinator.index().get_document_chunks(&result.doc_id);

        let Some(center) = chunks
            .iter()
            .find(|c| c.record_id == result.record_id)
            .map(|c| c.metadata.chunk_index)
        else {
            debug!(
                "Record {} no longer belongs to {}, returning hit without context",
                result.record_id, result.doc_id
            );
            let chunk_index = result.chunk_index().unwrap_or_default();
            return ExpandedResult {
                result: result.clone(),
                context_chunks: vec![ContextChunk {
                    record_id: result.record_id,
                    chunk_index,
                    chunk_text: result.chunk_text.clone(),
                    is_match: true,
                    context_position: 0,
                }],
                context_text: result.chunk_text.clone(),
            };
        };

        let first = center.saturating_sub(window);
        let last = center.saturating_add(window);

        let context_chunks: Vec<ContextChunk> = chunks
            .into_iter()
            .filter(|c| (first..=last).contains(&c.metadata.chunk_index))
            .map(|c| {
                let chunk_index = c.metadata.chunk_index;
                ContextChunk {
                    record_id: c.record_id,
                    chunk_index,
                    is_match: c.record_id == result.record_id,
                    context_position: offset(chunk_index, center),
                    chunk_text: c.metadata.chunk_text,
                }
            })
            .collect();

        let context_text = context_chunks
            .iter()
            .map(|c| c.chunk_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        ExpandedResult {
            result: result.clone(),
            context_chunks,
            context_text,
        }
    }

    /// Search, then expand every hit
    #[inline]
    pub fn search_with_context(
        &self,
        query: &[f32],
        options: &SearchOptions,
        window: usize,
    ) -> Result<ContextSearchResponse, IndexError> {
        let response = self.coordinator.search(query, options)?;
        let results = response
            .results
            .iter()
            .map(|r| self.expand(r, window))
            .collect();

        Ok(ContextSearchResponse {
            results,
            analytics: response.analytics,
            context_window: window,
            message: response.message,
        })
    }
}

fn offset(index: usize, center: usize) -> isize {
    if index >= center {
        isize::try_from(index - center).unwrap_or(isize::MAX)
    } else {
        -isize::try_from(center - index).unwrap_or(isize::MAX)
    }
}
