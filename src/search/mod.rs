// Search coordination
// Filtering, deduplication, recency boosting and analytics on top of raw
// nearest-neighbor results

pub mod context;
pub mod multi_query;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::index::{IndexError, RelevanceCategory, SearchResult, VectorIndex, renumber};

pub use context::{ContextChunk, ContextExpander, ContextSearchResponse, ExpandedResult};
pub use multi_query::{CombinationMethod, CombinedResult, MultiQueryAggregator, MultiQueryResponse};

/// Candidates fetched per requested result, leaving room for filtering
const OVER_FETCH_FACTOR: usize = 3;

/// Consecutive chunks of one document that count as duplicates
const DEDUP_BUCKET_SIZE: usize = 3;

const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;
const MAX_RECENCY_BOOST: f64 = 0.1;

pub const NO_DOCUMENTS_MESSAGE: &str = "No documents indexed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_k: usize,
    /// Snippet length in characters, including the ellipsis
    pub snippet_length: usize,
    /// Neighbouring chunks on each side when expanding context
    pub context_window: usize,
    pub deduplicate: bool,
}

impl Default for SearchConfig {
    #[inline]
    fn default() -> Self {
        Self {
            default_k: 10,
            snippet_length: 200,
            context_window: 2,
            deduplicate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub k: usize,
    /// Keep only scores at or below this distance
    pub score_threshold: Option<f32>,
    /// Drop scores below this distance, e.g. near-copies of the query
    pub min_score_threshold: Option<f32>,
    pub filter_doc_ids: Option<Vec<String>>,
    /// Case-insensitive file type filter
    pub filter_doc_types: Option<Vec<String>>,
    pub boost_recent: bool,
    pub deduplicate: bool,
    pub include_metadata: bool,
    pub snippet_length: usize,
    /// Point in time recency is measured from; now when unset
    pub reference_time: Option<DateTime<Utc>>,
}

impl Default for SearchOptions {
    #[inline]
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl SearchOptions {
    #[inline]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    #[inline]
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            k: config.default_k,
            score_threshold: None,
            min_score_threshold: None,
            filter_doc_ids: None,
            filter_doc_types: None,
            boost_recent: false,
            deduplicate: config.deduplicate,
            include_metadata: true,
            snippet_length: config.snippet_length,
            reference_time: None,
        }
    }

    #[inline]
    pub fn with_doc_ids(mut self, doc_ids: Vec<String>) -> Self {
        self.filter_doc_ids = Some(doc_ids);
        self
    }

    #[inline]
    pub fn with_doc_types(mut self, doc_types: Vec<String>) -> Self {
        self.filter_doc_types = Some(doc_types);
        self
    }

    #[inline]
    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    #[inline]
    pub fn with_recency_boost(mut self, reference_time: Option<DateTime<Utc>>) -> Self {
        self.boost_recent = true;
        self.reference_time = reference_time;
        self
    }

    fn filters(&self) -> SearchFilters {
        SearchFilters {
            doc_ids: self.filter_doc_ids.clone(),
            doc_types: self.filter_doc_types.clone(),
            score_threshold: self.score_threshold,
            min_score_threshold: self.min_score_threshold,
            boost_recent: self.boost_recent,
            deduplicate: self.deduplicate,
        }
    }
}

/// Filters that were applied, echoed back with the results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchFilters {
    pub doc_ids: Option<Vec<String>>,
    pub doc_types: Option<Vec<String>>,
    pub score_threshold: Option<f32>,
    pub min_score_threshold: Option<f32>,
    pub boost_recent: bool,
    pub deduplicate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchAnalytics {
    pub search_time_ms: f64,
    /// Raw candidates returned by the index before secondary filtering
    pub initial_candidates: usize,
    pub filtered_results: usize,
    pub index_size: usize,
    pub total_documents: usize,
    pub relevance_distribution: BTreeMap<RelevanceCategory, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub analytics: SearchAnalytics,
    pub filters: SearchFilters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Runs searches against a borrowed index. Hold a read lock on a shared
/// index for the coordinator's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct SearchCoordinator<'a> {
    index: &'a VectorIndex,
}

impl<'a> SearchCoordinator<'a> {
    #[inline]
    pub fn new(index: &'a VectorIndex) -> Self {
        Self { index }
    }

    #[inline]
    pub fn index(&self) -> &'a VectorIndex {
        self.index
    }

    /// Search with filtering, deduplication and optional recency boost.
    ///
    /// An empty index yields an empty response with an explanatory message.
    #[inline]
    pub fn search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<SearchResponse, IndexError> {
        let started = Instant::now();
        let stats = self.index.get_stats();

        if stats.total_chunks == 0 {
            info!("Search requested against an empty index");
            return Ok(SearchResponse {
                results: Vec::new(),
                analytics: SearchAnalytics {
                    search_time_ms: elapsed_ms(started),
                    index_size: stats.total_vectors,
                    ..SearchAnalytics::default()
                },
                filters: options.filters(),
                message: Some(NO_DOCUMENTS_MESSAGE.to_string()),
            });
        }

        let fetch = options
            .k
            .saturating_mul(OVER_FETCH_FACTOR)
            .min(stats.total_vectors);
        let candidates = self.index.similarity_search(
            query,
            fetch,
            options.score_threshold,
            options.filter_doc_ids.as_deref(),
        )?;
        let initial_candidates = candidates.len();

        let mut results = filter_candidates(candidates, options);

        if options.boost_recent {
            let now = options.reference_time.unwrap_or_else(Utc::now);
            apply_recency_boost(&mut results, now);
        }

        for result in &mut results {
            result.snippet = Some(snippet(&result.chunk_text, options.snippet_length));
            if !options.include_metadata {
                result.metadata = None;
            }
        }
        renumber(&mut results);

        let mut relevance_distribution = BTreeMap::new();
        for result in &results {
            *relevance_distribution
                .entry(result.relevance_category)
                .or_insert(0) += 1;
        }

        let analytics = SearchAnalytics {
            search_time_ms: elapsed_ms(started),
            initial_candidates,
            filtered_results: results.len(),
            index_size: stats.total_vectors,
            total_documents: stats.total_documents,
            relevance_distribution,
        };

        info!(
            "Search returned {} of {} candidates in {:.2}ms",
            analytics.filtered_results, analytics.initial_candidates, analytics.search_time_ms
        );

        let message = results
            .is_empty()
            .then(|| "No results matched the search filters".to_string());

        Ok(SearchResponse {
            results,
            analytics,
            filters: options.filters(),
            message,
        })
    }
}

/// Doc-type filter, score floor, deduplication, then truncation to `k`
fn filter_candidates(candidates: Vec<SearchResult>, options: &SearchOptions) -> Vec<SearchResult> {
    let doc_types: Option<Vec<String>> = options
        .filter_doc_types
        .as_ref()
        .map(|types| types.iter().map(|t| t.to_lowercase()).collect());
    let mut seen_buckets: HashSet<(String, usize)> = HashSet::new();

    candidates
        .into_iter()
        .filter(|r| {
            doc_types.as_ref().is_none_or(|types| {
                r.metadata
                    .as_ref()
                    .is_some_and(|m| types.contains(&m.file_type.to_lowercase()))
            })
        })
        .filter(|r| options.min_score_threshold.is_none_or(|floor| r.score >= floor))
        .filter(|r| {
            if !options.deduplicate {
                return true;
            }
            let bucket = r.chunk_index().unwrap_or_default() / DEDUP_BUCKET_SIZE;
            let fresh = seen_buckets.insert((r.doc_id.clone(), bucket));
            if !fresh {
                debug!(
                    "Dropping chunk {} of {} as a near-duplicate",
                    r.record_id, r.doc_id
                );
            }
            fresh
        })
        .take(options.k)
        .collect()
}

/// Scale scores down by up to 10% for recent documents, then re-sort
#[inline]
pub fn apply_recency_boost(results: &mut [SearchResult], now: DateTime<Utc>) {
    for result in results.iter_mut() {
        let Some(created) = result
            .metadata
            .as_ref()
            .and_then(|m| DateTime::parse_from_rfc3339(&m.created_at).ok())
        else {
            continue;
        };

        let elapsed = now.signed_duration_since(created.with_timezone(&Utc));
        // Whole days only, so anything added today gets the full boost
        let days_ago = elapsed.num_days().max(0) as f64;
        let factor = 1.0 - (-days_ago / RECENCY_HALF_LIFE_DAYS).exp() * MAX_RECENCY_BOOST;
        result.set_score((f64::from(result.score) * factor) as f32);
    }

    results.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.record_id.cmp(&b.record_id)));
    renumber(results);
}

/// First `max_chars` characters of `text`, ending in "..." when truncated
#[inline]
pub fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
