use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{SearchCoordinator, SearchOptions};
use crate::embeddings::Embedder;
use crate::index::{RecordId, SearchResult};
use crate::{DocsError, Result};

/// How per-query scores of the same chunk are folded into one distance.
///
/// Scores are distances, so `Max` keeps the best (smallest) one and `Min`
/// keeps the worst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinationMethod {
    #[default]
    Average,
    Max,
    Min,
    /// Weights `1/(i+1)` by arrival order, normalised
    Weighted,
}

impl CombinationMethod {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "average",
            Self::Max => "max",
            Self::Min => "min",
            Self::Weighted => "weighted",
        }
    }

    #[inline]
    pub fn combine(self, scores: &[f32]) -> f32 {
        if scores.is_empty() {
            return f32::INFINITY;
        }
        match self {
            Self::Average => scores.iter().sum::<f32>() / scores.len() as f32,
            Self::Max => scores.iter().copied().fold(f32::INFINITY, f32::min),
            Self::Min => scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            Self::Weighted => {
                let (weighted, total) = scores.iter().enumerate().fold(
                    (0.0_f32, 0.0_f32),
                    |(weighted, total), (i, score)| {
                        let weight = 1.0 / (i as f32 + 1.0);
                        (weighted + score * weight, total + weight)
                    },
                );
                weighted / total
            }
        }
    }
}

impl fmt::Display for CombinationMethod {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CombinationMethod {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "average" | "avg" => Ok(Self::Average),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "weighted" => Ok(Self::Weighted),
            other => Err(format!(
                "Unknown combination method '{other}' (expected average, max, min or weighted)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedResult {
    /// The chunk, carrying the combined score
    pub result: SearchResult,
    /// Scores in query arrival order
    pub individual_scores: Vec<f32>,
    pub query_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiQueryResponse {
    pub results: Vec<CombinedResult>,
    pub method: CombinationMethod,
    pub queries_used: usize,
    /// Queries whose embedding failed
    pub skipped_queries: Vec<String>,
}

/// Runs several queries and merges the scores each chunk received
pub struct MultiQueryAggregator<'a, E: Embedder + ?Sized> {
    coordinator: SearchCoordinator<'a>,
    embedder: &'a E,
}

impl<'a, E: Embedder + ?Sized> MultiQueryAggregator<'a, E> {
    #[inline]
    pub fn new(coordinator: SearchCoordinator<'a>, embedder: &'a E) -> Self {
        Self {
            coordinator,
            embedder,
        }
    }

    /// Embed each query, search with `2k` headroom and combine per chunk
    #[inline]
    pub fn combine(
        &self,
        queries: &[String],
        options: &SearchOptions,
        method: CombinationMethod,
    ) -> Result<MultiQueryResponse> {
        if queries.is_empty() {
            return Err(DocsError::Search("No queries supplied".to_string()));
        }

        let mut vectors = Vec::with_capacity(queries.len());
        let mut skipped_queries = Vec::new();
        for query in queries {
            match self.embedder.embed_query(query) {
                Ok(vector) => vectors.push(vector),
                Err(e) => {
                    warn!("Skipping query '{}': embedding failed: {:#}", query, e);
                    skipped_queries.push(query.clone());
                }
            }
        }

        if vectors.is_empty() {
            return Err(DocsError::Embedding(format!(
                "None of the {} queries could be embedded",
                queries.len()
            )));
        }

        let mut response = self.combine_vectors(&vectors, options, method)?;
        response.skipped_queries = skipped_queries;
        Ok(response)
    }

    /// Combine results for already embedded queries
    #[inline]
    pub fn combine_vectors(
        &self,
        query_vectors: &[Vec<f32>],
        options: &SearchOptions,
        method: CombinationMethod,
    ) -> Result<MultiQueryResponse> {
        if query_vectors.is_empty() {
            return Err(DocsError::Search("No queries supplied".to_string()));
        }

        let per_query = SearchOptions {
            k: options.k.saturating_mul(2),
            ..options.clone()
        };

        let mut groups: Vec<(SearchResult, Vec<f32>)> = Vec::new();
        let mut positions: HashMap<(String, RecordId), usize> = HashMap::new();

        for (i, vector) in query_vectors.iter().enumerate() {
            let response = self.coordinator.search(vector, &per_query)?;
            debug!("Query {} returned {} results", i, response.results.len());

            for result in response.results {
                match positions.entry((result.doc_id.clone(), result.record_id)) {
                    Entry::Occupied(entry) => {
                        if let Some((_, scores)) = groups.get_mut(*entry.get()) {
                            scores.push(result.score);
                        }
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(groups.len());
                        let score = result.score;
                        groups.push((result, vec![score]));
                    }
                }
            }
        }

        let mut results: Vec<CombinedResult> = groups
            .into_iter()
            .map(|(mut result, individual_scores)| {
                result.set_score(method.combine(&individual_scores));
                CombinedResult {
                    result,
                    query_count: individual_scores.len(),
                    individual_scores,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            a.result
                .score
                .total_cmp(&b.result.score)
                .then(a.result.record_id.cmp(&b.result.record_id))
        });
        results.truncate(options.k);

        for (i, combined) in results.iter_mut().enumerate() {
            combined.result.rank = i + 1;
        }

        info!(
            "Combined {} queries with {} into {} results",
            query_vectors.len(),
            method,
            results.len()
        );

        Ok(MultiQueryResponse {
            results,
            method,
            queries_used: query_vectors.len(),
            skipped_queries: Vec::new(),
        })
    }
}
