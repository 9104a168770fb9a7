use super::*;
use crate::embeddings::{Embedder, EmbeddingBatch};
use crate::index::ChunkMetadata;
use chrono::TimeZone;
use std::collections::HashMap;

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn texts(prefix: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{prefix} section {i} describes the policy terms"))
        .collect()
}

/// Doc "A" (pdf): six chunks at distance 0.0..0.5 from the origin.
/// Doc "B" (docx): three chunks just over distance 1.0.
fn fixture() -> VectorIndex {
    let mut index = VectorIndex::flat(2).expect("should create index");
    let a: Vec<Vec<f32>> = (0..6).map(|i| vec![0.0, i as f32 * 0.1]).collect();
    let b: Vec<Vec<f32>> = (0..3).map(|i| vec![1.0, i as f32 * 0.1]).collect();
    index
        .add_document_embeddings_at(&a, "/docs/a.pdf", "pdf", &texts("A", 6), Some("A"), at(2024, 1, 1))
        .expect("should add A");
    index
        .add_document_embeddings_at(&b, "/docs/b.docx", "docx", &texts("B", 3), Some("B"), at(2024, 6, 1))
        .expect("should add B");
    index
}

fn options(k: usize) -> SearchOptions {
    SearchOptions::new(k)
}

#[test]
fn empty_index_returns_message_not_error() {
    let index = VectorIndex::flat(2).expect("should create index");
    let response = SearchCoordinator::new(&index)
        .search(&[0.0, 0.0], &options(5))
        .expect("empty search should succeed");

    assert!(response.results.is_empty());
    assert_eq!(response.message.as_deref(), Some(NO_DOCUMENTS_MESSAGE));
}

#[test]
fn fully_removed_index_counts_as_empty() {
    let mut index = fixture();
    index.remove_document("A");
    index.remove_document("B");

    let response = SearchCoordinator::new(&index)
        .search(&[0.0, 0.0], &options(5))
        .expect("search should succeed");

    assert!(response.results.is_empty());
    assert_eq!(response.message.as_deref(), Some(NO_DOCUMENTS_MESSAGE));
    assert_eq!(response.analytics.index_size, 9);
}

#[test]
fn deduplication_keeps_one_chunk_per_bucket() {
    let index = fixture();
    let response = SearchCoordinator::new(&index)
        .search(&[0.0, 0.0], &options(10))
        .expect("search should succeed");

    let picked: Vec<(String, Option<usize>)> = response
        .results
        .iter()
        .map(|r| (r.doc_id.clone(), r.chunk_index()))
        .collect();
    assert_eq!(
        picked,
        vec![
            ("A".to_string(), Some(0)),
            ("A".to_string(), Some(3)),
            ("B".to_string(), Some(0)),
        ]
    );
    assert_eq!(response.analytics.initial_candidates, 9);
    assert_eq!(response.analytics.filtered_results, 3);

    let mut buckets = HashSet::new();
    for result in &response.results {
        let bucket = result.chunk_index().unwrap_or_default() / 3;
        assert!(buckets.insert((result.doc_id.clone(), bucket)));
    }
}

#[test]
fn deduplication_can_be_disabled() {
    let index = fixture();
    let response = SearchCoordinator::new(&index)
        .search(&[0.0, 0.0], &options(10).with_deduplicate(false))
        .expect("search should succeed");

    assert_eq!(response.results.len(), 9);
    assert!(
        response
            .results
            .windows(2)
            .all(|w| w[0].score <= w[1].score)
    );
}

#[test]
fn doc_type_filter_is_case_insensitive() {
    let index = fixture();
    let search = options(10)
        .with_deduplicate(false)
        .with_doc_types(vec!["PDF".to_string()]);

    let response = SearchCoordinator::new(&index)
        .search(&[1.0, 0.0], &search)
        .expect("search should succeed");

    assert_eq!(response.results.len(), 6);
    assert!(response.results.iter().all(|r| r.doc_id == "A"));
}

#[test]
fn doc_id_filter_is_respected() {
    let index = fixture();
    let search = options(10).with_doc_ids(vec!["B".to_string()]);

    let response = SearchCoordinator::new(&index)
        .search(&[0.0, 0.0], &search)
        .expect("search should succeed");

    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|r| r.doc_id == "B"));
}

#[test]
fn min_score_threshold_drops_near_copies() {
    let index = fixture();
    let search = SearchOptions {
        min_score_threshold: Some(0.25),
        ..options(10).with_deduplicate(false)
    };

    let response = SearchCoordinator::new(&index)
        .search(&[0.0, 0.0], &search)
        .expect("search should succeed");

    assert_eq!(response.results.len(), 6);
    assert!(response.results.iter().all(|r| r.score >= 0.25));
    assert_eq!(response.results[0].rank, 1);
}

#[test]
fn results_truncate_to_k() {
    let index = fixture();
    let response = SearchCoordinator::new(&index)
        .search(&[0.0, 0.0], &options(2).with_deduplicate(false))
        .expect("search should succeed");

    assert_eq!(response.results.len(), 2);
    assert_eq!(response.analytics.initial_candidates, 6);
}

#[test]
fn recency_boost_favours_newer_documents() {
    let mut index = VectorIndex::flat(2).expect("should create index");
    index
        .add_document_embeddings_at(&[vec![0.0, 0.50]], "old.txt", "txt", &texts("old", 1), Some("old"), at(2024, 1, 1))
        .expect("should add");
    index
        .add_document_embeddings_at(&[vec![0.0, 0.52]], "new.txt", "txt", &texts("new", 1), Some("new"), at(2024, 6, 1))
        .expect("should add");
    let coordinator = SearchCoordinator::new(&index);

    let plain = coordinator
        .search(&[0.0, 0.0], &options(5))
        .expect("search should succeed");
    assert_eq!(plain.results[0].doc_id, "old");

    let boosted = coordinator
        .search(
            &[0.0, 0.0],
            &options(5).with_recency_boost(Some(at(2024, 6, 1))),
        )
        .expect("search should succeed");
    assert_eq!(boosted.results[0].doc_id, "new");
    assert_eq!(boosted.results[0].rank, 1);
    assert_eq!(boosted.results[1].rank, 2);
    assert!((boosted.results[0].score - 0.468).abs() < 1e-4);
}

#[test]
fn unparsable_timestamps_are_not_boosted() {
    let meta = |created_at: &str| ChunkMetadata {
        doc_id: created_at.to_string(),
        file_path: "f".to_string(),
        file_type: "txt".to_string(),
        chunk_index: 0,
        chunk_text: "text".to_string(),
        total_chunks_in_document: 1,
        created_at: created_at.to_string(),
        extra: BTreeMap::new(),
    };
    let mut results = vec![
        SearchResult::new(0, 0.5, &meta("yesterday")),
        SearchResult::new(1, 0.6, &meta("2024-06-01T00:00:00+00:00")),
    ];

    apply_recency_boost(&mut results, at(2024, 6, 1));

    assert_eq!(results[0].score, 0.5);
    assert!((results[1].score - 0.54).abs() < 1e-5);
}

#[test]
fn recency_counts_whole_days() {
    let meta = ChunkMetadata {
        doc_id: "d".to_string(),
        file_path: "f".to_string(),
        file_type: "txt".to_string(),
        chunk_index: 0,
        chunk_text: "text".to_string(),
        total_chunks_in_document: 1,
        created_at: at(2024, 6, 1).to_rfc3339(),
        extra: BTreeMap::new(),
    };
    let half_day_later = at(2024, 6, 1) + chrono::Duration::hours(12);
    let mut results = vec![SearchResult::new(0, 1.0, &meta)];

    apply_recency_boost(&mut results, half_day_later);

    assert!((results[0].score - 0.9).abs() < 1e-6);
}

#[test]
fn future_timestamps_are_clamped() {
    let meta = ChunkMetadata {
        doc_id: "d".to_string(),
        file_path: "f".to_string(),
        file_type: "txt".to_string(),
        chunk_index: 0,
        chunk_text: "text".to_string(),
        total_chunks_in_document: 1,
        created_at: at(2030, 1, 1).to_rfc3339(),
        extra: BTreeMap::new(),
    };
    let mut results = vec![SearchResult::new(0, 1.0, &meta)];

    apply_recency_boost(&mut results, at(2024, 1, 1));

    assert!((results[0].score - 0.9).abs() < 1e-6);
}

#[test]
fn snippets_and_metadata_stripping() {
    let mut index = VectorIndex::flat(2).expect("should create index");
    let long_text = "coverage ".repeat(40);
    index
        .add_document_embeddings(&[vec![0.0, 0.0]], "long.txt", "txt", &[long_text.clone()], Some("long"))
        .expect("should add");

    let search = SearchOptions {
        include_metadata: false,
        snippet_length: 20,
        ..options(3)
    };
    let response = SearchCoordinator::new(&index)
        .search(&[0.0, 0.0], &search)
        .expect("search should succeed");

    let result = &response.results[0];
    assert!(result.metadata.is_none());
    assert_eq!(result.chunk_text, long_text);
    assert_eq!(result.snippet.as_deref(), Some("coverage coverage..."));
}

#[test]
fn snippet_truncation() {
    assert_eq!(snippet("short", 200), "short");
    let text = "x".repeat(250);
    let cut = snippet(&text, 200);
    assert_eq!(cut.chars().count(), 200);
    assert!(cut.ends_with("..."));
    assert_eq!(snippet("héllo wörld", 8), "héllo...");
}

#[test]
fn relevance_distribution_counts_final_results() {
    let index = fixture();
    let response = SearchCoordinator::new(&index)
        .search(&[0.0, 0.0], &options(10).with_deduplicate(false))
        .expect("search should succeed");

    let distribution = &response.analytics.relevance_distribution;
    assert_eq!(distribution.get(&RelevanceCategory::High), Some(&3));
    assert_eq!(distribution.get(&RelevanceCategory::Medium), Some(&3));
    assert_eq!(distribution.get(&RelevanceCategory::VeryLow), Some(&3));
    assert_eq!(response.analytics.total_documents, 2);
    assert_eq!(response.analytics.index_size, 9);
}

/// Embedder backed by a fixed lookup table
struct TableEmbedder(HashMap<String, Vec<f32>>);

impl TableEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }
}

impl Embedder for TableEmbedder {
    fn embed(&self, texts: &[String]) -> anyhow::Result<EmbeddingBatch> {
        let vectors = texts
            .iter()
            .map(|t| {
                self.0
                    .get(t)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no embedding for '{t}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(EmbeddingBatch {
            dimension: vectors.first().map_or(0, Vec::len),
            token_usage: texts.len(),
            vectors,
        })
    }
}

fn two_point_index() -> VectorIndex {
    let mut index = VectorIndex::flat(1).expect("should create index");
    index
        .add_document_embeddings(&[vec![0.0]], "x.txt", "txt", &texts("X", 1), Some("X"))
        .expect("should add X");
    index
        .add_document_embeddings(&[vec![1.0]], "z.txt", "txt", &texts("Z", 1), Some("Z"))
        .expect("should add Z");
    index
}

fn queries(values: &[&str]) -> Vec<String> {
    values.iter().map(|q| (*q).to_string()).collect()
}

#[test]
fn max_combination_keeps_best_distance() {
    let index = two_point_index();
    let embedder = TableEmbedder::new(&[("first", vec![0.2]), ("second", vec![0.4])]);
    let aggregator = MultiQueryAggregator::new(SearchCoordinator::new(&index), &embedder);

    let response = aggregator
        .combine(&queries(&["first", "second"]), &options(5), CombinationMethod::Max)
        .expect("combine should succeed");

    let top = &response.results[0];
    assert_eq!(top.result.doc_id, "X");
    assert!((top.result.score - 0.2).abs() < 1e-6);
    assert_eq!(top.query_count, 2);
    assert_eq!(top.individual_scores.len(), 2);
    assert!((top.individual_scores[1] - 0.4).abs() < 1e-6);
    assert_eq!(top.result.rank, 1);
    assert_eq!(response.results[1].result.doc_id, "Z");
    assert!((response.results[1].result.score - 0.6).abs() < 1e-6);
    assert_eq!(response.queries_used, 2);
}

#[test]
fn combination_methods() {
    let scores = [0.2, 0.4];
    assert!((CombinationMethod::Average.combine(&scores) - 0.3).abs() < 1e-6);
    assert!((CombinationMethod::Max.combine(&scores) - 0.2).abs() < 1e-6);
    assert!((CombinationMethod::Min.combine(&scores) - 0.4).abs() < 1e-6);
    assert!((CombinationMethod::Weighted.combine(&scores) - 0.4 / 1.5).abs() < 1e-6);
    assert_eq!("weighted".parse::<CombinationMethod>(), Ok(CombinationMethod::Weighted));
    assert!("median".parse::<CombinationMethod>().is_err());
}

#[test]
fn failed_query_embeddings_are_skipped() {
    let index = two_point_index();
    let embedder = TableEmbedder::new(&[("known", vec![0.1])]);
    let aggregator = MultiQueryAggregator::new(SearchCoordinator::new(&index), &embedder);

    let response = aggregator
        .combine(&queries(&["known", "unknown"]), &options(5), CombinationMethod::Average)
        .expect("combine should succeed");

    assert_eq!(response.queries_used, 1);
    assert_eq!(response.skipped_queries, vec!["unknown".to_string()]);
    assert!(response.results.iter().all(|r| r.query_count == 1));
}

#[test]
fn empty_query_list_is_an_error() {
    let index = two_point_index();
    let embedder = TableEmbedder::new(&[]);
    let aggregator = MultiQueryAggregator::new(SearchCoordinator::new(&index), &embedder);

    assert!(matches!(
        aggregator.combine(&[], &options(5), CombinationMethod::Max),
        Err(crate::DocsError::Search(_))
    ));
    assert!(matches!(
        aggregator.combine(&queries(&["missing"]), &options(5), CombinationMethod::Max),
        Err(crate::DocsError::Embedding(_))
    ));
}

#[test]
fn expand_selects_window_around_hit() {
    let index = fixture();
    let coordinator = SearchCoordinator::new(&index);
    let hit = coordinator
        .search(&[0.0, 0.1], &options(1))
        .expect("search should succeed")
        .results
        .remove(0);
    assert_eq!(hit.chunk_index(), Some(1));

    let expanded = ContextExpander::new(coordinator).expand(&hit, 2);

    let positions: Vec<isize> = expanded
        .context_chunks
        .iter()
        .map(|c| c.context_position)
        .collect();
    assert_eq!(positions, vec![-1, 0, 1, 2]);
    let matches: Vec<bool> = expanded.context_chunks.iter().map(|c| c.is_match).collect();
    assert_eq!(matches, vec![false, true, false, false]);
    assert_eq!(
        expanded.context_text,
        texts("A", 4).join(" ")
    );
}

#[test]
fn expand_clips_at_document_end() {
    let index = fixture();
    let coordinator = SearchCoordinator::new(&index);
    let hit = coordinator
        .search(&[0.0, 0.5], &options(1))
        .expect("search should succeed")
        .results
        .remove(0);

    let expanded = ContextExpander::new(coordinator).expand(&hit, 2);

    let indices: Vec<usize> = expanded
        .context_chunks
        .iter()
        .map(|c| c.chunk_index)
        .collect();
    assert_eq!(indices, vec![3, 4, 5]);
}

#[test]
fn search_with_context_expands_every_hit() {
    let index = fixture();
    let expander = ContextExpander::new(SearchCoordinator::new(&index));

    let response = expander
        .search_with_context(&[0.0, 0.0], &options(3), 1)
        .expect("search should succeed");

    assert_eq!(response.results.len(), 3);
    assert_eq!(response.context_window, 1);
    for expanded in &response.results {
        assert_eq!(
            expanded.context_chunks.iter().filter(|c| c.is_match).count(),
            1
        );
        assert!(expanded.context_text.contains(&expanded.result.chunk_text));
    }
}
