
use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{Config, get_config_dir};
use crate::embeddings::{Embedder, OllamaClient, TextChunker};
use crate::index::vector_store::snapshot_exists;
use crate::index::{IndexKind, SearchResult, VectorIndex, shared};
use crate::indexer::{Indexer, read_source};
use crate::search::{
    CombinationMethod, ContextExpander, MultiQueryAggregator, NO_DOCUMENTS_MESSAGE,
    SearchCoordinator, SearchOptions, snippet,
};

/// Search flags collected from the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub k: Option<usize>,
    pub doc_types: Vec<String>,
    pub doc_ids: Vec<String>,
    pub boost_recent: bool,
    pub no_dedup: bool,
    pub min_score: Option<f32>,
    /// Neighbouring chunks to show around each hit
    pub context: Option<usize>,
}

impl SearchRequest {
    /// Merge command line flags over the configured search defaults
    #[inline]
    pub fn options(&self, config: &Config) -> SearchOptions {
        let mut options = SearchOptions::from_config(&config.search);
        if let Some(k) = self.k {
            options.k = k;
        }
        if !self.doc_types.is_empty() {
            options = options.with_doc_types(self.doc_types.clone());
        }
        if !self.doc_ids.is_empty() {
            options = options.with_doc_ids(self.doc_ids.clone());
        }
        if self.boost_recent {
            options = options.with_recency_boost(None);
        }
        if self.no_dedup {
            options = options.with_deduplicate(false);
        }
        options.min_score_threshold = self.min_score;
        options
    }
}

#[inline]
pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir()?;
    Config::load(&config_dir)
}

/// Load the persisted index, or start an empty one from the configuration
#[inline]
pub fn open_index(config: &Config) -> Result<VectorIndex> {
    let path = config.index_path();
    if snapshot_exists(&path) {
        let index = VectorIndex::load(&path)
            .with_context(|| format!("Failed to load index from {}", path.display()))?;
        let expected = config.ollama.embedding_dimension as usize;
        if index.dimension() != expected {
            warn!(
                "Stored index has dimension {} but the configured model produces {}",
                index.dimension(),
                expected
            );
        }
        return Ok(index);
    }

    info!("No index at {}, creating a new one", path.display());
    Ok(VectorIndex::new(
        config.ollama.embedding_dimension as usize,
        config.index.clone(),
    )?)
}

fn embedder(config: &Config) -> Result<OllamaClient> {
    OllamaClient::new(&config.ollama).context("Failed to create Ollama client")
}

/// Show how a file would be split, without embedding anything
#[inline]
pub fn chunk_file(path: &Path) -> Result<()> {
    let config = load_config()?;
    let chunker = TextChunker::from_config(&config.chunking)?;
    let document = read_source(path)?;
    let outcome = chunker.chunk(&document.text, &document.file_path);

    println!(
        "{} ({}, {} tokens via {})",
        style(&document.file_path).bold(),
        document.file_type,
        outcome.source_tokens,
        chunker.estimator_name()
    );
    println!(
        "Chunks: {} ({} tokens)  Excluded: {}  Oversized: {}  Over target: {}",
        outcome.chunks.len(),
        outcome.total_tokens(),
        outcome.excluded,
        outcome.oversized,
        outcome.over_target
    );
    println!();

    for chunk in &outcome.chunks {
        println!(
            "  #{} {} tokens, {} words",
            chunk.chunk_id,
            style(chunk.token_count).cyan(),
            chunk.word_count
        );
        println!("     {}", snippet(&chunk.text, 120));
    }

    Ok(())
}

/// Chunk, embed and index files, then persist the index
#[inline]
pub fn ingest_files(paths: &[PathBuf], doc_id: Option<&str>) -> Result<()> {
    if paths.is_empty() {
        bail!("No files given to ingest");
    }

    let config = load_config()?;
    let chunker = TextChunker::from_config(&config.chunking)?;
    let client = embedder(&config)?;
    client
        .health_check()
        .context("Ollama is not reachable; start it or run 'docqa config'")?;

    let index = shared(open_index(&config)?);
    let indexer = Indexer::new(chunker, client, index);

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(paths.len() as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Indexing {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };

    let report = indexer.ingest_paths(paths, doc_id, |outcome| {
        bar.set_message(outcome.file_path.clone());
        bar.inc(1);
    });
    bar.finish_and_clear();

    for outcome in &report.documents {
        match (&outcome.doc_id, &outcome.error) {
            (Some(doc_id), None) => println!(
                "{} {} -> {} ({} chunks, {} excluded)",
                style("✓").green(),
                outcome.file_path,
                style(doc_id).cyan(),
                outcome.chunks_indexed,
                outcome.chunks_excluded
            ),
            (_, Some(error)) => {
                println!("{} {}: {}", style("✗").red(), outcome.file_path, error);
            }
            (None, None) => println!("  {}", outcome.file_path),
        }
    }

    if report.succeeded() > 0 {
        indexer.index().read().save(&config.index_path())?;
    }

    println!();
    println!(
        "Indexed {} of {} files ({} chunks)",
        report.succeeded(),
        report.documents.len(),
        report.chunks_indexed()
    );

    if report.succeeded() == 0 {
        bail!("No documents were indexed");
    }
    Ok(())
}

/// Embed a query and print ranked results
#[inline]
pub fn search(query: &str, request: &SearchRequest) -> Result<()> {
    let config = load_config()?;
    let index = open_index(&config)?;
    let options = request.options(&config);
    let coordinator = SearchCoordinator::new(&index);

    if index.get_stats().total_chunks == 0 {
        println!("{}", NO_DOCUMENTS_MESSAGE);
        return Ok(());
    }

    let client = embedder(&config)?;
    let vector = client
        .embed_query(query)
        .context("Failed to embed query")?;

    if let Some(window) = request.context {
        let response =
            ContextExpander::new(coordinator).search_with_context(&vector, &options, window)?;
        if let Some(message) = &response.message {
            println!("{message}");
        }
        for expanded in &response.results {
            print_result(&expanded.result);
            for chunk in &expanded.context_chunks {
                let marker = if chunk.is_match { ">" } else { " " };
                println!(
                    "     {} [{:+}] {}",
                    marker,
                    chunk.context_position,
                    snippet(&chunk.chunk_text, options.snippet_length)
                );
            }
        }
        println!();
        println!(
            "{} results in {:.1}ms",
            response.results.len(),
            response.analytics.search_time_ms
        );
        return Ok(());
    }

    let response = coordinator.search(&vector, &options)?;
    if let Some(message) = &response.message {
        println!("{message}");
    }
    for result in &response.results {
        print_result(result);
    }

    println!();
    println!(
        "{} results from {} candidates in {:.1}ms",
        response.results.len(),
        response.analytics.initial_candidates,
        response.analytics.search_time_ms
    );
    let distribution: Vec<String> = response
        .analytics
        .relevance_distribution
        .iter()
        .map(|(category, count)| format!("{category}: {count}"))
        .collect();
    if !distribution.is_empty() {
        println!("Relevance: {}", distribution.join(", "));
    }

    Ok(())
}

/// Run several phrasings of a question and merge their scores
#[inline]
pub fn multi_search(
    queries: &[String],
    method: CombinationMethod,
    request: &SearchRequest,
) -> Result<()> {
    let config = load_config()?;
    let index = open_index(&config)?;
    let options = request.options(&config);
    let client = embedder(&config)?;

    let aggregator = MultiQueryAggregator::new(SearchCoordinator::new(&index), &client);
    let response = aggregator.combine(queries, &options, method)?;

    for skipped in &response.skipped_queries {
        println!("{} skipped query: {}", style("⚠").yellow(), skipped);
    }
    for combined in &response.results {
        print_result(&combined.result);
        let scores: Vec<String> = combined
            .individual_scores
            .iter()
            .map(|s| format!("{s:.3}"))
            .collect();
        println!(
            "     matched {}/{} queries: [{}]",
            combined.query_count,
            response.queries_used,
            scores.join(", ")
        );
    }

    println!();
    println!(
        "{} results combined with {} across {} queries",
        response.results.len(),
        response.method,
        response.queries_used
    );
    Ok(())
}

/// Remove a document and persist the index
#[inline]
pub fn remove_document(doc_id: &str) -> Result<()> {
    let config = load_config()?;
    let path = config.index_path();
    if !snapshot_exists(&path) {
        bail!("No index found at {}", path.display());
    }

    let mut index = VectorIndex::load(&path)?;
    if !index.remove_document(doc_id) {
        bail!("Document not found: {}", doc_id);
    }
    index.save(&path)?;

    println!("{} Removed document {}", style("✓").green(), doc_id);
    Ok(())
}

/// Print index statistics and the indexed documents
#[inline]
pub fn show_stats() -> Result<()> {
    let config = load_config()?;
    let index = open_index(&config)?;
    let stats = index.get_stats();

    println!("{}", style("📊 Index Statistics").bold().cyan());
    println!("  Kind: {}", stats.index_kind);
    println!("  Dimension: {}", stats.dimension);
    println!("  Vectors: {}", stats.total_vectors);
    println!("  Documents: {}", stats.total_documents);
    println!("  Chunks: {}", stats.total_chunks);
    if stats.orphaned_vectors > 0 {
        println!("  Orphaned vectors: {}", stats.orphaned_vectors);
    }
    if stats.index_kind == IndexKind::Ivf {
        let training = match (stats.is_trained, stats.synthetic_training) {
            (false, _) => "untrained",
            (true, true) => "trained on synthetic data",
            (true, false) => "trained",
        };
        println!("  Training: {}", training);
    }
    if let Some(levels) = stats.graph_levels {
        println!("  Graph layers: {}", levels);
    }

    let documents = index.documents();
    if documents.is_empty() {
        println!();
        println!("No documents have been indexed yet.");
        println!("Use 'docqa ingest <files>' to add some.");
        return Ok(());
    }

    println!();
    for document in &documents {
        println!("📄 {} ({})", style(&document.doc_id).cyan(), document.file_type);
        println!("   Path: {}", document.file_path);
        println!("   Chunks: {}", document.total_chunks);
        println!("   Added: {}", document.created_at);
    }

    Ok(())
}

fn print_result(result: &SearchResult) {
    let text = result.snippet.as_deref().unwrap_or(&result.chunk_text);
    let source = result
        .metadata
        .as_ref()
        .map_or_else(
            || result.doc_id.clone(),
            |m| format!("{} #{}", m.file_path, m.chunk_index),
        );
    println!(
        "{}. {} {} [{}]",
        result.rank,
        style(format!("{:.4}", result.score)).cyan(),
        source,
        result.relevance_category
    );
    println!("   {}", text);
}
