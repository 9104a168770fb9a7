use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use docqa::Result;
use docqa::commands::{
    SearchRequest, chunk_file, ingest_files, multi_search, remove_document, search, show_stats,
};
use docqa::config::{get_config_dir, run_interactive_config, show_config};
use docqa::search::CombinationMethod;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Chunk, embed and search local documents for question answering")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection, chunking and index settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Show how a file would be chunked
    Chunk {
        /// Text file to split
        file: PathBuf,
    },
    /// Chunk, embed and index files
    Ingest {
        /// Text files to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Append every file to this document instead of creating new ones
        #[arg(long)]
        doc_id: Option<String>,
    },
    /// Search indexed documents
    Search {
        /// Question or phrase to search for
        query: String,
        #[command(flatten)]
        filters: SearchFlags,
        /// Show this many neighbouring chunks around each hit
        #[arg(long)]
        context: Option<usize>,
    },
    /// Search with several phrasings and combine the scores
    MultiSearch {
        /// Queries to run
        #[arg(required = true)]
        queries: Vec<String>,
        /// How per-query scores are combined: average, max, min or weighted
        #[arg(long, default_value = "average")]
        method: CombinationMethod,
        #[command(flatten)]
        filters: SearchFlags,
    },
    /// Remove a document from the index
    Remove {
        /// Document ID to remove
        doc_id: String,
    },
    /// Show index statistics
    Stats,
}

#[derive(Args)]
struct SearchFlags {
    /// Number of results to return
    #[arg(short)]
    k: Option<usize>,
    /// Only return chunks from files of this type
    #[arg(long = "doc-type")]
    doc_types: Vec<String>,
    /// Only return chunks from this document
    #[arg(long = "doc-id")]
    doc_ids: Vec<String>,
    /// Favour recently indexed documents
    #[arg(long)]
    boost_recent: bool,
    /// Keep near-duplicate chunks from the same document
    #[arg(long)]
    no_dedup: bool,
    /// Drop results scoring below this value
    #[arg(long)]
    min_score: Option<f32>,
}

impl SearchFlags {
    fn into_request(self, context: Option<usize>) -> SearchRequest {
        SearchRequest {
            k: self.k,
            doc_types: self.doc_types,
            doc_ids: self.doc_ids,
            boost_recent: self.boost_recent,
            no_dedup: self.no_dedup,
            min_score: self.min_score,
            context,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            let config_dir = get_config_dir()?;
            if show {
                show_config(&docqa::config::Config::load(&config_dir)?);
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Chunk { file } => {
            chunk_file(&file)?;
        }
        Commands::Ingest { files, doc_id } => {
            ingest_files(&files, doc_id.as_deref())?;
        }
        Commands::Search {
            query,
            filters,
            context,
        } => {
            search(&query, &filters.into_request(context))?;
        }
        Commands::MultiSearch {
            queries,
            method,
            filters,
        } => {
            multi_search(&queries, method, &filters.into_request(None))?;
        }
        Commands::Remove { doc_id } => {
            remove_document(&doc_id)?;
        }
        Commands::Stats => {
            show_stats()?;
        }
    }

    Ok(())
}
