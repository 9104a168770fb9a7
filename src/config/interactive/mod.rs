
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::settings::EMBEDDING_DIMENSION_RANGE;
use super::{Config, ConfigError, OllamaConfig};
use crate::embeddings::ChunkingConfig;
use crate::embeddings::ollama::OllamaClient;
use crate::index::IndexKind;

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    println!("{}", style("🔧 docqa setup").bold().cyan());
    println!();

    let mut config = load_existing_config(config_dir)?;

    println!("{}", style("Ollama").bold().yellow());
    println!("Chunks are embedded by a local Ollama server.");
    println!();
    configure_ollama(&mut config.ollama)?;

    println!();
    println!("{}", style("Chunking").bold().yellow());
    println!("Token budget used when splitting documents.");
    println!();
    configure_chunking(&mut config.chunking)?;

    println!();
    println!("{}", style("Vector Index").bold().yellow());
    configure_index_kind(&mut config)?;

    println!();
    println!("{}", style("Contacting Ollama...").yellow());

    if test_ollama_connection(&config.ollama) {
        println!("{}", style("✓ Ollama is up and serves the model").green());
    } else {
        println!(
            "{}",
            style("⚠ Ollama is unreachable or the model has not been pulled").yellow()
        );
        println!("Settings can still be saved; ingestion needs Ollama running.");
    }

    println!();
    let save = Confirm::new()
        .with_prompt(format!("Write {}?", config.config_file_path().display()))
        .default(true)
        .interact()?;
    if save {
        config.save().context("Could not write settings")?;
        println!("{}", style("✓ Settings written").green());
    } else {
        println!("Nothing written.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) {
    println!("{}", style("📋 docqa settings").bold().cyan());

    for (section, entries) in config_summary(config) {
        println!();
        println!("{}", style(format!("{section}:")).bold().yellow());
        for (label, value) in entries {
            println!("  {}: {}", label, style(value).cyan());
        }
    }

    println!();
    println!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}

type Section = (&'static str, Vec<(&'static str, String)>);

fn config_summary(config: &Config) -> Vec<Section> {
    let ollama_url = config
        .ollama_url()
        .map_or_else(|e| format!("Invalid ({e})"), |url| url.to_string());

    vec![
        (
            "Ollama Settings",
            vec![
                ("URL", ollama_url),
                ("Model", config.ollama.model.clone()),
                ("Batch Size", config.ollama.batch_size.to_string()),
                (
                    "Embedding Dimension",
                    config.ollama.embedding_dimension.to_string(),
                ),
            ],
        ),
        (
            "Chunking",
            vec![
                ("Min Tokens", config.chunking.min_tokens.to_string()),
                ("Target Tokens", config.chunking.target_tokens.to_string()),
                ("Max Tokens", config.chunking.max_tokens.to_string()),
                (
                    "Tokenizer",
                    config
                        .chunking
                        .exact_tokenizer
                        .as_ref()
                        .map_or_else(|| "word heuristic".to_string(), |p| p.display().to_string()),
                ),
            ],
        ),
        (
            "Index",
            vec![
                ("Kind", config.index.kind.to_string()),
                ("Lists", config.index.nlist.to_string()),
                ("Probes", config.index.nprobe.to_string()),
                ("Graph Links", config.index.m.to_string()),
                ("Search Beam", config.index.ef_search.to_string()),
                ("Path", config.index_path().display().to_string()),
            ],
        ),
        (
            "Search",
            vec![
                ("Default k", config.search.default_k.to_string()),
                ("Snippet Length", config.search.snippet_length.to_string()),
                ("Context Window", config.search.context_window.to_string()),
                ("Deduplicate", config.search.deduplicate.to_string()),
            ],
        ),
    ]
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    let exists = config_dir.join("config.toml").exists();
    let config = Config::load(config_dir)?;
    let note = if exists {
        style("Editing existing settings.").green()
    } else {
        style("No settings file yet, starting from defaults.").yellow()
    };
    eprintln!("{note}");
    Ok(config)
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = ["http", "https"];
    let current = protocols
        .iter()
        .position(|p| *p == ollama.protocol)
        .unwrap_or(0);
    let choice = Select::new()
        .with_prompt("Protocol")
        .items(&protocols)
        .default(current)
        .interact()?;
    let protocol = protocols.get(choice).copied().unwrap_or("http").to_string();

    let host = ask("Host", ollama.host.clone(), |host: &String| {
        let mut probe = ollama.clone();
        probe.set_protocol(protocol.clone())?;
        probe.set_host(host.clone())
    })?;
    let port = ask("Port", ollama.port, |port: &u16| ollama.clone().set_port(*port))?;
    let model = ask("Embedding model", ollama.model.clone(), |model: &String| {
        ollama.clone().set_model(model.clone())
    })?;
    let batch_size = ask("Texts per embedding request", ollama.batch_size, |size: &u32| {
        ollama.clone().set_batch_size(*size)
    })?;
    let dimension = ask(
        "Vector dimension produced by the model",
        ollama.embedding_dimension,
        |dimension: &u32| {
            if EMBEDDING_DIMENSION_RANGE.contains(dimension) {
                Ok(())
            } else {
                Err(ConfigError::InvalidEmbeddingDimension(*dimension))
            }
        },
    )?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_batch_size(batch_size)?;
    ollama.embedding_dimension = dimension;

    Ok(())
}

/// Prompt for a value, re-asking until `check` accepts it
fn ask<T, F>(prompt: &str, default: T, check: F) -> Result<T>
where
    T: Clone + ToString + FromStr,
    <T as FromStr>::Err: ToString,
    F: Fn(&T) -> Result<(), ConfigError>,
{
    let value = Input::<T>::new()
        .with_prompt(prompt)
        .default(default)
        .validate_with(|input: &T| check(input))
        .interact_text()?;
    Ok(value)
}

fn configure_chunking(chunking: &mut ChunkingConfig) -> Result<()> {
    let min_tokens: usize = Input::new()
        .with_prompt("Minimum tokens per chunk")
        .default(chunking.min_tokens)
        .interact_text()?;

    let target_tokens: usize = Input::new()
        .with_prompt("Target tokens per chunk")
        .default(chunking.target_tokens)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input > min_tokens {
                Ok(())
            } else {
                Err("Target must be greater than the minimum")
            }
        })
        .interact_text()?;

    let max_tokens: usize = Input::new()
        .with_prompt("Maximum tokens per chunk")
        .default(chunking.max_tokens)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input > target_tokens {
                Ok(())
            } else {
                Err("Maximum must be greater than the target")
            }
        })
        .interact_text()?;

    chunking.min_tokens = min_tokens;
    chunking.target_tokens = target_tokens;
    chunking.max_tokens = max_tokens;
    Ok(())
}

fn configure_index_kind(config: &mut Config) -> Result<()> {
    let kinds = [IndexKind::Flat, IndexKind::Ivf, IndexKind::Hnsw];
    let labels = &[
        "flat (exact search)",
        "ivf (approximate, faster on large corpora)",
        "hnsw (approximate graph search, no training)",
    ];
    let default_index = kinds
        .iter()
        .position(|&k| k == config.index.kind)
        .unwrap_or(0);

    let selected = Select::new()
        .with_prompt("Index kind")
        .default(default_index)
        .items(labels)
        .interact()?;

    config.index.kind = kinds.get(selected).copied().unwrap_or_default();
    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    OllamaClient::new(ollama)
        .map(|client| {
            client
                .with_timeout(Duration::from_secs(5))
                .with_retry_attempts(1)
        })
        .and_then(|client| client.health_check())
        .is_ok()
}
