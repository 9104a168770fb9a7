#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;
use crate::index::{IndexConfig, IndexKind};
use crate::search::SearchConfig;

const CONFIG_FILE_NAME: &str = "config.toml";

pub const BATCH_SIZE_RANGE: RangeInclusive<u32> = 1..=1000;
pub const EMBEDDING_DIMENSION_RANGE: RangeInclusive<u32> = 64..=4096;
const MIN_TOKENS_RANGE: RangeInclusive<usize> = 1..=4096;
const MAX_TOKENS_RANGE: RangeInclusive<usize> = 16..=32_768;
const NLIST_RANGE: RangeInclusive<usize> = 1..=65_536;
const HNSW_LINKS_RANGE: RangeInclusive<usize> = 2..=256;
const EF_SEARCH_RANGE: RangeInclusive<usize> = 1..=4096;
const DEFAULT_K_RANGE: RangeInclusive<usize> = 1..=1000;
const SNIPPET_LENGTH_RANGE: RangeInclusive<usize> = 10..=10_000;
const MAX_CONTEXT_WINDOW: usize = 20;
const PROTOCOLS: [&str; 2] = ["http", "https"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No home or data directory available for docqa settings")]
    DirectoryError,
    #[error("Ollama address is not a valid URL: {0}")]
    InvalidUrl(String),
    #[error("Ollama port {0} is out of range (1-65535)")]
    InvalidPort(u16),
    #[error("Embedding batch size {0} is out of range (1-1000)")]
    InvalidBatchSize(u32),
    #[error("Embedding model name is empty: {0:?}")]
    InvalidModel(String),
    #[error("Unsupported Ollama protocol {0:?} (use http or https)")]
    InvalidProtocol(String),
    #[error("Embedding dimension {0} is out of range (64-4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid min tokens: {0} (must be between 1 and 4096)")]
    InvalidMinTokens(usize),
    #[error("Invalid max tokens: {0} (must be between 16 and 32768)")]
    InvalidMaxTokens(usize),
    #[error("Token budget must satisfy min ({min}) < target ({target}) < max ({max})")]
    InvalidTokenBudget {
        min: usize,
        target: usize,
        max: usize,
    },
    #[error("Invalid nlist: {0} (must be between 1 and 65536)")]
    InvalidNlist(usize),
    #[error("Invalid nprobe: {nprobe} (must be between 1 and nlist = {nlist})")]
    InvalidNprobe { nprobe: usize, nlist: usize },
    #[error("Invalid HNSW links per node: {0} (must be between 2 and 256)")]
    InvalidHnswLinks(usize),
    #[error("Invalid ef_search: {0} (must be between 1 and 4096)")]
    InvalidEfSearch(usize),
    #[error("Invalid default k: {0} (must be between 1 and 1000)")]
    InvalidDefaultK(usize),
    #[error("Invalid snippet length: {0} (must be between 10 and 10000)")]
    InvalidSnippetLength(usize),
    #[error("Invalid context window: {0} (must be at most 20)")]
    InvalidContextWindow(usize),
    #[error("Config file IO failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file is not valid TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config could not be written as TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default base directory, `~/.docqa`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".docqa"))
            .or_else(|| dirs::data_dir().map(|data| data.join("docqa")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when
    /// the file does not exist
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let base_dir = config_dir.as_ref().to_path_buf();
        let path = base_dir.join(CONFIG_FILE_NAME);

        let mut config: Self = match fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Cannot parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read {}", path.display()));
            }
        };
        config.base_dir = base_dir;
        config
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;

        Ok(config)
    }

    /// Validate, then write `config.toml` under the base directory
    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate().context("Refusing to save invalid settings")?;

        let base_dir = self.get_base_dir();
        fs::create_dir_all(base_dir)
            .with_context(|| format!("Cannot create {}", base_dir.display()))?;

        let path = self.config_file_path();
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content).with_context(|| format!("Cannot write {}", path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_chunking_config()?;
        self.validate_index_config()?;
        self.validate_search_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !MIN_TOKENS_RANGE.contains(&config.min_tokens) {
            return Err(ConfigError::InvalidMinTokens(config.min_tokens));
        }

        if !MAX_TOKENS_RANGE.contains(&config.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(config.max_tokens));
        }

        if config.min_tokens >= config.target_tokens || config.target_tokens >= config.max_tokens {
            return Err(ConfigError::InvalidTokenBudget {
                min: config.min_tokens,
                target: config.target_tokens,
                max: config.max_tokens,
            });
        }

        Ok(())
    }

    fn validate_index_config(&self) -> Result<(), ConfigError> {
        let config = &self.index;

        // IVF parameters are kept even for flat indexes, so check them regardless
        if !NLIST_RANGE.contains(&config.nlist) {
            return Err(ConfigError::InvalidNlist(config.nlist));
        }

        if config.nprobe == 0 || (config.kind == IndexKind::Ivf && config.nprobe > config.nlist) {
            return Err(ConfigError::InvalidNprobe {
                nprobe: config.nprobe,
                nlist: config.nlist,
            });
        }

        if !HNSW_LINKS_RANGE.contains(&config.m) {
            return Err(ConfigError::InvalidHnswLinks(config.m));
        }

        if !EF_SEARCH_RANGE.contains(&config.ef_search) {
            return Err(ConfigError::InvalidEfSearch(config.ef_search));
        }

        Ok(())
    }

    fn validate_search_config(&self) -> Result<(), ConfigError> {
        let config = &self.search;

        if !DEFAULT_K_RANGE.contains(&config.default_k) {
            return Err(ConfigError::InvalidDefaultK(config.default_k));
        }

        if !SNIPPET_LENGTH_RANGE.contains(&config.snippet_length) {
            return Err(ConfigError::InvalidSnippetLength(config.snippet_length));
        }

        if config.context_window > MAX_CONTEXT_WINDOW {
            return Err(ConfigError::InvalidContextWindow(config.context_window));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Snapshot stem for the vector index; files are written next to it
    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.get_base_dir().join("index").join("docqa")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_protocol(&self.protocol)?;
        self.ollama_url()?;
        check_port(self.port)?;
        check_model(&self.model)?;
        check_batch_size(self.batch_size)?;

        if !EMBEDDING_DIMENSION_RANGE.contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    /// Base URL of the Ollama HTTP API
    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let address = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&address).map_err(|_| ConfigError::InvalidUrl(address))
    }

    #[inline]
    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        check_protocol(&protocol)?;
        self.protocol = protocol;
        Ok(())
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let candidate = Self {
            host: host.clone(),
            ..self.clone()
        };
        candidate.ollama_url()?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        check_port(port)?;
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        check_model(&model)?;
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        check_batch_size(batch_size)?;
        self.batch_size = batch_size;
        Ok(())
    }
}

fn check_protocol(protocol: &str) -> Result<(), ConfigError> {
    if PROTOCOLS.contains(&protocol) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProtocol(protocol.to_string()))
    }
}

fn check_port(port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        Err(ConfigError::InvalidPort(port))
    } else {
        Ok(())
    }
}

fn check_model(model: &str) -> Result<(), ConfigError> {
    if model.trim().is_empty() {
        Err(ConfigError::InvalidModel(model.to_string()))
    } else {
        Ok(())
    }
}

fn check_batch_size(batch_size: u32) -> Result<(), ConfigError> {
    if BATCH_SIZE_RANGE.contains(&batch_size) {
        Ok(())
    } else {
        Err(ConfigError::InvalidBatchSize(batch_size))
    }
}
