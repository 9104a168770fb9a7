
pub mod estimator;
pub mod validation;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::Result;
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use estimator::{TokenEstimator, WordHeuristic};
pub use validation::{ChunkRejection, ChunkValidator};

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));

static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<=[.!?])\s+(?=[A-Z])").expect("valid regex"));

const SAFE_DELIMITERS: [char; 8] = [' ', '.', '!', '?', ';', ':', '\n', '\t'];

/// Fraction of the computed character budget used when cutting by characters
const CHARACTER_SAFETY_MARGIN: f64 = 0.9;

/// Separator inserted between merged fragments
const MERGE_SEPARATOR: &str = "\n\n";

/// A contiguous, bounded slice of a source document's text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Trimmed chunk text
    pub text: String,
    /// Sequence number within the source
    pub chunk_id: usize,
    /// Identifier of the originating document
    pub source_id: String,
    pub word_count: usize,
    pub char_count: usize,
    pub token_count: usize,
    /// Passed the quality gate
    pub is_valid: bool,
    /// Open key/value details such as the splitting method used
    pub metadata: BTreeMap<String, String>,
}

/// Token budget for chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Fragments below this size are merged with their neighbours
    pub min_tokens: usize,
    /// Hard upper bound for a chunk
    pub max_tokens: usize,
    /// Preferred chunk size when accumulating paragraphs
    pub target_tokens: usize,
    /// Optional `tokenizer.json` for exact token counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_tokenizer: Option<PathBuf>,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            min_tokens: 100,
            max_tokens: 2000,
            target_tokens: 1000,
            exact_tokenizer: None,
        }
    }
}

/// Which level of the splitter produced a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMethod {
    Paragraph,
    Sentence,
    Character,
    Merged,
}

impl SplitMethod {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Sentence => "sentence",
            Self::Character => "character",
            Self::Merged => "merged",
        }
    }
}

/// A raw piece of text before validation and numbering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub text: String,
    pub tokens: usize,
    pub method: SplitMethod,
}

/// Result of chunking one source text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkingOutcome {
    /// Valid chunks in source order
    pub chunks: Vec<Chunk>,
    /// Pieces rejected by the validator
    pub excluded: usize,
    /// Valid chunks still above `max_tokens`
    pub oversized: usize,
    /// Valid chunks above `target_tokens`
    pub over_target: usize,
    /// Token estimate of the whole source text
    pub source_tokens: usize,
}

impl ChunkingOutcome {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn total_tokens(&self) -> usize {
        self.chunks.iter().map(|c| c.token_count).sum()
    }

    #[inline]
    pub fn texts(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.text.clone()).collect()
    }
}

/// Recursive, token-budgeted text splitter.
///
/// Splitting runs in four levels, each only reached when the previous one
/// could not satisfy the budget:
/// 1. paragraphs (blank-line boundaries)
/// 2. sentences, greedily accumulated up to `max_tokens`
/// 3. character cuts at the nearest safe delimiter
/// 4. merging of small neighbouring fragments
#[derive(Debug)]
pub struct TextChunker {
    config: ChunkingConfig,
    estimator: Box<dyn TokenEstimator>,
    validator: ChunkValidator,
}

impl TextChunker {
    /// Chunker using the word-count heuristic
    #[inline]
    pub fn new(config: ChunkingConfig) -> Self {
        Self::with_estimator(config, Box::new(WordHeuristic))
    }

    #[inline]
    pub fn with_estimator(config: ChunkingConfig, estimator: Box<dyn TokenEstimator>) -> Self {
        let validator = ChunkValidator::new(config.max_tokens);
        Self {
            config,
            estimator,
            validator,
        }
    }

    /// Build a chunker from configuration, loading the exact tokenizer if one
    /// is configured
    #[inline]
    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        let Some(path) = config.exact_tokenizer.as_ref() else {
            return Ok(Self::new(config.clone()));
        };

        #[cfg(feature = "hf-tokenizer")]
        {
            let estimator = estimator::HfTokenizerEstimator::from_file(path)?;
            Ok(Self::with_estimator(config.clone(), Box::new(estimator)))
        }

        #[cfg(not(feature = "hf-tokenizer"))]
        {
            warn!(
                "Exact tokenizer {} configured but the hf-tokenizer feature is disabled; using word heuristic",
                path.display()
            );
            Ok(Self::new(config.clone()))
        }
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    #[inline]
    pub fn estimator_name(&self) -> &'static str {
        self.estimator.name()
    }

    #[inline]
    pub fn estimate_tokens(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    /// Chunk `text` into validated chunks tagged with `source_id`
    #[inline]
    pub fn chunk(&self, text: &str, source_id: &str) -> ChunkingOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            debug!("Empty text for source '{}', nothing to chunk", source_id);
            return ChunkingOutcome::default();
        }

        let source_tokens = self.estimate_tokens(trimmed);
        let pieces = self.split(trimmed);

        let mut outcome = ChunkingOutcome {
            source_tokens,
            ..ChunkingOutcome::default()
        };

        for piece in pieces {
            let text = piece.text.trim().to_string();
            let word_count = text.split_whitespace().count();
            let token_count = self.estimate_tokens(&text);

            if let Err(reason) = self.validator.validate(&text, word_count, token_count) {
                debug!("Excluding chunk from '{}': {}", source_id, reason);
                outcome.excluded += 1;
                continue;
            }

            let mut metadata = BTreeMap::new();
            metadata.insert(
                "splitting_method".to_string(),
                piece.method.as_str().to_string(),
            );
            metadata.insert("source_tokens".to_string(), source_tokens.to_string());
            metadata.insert(
                "token_estimator".to_string(),
                self.estimator.name().to_string(),
            );

            if token_count > self.config.max_tokens {
                warn!(
                    "Chunk {} of '{}' has {} tokens, above the {} token budget",
                    outcome.chunks.len(),
                    source_id,
                    token_count,
                    self.config.max_tokens
                );
                metadata.insert("oversized".to_string(), "true".to_string());
                outcome.oversized += 1;
            }
            if token_count > self.config.target_tokens {
                outcome.over_target += 1;
            }

            outcome.chunks.push(Chunk {
                char_count: text.chars().count(),
                text,
                chunk_id: outcome.chunks.len(),
                source_id: source_id.to_string(),
                word_count,
                token_count,
                is_valid: true,
                metadata,
            });
        }

        info!(
            "Chunked '{}': ~{} tokens into {} chunks ({} excluded, {} over target)",
            source_id,
            source_tokens,
            outcome.chunks.len(),
            outcome.excluded,
            outcome.over_target
        );

        outcome
    }

    /// Split text into pieces that respect the token budget, without
    /// validation or numbering
    #[inline]
    pub fn split(&self, text: &str) -> Vec<Piece> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        for paragraph in split_paragraphs(text) {
            let tokens = self.estimate_tokens(paragraph);
            if tokens <= self.config.max_tokens {
                pieces.push(Piece {
                    text: paragraph.to_string(),
                    tokens,
                    method: SplitMethod::Paragraph,
                });
            } else {
                debug!(
                    "Paragraph with {} tokens exceeds budget of {}, splitting by sentences",
                    tokens, self.config.max_tokens
                );
                self.split_by_sentences(paragraph, &mut pieces);
            }
        }

        let merged = self.merge_small_fragments(pieces);

        for piece in merged.iter().filter(|p| p.tokens > self.config.max_tokens) {
            warn!(
                "Indivisible span of {} tokens remains above the {} token budget",
                piece.tokens, self.config.max_tokens
            );
        }

        merged
    }

    fn split_by_sentences(&self, paragraph: &str, pieces: &mut Vec<Piece>) {
        let mut current = String::new();

        for sentence in split_sentences(paragraph) {
            let candidate = if current.is_empty() {
                sentence.to_string()
            } else {
                format!("{} {}", current, sentence)
            };

            if self.estimate_tokens(&candidate) <= self.config.max_tokens {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                pieces.push(Piece {
                    tokens: self.estimate_tokens(&current),
                    text: std::mem::take(&mut current),
                    method: SplitMethod::Sentence,
                });
            }

            let sentence_tokens = self.estimate_tokens(sentence);
            if sentence_tokens > self.config.max_tokens {
                debug!(
                    "Single sentence with {} tokens, falling back to character splitting",
                    sentence_tokens
                );
                self.split_by_characters(sentence, pieces);
            } else {
                current = sentence.to_string();
            }
        }

        if !current.is_empty() {
            pieces.push(Piece {
                tokens: self.estimate_tokens(&current),
                text: current,
                method: SplitMethod::Sentence,
            });
        }
    }

    /// Last resort: cut at safe delimiters near a computed character length,
    /// recursing into any cut that is still over budget
    fn split_by_characters(&self, text: &str, pieces: &mut Vec<Piece>) {
        let tokens = self.estimate_tokens(text);
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let len = chars.len();

        if tokens <= self.config.max_tokens || len < 2 {
            if tokens > self.config.max_tokens {
                warn!(
                    "Cannot split {}-character span with {} tokens any further",
                    len, tokens
                );
            }
            pieces.push(Piece {
                text: text.to_string(),
                tokens,
                method: SplitMethod::Character,
            });
            return;
        }

        let chars_per_token = len as f64 / tokens.max(1) as f64;
        let target_chars = ((self.config.max_tokens as f64
            * chars_per_token
            * CHARACTER_SAFETY_MARGIN) as usize)
            .clamp(1, len - 1);

        let byte_at = |index: usize| chars.get(index).map_or(text.len(), |(byte, _)| *byte);

        let mut start = 0;
        while start < len {
            let end = (start + target_chars).min(len);
            let split_at = if end >= len {
                len
            } else {
                let floor = start + target_chars / 2;
                ((floor + 1)..end)
                    .rev()
                    .find(|&i| SAFE_DELIMITERS.contains(&chars[i].1))
                    .map_or(end, |i| i + 1)
            };

            let segment = text.get(byte_at(start)..byte_at(split_at)).unwrap_or_default();
            let segment = segment.trim();
            if !segment.is_empty() {
                let segment_tokens = self.estimate_tokens(segment);
                if segment_tokens > self.config.max_tokens {
                    self.split_by_characters(segment, pieces);
                } else {
                    pieces.push(Piece {
                        text: segment.to_string(),
                        tokens: segment_tokens,
                        method: SplitMethod::Character,
                    });
                }
            }

            start = split_at;
        }
    }

    /// Combine neighbouring fragments: greedily up to `target_tokens`, and up
    /// to `max_tokens` when either side is below `min_tokens`
    fn merge_small_fragments(&self, pieces: Vec<Piece>) -> Vec<Piece> {
        let mut merged: Vec<Piece> = Vec::with_capacity(pieces.len());

        for piece in pieces {
            if let Some(last) = merged.last_mut() {
                let combined_text = format!("{}{}{}", last.text, MERGE_SEPARATOR, piece.text);
                let combined_tokens = self.estimate_tokens(&combined_text);
                let has_small_side =
                    last.tokens < self.config.min_tokens || piece.tokens < self.config.min_tokens;

                if combined_tokens <= self.config.target_tokens
                    || (has_small_side && combined_tokens <= self.config.max_tokens)
                {
                    last.text = combined_text;
                    last.tokens = combined_tokens;
                    last.method = SplitMethod::Merged;
                    continue;
                }
            }
            merged.push(piece);
        }

        merged
    }
}

/// Split on blank-line boundaries, dropping empty paragraphs
fn split_paragraphs(text: &str) -> Vec<&str> {
    split_on(&PARAGRAPH_BREAK, text)
}

/// Split on sentence-ending punctuation followed by whitespace and a capital
fn split_sentences(text: &str) -> Vec<&str> {
    split_on(&SENTENCE_BOUNDARY, text)
}

fn split_on<'t>(pattern: &Regex, text: &'t str) -> Vec<&'t str> {
    let mut parts = Vec::new();
    let mut last = 0;

    for found in pattern.find_iter(text) {
        match found {
            Ok(m) => {
                parts.push(text.get(last..m.start()).unwrap_or_default());
                last = m.end();
            }
            Err(e) => {
                warn!("Boundary detection failed ({}), keeping remaining text whole", e);
                break;
            }
        }
    }
    parts.push(text.get(last..).unwrap_or_default());

    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Estimate tokens with the default word heuristic
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    WordHeuristic.estimate(text)
}
