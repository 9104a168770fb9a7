use thiserror::Error;

pub const MIN_CHUNK_CHARS: usize = 10;
pub const MIN_CHUNK_WORDS: usize = 5;

/// Why a chunk was kept out of the embedding batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChunkRejection {
    #[error("chunk has {0} characters (minimum {MIN_CHUNK_CHARS})")]
    TooShort(usize),
    #[error("chunk has {0} words (minimum {MIN_CHUNK_WORDS})")]
    TooFewWords(usize),
    #[error("chunk has {tokens} tokens, above the embeddable limit of {limit}")]
    TooManyTokens { tokens: usize, limit: usize },
}

/// Quality gate applied to every chunk before it is returned
#[derive(Debug, Clone, Copy)]
pub struct ChunkValidator {
    max_tokens: usize,
}

impl ChunkValidator {
    #[inline]
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    /// Chunks above this many tokens are treated as unembeddable
    #[inline]
    pub fn token_limit(&self) -> usize {
        self.max_tokens.saturating_mul(2)
    }

    #[inline]
    pub fn validate(
        &self,
        text: &str,
        word_count: usize,
        token_count: usize,
    ) -> Result<(), ChunkRejection> {
        let char_count = text.trim().chars().count();
        if char_count < MIN_CHUNK_CHARS {
            return Err(ChunkRejection::TooShort(char_count));
        }
        if word_count < MIN_CHUNK_WORDS {
            return Err(ChunkRejection::TooFewWords(word_count));
        }
        let limit = self.token_limit();
        if token_count > limit {
            return Err(ChunkRejection::TooManyTokens {
                tokens: token_count,
                limit,
            });
        }
        Ok(())
    }
}
