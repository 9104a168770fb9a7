use std::fmt::Debug;

/// Ratio of model tokens to whitespace-separated words for English prose
pub const TOKENS_PER_WORD: f64 = 1.3;

/// Counts model tokens for a piece of text.
///
/// Every budgeting decision made by the chunker goes through one estimator,
/// so swapping the implementation never changes the splitting logic itself.
pub trait TokenEstimator: Send + Sync + Debug {
    /// Number of tokens the embedding model is expected to see for `text`
    fn estimate(&self, text: &str) -> usize;

    /// Short identifier recorded in chunk metadata
    fn name(&self) -> &'static str;
}

/// Approximates tokens as `round(words * 1.3)`
#[derive(Debug, Clone, Copy, Default)]
pub struct WordHeuristic;

impl TokenEstimator for WordHeuristic {
    #[inline]
    fn estimate(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * TOKENS_PER_WORD).round() as usize
    }

    #[inline]
    fn name(&self) -> &'static str {
        "word_heuristic"
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenizerEstimator;

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use std::fmt;
    use std::path::Path;

    use anyhow::{Result, anyhow};
    use tokenizers::Tokenizer;
    use tracing::{debug, warn};

    use super::{TokenEstimator, WordHeuristic};

    /// Exact token counts from a Hugging Face `tokenizer.json`
    pub struct HfTokenizerEstimator {
        tokenizer: Tokenizer,
    }

    impl HfTokenizerEstimator {
        #[inline]
        pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
            let path = path.as_ref();
            let tokenizer = Tokenizer::from_file(path)
                .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;
            debug!("Loaded exact tokenizer from {}", path.display());
            Ok(Self { tokenizer })
        }
    }

    impl fmt::Debug for HfTokenizerEstimator {
        #[inline]
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("HfTokenizerEstimator").finish_non_exhaustive()
        }
    }

    impl TokenEstimator for HfTokenizerEstimator {
        #[inline]
        fn estimate(&self, text: &str) -> usize {
            if text.is_empty() {
                return 0;
            }
            match self.tokenizer.encode(text, false) {
                Ok(encoding) => encoding.get_ids().len(),
                Err(e) => {
                    warn!("Tokenizer failed ({}), falling back to word heuristic", e);
                    WordHeuristic.estimate(text)
                }
            }
        }

        #[inline]
        fn name(&self) -> &'static str {
            "hf_tokenizer"
        }
    }
}
