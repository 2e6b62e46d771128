//! Token counting

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Word runs and single punctuation marks
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+|[^\w\s]").expect("token regex"));

/// Counts tokens in a text
#[cfg_attr(test, mockall::automock)]
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Approximation that counts words and punctuation marks.
///
/// Usually within a few percent of a subword tokenizer on English prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        TOKEN.find_iter(text).count()
    }
}

/// Hugging Face `tokenizer.json` tokenizer
#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenizer {
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            crate::error::PipelineError::InvalidInput(format!(
                "cannot load tokenizer {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl Tokenizer for HfTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        match self.inner.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::warn!("Tokenizer failed ({}), falling back to word count", e);
                WhitespaceTokenizer.count_tokens(text)
            }
        }
    }
}

/// Tokenizer for the configured file, or the approximation
pub fn from_config(config: &crate::config::IngestConfig) -> crate::error::Result<Arc<dyn Tokenizer>> {
    match &config.tokenizer_file {
        #[cfg(feature = "hf-tokenizer")]
        Some(path) => Ok(Arc::new(HfTokenizer::from_file(path)?)),
        #[cfg(not(feature = "hf-tokenizer"))]
        Some(path) => {
            tracing::warn!(
                "Ignoring tokenizer file {:?}: built without the hf-tokenizer feature",
                path
            );
            Ok(Arc::new(WhitespaceTokenizer))
        }
        None => Ok(Arc::new(WhitespaceTokenizer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_words_and_punctuation() {
        let tok = WhitespaceTokenizer;
        assert_eq!(tok.count_tokens(""), 0);
        assert_eq!(tok.count_tokens("hello, world"), 3);
        assert_eq!(tok.count_tokens("  cells\n\ndivide.  "), 3);
    }

    #[test]
    fn test_default_config_uses_approximation() {
        let tok = from_config(&crate::config::IngestConfig::default()).unwrap();
        assert_eq!(tok.count_tokens("one two"), 2);
    }
}
