//! Token-budgeted document ingestion
//!
//! - at most `low` tokens: text returned unchanged
//! - at most `high` tokens: one compression pass through the generation service
//! - above `high`: rejected with `DocumentTooLarge`

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::convert::DocumentConverter;
use super::tokenizer::Tokenizer;
use crate::agent::generation::{GenerationService, Variables};
use crate::config::IngestConfig;
use crate::error::{PipelineError, Result};
use crate::extract;
use crate::materials::prompts;

const STAGE: &str = "document_ingest";

/// Token thresholds for the three-tier policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub low: usize,
    pub high: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self { low: 2000, high: 5000 }
    }
}

impl From<&IngestConfig> for TokenBudget {
    fn from(config: &IngestConfig) -> Self {
        Self {
            low: config.low_tokens,
            high: config.high_tokens,
        }
    }
}

/// Result of ingesting one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedDocument {
    pub text: String,
    /// Token count before any compression
    pub original_tokens: usize,
    pub compressed: bool,
}

pub struct DocumentIngestor {
    converter: Arc<dyn DocumentConverter>,
    tokenizer: Arc<dyn Tokenizer>,
    service: Arc<dyn GenerationService>,
    budget: TokenBudget,
}

impl DocumentIngestor {
    pub fn new(
        converter: Arc<dyn DocumentConverter>,
        tokenizer: Arc<dyn Tokenizer>,
        service: Arc<dyn GenerationService>,
    ) -> Self {
        Self {
            converter,
            tokenizer,
            service,
            budget: TokenBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    /// Convert a document file and apply the token policy
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestedDocument> {
        let text = self.converter.convert(path).await?;
        self.ingest_text(&text).await
    }

    /// Apply the token policy to already-converted text
    pub async fn ingest_text(&self, text: &str) -> Result<IngestedDocument> {
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidInput("document contains no text".into()));
        }

        let tokens = self.tokenizer.count_tokens(text);
        if tokens <= self.budget.low {
            info!("Document has {} tokens, keeping as is", tokens);
            return Ok(IngestedDocument {
                text: text.to_string(),
                original_tokens: tokens,
                compressed: false,
            });
        }
        if tokens > self.budget.high {
            warn!("Document has {} tokens, limit is {}", tokens, self.budget.high);
            return Err(PipelineError::DocumentTooLarge(tokens));
        }

        info!("Document has {} tokens, compressing", tokens);
        let vars = Variables::new().with("document", text);
        let output = self
            .service
            .generate(&prompts::DOCUMENT_COMPRESSION, &vars)
            .await
            .map_err(|e| e.with_stage(STAGE))?;

        let compressed = extract::markdown_or_raw(&output);
        if compressed.is_empty() {
            return Err(PipelineError::ExtractionEmpty { stage: STAGE.to_string() });
        }
        info!(
            "Compressed document to {} tokens",
            self.tokenizer.count_tokens(&compressed)
        );

        Ok(IngestedDocument {
            text: compressed,
            original_tokens: tokens,
            compressed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::generation::{PromptTemplate, ScriptedGenerationService};
    use crate::document::convert::MarkdownConverter;
    use crate::document::tokenizer::MockTokenizer;

    fn ingestor(count: usize, service: Arc<ScriptedGenerationService>) -> DocumentIngestor {
        let mut tokenizer = MockTokenizer::new();
        tokenizer.expect_count_tokens().returning(move |_| count);
        DocumentIngestor::new(Arc::new(MarkdownConverter), Arc::new(tokenizer), service)
    }

    fn compressing_service() -> Arc<ScriptedGenerationService> {
        Arc::new(
            ScriptedGenerationService::new()
                .respond("document_compression", "```markdown\n# Short notes\n```"),
        )
    }

    #[tokio::test]
    async fn test_at_low_threshold_unchanged() {
        let service = compressing_service();
        let doc = ingestor(2000, service.clone()).ingest_text("original text").await.unwrap();
        assert_eq!(doc.text, "original text");
        assert!(!doc.compressed);
        assert_eq!(service.call_count("document_compression"), 0);
    }

    #[tokio::test]
    async fn test_above_low_threshold_compresses_once() {
        let service = compressing_service();
        let doc = ingestor(2001, service.clone()).ingest_text("original text").await.unwrap();
        assert_eq!(doc.text, "# Short notes");
        assert!(doc.compressed);
        assert_eq!(doc.original_tokens, 2001);
        assert_eq!(service.call_count("document_compression"), 1);
    }

    #[tokio::test]
    async fn test_at_high_threshold_compresses() {
        let service = compressing_service();
        let doc = ingestor(5000, service.clone()).ingest_text("text").await.unwrap();
        assert!(doc.compressed);
    }

    #[tokio::test]
    async fn test_above_high_threshold_rejected() {
        let service = compressing_service();
        let err = ingestor(5001, service.clone()).ingest_text("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::DocumentTooLarge(5001)));
        assert_eq!(service.call_count("document_compression"), 0);
    }

    #[tokio::test]
    async fn test_empty_compression_is_extraction_empty() {
        let service = Arc::new(ScriptedGenerationService::new().respond("document_compression", "  \n"));
        let err = ingestor(3000, service).ingest_text("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionEmpty { ref stage } if stage == "document_ingest"));
    }

    #[tokio::test]
    async fn test_backend_error_tagged_with_ingest() {
        let service = Arc::new(ScriptedGenerationService::new());
        let err = ingestor(3000, service).ingest_text("text").await.unwrap_err();
        assert_eq!(err.stage(), Some("document_ingest"));
    }

    struct OfflineService;

    #[async_trait::async_trait]
    impl GenerationService for OfflineService {
        async fn generate(&self, _template: &PromptTemplate, _vars: &Variables) -> Result<String> {
            Err(PipelineError::unavailable("ollama", "connection refused"))
        }

        fn backend_name(&self) -> &str {
            "ollama"
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_tagged_with_ingest() {
        let mut tokenizer = MockTokenizer::new();
        tokenizer.expect_count_tokens().returning(|_| 3000);
        let ingestor = DocumentIngestor::new(Arc::new(MarkdownConverter), Arc::new(tokenizer), Arc::new(OfflineService));

        let err = ingestor.ingest_text("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
        assert_eq!(err.stage(), Some("document_ingest"));
    }

    #[tokio::test]
    async fn test_ingest_file_reads_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "Mitosis has four phases.").unwrap();

        let doc = ingestor(10, compressing_service()).ingest_file(&path).await.unwrap();
        assert_eq!(doc.text, "Mitosis has four phases.");
    }

    #[tokio::test]
    async fn test_blank_document_rejected() {
        let err = ingestor(0, compressing_service()).ingest_text(" \n ").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
