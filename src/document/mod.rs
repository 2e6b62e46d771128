//! Document ingestion
//!
//! Converts an input document to markdown text, measures it with a
//! tokenizer and applies the token-budgeted compression policy.

pub mod convert;
pub mod ingest;
pub mod tokenizer;

pub use convert::{CommandConverter, DefaultConverter, DocumentConverter, DocumentFormat, MarkdownConverter};
pub use ingest::{DocumentIngestor, IngestedDocument, TokenBudget};
pub use tokenizer::{Tokenizer, WhitespaceTokenizer};
#[cfg(feature = "hf-tokenizer")]
pub use tokenizer::HfTokenizer;
