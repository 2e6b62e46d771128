//! Document format conversion
//!
//! Markdown is read directly. PDF and DOCX go through an external
//! converter command whose stdout is the markdown text.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Accepted input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Markdown,
    Docx,
}

impl DocumentFormat {
    /// Format implied by the file extension, case-insensitive
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "md" => Ok(Self::Markdown),
            "docx" => Ok(Self::Docx),
            _ => Err(PipelineError::UnsupportedDocument(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
            )),
        }
    }
}

/// Converts a document file to markdown text
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, path: &Path) -> Result<String>;
}

/// Reads `.md` files as they are
#[derive(Debug, Default, Clone)]
pub struct MarkdownConverter;

#[async_trait]
impl DocumentConverter for MarkdownConverter {
    async fn convert(&self, path: &Path) -> Result<String> {
        if DocumentFormat::from_path(path)? != DocumentFormat::Markdown {
            return Err(PipelineError::UnsupportedDocument(path.display().to_string()));
        }
        let text = tokio::fs::read_to_string(path).await?;
        debug!("Read {} chars of markdown from {:?}", text.len(), path);
        Ok(text)
    }
}

/// Runs an external converter, `{input}` in the arguments is replaced by
/// the document path
#[derive(Debug, Clone)]
pub struct CommandConverter {
    command: Vec<String>,
}

impl CommandConverter {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn build_args(&self, path: &Path) -> Result<(String, Vec<String>)> {
        let (program, rest) = self
            .command
            .split_first()
            .ok_or_else(|| PipelineError::InvalidInput("converter command is empty".into()))?;

        let input = path.display().to_string();
        let mut args: Vec<String> = rest.iter().map(|a| a.replace("{input}", &input)).collect();
        if !self.command.iter().any(|a| a.contains("{input}")) {
            args.push(input);
        }
        Ok((program.clone(), args))
    }
}

impl Default for CommandConverter {
    fn default() -> Self {
        Self::new(vec!["markitdown".to_string(), "{input}".to_string()])
    }
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    async fn convert(&self, path: &Path) -> Result<String> {
        DocumentFormat::from_path(path)?;
        let (program, args) = self.build_args(path)?;
        info!("Converting {:?} with {}", path, program);

        let output = tokio::process::Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PipelineError::unavailable(&program, e))?;

        if !output.status.success() {
            return Err(PipelineError::backend(
                "document_convert",
                format!("{} failed: {}", program, String::from_utf8_lossy(&output.stderr).trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Markdown read directly, everything else through the command converter
#[derive(Debug, Clone, Default)]
pub struct DefaultConverter {
    markdown: MarkdownConverter,
    command: CommandConverter,
}

impl DefaultConverter {
    pub fn new(command: CommandConverter) -> Self {
        Self {
            markdown: MarkdownConverter,
            command,
        }
    }
}

#[async_trait]
impl DocumentConverter for DefaultConverter {
    async fn convert(&self, path: &Path) -> Result<String> {
        match DocumentFormat::from_path(path)? {
            DocumentFormat::Markdown => self.markdown.convert(path).await,
            DocumentFormat::Pdf | DocumentFormat::Docx => self.command.convert(path).await,
        }
    }
}
