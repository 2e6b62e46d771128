//! Generation backends
//!
//! `llm` speaks the wire protocols (OpenAI-compatible chat, Ollama,
//! llama.cpp server); `generation` puts one `GenerationService` interface
//! over them so stage logic never branches on backend identity.

pub mod generation;
pub mod llm;

pub use generation::{build_service, GenerationService, PromptTemplate, ScriptedGenerationService, Variables};
