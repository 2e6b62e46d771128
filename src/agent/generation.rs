//! Generation service abstraction
//!
//! Stage handlers depend only on [`GenerationService`]. Backend choice is
//! made once, in [`build_service`], from configuration.

use async_trait::async_trait;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::agent::llm::{ChatMessage, GenerationClient, ProviderConfig, LLAMA_CPP_BASE_URL, OLLAMA_BASE_URL};
use crate::config::{GenerationBackend, GenerationConfig};
use crate::error::{PipelineError, Result};

/// Named prompt with `{placeholder}` variables.
///
/// `{{` and `}}` render as literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: Cow<'static, str>,
    pub text: Cow<'static, str>,
}

impl PromptTemplate {
    pub const fn new_static(name: &'static str, text: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            text: Cow::Borrowed(text),
        }
    }

    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            text: Cow::Owned(text.into()),
        }
    }

    /// Names of the placeholders the template uses, in order of appearance
    pub fn placeholders(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut chars = self.text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                }
                '{' => {
                    let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                _ => {}
            }
        }
        names
    }

    /// Substitute variables. Every placeholder must be bound.
    pub fn render(&self, vars: &Variables) -> Result<String> {
        let mut out = String::with_capacity(self.text.len());
        let mut chars = self.text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(PipelineError::InvalidInput(format!(
                            "template '{}' has an unclosed placeholder",
                            self.name
                        )));
                    }
                    let value = vars.get(name.trim()).ok_or_else(|| {
                        PipelineError::InvalidInput(format!(
                            "template '{}' needs variable '{}'",
                            self.name, name
                        ))
                    })?;
                    out.push_str(value);
                }
                c => out.push(c),
            }
        }

        Ok(out)
    }
}

/// Variable bindings for a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables(BTreeMap<String, String>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Text generation backend
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Render `template` with `vars` and return the generated text
    async fn generate(&self, template: &PromptTemplate, vars: &Variables) -> Result<String>;

    /// Backend name for logs and error messages
    fn backend_name(&self) -> &str;
}

#[async_trait]
impl<T: GenerationService + ?Sized> GenerationService for Arc<T> {
    async fn generate(&self, template: &PromptTemplate, vars: &Variables) -> Result<String> {
        (**self).generate(template, vars).await
    }

    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }
}

/// Hosted or self-hosted OpenAI-compatible chat API
pub struct OpenAiCompatibleService {
    client: GenerationClient,
    provider: ProviderConfig,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAiCompatibleService {
    pub fn new(provider: ProviderConfig, model: &str) -> Self {
        Self {
            client: GenerationClient::new("openai_compatible"),
            provider,
            model: model.to_string(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    fn with_client(mut self, client: GenerationClient) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl GenerationService for OpenAiCompatibleService {
    async fn generate(&self, template: &PromptTemplate, vars: &Variables) -> Result<String> {
        let prompt = template.render(vars)?;
        debug!("Generating '{}' with {} ({} chars)", template.name, self.model, prompt.len());
        let messages = [ChatMessage::user(prompt)];
        self.client
            .chat_completion(&self.provider, &self.model, &messages, self.max_tokens, self.temperature)
            .await
    }

    fn backend_name(&self) -> &str {
        self.client.backend()
    }
}

/// Local model served by Ollama
pub struct OllamaService {
    client: GenerationClient,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
}

impl OllamaService {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: GenerationClient::new("ollama"),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl GenerationService for OllamaService {
    async fn generate(&self, template: &PromptTemplate, vars: &Variables) -> Result<String> {
        let prompt = template.render(vars)?;
        debug!("Generating '{}' with ollama/{}", template.name, self.model);
        self.client
            .ollama_generate(&self.base_url, &self.model, &prompt, self.max_tokens)
            .await
    }

    fn backend_name(&self) -> &str {
        self.client.backend()
    }
}

/// Self-hosted llama.cpp server
pub struct LlamaCppService {
    client: GenerationClient,
    base_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl LlamaCppService {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: GenerationClient::new("llama_cpp"),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl GenerationService for LlamaCppService {
    async fn generate(&self, template: &PromptTemplate, vars: &Variables) -> Result<String> {
        let prompt = template.render(vars)?;
        debug!("Generating '{}' with llama.cpp at {}", template.name, self.base_url);
        self.client
            .llama_cpp_completion(&self.base_url, &prompt, self.max_tokens, self.temperature)
            .await
    }

    fn backend_name(&self) -> &str {
        self.client.backend()
    }
}

/// Build the configured backend
pub fn build_service(config: &GenerationConfig) -> Result<Arc<dyn GenerationService>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    info!("Using {:?} generation backend with model {}", config.backend, config.model);

    let service: Arc<dyn GenerationService> = match config.backend {
        GenerationBackend::OpenAiCompatible => {
            let api_key = config.api_key().unwrap_or_default();
            let provider = match config.provider.as_str() {
                "openrouter" => ProviderConfig::openrouter(api_key),
                "nvidia_nim" | "nvidia" => ProviderConfig::nvidia_nim(api_key),
                "google" | "google_genai" => ProviderConfig::google(api_key),
                "custom" => {
                    let base_url = config.base_url.as_deref().ok_or_else(|| {
                        PipelineError::InvalidInput("custom provider requires generation.base_url".to_string())
                    })?;
                    ProviderConfig::custom(base_url, api_key)
                }
                other => {
                    return Err(PipelineError::InvalidInput(format!("unknown provider: {}", other)));
                }
            };
            let provider = match (&config.base_url, config.provider.as_str()) {
                (Some(url), p) if p != "custom" => ProviderConfig { base_url: url.trim_end_matches('/').to_string(), ..provider },
                _ => provider,
            };
            let mut service = OpenAiCompatibleService::new(provider, &config.model)
                .with_client(GenerationClient::with_timeout("openai_compatible", timeout))
                .with_max_tokens(config.max_tokens);
            if let Some(t) = config.temperature {
                service = service.with_temperature(t);
            }
            Arc::new(service)
        }
        GenerationBackend::Ollama => {
            let base_url = config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL);
            let mut service = OllamaService::new(base_url, &config.model).with_max_tokens(config.max_tokens);
            service.client = GenerationClient::with_timeout("ollama", timeout);
            Arc::new(service)
        }
        GenerationBackend::LlamaCpp => {
            let base_url = config.base_url.as_deref().unwrap_or(LLAMA_CPP_BASE_URL);
            let mut service = LlamaCppService::new(base_url).with_max_tokens(config.max_tokens);
            service.client = GenerationClient::with_timeout("llama_cpp", timeout);
            service.temperature = config.temperature;
            Arc::new(service)
        }
    };

    Ok(service)
}

/// Deterministic service that answers from a table keyed by template name.
///
/// Useful for offline dry runs and for exercising stage logic without a
/// live model. Unknown templates produce a `Backend` error. Every rendered
/// prompt is recorded.
#[derive(Default)]
pub struct ScriptedGenerationService {
    responses: BTreeMap<String, String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, template_name: &str, response: impl Into<String>) -> Self {
        self.responses.insert(template_name.to_string(), response.into());
        self
    }

    /// `(template name, rendered prompt)` for each call so far
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, template_name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(name, _)| name == template_name)
            .count()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerationService {
    async fn generate(&self, template: &PromptTemplate, vars: &Variables) -> Result<String> {
        let prompt = template.render(vars)?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((template.name.to_string(), prompt));
        }
        self.responses
            .get(template.name.as_ref())
            .cloned()
            .ok_or_else(|| {
                PipelineError::backend(
                    "generation",
                    format!("no scripted response for '{}'", template.name),
                )
            })
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}
