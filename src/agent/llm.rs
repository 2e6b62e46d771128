//! HTTP clients for generation backends
//!
//! Three wire shapes are spoken here:
//! - OpenAI-compatible `/chat/completions` (hosted APIs, NVIDIA NIM, Gemini's
//!   OpenAI endpoint)
//! - Ollama `/api/generate`
//! - llama.cpp server `/completion`
//!
//! Every response is reduced to plain text by [`normalize_response`] so
//! callers never branch on which backend answered.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const NVIDIA_NIM_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";
const GOOGLE_OPENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const LLAMA_CPP_BASE_URL: &str = "http://localhost:8080";

// ============ Provider Configuration ============

/// Configuration for an OpenAI-compatible provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL for the API (e.g., "https://openrouter.ai/api/v1")
    pub base_url: String,
    /// API key for authentication (empty for unauthenticated local servers)
    pub api_key: String,
    /// Extra headers to include in requests (e.g., X-Title, HTTP-Referer)
    pub extra_headers: Vec<(String, String)>,
}

impl ProviderConfig {
    /// Create an OpenRouter provider configuration
    pub fn openrouter(api_key: String) -> Self {
        Self {
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key,
            extra_headers: vec![("X-Title".to_string(), "Recall Coach".to_string())],
        }
    }

    /// Create an NVIDIA NIM provider configuration
    pub fn nvidia_nim(api_key: String) -> Self {
        Self {
            base_url: NVIDIA_NIM_BASE_URL.to_string(),
            api_key,
            extra_headers: Vec::new(),
        }
    }

    /// Google Gemini through its OpenAI-compatible endpoint
    pub fn google(api_key: String) -> Self {
        Self {
            base_url: GOOGLE_OPENAI_BASE_URL.to_string(),
            api_key,
            extra_headers: Vec::new(),
        }
    }

    /// Any OpenAI-compatible server at a custom URL
    pub fn custom(base_url: &str, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            extra_headers: Vec::new(),
        }
    }
}

// ============ Chat messages ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    /// String or array of content parts, depending on the model
    #[serde(default)]
    pub content: Option<Value>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(Value::String(content.into())),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(Value::String(content.into())),
        }
    }

    /// Extract content as plain text, handling both string and array-of-content-parts formats.
    /// Some models return content as `"hello"`, others as `[{"type":"text","text":"hello"}]`.
    pub fn content_as_text(&self) -> Option<String> {
        self.content.as_ref().and_then(content_to_text)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Value>,
}

#[derive(Debug, Serialize)]
struct LlamaCppRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

fn content_to_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let texts: Vec<String> = parts
                .iter()
                .filter_map(|part| {
                    if part.get("type").and_then(|t| t.as_str()) == Some("text") {
                        part.get("text").and_then(|t| t.as_str()).map(|s| s.to_string())
                    } else {
                        part.as_str().map(|s| s.to_string())
                    }
                })
                .collect();
            if texts.is_empty() { None } else { Some(texts.join("")) }
        }
        Value::Null => None,
        // Some models return content as a number or other type: stringify it
        other => Some(other.to_string()),
    }
}

/// Reduce any known backend response shape to plain text.
///
/// Accepts a bare JSON string, chat-completions `choices[0].message.content`
/// (string or parts), legacy `choices[0].text`, or a wrapper object with a
/// `response`, `content`, `text` or `output` field.
pub fn normalize_response(raw: &Value) -> Option<String> {
    if let Value::String(s) = raw {
        return Some(s.clone());
    }

    if let Some(choice) = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
    {
        if let Some(content) = choice.get("message").and_then(|m| m.get("content")) {
            return content_to_text(content);
        }
        if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
            return Some(text.to_string());
        }
    }

    ["response", "content", "text", "output"]
        .iter()
        .find_map(|field| raw.get(field))
        .and_then(content_to_text)
}

/// Shared HTTP plumbing for all backends
#[derive(Clone)]
pub struct GenerationClient {
    client: Arc<Client>,
    backend: String,
}

impl GenerationClient {
    pub fn new(backend: &str) -> Self {
        Self {
            client: Arc::new(Client::new()),
            backend: backend.to_string(),
        }
    }

    pub fn with_timeout(backend: &str, timeout: std::time::Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self {
            client: Arc::new(client),
            backend: backend.to_string(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// POST a JSON body and return the parsed JSON response.
    ///
    /// Connection failures become `BackendUnavailable`; non-2xx statuses
    /// and unparsable bodies become `Backend` errors carrying the raw text.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer: Option<&str>,
        headers: &[(String, String)],
        body: &B,
    ) -> Result<Value> {
        let mut req_builder = self.client.post(url);
        if let Some(key) = bearer.filter(|k| !k.is_empty()) {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", key));
        }
        for (key, value) in headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }

        let response = req_builder
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(&self.backend, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PipelineError::backend("generation", format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(PipelineError::backend(
                "generation",
                format!("{} API error ({}): {}", self.backend, status, text),
            ));
        }

        debug!("{} responded with {} bytes", self.backend, text.len());

        serde_json::from_str(&text).map_err(|e| {
            PipelineError::backend(
                "generation",
                format!("failed to parse JSON response: {} (body: {})", e, truncate_chars(&text, 500)),
            )
        })
    }

    /// OpenAI-compatible chat completion
    pub async fn chat_completion(
        &self,
        provider: &ProviderConfig,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<String> {
        let request = ChatRequest {
            model,
            messages,
            max_tokens,
            temperature,
        };
        let url = format!("{}/chat/completions", provider.base_url);
        let raw = self
            .post_json(&url, Some(&provider.api_key), &provider.extra_headers, &request)
            .await?;
        Ok(normalize_response(&raw).unwrap_or_default())
    }

    /// Ollama non-streaming generation
    pub async fn ollama_generate(
        &self,
        base_url: &str,
        model: &str,
        prompt: &str,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let request = OllamaRequest {
            model,
            prompt,
            stream: false,
            options: max_tokens.map(|n| serde_json::json!({ "num_predict": n })),
        };
        let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
        let raw = self.post_json(&url, None, &[], &request).await?;
        Ok(normalize_response(&raw).unwrap_or_default())
    }

    /// llama.cpp server completion
    pub async fn llama_cpp_completion(
        &self,
        base_url: &str,
        prompt: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<String> {
        let request = LlamaCppRequest {
            prompt,
            n_predict: max_tokens,
            temperature,
        };
        let url = format!("{}/completion", base_url.trim_end_matches('/'));
        let raw = self.post_json(&url, None, &[], &request).await?;
        Ok(normalize_response(&raw).unwrap_or_default())
    }
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_message_creation() {
        let msg = ChatMessage::user("Hello");
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content_as_text().as_deref(), Some("Hello"));
        assert_eq!(ChatMessage::system("x").role, "system");
    }

    #[test]
    fn test_content_as_text_array() {
        let msg = ChatMessage {
            role: "assistant".to_string(),
            content: Some(json!([
                {"type": "text", "text": "Hello "},
                {"type": "image_url", "image_url": {"url": "x"}},
                {"type": "text", "text": "world"}
            ])),
        };
        assert_eq!(msg.content_as_text().as_deref(), Some("Hello world"));
    }

    #[test]
    fn test_content_as_text_null() {
        let msg = ChatMessage {
            role: "assistant".to_string(),
            content: Some(Value::Null),
        };
        assert!(msg.content_as_text().is_none());
    }

    #[test]
    fn test_normalize_chat_completion() {
        let raw = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(normalize_response(&raw).as_deref(), Some("hi"));
    }

    #[test]
    fn test_normalize_chat_completion_parts() {
        let raw = json!({"choices": [{"message": {"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}}]});
        assert_eq!(normalize_response(&raw).as_deref(), Some("ab"));
    }

    #[test]
    fn test_normalize_wrapped_payloads() {
        assert_eq!(normalize_response(&json!({"response": "ollama"})).as_deref(), Some("ollama"));
        assert_eq!(normalize_response(&json!({"content": "llama"})).as_deref(), Some("llama"));
        assert_eq!(normalize_response(&json!({"choices": [{"text": "legacy"}]})).as_deref(), Some("legacy"));
        assert_eq!(normalize_response(&json!("plain")).as_deref(), Some("plain"));
        assert_eq!(normalize_response(&json!({"unexpected": 1})), None);
    }

    #[test]
    fn test_provider_custom_trims_slash() {
        let provider = ProviderConfig::custom("http://localhost:8000/v1/", String::new());
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
        assert!(ProviderConfig::openrouter("k".into()).base_url.contains("openrouter"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let client = GenerationClient::with_timeout("ollama", std::time::Duration::from_millis(500));
        let err = client
            .ollama_generate("http://127.0.0.1:9", "m", "p", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
    }
}
