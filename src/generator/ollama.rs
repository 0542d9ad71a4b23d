//! Ollama Chat API generator
//!
//! Posts a non-streaming request to `/api/chat` with temperature 0 and takes
//! the assistant message as the generated program.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt::{strip_code_fences, DEFAULT_SYSTEM_PROMPT};
use super::{CodeGenerator, GenerationRequest, GeneratorError};

/// A message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant"
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub eval_count: u32,
}

/// Generator backed by an Ollama server
#[derive(Clone)]
pub struct OllamaGenerator {
    base_url: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Request body for one generation call
    pub fn request_body(&self, request: &GenerationRequest<'_>) -> serde_json::Value {
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(request.prompt),
        ];
        serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": 0.0
            }
        })
    }
}

#[async_trait]
impl CodeGenerator for OllamaGenerator {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Option<String>, GeneratorError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let body = self.request_body(&request);

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(GeneratorError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            debug!(model = request.model, "empty response body");
            return Ok(None);
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        debug!(
            model = request.model,
            attempt = request.attempt,
            correction = request.is_correction(),
            eval_count = chat_response.eval_count,
            "generation completed"
        );

        let code = strip_code_fences(&chat_response.message.content);
        Ok(if code.is_empty() { None } else { Some(code) })
    }
}
