//! Code generation - turns a task description into CAD source text
//!
//! The orchestrator talks to generators only through [`CodeGenerator`], so the
//! network-backed [`OllamaGenerator`] and test stubs are interchangeable.
//!
//! Contract: an ordinary generation failure (the model replied with nothing
//! usable) is `Ok(None)`. Only transport-level faults are `Err`, and those
//! abort the run.

pub mod ollama;
pub mod prompt;

use async_trait::async_trait;

pub use ollama::{ChatMessage, OllamaGenerator};
pub use prompt::{compose_corrective_prompt, strip_code_fences, DEFAULT_SYSTEM_PROMPT};

/// One call into a generator
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Full prompt text; the corrective prompt on retries
    pub prompt: &'a str,
    /// Model identifier understood by the backend
    pub model: &'a str,
    /// Error of the most recent attempt that produced code
    pub prior_error: Option<&'a str>,
    /// Code of the most recent attempt that produced code
    pub prior_code: Option<&'a str>,
    /// 1-based attempt number
    pub attempt: usize,
}

impl<'a> GenerationRequest<'a> {
    pub fn first(prompt: &'a str, model: &'a str) -> Self {
        Self {
            prompt,
            model,
            prior_error: None,
            prior_code: None,
            attempt: 1,
        }
    }

    pub fn is_correction(&self) -> bool {
        self.prior_error.is_some()
    }
}

/// Transport-level generator failure
#[derive(Debug)]
pub enum GeneratorError {
    Request(reqwest::Error),
    Parse(serde_json::Error),
    /// Backend answered with a non-success HTTP status
    Http { status: u16, body: String },
}

impl std::fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratorError::Request(e) => write!(f, "Request error: {}", e),
            GeneratorError::Parse(e) => write!(f, "Parse error: {}", e),
            GeneratorError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
        }
    }
}

impl std::error::Error for GeneratorError {}

impl From<reqwest::Error> for GeneratorError {
    fn from(e: reqwest::Error) -> Self {
        GeneratorError::Request(e)
    }
}

impl From<serde_json::Error> for GeneratorError {
    fn from(e: serde_json::Error) -> Self {
        GeneratorError::Parse(e)
    }
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Produce source text for `request`, or `None` when the model returned nothing usable
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Option<String>, GeneratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_is_not_a_correction() {
        let request = GenerationRequest::first("a cube", "qwen2.5-coder");
        assert_eq!(request.attempt, 1);
        assert!(!request.is_correction());

        let retry = GenerationRequest {
            prior_error: Some("geometry volume is zero"),
            prior_code: Some("result = box(1, 0, 1)"),
            attempt: 2,
            ..request
        };
        assert!(retry.is_correction());
    }
}
