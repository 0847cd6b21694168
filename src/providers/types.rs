//! Text-provider capability consumed by the dispatcher.

use async_trait::async_trait;

use crate::error::Result;

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(model: &str, system: &str, user: &str) -> Self {
        Self {
            model: model.to_string(),
            system: system.to_string(),
            user: user.to_string(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A text LLM backend. Credentials arrive per call so the key pool can
/// rotate them without rebuilding the provider.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Run one completion and return the response text.
    async fn complete(&self, request: &ChatRequest, api_key: &str) -> Result<String>;

    /// Provider name for logs and `/status`.
    fn name(&self) -> &str;

    /// Model used when the request does not specify one.
    fn default_model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_builder() {
        let req = ChatRequest::new("m", "sys", "hello")
            .with_max_tokens(128)
            .with_temperature(0.2);
        assert_eq!(req.model, "m");
        assert_eq!(req.max_tokens, 128);
        assert_eq!(req.temperature, 0.2);
    }

    #[test]
    fn test_chat_request_defaults() {
        let req = ChatRequest::new("m", "s", "u");
        assert_eq!(req.max_tokens, 4096);
        assert_eq!(req.temperature, 0.7);
    }
}
