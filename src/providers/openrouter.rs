//! OpenRouter text backend (OpenAI-compatible chat completions).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ProviderError, Result, SakaiError};

use super::{ChatRequest, TextProvider};

const API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const REQUEST_TIMEOUT_SECS: u64 = 90;

// OpenRouter uses these to attribute traffic to the app.
const REFERER: &str = "http://localhost/sakaibot";
const TITLE: &str = "SakaiBot";

pub struct OpenRouterProvider {
    client: reqwest::Client,
    default_model: String,
}

impl OpenRouterProvider {
    pub fn new(default_model: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("reqwest client"),
            default_model: default_model.to_string(),
        }
    }

    fn extract_text(value: &Value) -> Option<String> {
        let text = value
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()?;
        Some(text.to_string())
    }
}

#[async_trait]
impl TextProvider for OpenRouterProvider {
    async fn complete(&self, request: &ChatRequest, api_key: &str) -> Result<String> {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        debug!(model = %model, "Sending OpenRouter request");
        let response = self
            .client
            .post(API_URL)
            .bearer_auth(api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SakaiError::Provider(ProviderError::Timeout(e.to_string()))
                } else {
                    SakaiError::Http(e)
                }
            })?;

        let status = response.status().as_u16();
        let text = response.text().await?;

        if status != 200 {
            return Err(ProviderError::from_status(status, &text).into());
        }

        let value: Value = serde_json::from_str(&text)?;
        Self::extract_text(&value).ok_or_else(|| {
            SakaiError::Provider(ProviderError::Unknown(
                "OpenRouter response carried no message content".into(),
            ))
        })
    }

    fn name(&self) -> &str {
        "openrouter"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text() {
        let value = json!({
            "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
        });
        assert_eq!(OpenRouterProvider::extract_text(&value).unwrap(), "hi there");
    }

    #[test]
    fn test_extract_text_empty_choices() {
        let value = json!({"choices": []});
        assert!(OpenRouterProvider::extract_text(&value).is_none());
    }

    #[test]
    fn test_provider_identity() {
        let provider = OpenRouterProvider::new("google/gemini-2.5-flash");
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(provider.default_model(), "google/gemini-2.5-flash");
    }
}
