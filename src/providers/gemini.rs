//! Google Gemini text backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ProviderError, Result, SakaiError};

use super::{ChatRequest, TextProvider};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT_SECS: u64 = 90;

pub struct GeminiProvider {
    client: reqwest::Client,
    default_model: String,
}

impl GeminiProvider {
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
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .get(0)?
            .get("text")?
            .as_str()?;
        Some(text.to_string())
    }
}

#[async_trait]
impl TextProvider for GeminiProvider {
    async fn complete(&self, request: &ChatRequest, api_key: &str) -> Result<String> {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };
        let url = format!("{}/models/{}:generateContent", API_BASE, model);

        let body = json!({
            "system_instruction": {"parts": [{"text": request.system}]},
            "contents": [{"role": "user", "parts": [{"text": request.user}]}],
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            }
        });

        debug!(model = %model, "Sending Gemini request");
        let response = self
            .client
            .post(&url)
            // The key rides a header, not the URL, so error logs never see it.
            .header("x-goog-api-key", api_key)
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
                "Gemini response carried no text candidate".into(),
            ))
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
