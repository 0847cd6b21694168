//! Image generation workers: Flux (GET) and SDXL (POST + Bearer).

use std::path::PathBuf;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::ImageConfig;
use crate::error::{ProviderError, Result, SakaiError};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Whitelisted image backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageModel {
    Flux,
    Sdxl,
}

impl ImageModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageModel::Flux => "flux",
            ImageModel::Sdxl => "sdxl",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "flux" => Some(ImageModel::Flux),
            "sdxl" => Some(ImageModel::Sdxl),
            _ => None,
        }
    }
}

/// HTTP client for the two image workers; writes results into the temp dir.
pub struct ImageGenerator {
    client: reqwest::Client,
    config: ImageConfig,
    temp_dir: PathBuf,
}

impl ImageGenerator {
    pub fn new(config: ImageConfig, temp_dir: PathBuf) -> Self {
        let timeout = if config.timeout_seconds == 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            config.timeout_seconds
        };
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(std::time::Duration::from_secs(timeout))
                .build()
                .expect("reqwest client"),
            config,
            temp_dir,
        }
    }

    /// Generate an image and return the saved file path.
    pub async fn generate(&self, model: ImageModel, prompt: &str) -> Result<PathBuf> {
        let bytes = match model {
            ImageModel::Flux => self.generate_flux(prompt).await?,
            ImageModel::Sdxl => self.generate_sdxl(prompt).await?,
        };
        self.save_image(&bytes, model)
    }

    async fn generate_flux(&self, prompt: &str) -> Result<Vec<u8>> {
        let base = self.config.flux_url.as_deref().ok_or_else(|| {
            SakaiError::Config("Flux worker URL is not configured".into())
        })?;

        let response = self
            .client
            .get(base)
            .query(&[("prompt", prompt)])
            .send()
            .await
            .map_err(map_network_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(worker_error(status, &body));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let bytes = response.bytes().await?.to_vec();

        if !content_type.starts_with("image/") {
            // The worker signals some failures as JSON bodies on 200.
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| "worker returned a non-image response".into());
            warn!(content_type = %content_type, "Flux worker returned non-image body");
            return Err(SakaiError::Provider(ProviderError::Unknown(message)));
        }

        Ok(bytes)
    }

    async fn generate_sdxl(&self, prompt: &str) -> Result<Vec<u8>> {
        let url = self.config.sdxl_url.as_deref().ok_or_else(|| {
            SakaiError::Config("SDXL worker URL is not configured".into())
        })?;
        let api_key = self.config.sdxl_api_key.as_deref().ok_or_else(|| {
            SakaiError::Config("SDXL API key is not configured".into())
        })?;

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({"prompt": prompt}))
            .send()
            .await
            .map_err(map_network_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            // 400 responses may carry structured {error, details}.
            if status == 400 {
                if let Ok(value) = serde_json::from_str::<Value>(&body) {
                    let detail = value
                        .get("details")
                        .or_else(|| value.get("error"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("invalid prompt or request format");
                    return Err(SakaiError::Provider(ProviderError::InvalidRequest(
                        detail.to_string(),
                    )));
                }
            }
            if status == 405 {
                return Err(SakaiError::Provider(ProviderError::InvalidRequest(
                    "worker rejected the request method".into(),
                )));
            }
            return Err(worker_error(status, &body));
        }

        Ok(response.bytes().await?.to_vec())
    }

    fn save_image(&self, bytes: &[u8], model: ImageModel) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.temp_dir)?;
        let filename = format!(
            "image_{}_{}.png",
            model.as_str(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let path = self.temp_dir.join(filename);
        std::fs::write(&path, bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "Saved generated image");
        Ok(path)
    }
}

fn map_network_error(e: reqwest::Error) -> SakaiError {
    if e.is_timeout() {
        SakaiError::Provider(ProviderError::Timeout(
            "image generation request timed out".into(),
        ))
    } else {
        SakaiError::Http(e)
    }
}

fn worker_error(status: u16, body: &str) -> SakaiError {
    ProviderError::from_status(status, body).into()
}
