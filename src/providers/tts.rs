//! Text-to-speech synthesis backend.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::config::TtsConfig;
use crate::error::{ProviderError, Result, SakaiError};

const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(120);

/// Validated speech parameters; rate and volume are signed percentages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechParams {
    pub voice: Option<String>,
    pub rate: Option<String>,
    pub volume: Option<String>,
}

pub struct Synthesizer {
    client: reqwest::Client,
    config: TtsConfig,
    temp_dir: PathBuf,
}

impl Synthesizer {
    pub fn new(config: TtsConfig, temp_dir: PathBuf) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(SYNTHESIS_TIMEOUT)
                .build()
                .expect("reqwest client"),
            config,
            temp_dir,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.endpoint.is_empty()
    }

    /// Synthesize speech and return the path to the audio file.
    pub async fn synthesize(&self, text: &str, params: &SpeechParams) -> Result<PathBuf> {
        if !self.is_configured() {
            return Err(SakaiError::Config("TTS endpoint is not configured".into()));
        }
        if text.is_empty() {
            return Err(SakaiError::Validation("no text to speak".into()));
        }

        let voice = params.voice.as_deref().unwrap_or(&self.config.voice);
        let body = json!({
            "text": text,
            "voice": voice,
            "rate": params.rate.as_deref().unwrap_or("+0%"),
            "volume": params.volume.as_deref().unwrap_or("+0%"),
        });

        info!(voice = %voice, chars = text.chars().count(), "Synthesizing speech");
        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SakaiError::Provider(ProviderError::Timeout("speech synthesis timed out".into()))
            } else {
                SakaiError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body).into());
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SakaiError::Provider(ProviderError::Unknown(
                "synthesis backend returned no audio".into(),
            )));
        }

        std::fs::create_dir_all(&self.temp_dir)?;
        let path = self.temp_dir.join(format!(
            "tts_{}.mp3",
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));
        std::fs::write(&path, &bytes)?;
        Ok(path)
    }
}

/// Validate a `[+-]N%` rate/volume adjustment within [-50%, +100%].
pub fn validate_adjustment(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let stripped = trimmed.strip_suffix('%')?;
    let (sign, digits) = match stripped.as_bytes().first()? {
        b'+' => (1i32, &stripped[1..]),
        b'-' => (-1i32, &stripped[1..]),
        _ => return None,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude: i32 = digits.parse().ok()?;
    let percent = sign * magnitude;
    (-50..=100).contains(&percent).then(|| trimmed.to_string())
}
