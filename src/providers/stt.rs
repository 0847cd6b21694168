//! Speech-to-text: voice-note transcoding and transcription.
//!
//! Telegram voice notes arrive as OGG/Opus; the backend wants 16 kHz mono
//! WAV, so an external ffmpeg pass runs first. Both steps live behind
//! timeouts sized to the audio length.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::SttConfig;
use crate::error::{ProviderError, Result, SakaiError};

const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(60);
const TRANSCRIBE_BASE_TIMEOUT_SECS: u64 = 60;
/// Extra transcription budget per megabyte of audio.
const TRANSCRIBE_SECS_PER_MB: u64 = 30;

pub struct Transcriber {
    client: reqwest::Client,
    config: SttConfig,
}

impl Transcriber {
    pub fn new(config: SttConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.endpoint.is_empty()
    }

    /// Convert any input audio into 16 kHz mono WAV next to the source file.
    pub async fn transcode_to_wav(&self, source: &Path) -> Result<PathBuf> {
        let dest = source.with_extension("wav");
        debug!(source = %source.display(), dest = %dest.display(), "Transcoding voice note");

        let output = tokio::time::timeout(
            TRANSCODE_TIMEOUT,
            tokio::process::Command::new(&self.config.ffmpeg_path)
                .arg("-y")
                .arg("-i")
                .arg(source)
                .args(["-ar", "16000", "-ac", "1", "-f", "wav"])
                .arg(&dest)
                .output(),
        )
        .await
        .map_err(|_| SakaiError::Tool("audio transcoding timed out".into()))?
        .map_err(|e| SakaiError::Tool(format!("could not run {}: {}", self.config.ffmpeg_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SakaiError::Tool(format!(
                "transcoder exited with {}: {}",
                output.status,
                stderr.chars().take(200).collect::<String>()
            )));
        }
        Ok(dest)
    }

    /// Send a WAV file to the transcription backend; returns the transcript.
    pub async fn transcribe(&self, wav_path: &Path) -> Result<String> {
        if !self.is_configured() {
            return Err(SakaiError::Config("STT endpoint is not configured".into()));
        }

        let audio = tokio::fs::read(wav_path).await?;
        let timeout = Duration::from_secs(
            TRANSCRIBE_BASE_TIMEOUT_SECS + (audio.len() as u64 / 1_048_576) * TRANSCRIBE_SECS_PER_MB,
        );
        info!(
            bytes = audio.len(),
            timeout_secs = timeout.as_secs(),
            "Transcribing audio"
        );

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "audio/wav")
            .timeout(timeout)
            .body(audio);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SakaiError::Provider(ProviderError::Timeout("transcription timed out".into()))
            } else {
                SakaiError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if status != 200 {
            return Err(ProviderError::from_status(status, &body).into());
        }

        // Accept either a bare string, {"text": ...}, or plain text.
        let transcript = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::String(s)) => s,
            Ok(value) => value
                .get("text")
                .and_then(|t| t.as_str())
                .map(String::from)
                .unwrap_or(body),
            Err(_) => body,
        };

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Err(SakaiError::Provider(ProviderError::Unknown(
                "transcription backend returned no text".into(),
            )));
        }
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcriber(endpoint: &str) -> Transcriber {
        Transcriber::new(SttConfig {
            endpoint: endpoint.to_string(),
            api_key: None,
            ffmpeg_path: "ffmpeg".to_string(),
        })
    }

    #[test]
    fn test_is_configured() {
        assert!(!transcriber("").is_configured());
        assert!(transcriber("http://localhost/stt").is_configured());
    }

    #[tokio::test]
    async fn test_transcribe_unconfigured_is_config_error() {
        let t = transcriber("");
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("a.wav");
        std::fs::write(&wav, b"RIFF").unwrap();
        let err = t.transcribe(&wav).await.unwrap_err();
        assert!(matches!(err, SakaiError::Config(_)));
    }

    #[tokio::test]
    async fn test_transcode_missing_binary_is_tool_error() {
        let t = Transcriber::new(SttConfig {
            endpoint: "http://localhost/stt".into(),
            api_key: None,
            ffmpeg_path: "/nonexistent/ffmpeg-binary".into(),
        });
        let dir = tempfile::tempdir().unwrap();
        let ogg = dir.path().join("voice.ogg");
        std::fs::write(&ogg, b"OggS").unwrap();
        let err = t.transcode_to_wav(&ogg).await.unwrap_err();
        assert!(matches!(err, SakaiError::Tool(_)));
    }
}
