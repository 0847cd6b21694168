//! Backend capabilities: text LLMs behind a key pool, image workers,
//! speech-to-text, and text-to-speech.

pub mod gemini;
pub mod image;
pub mod keypool;
pub mod openrouter;
pub mod stt;
pub mod tts;
mod types;

pub use gemini::GeminiProvider;
pub use image::{ImageGenerator, ImageModel};
pub use keypool::{KeyPool, KeyReport, KeyStatus, DEFAULT_COOLDOWN};
pub use openrouter::OpenRouterProvider;
pub use stt::Transcriber;
pub use tts::{validate_adjustment, SpeechParams, Synthesizer};
pub use types::{ChatRequest, TextProvider};

use crate::config::{LlmConfig, LlmProviderKind};
use std::sync::Arc;

/// Build the configured text provider.
pub fn build_text_provider(config: &LlmConfig) -> Arc<dyn TextProvider> {
    match config.provider {
        LlmProviderKind::Gemini => Arc::new(GeminiProvider::new(&config.model)),
        LlmProviderKind::Openrouter => Arc::new(OpenRouterProvider::new(&config.model)),
    }
}
