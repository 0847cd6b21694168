//! Lane workers: image generation and speech synthesis.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::dispatch::AiClient;
use crate::error::{Result, SakaiError};
use crate::prompts;
use crate::providers::{ImageGenerator, ImageModel, SpeechParams, Synthesizer};

use super::{Job, JobHandler, JobQueue, Lane};

/// Worker for the flux and sdxl lanes: enhances the prompt through the text
/// backend (best effort), then calls the image worker.
pub struct ImageJobHandler {
    ai: Arc<AiClient>,
    generator: Arc<ImageGenerator>,
    jobs: Arc<JobQueue>,
}

impl ImageJobHandler {
    pub fn new(ai: Arc<AiClient>, generator: Arc<ImageGenerator>, jobs: Arc<JobQueue>) -> Self {
        Self { ai, generator, jobs }
    }
}

#[async_trait]
impl JobHandler for ImageJobHandler {
    async fn run(&self, job: &Job) -> Result<PathBuf> {
        let model = match job.lane {
            Lane::Flux => ImageModel::Flux,
            Lane::Sdxl => ImageModel::Sdxl,
            Lane::Tts => {
                return Err(SakaiError::Queue(
                    "speech job routed to the image worker".into(),
                ))
            }
        };

        self.jobs.set_stage(&job.id, "enhancing prompt");
        let prompt = match self
            .ai
            .complete(
                prompts::IMAGE_ENHANCER,
                &prompts::image_enhancement_request(&job.prompt),
            )
            .await
        {
            Ok(enhanced) if !enhanced.trim().is_empty() => enhanced.trim().to_string(),
            Ok(_) => job.prompt.clone(),
            Err(e) => {
                // Enhancement is optional; the raw prompt still works.
                warn!(error = %e, "Prompt enhancement failed; using raw prompt");
                job.prompt.clone()
            }
        };

        self.jobs
            .set_stage(&job.id, &format!("generating image with {}", model.as_str()));
        self.generator.generate(model, &prompt).await
    }
}

/// Worker for the TTS lane.
pub struct SpeechJobHandler {
    synthesizer: Arc<Synthesizer>,
    jobs: Arc<JobQueue>,
}

impl SpeechJobHandler {
    pub fn new(synthesizer: Arc<Synthesizer>, jobs: Arc<JobQueue>) -> Self {
        Self { synthesizer, jobs }
    }
}

#[async_trait]
impl JobHandler for SpeechJobHandler {
    async fn run(&self, job: &Job) -> Result<PathBuf> {
        self.jobs.set_stage(&job.id, "synthesizing speech");
        let default_params = SpeechParams::default();
        let params = job.speech.as_ref().unwrap_or(&default_params);
        self.synthesizer.synthesize(&job.prompt, params).await
    }
}
