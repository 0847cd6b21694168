//! The command dispatcher: orchestration core of the bot.
//!
//! Receives authorized, classified events from the router, parses them, and
//! drives each command through its resources — rate limiter, per-chat
//! analysis slot, job lane, credential pool — before delivering the result
//! by editing or replying to the originating message.

mod ai_call;
mod categorize;
mod sender;

pub use ai_call::AiClient;
pub use categorize::{forward_for_categorization, CategorizeOutcome};
pub use sender::MessageSender;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn, Instrument};

use crate::commands::{parse, reply_source_text, Command, ParserLimits};
use crate::error::{ProviderError, Result, SakaiError};
use crate::gate::Classification;
use crate::jobs::{JobQueue, JobStatus, Lane};
use crate::limits::{AnalysisSlots, CircuitBreaker, CircuitState, RateLimiter};
use crate::metrics::Metrics;
use crate::prompts::{self, AnalysisMode};
use crate::providers::{ImageModel, SpeechParams, Transcriber};
use crate::settings::SettingsStore;
use crate::telegram::{
    EntityCache, FileKind, MessageEvent, ParseMode, SentMessage, TelegramApi,
};
use crate::utils::redact_secrets;
use crate::utils::text::format_duration;

/// Default interval between status-message refreshes for queued jobs.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on waiting for one media job, queue time included.
const DEFAULT_JOB_WAIT_CAP: Duration = Duration::from_secs(600);

const HELP_TEXT: &str = "\
🤖 SakaiBot commands

/prompt=<text> — ask the AI
/translate=<lang>[,src]=<text> — translate (or reply with /translate=<lang>)
/analyze=<N> or /analyze=<mode>=<N> — analyze chat history (modes: general, fun, romance)
/tellme=<N>=<question> — ask about chat history
/tts [voice=…] [rate=±N%] [volume=±N%] <text> — speak text (or reply with /tts)
/stt — transcribe a replied voice message
/image=flux/<prompt> or /image=sdxl/<prompt> — generate an image
/<mapped_name> — reply to a message to forward it to its category
/auth list|add|remove <peer> — manage authorized peers
/status — runtime status
/help — this text";

/// One classified event handed over by the router.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub correlation_id: String,
    pub classification: Classification,
    /// The message whose text carries the command. For the confirm flow this
    /// is the promoted (replied-to) message, not the confirmation itself.
    pub command: MessageEvent,
    /// The owner's confirmation message; deleted after dispatch.
    pub confirm_message_id: Option<i32>,
}

/// Everything the dispatcher needs, wired once by the supervisor.
pub struct DispatcherParts {
    pub api: Arc<dyn TelegramApi>,
    pub settings: Arc<SettingsStore>,
    pub ai: Arc<AiClient>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ai_breaker: Arc<CircuitBreaker>,
    pub tg_breaker: Arc<CircuitBreaker>,
    pub slots: Arc<AnalysisSlots>,
    pub jobs: Arc<JobQueue>,
    pub transcriber: Arc<Transcriber>,
    pub cache: Arc<EntityCache>,
    pub metrics: Arc<Metrics>,
    pub limits: ParserLimits,
    pub temp_dir: PathBuf,
}

pub struct CommandDispatcher {
    api: Arc<dyn TelegramApi>,
    sender: MessageSender,
    settings: Arc<SettingsStore>,
    ai: Arc<AiClient>,
    rate_limiter: Arc<RateLimiter>,
    ai_breaker: Arc<CircuitBreaker>,
    tg_breaker: Arc<CircuitBreaker>,
    slots: Arc<AnalysisSlots>,
    jobs: Arc<JobQueue>,
    transcriber: Arc<Transcriber>,
    cache: Arc<EntityCache>,
    metrics: Arc<Metrics>,
    limits: ParserLimits,
    temp_dir: PathBuf,
    poll_interval: Duration,
    job_wait_cap: Duration,
}

impl CommandDispatcher {
    pub fn new(parts: DispatcherParts) -> Self {
        Self {
            sender: MessageSender::new(Arc::clone(&parts.api)),
            api: parts.api,
            settings: parts.settings,
            ai: parts.ai,
            rate_limiter: parts.rate_limiter,
            ai_breaker: parts.ai_breaker,
            tg_breaker: parts.tg_breaker,
            slots: parts.slots,
            jobs: parts.jobs,
            transcriber: parts.transcriber,
            cache: parts.cache,
            metrics: parts.metrics,
            limits: parts.limits,
            temp_dir: parts.temp_dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_wait_cap: DEFAULT_JOB_WAIT_CAP,
        }
    }

    /// Shrink job polling delays; test support.
    pub fn with_job_timings(mut self, poll_interval: Duration, wait_cap: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.job_wait_cap = wait_cap;
        self
    }

    /// Entry point for one classified event. Never propagates errors: every
    /// failure either reaches the user as a short message or is logged.
    pub async fn handle(&self, request: DispatchRequest) {
        let span = tracing::info_span!(
            "dispatch",
            correlation_id = %request.correlation_id,
            chat_id = request.command.chat_id,
        );
        async {
            self.metrics.record_command();
            let command = match parse(&request.command.text, &self.limits) {
                Ok(command) => command,
                Err(SakaiError::Validation(usage)) => {
                    self.reply(&request.command, &usage).await;
                    self.delete_confirmation(&request).await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Command parse failed unexpectedly");
                    self.delete_confirmation(&request).await;
                    return;
                }
            };

            info!(command = ?command_label(&command), "Dispatching command");
            if let Err(e) = self.execute(&request, command).await {
                self.metrics.record_error();
                warn!(error = %e, "Command failed");
                let message = user_message(&e);
                if !message.is_empty() {
                    self.reply(&request.command, &message).await;
                }
            }
            self.delete_confirmation(&request).await;
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, request: &DispatchRequest, command: Command) -> Result<()> {
        match command {
            Command::Prompt { text } => {
                self.run_ai_text(request, prompts::GENERAL_ASSISTANT, text)
                    .await
            }
            Command::Translate {
                target_lang,
                source_lang,
                text,
            } => {
                let text = match text {
                    Some(text) => text,
                    None => match self.replied_text(&request.command).await? {
                        Some(text) => text,
                        None => {
                            self.reply(
                                &request.command,
                                "Usage: /translate=<lang>[,source_lang]=<text> or reply with /translate=<lang>",
                            )
                            .await;
                            return Ok(());
                        }
                    },
                };
                let user = prompts::translation_request(
                    &target_lang,
                    source_lang.as_deref(),
                    &text,
                );
                self.run_ai_text(request, prompts::TRANSLATOR, user).await
            }
            Command::Analyze { mode, count } => {
                self.run_history_command(request, HistoryTask::Analyze(mode), count)
                    .await
            }
            Command::TellMe { count, question } => {
                self.run_history_command(request, HistoryTask::TellMe(question), count)
                    .await
            }
            Command::Tts { params, text } => self.run_tts(request, params, text).await,
            Command::Stt => self.run_stt(request).await,
            Command::Image { model, prompt } => self.run_image(request, model, prompt).await,
            Command::Status => self.run_owner_only(request, OwnerCommand::Status).await,
            Command::Help => self.run_owner_only(request, OwnerCommand::Help).await,
            Command::AuthList => self.run_owner_only(request, OwnerCommand::AuthList).await,
            Command::AuthAdd { peer_id } => {
                self.run_owner_only(request, OwnerCommand::AuthAdd(peer_id))
                    .await
            }
            Command::AuthRemove { peer_id } => {
                self.run_owner_only(request, OwnerCommand::AuthRemove(peer_id))
                    .await
            }
            Command::Categorize { name } => self.run_categorize(request, &name).await,
        }
    }

    // ------------------------------------------------------------------
    // AI text commands
    // ------------------------------------------------------------------

    async fn run_ai_text(
        &self,
        request: &DispatchRequest,
        system: &str,
        user: String,
    ) -> Result<()> {
        if !self.admit_rate_limited(&request.command).await {
            return Ok(());
        }

        let thinking = self
            .sender
            .send_safe(
                request.command.chat_id,
                "🤔 Thinking...",
                Some(request.command.message_id),
                None,
            )
            .await?;

        match self.ai.complete(system, &user).await {
            Ok(response) => {
                self.deliver_response(&request.command, &response, thinking)
                    .await
            }
            Err(e) => {
                self.surface_on(&thinking, &e).await;
                Ok(())
            }
        }
    }

    async fn deliver_response(
        &self,
        command: &MessageEvent,
        response: &str,
        thinking: SentMessage,
    ) -> Result<()> {
        self.sender
            .send_long(
                command.chat_id,
                response,
                Some(command.message_id),
                Some(ParseMode::Markdown),
                Some(thinking),
            )
            .await?;
        self.send_done_ack(command).await;
        Ok(())
    }

    /// Terminal acknowledgement: the user sees completion even when the last
    /// edit was a no-op.
    async fn send_done_ack(&self, command: &MessageEvent) {
        let stamp = chrono::Local::now().format("%H:%M");
        let _ = self
            .sender
            .send_safe(
                command.chat_id,
                &format!("✅ done - {}", stamp),
                Some(command.message_id),
                None,
            )
            .await;
    }

    /// Rate-limit an AI command; replies with the remaining wait on denial.
    async fn admit_rate_limited(&self, command: &MessageEvent) -> bool {
        let principal = command.sender_id;
        let (allowed, _remaining) = self.rate_limiter.check_and_consume(principal);
        if !allowed {
            let wait = self.rate_limiter.retry_after_secs(principal);
            self.reply(
                command,
                &format!("⏳ Rate limit reached. Try again in {}s.", wait),
            )
            .await;
        }
        allowed
    }

    // ------------------------------------------------------------------
    // History commands (/analyze, /tellme)
    // ------------------------------------------------------------------

    async fn run_history_command(
        &self,
        request: &DispatchRequest,
        task: HistoryTask,
        count: u32,
    ) -> Result<()> {
        let command = &request.command;
        if !self.admit_rate_limited(command).await {
            return Ok(());
        }

        let kind = task.kind();
        let guard = match self
            .slots
            .try_begin(command.chat_id, command.sender_id, kind)
        {
            Ok(guard) => guard,
            Err(reason) => {
                self.reply(command, &reason).await;
                return Ok(());
            }
        };

        let thinking = self
            .sender
            .send_safe(
                command.chat_id,
                &format!("📊 Reading the last {} messages...", count),
                Some(command.message_id),
                None,
            )
            .await?;

        let history = match self.api.get_history(command.chat_id, count as usize).await {
            Ok(history) => history,
            Err(e) => {
                self.surface_on(&thinking, &e).await;
                return Ok(());
            }
        };

        // Newest-first from the client; the model reads oldest-first.
        let mut messages: Vec<_> = history
            .into_iter()
            .filter(|m| !m.text.trim().is_empty())
            .collect();
        messages.reverse();

        if messages.is_empty() {
            let _ = self
                .sender
                .edit_safe(
                    thinking.chat_id,
                    thinking.id,
                    "No text messages found in the specified history to analyze.",
                    None,
                )
                .await;
            return Ok(());
        }

        let mut lines = Vec::with_capacity(messages.len());
        for message in &messages {
            let name = if message.outgoing {
                "You".to_string()
            } else {
                self.cache
                    .display_name(self.api.as_ref(), message.sender_id)
                    .await
            };
            lines.push(format!("{}: {}", name, message.text));
        }
        let transcript = lines.join("\n");

        let (system, user) = match &task {
            HistoryTask::Analyze(mode) => (
                mode.system_prompt(),
                prompts::analysis_request(*mode, messages.len(), &transcript),
            ),
            HistoryTask::TellMe(question) => (
                prompts::GENERAL_ASSISTANT,
                prompts::tellme_request(messages.len(), question, &transcript),
            ),
        };

        match self.ai.complete(system, &user).await {
            Ok(response) => {
                self.deliver_response(command, &response, thinking).await?;
                guard.finish();
                Ok(())
            }
            Err(e) => {
                self.surface_on(&thinking, &e).await;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Media commands (/image, /tts)
    // ------------------------------------------------------------------

    async fn run_image(
        &self,
        request: &DispatchRequest,
        model: ImageModel,
        prompt: String,
    ) -> Result<()> {
        let command = &request.command;
        let lane = match model {
            ImageModel::Flux => Lane::Flux,
            ImageModel::Sdxl => Lane::Sdxl,
        };

        let status = self
            .sender
            .send_safe(
                command.chat_id,
                &format!("🎨 Image request queued ({})...", model.as_str()),
                Some(command.message_id),
                None,
            )
            .await?;

        let job_id = self.jobs.enqueue(lane, &prompt, command.sender_id);
        let delivered = self.await_job(command, &job_id, &status, JobPresentation::Image).await;
        self.jobs.cleanup(&job_id);
        delivered
    }

    async fn run_tts(
        &self,
        request: &DispatchRequest,
        params: SpeechParams,
        text: Option<String>,
    ) -> Result<()> {
        let command = &request.command;
        let text = match text {
            Some(text) => text,
            None => match self.replied_text(command).await? {
                Some(text) => text,
                None => {
                    self.reply(
                        command,
                        "Usage: /tts [voice=…] [rate=±N%] [volume=±N%] <text> or reply with /tts",
                    )
                    .await;
                    return Ok(());
                }
            },
        };

        let status = self
            .sender
            .send_safe(
                command.chat_id,
                "🎤 Queued for speech synthesis...",
                Some(command.message_id),
                None,
            )
            .await?;

        let job_id = self.jobs.enqueue_speech(&text, params, command.sender_id);
        let delivered = self.await_job(command, &job_id, &status, JobPresentation::Voice).await;
        self.jobs.cleanup(&job_id);
        delivered
    }

    /// Poll one job to completion, keeping the status message fresh, then
    /// deliver its artifact as a reply.
    async fn await_job(
        &self,
        command: &MessageEvent,
        job_id: &str,
        status: &SentMessage,
        presentation: JobPresentation,
    ) -> Result<()> {
        let deadline = Instant::now() + self.job_wait_cap;
        let mut last_status_text = String::new();

        loop {
            tokio::time::sleep(self.poll_interval).await;

            if Instant::now() > deadline {
                let _ = self
                    .sender
                    .edit_safe(status.chat_id, status.id, "⏰ The job timed out.", None)
                    .await;
                return Ok(());
            }

            let text = match self.jobs.status(job_id) {
                Some(JobStatus::Pending) => match self.jobs.position(job_id) {
                    Some(position) => format!("⏳ Queue position: {}", position),
                    None => continue,
                },
                Some(JobStatus::Processing) => {
                    let stage = self
                        .jobs
                        .get(job_id)
                        .and_then(|j| j.stage)
                        .unwrap_or_else(|| "working".to_string());
                    format!("⚙️ {}...", stage)
                }
                Some(JobStatus::Completed) => {
                    let result = self.jobs.get(job_id).and_then(|j| j.result);
                    let Some(path) = result else {
                        let _ = self
                            .sender
                            .edit_safe(
                                status.chat_id,
                                status.id,
                                "❌ The job finished without a result.",
                                None,
                            )
                            .await;
                        return Ok(());
                    };
                    let (kind, cleanup_here) = match presentation {
                        JobPresentation::Image => (FileKind::Photo, true),
                        // The TTS lane deletes its own files on cleanup.
                        JobPresentation::Voice => (FileKind::VoiceNote, false),
                    };
                    self.api
                        .send_file(
                            command.chat_id,
                            &path,
                            None,
                            Some(command.message_id),
                            kind,
                        )
                        .await?;
                    let _ = self.api.delete_message(status.chat_id, status.id).await;
                    if cleanup_here {
                        let _ = std::fs::remove_file(&path);
                    }
                    return Ok(());
                }
                Some(JobStatus::Failed) => {
                    let reason = self
                        .jobs
                        .get(job_id)
                        .and_then(|j| j.error)
                        .unwrap_or_else(|| "unknown error".to_string());
                    let _ = self
                        .sender
                        .edit_safe(
                            status.chat_id,
                            status.id,
                            &format!("❌ Failed: {}", redact_secrets(&reason)),
                            None,
                        )
                        .await;
                    return Ok(());
                }
                None => {
                    let _ = self
                        .sender
                        .edit_safe(status.chat_id, status.id, "❌ The job disappeared.", None)
                        .await;
                    return Ok(());
                }
            };

            if text != last_status_text {
                let _ = self
                    .sender
                    .edit_safe(status.chat_id, status.id, &text, None)
                    .await;
                last_status_text = text;
            }
        }
    }

    // ------------------------------------------------------------------
    // /stt
    // ------------------------------------------------------------------

    async fn run_stt(&self, request: &DispatchRequest) -> Result<()> {
        let command = &request.command;
        let Some(reply_id) = command.reply_to else {
            self.reply(command, "❌ /stt must be used as a reply to a voice message.")
                .await;
            return Ok(());
        };
        let replied = self.api.get_message(command.chat_id, reply_id).await?;
        let Some(replied) = replied else {
            self.reply(command, "❌ Could not load the replied message.")
                .await;
            return Ok(());
        };
        if !replied.is_voice {
            self.reply(command, "❌ The replied message is not a voice message.")
                .await;
            return Ok(());
        }

        let thinking = self
            .sender
            .send_safe(
                command.chat_id,
                "🎧 Transcribing voice message...",
                Some(command.message_id),
                None,
            )
            .await?;

        std::fs::create_dir_all(&self.temp_dir)?;
        let voice_path = self
            .temp_dir
            .join(format!("voice_{}_{}.ogg", command.chat_id, reply_id));
        let mut temp_files = vec![voice_path.clone()];

        let result = async {
            self.api
                .download_voice(command.chat_id, reply_id, &voice_path)
                .await?;
            let wav = self.transcriber.transcode_to_wav(&voice_path).await?;
            temp_files.push(wav.clone());
            self.transcriber.transcribe(&wav).await
        }
        .await;

        let outcome = match result {
            Ok(transcript) => {
                // Show the transcript immediately; the summary follows.
                let _ = self
                    .sender
                    .edit_safe(
                        thinking.chat_id,
                        thinking.id,
                        &format!("📝 Transcribed Text:\n{}", transcript),
                        None,
                    )
                    .await;

                let summary = match self
                    .ai
                    .complete(
                        prompts::VOICE_SUMMARIZER,
                        &prompts::voice_summary_request(&transcript),
                    )
                    .await
                {
                    Ok(summary) => summary,
                    Err(e) => {
                        warn!(error = %e, "Voice summarization failed");
                        "No summary available.".to_string()
                    }
                };

                let final_text = format!(
                    "📝 Transcribed Text:\n{}\n\n🔍 Summary:\n{}",
                    transcript, summary
                );
                self.sender
                    .send_long(
                        command.chat_id,
                        &final_text,
                        Some(command.message_id),
                        None,
                        Some(thinking),
                    )
                    .await?;
                self.send_done_ack(command).await;
                Ok(())
            }
            Err(e) => {
                self.surface_on(&thinking, &e).await;
                Ok(())
            }
        };

        for path in temp_files {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Could not remove temp file");
                }
            }
        }

        outcome
    }

    // ------------------------------------------------------------------
    // Owner-only commands (/status, /help, /auth)
    // ------------------------------------------------------------------

    async fn run_owner_only(&self, request: &DispatchRequest, command: OwnerCommand) -> Result<()> {
        if request.classification == Classification::AuthorizedDirect {
            // Owner-only surface; drop silently to avoid advertising it.
            info!("Ignoring owner-only command from authorized peer");
            return Ok(());
        }

        let text = match command {
            OwnerCommand::Help => HELP_TEXT.to_string(),
            OwnerCommand::Status => self.render_status(),
            OwnerCommand::AuthList => {
                let peers = self.settings.snapshot().authorized_peers;
                if peers.is_empty() {
                    "No directly authorized peers.".to_string()
                } else {
                    let lines: Vec<String> =
                        peers.iter().map(|id| format!("• {}", id)).collect();
                    format!("Authorized peers:\n{}", lines.join("\n"))
                }
            }
            OwnerCommand::AuthAdd(peer_id) => {
                if self.settings.add_authorized_peer(peer_id)? {
                    format!("✅ Peer {} authorized.", peer_id)
                } else {
                    format!("Peer {} was already authorized.", peer_id)
                }
            }
            OwnerCommand::AuthRemove(peer_id) => {
                if self.settings.remove_authorized_peer(peer_id)? {
                    format!("✅ Peer {} removed.", peer_id)
                } else {
                    format!("Peer {} was not authorized.", peer_id)
                }
            }
        };

        // Owner commands edit the owner's own message in place.
        let edited = self
            .sender
            .edit_safe(
                request.command.chat_id,
                request.command.message_id,
                &text,
                None,
            )
            .await;
        if edited.is_err() {
            self.reply(&request.command, &text).await;
        }
        Ok(())
    }

    fn render_status(&self) -> String {
        let mut out = String::new();
        out.push_str("🤖 SakaiBot status\n");
        out.push_str(&format!(
            "Uptime: {}\n",
            format_duration(self.metrics.uptime_secs())
        ));
        out.push_str(&format!("Provider: {}\n", self.ai.provider_name()));

        out.push_str("Keys:\n");
        for report in self.ai.key_reports() {
            out.push_str(&format!(
                "  {}. {} — {}{}{}\n",
                report.index + 1,
                report.masked_key,
                report.status.as_str(),
                if report.usable { "" } else { " (unusable)" },
                if report.is_current { " ← current" } else { "" },
            ));
        }

        out.push_str(&format!(
            "Circuits: ai={} telegram={}\n",
            circuit_label(self.ai_breaker.state()),
            circuit_label(self.tg_breaker.state()),
        ));
        out.push_str(&format!(
            "Queues: flux={} sdxl={} tts={}\n",
            self.jobs.pending_count(Lane::Flux),
            self.jobs.pending_count(Lane::Sdxl),
            self.jobs.pending_count(Lane::Tts),
        ));
        out.push_str(&format!(
            "Analyses in flight: {}\n",
            self.slots.active_count()
        ));
        out.push_str(&format!(
            "Handled: {} commands, {} provider calls ({} failed), {} forwards",
            self.metrics
                .commands_handled
                .load(std::sync::atomic::Ordering::Relaxed),
            self.metrics
                .provider_calls
                .load(std::sync::atomic::Ordering::Relaxed),
            self.metrics
                .provider_failures
                .load(std::sync::atomic::Ordering::Relaxed),
            self.metrics
                .forwards
                .load(std::sync::atomic::Ordering::Relaxed),
        ));
        out
    }

    // ------------------------------------------------------------------
    // Categorization
    // ------------------------------------------------------------------

    async fn run_categorize(&self, request: &DispatchRequest, name: &str) -> Result<()> {
        // Forwarding into the owner's archive is an owner decision; peers
        // must go through the confirm flow.
        if request.classification == Classification::AuthorizedDirect {
            return Ok(());
        }
        let command = &request.command;
        let Some(reply_id) = command.reply_to else {
            return Ok(());
        };
        let Some(replied) = self.api.get_message(command.chat_id, reply_id).await? else {
            return Ok(());
        };

        let settings = self.settings.snapshot();
        match forward_for_categorization(&self.api, &settings, name, &replied).await {
            Ok(CategorizeOutcome::Forwarded) => {
                self.metrics.record_forward();
                // Telegram shows the forward; no reply on success.
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                self.reply(
                    command,
                    &format!(
                        "❌ Could not forward for categorization: {}",
                        redact_secrets(&e.to_string())
                    ),
                )
                .await;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    /// Text a reply-form command operates on, if the command replies to a
    /// message with text.
    async fn replied_text(&self, command: &MessageEvent) -> Result<Option<String>> {
        let Some(reply_id) = command.reply_to else {
            return Ok(None);
        };
        let replied = self.api.get_message(command.chat_id, reply_id).await?;
        Ok(replied.and_then(|m| {
            let text = reply_source_text(&m.text);
            (!text.is_empty()).then_some(text)
        }))
    }

    async fn reply(&self, command: &MessageEvent, text: &str) {
        if let Err(e) = self
            .sender
            .send_safe(command.chat_id, text, Some(command.message_id), None)
            .await
        {
            warn!(error = %e, "Could not deliver reply");
        }
    }

    /// Put a user-facing failure message where the user is already looking.
    async fn surface_on(&self, thinking: &SentMessage, error: &SakaiError) {
        self.metrics.record_error();
        warn!(error = %error, "Surfacing failure to user");
        let message = user_message(error);
        let message = if message.is_empty() {
            "⚠️ Something went wrong.".to_string()
        } else {
            message
        };
        if self
            .sender
            .edit_safe(thinking.chat_id, thinking.id, &message, None)
            .await
            .is_err()
        {
            let _ = self
                .sender
                .send_safe(thinking.chat_id, &message, None, None)
                .await;
        }
    }

    async fn delete_confirmation(&self, request: &DispatchRequest) {
        if let Some(confirm_id) = request.confirm_message_id {
            if let Err(e) = self
                .api
                .delete_message(request.command.chat_id, confirm_id)
                .await
            {
                warn!(error = %e, "Could not delete confirmation message");
            }
        }
    }
}

enum HistoryTask {
    Analyze(AnalysisMode),
    TellMe(String),
}

impl HistoryTask {
    fn kind(&self) -> &'static str {
        match self {
            HistoryTask::Analyze(mode) => mode.as_str(),
            HistoryTask::TellMe(_) => "tellme",
        }
    }
}

enum OwnerCommand {
    Status,
    Help,
    AuthList,
    AuthAdd(i64),
    AuthRemove(i64),
}

enum JobPresentation {
    Image,
    Voice,
}

fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Prompt { .. } => "prompt",
        Command::Translate { .. } => "translate",
        Command::Analyze { .. } => "analyze",
        Command::TellMe { .. } => "tellme",
        Command::Tts { .. } => "tts",
        Command::Stt => "stt",
        Command::Image { .. } => "image",
        Command::AuthList | Command::AuthAdd { .. } | Command::AuthRemove { .. } => "auth",
        Command::Status => "status",
        Command::Help => "help",
        Command::Categorize { .. } => "categorize",
    }
}

fn circuit_label(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half-open",
    }
}

/// Translate an error into the short message users see. Secrets are
/// redacted; an empty string means "say nothing".
pub fn user_message(error: &SakaiError) -> String {
    match error {
        SakaiError::Config(m) => format!("⚙️ Configuration error: {}", redact_secrets(m)),
        SakaiError::Validation(m) => m.clone(),
        SakaiError::Unauthorized(_) => String::new(),
        SakaiError::RateLimited { retry_after_secs } => {
            format!("⏳ Rate limit reached. Try again in {}s.", retry_after_secs)
        }
        SakaiError::CircuitOpen(name) => format!(
            "🔌 {} is temporarily unavailable. Please try again shortly.",
            name
        ),
        SakaiError::Provider(ProviderError::RateLimit(_)) => {
            "🚦 The AI provider is rate limiting right now. Please retry shortly.".to_string()
        }
        SakaiError::Provider(ProviderError::QuotaExhausted(_)) => {
            "📉 The daily AI quota is exhausted. Keys release at the provider's reset time."
                .to_string()
        }
        SakaiError::Provider(ProviderError::Auth(_)) => {
            "🔑 The AI credential was rejected. Check the configured API keys.".to_string()
        }
        SakaiError::Provider(ProviderError::InvalidRequest(m)) => {
            format!("❌ The AI provider rejected the request: {}", redact_secrets(m))
        }
        SakaiError::Provider(_) => "⚠️ The AI backend failed. Please try again.".to_string(),
        SakaiError::Telegram(m) => {
            format!("⚠️ Telegram operation failed: {}", redact_secrets(m))
        }
        SakaiError::NotModified => String::new(),
        SakaiError::Tool(m) => format!("⚠️ External tool failed: {}", redact_secrets(m)),
        _ => "⚠️ Internal error. Check the logs.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    #[test]
    fn test_user_message_redacts_secrets() {
        let err = SakaiError::Telegram(
            "request with Bearer sk-or-v1-abcdefghijklmnop1234 failed".into(),
        );
        let message = user_message(&err);
        assert!(!message.contains("abcdefghijklmnop"));
    }

    #[test]
    fn test_user_message_silent_variants() {
        assert!(user_message(&SakaiError::Unauthorized("x".into())).is_empty());
        assert!(user_message(&SakaiError::NotModified).is_empty());
    }

    #[test]
    fn test_user_message_rate_limited_carries_wait() {
        let message = user_message(&SakaiError::RateLimited {
            retry_after_secs: 37,
        });
        assert!(message.contains("37s"));
    }

    #[test]
    fn test_user_message_circuit_open() {
        let message = user_message(&SakaiError::CircuitOpen("ai"));
        assert!(message.contains("temporarily unavailable"));
    }

    #[test]
    fn test_user_message_quota() {
        let message =
            user_message(&SakaiError::Provider(ProviderError::QuotaExhausted("q".into())));
        assert!(message.contains("quota"));
    }
}
