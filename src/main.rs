//! SakaiBot entry point: CLI, service wiring, and shutdown ordering.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use sakaibot::commands::ParserLimits;
use sakaibot::config::Config;
use sakaibot::dispatch::{AiClient, CommandDispatcher, DispatcherParts};
use sakaibot::jobs::handlers::{ImageJobHandler, SpeechJobHandler};
use sakaibot::jobs::{JobQueue, Lane};
use sakaibot::limits::{AnalysisSlots, CircuitBreaker, RateLimiter};
use sakaibot::lock::InstanceLock;
use sakaibot::metrics::Metrics;
use sakaibot::providers::{
    build_text_provider, ImageGenerator, KeyPool, Synthesizer, Transcriber,
};
use sakaibot::settings::SettingsStore;
use sakaibot::telegram::{
    ConnectionHealthMonitor, EntityCache, EventRouter, MtProtoClient, TelegramApi,
};
use sakaibot::utils::init_logging;

/// Rate-limit bucket sweep interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Analysis-slot reaper interval.
const REAPER_INTERVAL: Duration = Duration::from_secs(60);
/// Grace period for background tasks on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "sakaibot")]
#[command(about = "Telegram userbot that dispatches slash-commands to AI backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot
    Run {
        /// Refuse to start when another instance holds the lock, instead of
        /// terminating it
        #[arg(long)]
        strict: bool,
    },
    /// Show configuration and settings status
    Status,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; a broken one deserves a note.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: could not load .env: {}", e);
        }
    }

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Version) | None => {
            println!("sakaibot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Status) => {
            cmd_status();
        }
        Some(Commands::Run { strict }) => {
            cmd_run(strict).await?;
        }
    }
    Ok(())
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();
    println!("SakaiBot status");
    println!("===============");
    println!("Config file:   {:?} (exists: {})", Config::path(), Config::path().exists());
    println!("Settings file: {:?} (exists: {})", Config::settings_path(), Config::settings_path().exists());
    println!("Lock file:     {:?} (exists: {})", Config::lock_path(), Config::lock_path().exists());
    println!();
    println!("LLM provider:  {:?} ({})", config.llm.provider, config.llm.model);
    println!("LLM keys:      {}", config.llm.api_keys.len());
    println!("STT endpoint:  {}", or_unset(&config.stt.endpoint));
    println!("TTS endpoint:  {}", or_unset(&config.tts.endpoint));
    println!("Flux worker:   {}", or_unset(config.image.flux_url.as_deref().unwrap_or("")));
    println!("SDXL worker:   {}", or_unset(config.image.sdxl_url.as_deref().unwrap_or("")));

    let settings = SettingsStore::load(Config::settings_path()).snapshot();
    println!();
    println!("Target group:  {:?}", settings.target_group.map(|g| g.id));
    println!("Mapped cmds:   {}", settings.command_map.command_count());
    println!("Auth peers:    {}", settings.authorized_peers.len());
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}

async fn cmd_run(strict: bool) -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_logging(&config.logging.level);
    config.validate().context("configuration is incomplete")?;

    // The lock is taken before anything touches the network and released
    // after everything else stopped.
    let mut lock = InstanceLock::new(Config::lock_path());
    if !lock.acquire(!strict).context("could not acquire instance lock")? {
        bail!("another instance is running; use `sakaibot run` without --strict to replace it");
    }

    let settings = Arc::new(SettingsStore::load(Config::settings_path()));
    let metrics = Arc::new(Metrics::new());
    let ai_breaker = Arc::new(CircuitBreaker::with_defaults("ai"));
    let tg_breaker = Arc::new(CircuitBreaker::with_defaults("telegram"));
    let rate_limiter = Arc::new(RateLimiter::new(
        config.limits.rate_limit_max,
        Duration::from_secs(config.limits.rate_limit_window_seconds),
    ));
    let slots = Arc::new(AnalysisSlots::new());
    let jobs = Arc::new(JobQueue::new());

    let keypool = Arc::new(
        KeyPool::new(
            config.llm.api_keys.clone(),
            Duration::from_secs(config.llm.cooldown_seconds),
            provider_label(&config),
        )
        .context("no usable API keys configured")?,
    );
    let ai = Arc::new(AiClient::new(
        build_text_provider(&config.llm),
        Arc::clone(&keypool),
        Arc::clone(&ai_breaker),
        Arc::clone(&metrics),
        &config.llm.model,
        config.llm.max_tokens,
        config.llm.temperature,
    ));

    let temp_dir = Config::temp_dir();
    let transcriber = Arc::new(Transcriber::new(config.stt.clone()));
    let synthesizer = Arc::new(Synthesizer::new(config.tts.clone(), temp_dir.clone()));
    let generator = Arc::new(ImageGenerator::new(config.image.clone(), temp_dir.clone()));
    let cache = Arc::new(EntityCache::new(Some(Config::cache_path())));
    cache.restore();

    info!("Connecting to Telegram");
    let client = MtProtoClient::connect(&config.telegram, &Config::dir())
        .await
        .context("could not connect to Telegram")?;
    let api: Arc<dyn TelegramApi> = Arc::new(client);
    let me = api.me().await.context("could not resolve own identity")?;
    info!(user = %me.first_name, id = me.id, "Logged in");

    let dispatcher = Arc::new(CommandDispatcher::new(DispatcherParts {
        api: Arc::clone(&api),
        settings: Arc::clone(&settings),
        ai: Arc::clone(&ai),
        rate_limiter: Arc::clone(&rate_limiter),
        ai_breaker: Arc::clone(&ai_breaker),
        tg_breaker: Arc::clone(&tg_breaker),
        slots: Arc::clone(&slots),
        jobs: Arc::clone(&jobs),
        transcriber: Arc::clone(&transcriber),
        cache: Arc::clone(&cache),
        metrics: Arc::clone(&metrics),
        limits: ParserLimits {
            analyze_max: config.limits.max_analyze_messages,
        },
        temp_dir: temp_dir.clone(),
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    // Lane workers: one per image backend, one for speech.
    let image_handler = Arc::new(ImageJobHandler::new(
        Arc::clone(&ai),
        Arc::clone(&generator),
        Arc::clone(&jobs),
    ));
    let flux_handler: Arc<dyn sakaibot::jobs::JobHandler> =
        Arc::clone(&image_handler) as Arc<dyn sakaibot::jobs::JobHandler>;
    let sdxl_handler: Arc<dyn sakaibot::jobs::JobHandler> =
        image_handler as Arc<dyn sakaibot::jobs::JobHandler>;
    background.push(Arc::clone(&jobs).spawn_worker(Lane::Flux, flux_handler, shutdown_rx.clone()));
    background.push(Arc::clone(&jobs).spawn_worker(Lane::Sdxl, sdxl_handler, shutdown_rx.clone()));
    let tts_handler: Arc<dyn sakaibot::jobs::JobHandler> =
        Arc::new(SpeechJobHandler::new(synthesizer, Arc::clone(&jobs)));
    background.push(Arc::clone(&jobs).spawn_worker(Lane::Tts, tts_handler, shutdown_rx.clone()));

    background.push(Arc::clone(&slots).spawn_reaper(REAPER_INTERVAL, shutdown_rx.clone()));

    // Rate-limit bucket sweeper.
    {
        let rate_limiter = Arc::clone(&rate_limiter);
        let mut rx = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => rate_limiter.sweep(),
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    let monitor = Arc::new(
        ConnectionHealthMonitor::new(Arc::clone(&api), &config.health, Arc::clone(&metrics))
            .with_recovery_callback(Box::new(|| {
                // Handler registration is pull-based, so recovery needs no
                // re-registration; the event loop resumes by itself.
                info!("Connection recovered; resuming normal operation");
            })),
    );
    background.push(monitor.spawn(shutdown_rx.clone()));

    let router = EventRouter::new(Arc::clone(&api), Arc::clone(&settings), dispatcher);
    let router_handle = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = router.run(rx).await {
                error!(error = %e, "Event router exited with error");
            }
        })
    };

    info!("SakaiBot is running; press Ctrl+C to stop");
    wait_for_shutdown_signal().await;
    info!("Shutdown requested");

    // Ordering: stop intake first, drain, then release the lock last.
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(SHUTDOWN_GRACE, router_handle).await.is_err() {
        warn!("Event router did not stop within the grace period");
    }
    for handle in background {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("A background task did not stop within the grace period");
        }
    }

    if let Err(e) = settings.save() {
        warn!(error = %e, "Could not save settings on shutdown");
    }
    cache.persist();
    metrics.emit("shutdown");
    lock.release();
    info!("SakaiBot stopped");
    Ok(())
}

fn provider_label(config: &Config) -> &'static str {
    match config.llm.provider {
        sakaibot::config::LlmProviderKind::Gemini => "Gemini",
        sakaibot::config::LlmProviderKind::Openrouter => "OpenRouter",
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
