//! End-to-end scenarios driven through the router and dispatcher against an
//! in-memory Telegram double.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use sakaibot::commands::ParserLimits;
use sakaibot::dispatch::{AiClient, CommandDispatcher, DispatcherParts};
use sakaibot::error::{ProviderError, Result, SakaiError};
use sakaibot::gate::Classification;
use sakaibot::jobs::{Job, JobHandler, JobQueue, Lane};
use sakaibot::limits::{AnalysisSlots, CircuitBreaker, RateLimiter};
use sakaibot::metrics::Metrics;
use sakaibot::providers::{ChatRequest, KeyPool, KeyStatus, TextProvider, Transcriber};
use sakaibot::settings::{SettingsStore, TargetGroup};
use sakaibot::telegram::testing::FakeTelegram;
use sakaibot::telegram::{
    ConnectionHealthMonitor, EntityCache, EventRouter, HistoryMessage, MessageEvent,
};

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

/// Text provider that pops one scripted response per call, with an optional
/// per-call delay to create overlap windows.
struct ScriptedProvider {
    script: Mutex<Vec<std::result::Result<String, ProviderError>>>,
    delay: Duration,
}

impl ScriptedProvider {
    fn answering(response: &str) -> Self {
        Self {
            script: Mutex::new(vec![Ok(response.to_string())]),
            delay: Duration::ZERO,
        }
    }

    fn with_script(script: Vec<std::result::Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script),
            delay: Duration::ZERO,
        }
    }

    fn slow(response: &str, delay: Duration) -> Self {
        Self {
            script: Mutex::new(vec![Ok(response.to_string())]),
            delay,
        }
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    async fn complete(&self, _request: &ChatRequest, _api_key: &str) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok("scripted default".to_string())
            } else {
                script.remove(0)
            }
        };
        next.map_err(SakaiError::Provider)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

/// Lane worker writing a marker file after an optional delay.
struct StubWorker {
    dir: PathBuf,
    delay: Duration,
    completions: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl JobHandler for StubWorker {
    async fn run(&self, job: &Job) -> Result<PathBuf> {
        tokio::time::sleep(self.delay).await;
        let path = self.dir.join(format!("{}.png", job.id));
        std::fs::write(&path, job.prompt.as_bytes())?;
        self.completions.lock().unwrap().push(job.prompt.clone());
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    api: Arc<FakeTelegram>,
    settings: Arc<SettingsStore>,
    router: EventRouter,
    dispatcher: Arc<CommandDispatcher>,
    jobs: Arc<JobQueue>,
    keypool: Arc<KeyPool>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new(provider: ScriptedProvider, keys: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeTelegram::new());
        let settings = Arc::new(SettingsStore::load(dir.path().join("settings.json")));
        let metrics = Arc::new(Metrics::new());
        let ai_breaker = Arc::new(CircuitBreaker::with_defaults("ai"));
        let keypool = Arc::new(
            KeyPool::new(
                keys.iter().map(|k| k.to_string()).collect(),
                Duration::from_secs(60),
                "test",
            )
            .unwrap(),
        );
        let ai = Arc::new(AiClient::new(
            Arc::new(provider),
            Arc::clone(&keypool),
            Arc::clone(&ai_breaker),
            Arc::clone(&metrics),
            "test-model",
            1024,
            0.7,
        ));
        let jobs = Arc::new(JobQueue::new());
        let dispatcher = Arc::new(
            CommandDispatcher::new(DispatcherParts {
                api: Arc::clone(&api) as Arc<dyn sakaibot::telegram::TelegramApi>,
                settings: Arc::clone(&settings),
                ai,
                rate_limiter: Arc::new(RateLimiter::new(50, Duration::from_secs(60))),
                ai_breaker,
                tg_breaker: Arc::new(CircuitBreaker::with_defaults("telegram")),
                slots: Arc::new(AnalysisSlots::new()),
                jobs: Arc::clone(&jobs),
                transcriber: Arc::new(Transcriber::new(Default::default())),
                cache: Arc::new(EntityCache::new(None)),
                metrics,
                limits: ParserLimits { analyze_max: 5000 },
                temp_dir: dir.path().join("tmp"),
            })
            .with_job_timings(Duration::from_millis(10), Duration::from_secs(5)),
        );
        let router_api: Arc<dyn sakaibot::telegram::TelegramApi> =
            Arc::clone(&api) as Arc<dyn sakaibot::telegram::TelegramApi>;
        let router = EventRouter::new(router_api, Arc::clone(&settings), Arc::clone(&dispatcher));
        Self {
            api,
            settings,
            router,
            dispatcher,
            jobs,
            keypool,
            _dir: dir,
        }
    }

    /// Route one event through gate + dispatcher to completion.
    async fn deliver(&self, event: MessageEvent) -> bool {
        match self.router.resolve(event).await {
            Some(request) => {
                self.dispatcher.handle(request).await;
                true
            }
            None => false,
        }
    }
}

fn owner_command(chat_id: i64, message_id: i32, text: &str) -> MessageEvent {
    MessageEvent {
        chat_id,
        message_id,
        sender_id: 1,
        outgoing: true,
        text: text.to_string(),
        reply_to: None,
        is_voice: false,
    }
}

fn incoming(chat_id: i64, message_id: i32, sender_id: i64, text: &str) -> MessageEvent {
    MessageEvent {
        chat_id,
        message_id,
        sender_id,
        outgoing: false,
        text: text.to_string(),
        reply_to: None,
        is_voice: false,
    }
}

// ---------------------------------------------------------------------------
// S1 — prompt happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s1_prompt_happy_path() {
    let harness = Harness::new(ScriptedProvider::answering("hello"), &["k1"]);
    let command = owner_command(100, 7, "/prompt=say hi");

    assert!(harness.deliver(command).await);

    let sent = harness.api.sent();
    // Thinking placeholder replies to the command.
    assert_eq!(sent[0].text, "🤔 Thinking...");
    assert_eq!(sent[0].reply_to, Some(7));
    // The placeholder was edited to the response text.
    assert_eq!(harness.api.final_text(100, sent[0].id).unwrap(), "hello");
    // A terminal acknowledgement follows.
    let ack = sent.last().unwrap();
    assert!(ack.text.starts_with("✅ done - "));
    assert_eq!(ack.reply_to, Some(7));
}

// ---------------------------------------------------------------------------
// S2 — second analyze on the same chat is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s2_analyze_blocked_while_in_progress() {
    let harness = Arc::new(Harness::new(
        ScriptedProvider::slow("analysis result", Duration::from_millis(150)),
        &["k1"],
    ));
    harness.api.set_history(
        100,
        vec![HistoryMessage {
            sender_id: 5,
            outgoing: false,
            text: "hello there".into(),
            timestamp: chrono::Utc::now(),
        }],
    );
    harness.api.set_display_name(5, "Sina");

    let first = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness.deliver(owner_command(100, 7, "/analyze=100")).await
        })
    };
    // Let the first analysis claim the slot and start the slow AI call.
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.deliver(owner_command(100, 8, "/analyze=200")).await;
    first.await.unwrap();

    // The second command got the rejection reply.
    let rejection = harness
        .api
        .sent()
        .into_iter()
        .find(|m| m.reply_to == Some(8))
        .expect("second analyze should be answered");
    assert!(rejection.text.contains("Analysis in progress"));

    // Only one history fetch happened.
    assert_eq!(harness.api.history_fetches(), 1);
}

// ---------------------------------------------------------------------------
// S3 — key rotation on 429
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s3_key_rotation_on_rate_limit() {
    let harness = Harness::new(
        ScriptedProvider::with_script(vec![
            Err(ProviderError::RateLimit("429".into())),
            Ok("rotated answer".into()),
        ]),
        &["k1", "k2", "k3"],
    );

    harness
        .deliver(owner_command(100, 7, "/prompt=anything"))
        .await;

    let thinking_id = harness.api.sent()[0].id;
    assert_eq!(
        harness.api.final_text(100, thinking_id).unwrap(),
        "rotated answer"
    );

    let report = harness.keypool.report();
    assert_eq!(report[0].status, KeyStatus::Cooling);
    assert_eq!(report[1].status, KeyStatus::Healthy);
    assert!(report[1].is_current);
}

// ---------------------------------------------------------------------------
// S4 — image lanes: FIFO per lane, parallel across lanes, visible positions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s4_image_queue_positions_and_lane_order() {
    let harness = Arc::new(Harness::new(ScriptedProvider::answering("unused"), &["k1"]));
    let media_dir = tempfile::tempdir().unwrap();
    let completions = Arc::new(Mutex::new(Vec::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let flux_worker: Arc<dyn JobHandler> = Arc::new(StubWorker {
        dir: media_dir.path().to_path_buf(),
        delay: Duration::from_millis(120),
        completions: Arc::clone(&completions),
    });
    let sdxl_worker: Arc<dyn JobHandler> = Arc::new(StubWorker {
        dir: media_dir.path().to_path_buf(),
        delay: Duration::from_millis(10),
        completions: Arc::clone(&completions),
    });
    let _w1 = Arc::clone(&harness.jobs).spawn_worker(Lane::Flux, flux_worker, shutdown_rx.clone());
    let _w2 = Arc::clone(&harness.jobs).spawn_worker(Lane::Sdxl, sdxl_worker, shutdown_rx.clone());

    let mut tasks = Vec::new();
    for (message_id, sender, text) in [
        (7, 10i64, "/image=flux/sunset"),
        (8, 11, "/image=flux/ocean"),
        (9, 12, "/image=sdxl/mountain"),
    ] {
        let harness = Arc::clone(&harness);
        let mut event = owner_command(100, message_id, text);
        event.sender_id = sender;
        tasks.push(tokio::spawn(async move { harness.deliver(event).await }));
        // Stagger so flux/sunset is in flight before flux/ocean arrives.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for task in tasks {
        task.await.unwrap();
    }
    let _ = shutdown_tx.send(true);

    // Per-lane FIFO: sunset finished before ocean; sdxl ran in parallel and
    // beat the second flux job.
    let done = completions.lock().unwrap().clone();
    let pos = |p: &str| done.iter().position(|x| x.contains(p)).unwrap();
    assert!(pos("sunset") < pos("ocean"));
    assert!(pos("mountain") < pos("ocean"));

    // Each command produced exactly one uploaded photo reply.
    let files = harness.api.files();
    assert_eq!(files.len(), 3);
    let replies: Vec<_> = files.iter().filter_map(|f| f.reply_to).collect();
    assert!(replies.contains(&7) && replies.contains(&8) && replies.contains(&9));

    // The queued flux job surfaced a queue position while waiting.
    let edits = harness.api.edits();
    assert!(
        edits.iter().any(|e| e.text.contains("Queue position")),
        "expected a queue-position status edit, got: {:?}",
        edits.iter().map(|e| &e.text).collect::<Vec<_>>()
    );

    // Status messages were deleted after delivery.
    assert_eq!(harness.api.deleted().len(), 3);
}

// ---------------------------------------------------------------------------
// S5 — categorization forward into a forum topic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s5_categorization_forward() {
    let harness = Harness::new(ScriptedProvider::answering("unused"), &["k1"]);
    harness
        .settings
        .set_target_group(Some(TargetGroup {
            id: -100555,
            is_forum: true,
            title: Some("Archive".into()),
        }))
        .unwrap();
    harness.settings.map_command(Some(42), "news").unwrap();

    // The message being categorized.
    harness.api.put_message(incoming(100, 31, 5, "today's headline"));

    let mut command = owner_command(100, 7, "/news");
    command.reply_to = Some(31);
    harness.deliver(command).await;

    let forwards = harness.api.forwards();
    assert_eq!(forwards.len(), 1);
    assert_eq!(forwards[0].from_chat, 100);
    assert_eq!(forwards[0].message_id, 31);
    assert_eq!(forwards[0].to_chat, -100555);
    assert_eq!(forwards[0].top_msg_id, Some(42));

    // Success is silent: no text reply.
    assert!(harness.api.sent().is_empty());
}

// ---------------------------------------------------------------------------
// S6 — confirm flow promotes an unauthorized peer's command
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s6_confirm_flow() {
    let harness = Harness::new(ScriptedProvider::answering("executed"), &["k1"]);
    harness.settings.add_authorized_peer(55).unwrap();

    // Authorized peer commands run directly.
    let direct = incoming(100, 40, 55, "/prompt=test");
    assert!(harness.deliver(direct).await);

    // An unauthorized peer's identical command is dropped.
    let foreign = incoming(100, 41, 99, "/prompt=test");
    assert!(!harness.deliver(foreign.clone()).await);

    // The owner replies "confirm" to the foreign command; it now executes
    // with owner authority and the confirm message is deleted.
    harness.api.put_message(foreign);
    let mut confirm = owner_command(100, 42, "confirm");
    confirm.reply_to = Some(41);
    let request = harness.router.resolve(confirm).await.unwrap();
    assert_eq!(request.classification, Classification::ConfirmFlow);
    harness.dispatcher.handle(request).await;

    assert!(harness.api.deleted().contains(&(100, 42)));
    // Two prompt executions happened in total (direct + confirmed).
    let acks: Vec<_> = harness
        .api
        .sent()
        .into_iter()
        .filter(|m| m.text.starts_with("✅ done"))
        .collect();
    assert_eq!(acks.len(), 2);
}

// ---------------------------------------------------------------------------
// S7 — health monitor escalation and restart hook
// ---------------------------------------------------------------------------

#[tokio::test]
async fn s7_health_recovery_escalation() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("hook_ran");

    let api = Arc::new(FakeTelegram::new());
    api.fail_me_probes(7);

    let config = sakaibot::config::HealthConfig {
        interval_seconds: 120,
        base_retry_seconds: 5,
        max_retry_seconds: 300,
        restart_hook_threshold: 3,
        restart_hook: vec!["touch".into(), marker.to_string_lossy().into_owned()],
    };
    let monitor_api: Arc<dyn sakaibot::telegram::TelegramApi> =
        Arc::clone(&api) as Arc<dyn sakaibot::telegram::TelegramApi>;
    let monitor = ConnectionHealthMonitor::new(monitor_api, &config, Arc::new(Metrics::new()))
    .with_timings(
        Duration::from_millis(20),
        Duration::from_millis(1),
        Duration::from_millis(1),
        Duration::from_millis(8),
        Duration::from_millis(1),
    );

    let (_tx, mut rx) = watch::channel(false);
    for _ in 0..3 {
        monitor.check_once(&mut rx).await;
    }

    // Three consecutive failures observed, hook fired at the threshold.
    assert!(monitor.consecutive_failures() >= 3);
    assert!(marker.exists(), "restart hook should have been invoked");

    // Scripted failures exhausted: the next round recovers.
    monitor.check_once(&mut rx).await;
    assert!(monitor.is_healthy());
}

// ---------------------------------------------------------------------------
// TTS lane delivers a voice note and cleans its temp file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tts_delivers_voice_note_and_cleans_up() {
    let harness = Harness::new(ScriptedProvider::answering("unused"), &["k1"]);
    let media_dir = tempfile::tempdir().unwrap();
    let completions = Arc::new(Mutex::new(Vec::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker: Arc<dyn JobHandler> = Arc::new(StubWorker {
        dir: media_dir.path().to_path_buf(),
        delay: Duration::from_millis(10),
        completions,
    });
    let _w = Arc::clone(&harness.jobs).spawn_worker(Lane::Tts, worker, shutdown_rx);

    harness
        .deliver(owner_command(100, 7, "/tts voice=fa-IR-FaridNeural salam"))
        .await;
    let _ = shutdown_tx.send(true);

    let files = harness.api.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].reply_to, Some(7));
    assert_eq!(files[0].kind, sakaibot::telegram::FileKind::VoiceNote);
    // The TTS lane deleted its temp audio file after delivery.
    assert!(!files[0].path.exists());
    // The status message is gone.
    assert_eq!(harness.api.deleted().len(), 1);
}

// ---------------------------------------------------------------------------
// STT validation paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stt_requires_a_voice_reply() {
    let harness = Harness::new(ScriptedProvider::answering("unused"), &["k1"]);

    // Not a reply at all.
    harness.deliver(owner_command(100, 7, "/stt")).await;
    let sent = harness.api.sent();
    assert!(sent[0].text.contains("must be used as a reply"));

    // Reply to a plain text message.
    harness.api.put_message(incoming(100, 30, 5, "just text"));
    let mut command = owner_command(100, 8, "/stt");
    command.reply_to = Some(30);
    harness.deliver(command).await;
    let replies = harness.api.sent();
    assert!(replies
        .iter()
        .any(|m| m.text.contains("not a voice message")));
}
