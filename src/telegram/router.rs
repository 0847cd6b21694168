//! Event router: from raw client events to dispatcher tasks.
//!
//! Pulls events off the Telegram capability, assigns a correlation id,
//! resolves the reply target when the confirm flow needs it, classifies
//! through the authorization gate, and fans admitted events onto worker
//! tasks. Unclassified events are dropped without a trace of a reply.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dispatch::{CommandDispatcher, DispatchRequest};
use crate::error::Result;
use crate::gate::{self, Classification};
use crate::settings::SettingsStore;
use crate::telegram::{MessageEvent, TelegramApi};
use crate::utils::new_correlation_id;

/// How long in-flight dispatcher tasks get to finish on shutdown.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

pub struct EventRouter {
    api: Arc<dyn TelegramApi>,
    settings: Arc<SettingsStore>,
    dispatcher: Arc<CommandDispatcher>,
}

impl EventRouter {
    pub fn new(
        api: Arc<dyn TelegramApi>,
        settings: Arc<SettingsStore>,
        dispatcher: Arc<CommandDispatcher>,
    ) -> Self {
        Self {
            api,
            settings,
            dispatcher,
        }
    }

    /// Run until the event stream ends or shutdown is signalled, then drain
    /// in-flight handlers within a grace period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut workers: JoinSet<()> = JoinSet::new();
        info!("Event router started");

        loop {
            // Reap finished handlers without blocking.
            while workers.try_join_next().is_some() {}

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Event router stopping; draining handlers");
                        break;
                    }
                }
                event = self.api.next_event() => {
                    match event {
                        Ok(Some(event)) => {
                            if let Some(request) = self.resolve(event).await {
                                let dispatcher = Arc::clone(&self.dispatcher);
                                workers.spawn(async move {
                                    dispatcher.handle(request).await;
                                });
                            }
                        }
                        Ok(None) => {
                            info!("Event stream ended");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Event stream error");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }

        let drain = async {
            while workers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
            warn!("Drain grace elapsed; aborting remaining handlers");
            workers.abort_all();
        }
        Ok(())
    }

    /// Classify one event; `None` means "drop silently".
    pub async fn resolve(&self, event: MessageEvent) -> Option<DispatchRequest> {
        if event.text.is_empty() {
            return None;
        }

        // Fetch the reply target only when the text is the confirmation
        // keyword; classification itself stays pure.
        let replied = if event.outgoing && gate::is_confirmation(&event.text) {
            match event.reply_to {
                Some(reply_id) => self
                    .api
                    .get_message(event.chat_id, reply_id)
                    .await
                    .ok()
                    .flatten(),
                None => None,
            }
        } else {
            None
        };

        let settings = self.settings.snapshot();
        let classification = gate::classify(&event, replied.as_ref(), &settings.authorized_peers);
        let correlation_id = new_correlation_id();

        match classification {
            Classification::Ignore => {
                debug!(chat_id = event.chat_id, "Event ignored");
                None
            }
            Classification::ConfirmFlow => {
                let command = replied?;
                info!(
                    correlation_id = %correlation_id,
                    chat_id = event.chat_id,
                    "Confirm flow promoted a quoted command"
                );
                Some(DispatchRequest {
                    correlation_id,
                    classification,
                    command,
                    confirm_message_id: Some(event.message_id),
                })
            }
            Classification::OwnerDirect | Classification::AuthorizedDirect => {
                info!(
                    correlation_id = %correlation_id,
                    chat_id = event.chat_id,
                    classification = ?classification,
                    "Event admitted"
                );
                Some(DispatchRequest {
                    correlation_id,
                    classification,
                    command: event,
                    confirm_message_id: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ParserLimits;
    use crate::dispatch::{AiClient, DispatcherParts};
    use crate::jobs::JobQueue;
    use crate::limits::{AnalysisSlots, CircuitBreaker, RateLimiter};
    use crate::metrics::Metrics;
    use crate::providers::{KeyPool, Transcriber};
    use crate::settings::SettingsStore;
    use crate::telegram::testing::FakeTelegram;
    use crate::telegram::EntityCache;

    struct NullProvider;

    #[async_trait::async_trait]
    impl crate::providers::TextProvider for NullProvider {
        async fn complete(
            &self,
            _request: &crate::providers::ChatRequest,
            _api_key: &str,
        ) -> Result<String> {
            Ok("ok".into())
        }
        fn name(&self) -> &str {
            "null"
        }
        fn default_model(&self) -> &str {
            "null-model"
        }
    }

    fn router(api: Arc<FakeTelegram>, settings: Arc<SettingsStore>) -> EventRouter {
        let metrics = Arc::new(Metrics::new());
        let ai_breaker = Arc::new(CircuitBreaker::with_defaults("ai"));
        let keypool = Arc::new(
            KeyPool::new(vec!["k1".into()], Duration::from_secs(60), "test").unwrap(),
        );
        let ai = Arc::new(AiClient::new(
            Arc::new(NullProvider),
            keypool,
            Arc::clone(&ai_breaker),
            Arc::clone(&metrics),
            "m",
            256,
            0.7,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(DispatcherParts {
            api: api.clone(),
            settings: Arc::clone(&settings),
            ai,
            rate_limiter: Arc::new(RateLimiter::new(10, Duration::from_secs(60))),
            ai_breaker,
            tg_breaker: Arc::new(CircuitBreaker::with_defaults("telegram")),
            slots: Arc::new(AnalysisSlots::new()),
            jobs: Arc::new(JobQueue::new()),
            transcriber: Arc::new(Transcriber::new(Default::default())),
            cache: Arc::new(EntityCache::new(None)),
            metrics,
            limits: ParserLimits::default(),
            temp_dir: std::env::temp_dir(),
        }));
        EventRouter::new(api, settings, dispatcher)
    }

    fn store() -> Arc<SettingsStore> {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json"));
        // Leak the tempdir so the path stays writable for the test duration.
        std::mem::forget(dir);
        Arc::new(store)
    }

    fn event(outgoing: bool, sender: i64, text: &str, reply_to: Option<i32>) -> MessageEvent {
        MessageEvent {
            chat_id: 10,
            message_id: 500,
            sender_id: sender,
            outgoing,
            text: text.into(),
            reply_to,
            is_voice: false,
        }
    }

    #[tokio::test]
    async fn test_resolve_owner_command() {
        let api = Arc::new(FakeTelegram::new());
        let router = router(api, store());
        let request = router.resolve(event(true, 1, "/help", None)).await.unwrap();
        assert_eq!(request.classification, Classification::OwnerDirect);
        assert_eq!(request.command.text, "/help");
        assert_eq!(request.correlation_id.len(), 8);
    }

    #[tokio::test]
    async fn test_resolve_drops_plain_text() {
        let api = Arc::new(FakeTelegram::new());
        let router = router(api, store());
        assert!(router.resolve(event(true, 1, "hello", None)).await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_drops_unauthorized_incoming() {
        let api = Arc::new(FakeTelegram::new());
        let router = router(api, store());
        assert!(router
            .resolve(event(false, 999, "/prompt=hi", None))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_resolve_authorized_incoming() {
        let api = Arc::new(FakeTelegram::new());
        let settings = store();
        settings.add_authorized_peer(55).unwrap();
        let router = router(api, settings);
        let request = router
            .resolve(event(false, 55, "/prompt=hi", None))
            .await
            .unwrap();
        assert_eq!(request.classification, Classification::AuthorizedDirect);
    }

    #[tokio::test]
    async fn test_resolve_confirm_flow_fetches_replied() {
        let api = Arc::new(FakeTelegram::new());
        api.put_message(event(false, 999, "/prompt=do it", None));
        // The stored message has id 500; the confirm reply points at it.
        let router = router(api, store());
        let confirm = MessageEvent {
            message_id: 501,
            reply_to: Some(500),
            ..event(true, 1, "confirm", None)
        };
        let request = router.resolve(confirm).await.unwrap();
        assert_eq!(request.classification, Classification::ConfirmFlow);
        assert_eq!(request.command.text, "/prompt=do it");
        assert_eq!(request.confirm_message_id, Some(501));
    }

    #[tokio::test]
    async fn test_resolve_confirm_to_plain_message_dropped() {
        let api = Arc::new(FakeTelegram::new());
        api.put_message(event(false, 999, "no command here", None));
        let router = router(api, store());
        let confirm = MessageEvent {
            message_id: 501,
            reply_to: Some(500),
            ..event(true, 1, "confirm", None)
        };
        assert!(router.resolve(confirm).await.is_none());
    }

    #[tokio::test]
    async fn test_run_drains_and_stops() {
        let api = Arc::new(FakeTelegram::new());
        api.push_event(event(true, 1, "/help", None));
        let router = router(api.clone(), store());
        let (_tx, rx) = watch::channel(false);

        // The fake's stream ends after the queued event, so run() returns
        // once everything drained.
        tokio::time::timeout(Duration::from_secs(5), router.run(rx))
            .await
            .expect("router should stop when the stream ends")
            .unwrap();

        // /help edited the owner's message in place.
        assert!(!api.edits().is_empty());
    }
}
