//! Per-chat mutual exclusion for history-analysis commands.
//!
//! Analysis consumes large context windows; running two analyses on the same
//! chat wastes quota and interleaves status edits. Only one slot exists per
//! chat: a second request is rejected immediately, never queued. A reaper
//! frees slots whose owner never finished.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Wall-clock limit on one analysis before its slot is reaped.
pub const SLOT_TIMEOUT: Duration = Duration::from_secs(300);
/// Reaper sweep interval.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct SlotEntry {
    request_id: String,
    user_id: i64,
    kind: String,
    started_at: Instant,
}

/// At-most-one in-flight analysis per chat.
pub struct AnalysisSlots {
    active: Mutex<HashMap<i64, SlotEntry>>,
    timeout: Duration,
}

impl AnalysisSlots {
    pub fn new() -> Self {
        Self::with_timeout(SLOT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Try to claim the slot for `chat_id`.
    ///
    /// On success the returned guard releases the slot when dropped. On
    /// rejection the `Err` carries the user-facing reason.
    pub fn try_begin(
        &self,
        chat_id: i64,
        user_id: i64,
        kind: &str,
    ) -> std::result::Result<SlotGuard<'_>, String> {
        let mut active = self.active.lock().unwrap();
        if let Some(existing) = active.get(&chat_id) {
            info!(
                chat_id,
                active_request = %existing.request_id,
                "Rejected analysis request; slot busy"
            );
            return Err(
                "⏳ Analysis in progress\n\nAnother analysis is currently running for this \
                 chat. Please wait for it to complete before starting a new one."
                    .to_string(),
            );
        }

        let request_id = format!("analyze_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        active.insert(
            chat_id,
            SlotEntry {
                request_id: request_id.clone(),
                user_id,
                kind: kind.to_string(),
                started_at: Instant::now(),
            },
        );
        info!(chat_id, user_id, kind, request_id = %request_id, "Analysis slot claimed");

        Ok(SlotGuard {
            slots: self,
            chat_id,
            request_id,
            done: false,
        })
    }

    /// Release a slot; `succeeded` only affects the log severity.
    fn end(&self, chat_id: i64, request_id: &str, succeeded: bool) {
        let mut active = self.active.lock().unwrap();
        match active.get(&chat_id) {
            // The reaper may have freed the slot and another request claimed
            // it; only remove an entry this guard still owns.
            Some(entry) if entry.request_id == request_id => {
                let entry = active.remove(&chat_id).unwrap();
                let duration = entry.started_at.elapsed().as_secs_f64();
                if succeeded {
                    info!(chat_id, request_id, duration_secs = duration, "Analysis completed");
                } else {
                    warn!(chat_id, request_id, duration_secs = duration, "Analysis failed");
                }
            }
            _ => {
                warn!(chat_id, request_id, "Analysis slot already released");
            }
        }
    }

    /// Remove entries older than the timeout. Returns how many were reaped.
    pub fn reap_stale(&self) -> usize {
        let mut active = self.active.lock().unwrap();
        let before = active.len();
        active.retain(|chat_id, entry| {
            let stale = entry.started_at.elapsed() >= self.timeout;
            if stale {
                warn!(
                    chat_id,
                    request_id = %entry.request_id,
                    user_id = entry.user_id,
                    kind = %entry.kind,
                    duration_secs = entry.started_at.elapsed().as_secs_f64(),
                    "Reaped stale analysis slot"
                );
            }
            !stale
        });
        before - active.len()
    }

    /// Whether a chat currently has an analysis in flight.
    pub fn is_busy(&self, chat_id: i64) -> bool {
        self.active.lock().unwrap().contains_key(&chat_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Spawn the background reaper; returns its handle for shutdown joins.
    pub fn spawn_reaper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let slots = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip immediate tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = slots.reap_stale();
                        if reaped > 0 {
                            info!(reaped, "Analysis slot cleanup removed stale entries");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Default for AnalysisSlots {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII ownership of one chat's analysis slot. Drop releases the slot as
/// "failed" unless [`SlotGuard::finish`] ran first.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    slots: &'a AnalysisSlots,
    chat_id: i64,
    request_id: String,
    done: bool,
}

impl SlotGuard<'_> {
    /// Release the slot recording a successful analysis.
    pub fn finish(mut self) {
        self.done = true;
        self.slots.end(self.chat_id, &self.request_id, true);
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.slots.end(self.chat_id, &self.request_id, false);
        }
    }
}
