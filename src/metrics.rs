//! Process-wide counters surfaced by `/status` and logged on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// Lock-free counters; one instance lives in the supervisor.
#[derive(Debug)]
pub struct Metrics {
    pub commands_handled: AtomicU64,
    pub provider_calls: AtomicU64,
    pub provider_failures: AtomicU64,
    pub forwards: AtomicU64,
    pub reconnects: AtomicU64,
    pub errors: AtomicU64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            commands_handled: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
            provider_failures: AtomicU64::new(0),
            forwards: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_command(&self) {
        self.commands_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward(&self) {
        self.forwards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Emit current counters as one structured log line.
    pub fn emit(&self, reason: &str) {
        info!(
            event = "usage_summary",
            reason,
            commands = self.commands_handled.load(Ordering::Relaxed),
            provider_calls = self.provider_calls.load(Ordering::Relaxed),
            provider_failures = self.provider_failures.load(Ordering::Relaxed),
            forwards = self.forwards.load(Ordering::Relaxed),
            reconnects = self.reconnects.load(Ordering::Relaxed),
            errors = self.errors.load(Ordering::Relaxed),
            uptime_secs = self.uptime_secs(),
            "Usage metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
