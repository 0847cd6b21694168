//! Connection health monitoring with auto-recovery.
//!
//! A periodic "who am I" probe detects dead connections that the client
//! itself has not noticed. Failures escalate: reconnect with exponential
//! backoff, and after enough consecutive failures an external restart hook
//! (typically restarting proxy services) runs before the next attempt.

use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::HealthConfig;
use crate::metrics::Metrics;
use crate::telegram::TelegramApi;

/// Probe timeout; a liveness check must never hang the loop.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for the external restart hook.
const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Invoked synchronously from the monitor loop after a successful recovery.
pub type RecoveryCallback = Box<dyn Fn() + Send + Sync>;

pub struct ConnectionHealthMonitor {
    api: Arc<dyn TelegramApi>,
    metrics: Arc<Metrics>,
    on_recovery: Option<RecoveryCallback>,
    consecutive_failures: AtomicU32,

    interval: Duration,
    initial_delay: Duration,
    base_retry: Duration,
    max_retry: Duration,
    hook_settle: Duration,
    hook_threshold: u32,
    restart_hook: Vec<String>,
}

impl ConnectionHealthMonitor {
    pub fn new(api: Arc<dyn TelegramApi>, config: &HealthConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            api,
            metrics,
            on_recovery: None,
            consecutive_failures: AtomicU32::new(0),
            interval: Duration::from_secs(config.interval_seconds),
            initial_delay: Duration::from_secs(30),
            base_retry: Duration::from_secs(config.base_retry_seconds),
            max_retry: Duration::from_secs(config.max_retry_seconds),
            hook_settle: Duration::from_secs(5),
            hook_threshold: config.restart_hook_threshold,
            restart_hook: config.restart_hook.clone(),
        }
    }

    /// Override every delay; test support.
    pub fn with_timings(
        mut self,
        interval: Duration,
        initial_delay: Duration,
        base_retry: Duration,
        max_retry: Duration,
        hook_settle: Duration,
    ) -> Self {
        self.interval = interval;
        self.initial_delay = initial_delay;
        self.base_retry = base_retry;
        self.max_retry = max_retry;
        self.hook_settle = hook_settle;
        self
    }

    pub fn with_recovery_callback(mut self, callback: RecoveryCallback) -> Self {
        self.on_recovery = Some(callback);
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures() == 0
    }

    /// Spawn the monitoring loop.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                "Connection health monitor started"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.initial_delay) => {}
                _ = shutdown.changed() => return,
            }
            loop {
                self.check_once(&mut shutdown).await;
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Connection health monitor stopping");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// One probe + failure handling round.
    pub async fn check_once(&self, shutdown: &mut watch::Receiver<bool>) {
        if self.probe().await {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        match failures {
            0..=2 => info!(failures, "Connection check failed"),
            3..=4 => warn!(failures, "Connection health degraded"),
            _ => error!(failures, "Connection health critical"),
        }

        if self.attempt_recovery(failures, shutdown).await {
            info!(failures, "Connection recovered");
            self.consecutive_failures.store(0, Ordering::SeqCst);
            self.metrics.record_reconnect();
            if let Some(callback) = &self.on_recovery {
                callback();
            }
        }
    }

    async fn probe(&self) -> bool {
        if !self.api.is_connected() {
            warn!("Client reports disconnected state");
            return false;
        }
        match tokio::time::timeout(PROBE_TIMEOUT, self.api.me()).await {
            Ok(Ok(me)) => {
                debug!(user = %me.first_name, "Health check OK");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Health check failed");
                false
            }
            Err(_) => {
                warn!("Health check timed out");
                false
            }
        }
    }

    async fn attempt_recovery(&self, failures: u32, shutdown: &mut watch::Receiver<bool>) -> bool {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self
            .base_retry
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_retry);
        info!(delay_secs = delay.as_secs_f64(), "Attempting recovery");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return false,
        }

        if failures >= self.hook_threshold && !self.restart_hook.is_empty() {
            warn!(failures, "Running external restart hook");
            self.run_restart_hook().await;
            tokio::time::sleep(self.hook_settle).await;
        }

        if !self.api.is_connected() {
            info!("Reconnecting to Telegram");
            if let Err(e) = self.api.reconnect().await {
                error!(error = %e, "Reconnect failed");
                return false;
            }
        }

        match tokio::time::timeout(PROBE_TIMEOUT, self.api.me()).await {
            Ok(Ok(me)) => {
                info!(user = %me.first_name, "Reconnected and verified");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "Recovery verification failed");
                false
            }
            Err(_) => {
                error!("Recovery verification timed out");
                false
            }
        }
    }

    async fn run_restart_hook(&self) {
        let Some((program, args)) = self.restart_hook.split_first() else {
            return;
        };
        let result = tokio::time::timeout(
            HOOK_TIMEOUT,
            tokio::process::Command::new(program)
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                info!("Restart hook completed");
            }
            Ok(Ok(output)) => {
                warn!(
                    code = output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "Restart hook exited nonzero"
                );
            }
            Ok(Err(e)) => {
                // Hook failures never stop the monitor.
                warn!(error = %e, "Could not run restart hook");
            }
            Err(_) => {
                error!("Restart hook timed out");
            }
        }
    }
}
