//! Multi-credential pool with auto-rotation on rate limits.
//!
//! Keys rotate round-robin on failure: a 429 puts the current key into a
//! short cooldown, a daily-quota hit parks it until the provider's quota
//! reset (midnight in the reference timezone — Gemini resets RPD at midnight
//! Pacific). Success heals a key's transient state but never clears a daily
//! exhaustion; only the clock does that.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::America::Los_Angeles;
use tracing::{info, warn};

use crate::utils::mask_key;

/// Default cooldown for a key after a transient failure.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Healthy,
    Cooling,
    DayExhausted,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Healthy => "healthy",
            KeyStatus::Cooling => "cooling",
            KeyStatus::DayExhausted => "day_exhausted",
        }
    }
}

#[derive(Debug, Clone)]
struct KeyState {
    key: String,
    status: KeyStatus,
    failed_at: Option<Instant>,
    error_count: u32,
    last_used: Option<Instant>,
    exhausted_until: Option<DateTime<Utc>>,
}

impl KeyState {
    fn new(key: String) -> Self {
        Self {
            key,
            status: KeyStatus::Healthy,
            failed_at: None,
            error_count: 0,
            last_used: None,
            exhausted_until: None,
        }
    }

    /// A key is usable when it is not day-exhausted and either healthy or
    /// past its transient cooldown. A lapsed exhaustion window is cleared
    /// lazily here.
    fn is_usable(&mut self, cooldown: Duration, now_utc: DateTime<Utc>) -> bool {
        if let Some(until) = self.exhausted_until {
            if now_utc < until {
                return false;
            }
            self.exhausted_until = None;
            self.status = KeyStatus::Healthy;
        }

        if self.status == KeyStatus::Healthy {
            return true;
        }
        match self.failed_at {
            Some(failed_at) => failed_at.elapsed() >= cooldown,
            None => true,
        }
    }

    fn mark_healthy(&mut self) {
        // Deliberately leaves exhausted_until alone: daily quotas release
        // only at the provider's reset time.
        self.status = KeyStatus::Healthy;
        self.error_count = 0;
        self.last_used = Some(Instant::now());
    }

    fn mark_failed(&mut self) {
        self.status = KeyStatus::Cooling;
        self.failed_at = Some(Instant::now());
        self.error_count += 1;
    }
}

/// Snapshot of one key's health, for `/status` rendering.
#[derive(Debug, Clone)]
pub struct KeyReport {
    pub index: usize,
    pub masked_key: String,
    pub status: KeyStatus,
    pub error_count: u32,
    pub is_current: bool,
    pub usable: bool,
}

struct PoolInner {
    keys: Vec<KeyState>,
    current_index: usize,
}

/// Ordered credential pool with a serialized current index.
pub struct KeyPool {
    inner: Mutex<PoolInner>,
    cooldown: Duration,
    provider_name: String,
}

impl KeyPool {
    /// Build a pool from the configured key list; empty entries are dropped.
    pub fn new(api_keys: Vec<String>, cooldown: Duration, provider_name: &str) -> Option<Self> {
        let keys: Vec<KeyState> = api_keys
            .into_iter()
            .filter(|k| !k.is_empty())
            .map(KeyState::new)
            .collect();
        if keys.is_empty() {
            return None;
        }
        info!(
            provider = provider_name,
            keys = keys.len(),
            cooldown_secs = cooldown.as_secs(),
            "Key pool initialized"
        );
        Some(Self {
            inner: Mutex::new(PoolInner {
                keys,
                current_index: 0,
            }),
            cooldown,
            provider_name: provider_name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The credential at the current index if usable; otherwise the first
    /// usable credential scanning forward with wrap-around. `None` iff every
    /// credential is unusable right now — callers must fail, not block.
    pub fn current(&self) -> Option<String> {
        self.current_at(Utc::now())
    }

    fn current_at(&self, now_utc: DateTime<Utc>) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let total = inner.keys.len();
        let start = inner.current_index;
        for offset in 0..total {
            let idx = (start + offset) % total;
            if inner.keys[idx].is_usable(self.cooldown, now_utc) {
                if idx != inner.current_index {
                    inner.current_index = idx;
                    info!(
                        provider = %self.provider_name,
                        key = idx + 1,
                        total,
                        "Switched to next usable key"
                    );
                }
                return Some(inner.keys[idx].key.clone());
            }
        }
        warn!(provider = %self.provider_name, "All API keys are currently unusable");
        None
    }

    /// Mark the current credential as having served a successful call.
    pub fn mark_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.current_index;
        inner.keys[idx].mark_healthy();
    }

    /// Put the current credential into cooldown after a transient failure or
    /// short-term rate limit. Returns whether any other credential remains
    /// usable.
    pub fn mark_transient_failure(&self, is_rate_limit: bool) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.current_index;
        let total = inner.keys.len();
        inner.keys[idx].mark_failed();
        warn!(
            provider = %self.provider_name,
            key = idx + 1,
            total,
            rate_limit = is_rate_limit,
            masked = %mask_key(&inner.keys[idx].key),
            "Key entered cooldown"
        );
        Self::any_usable(&mut inner, self.cooldown, now)
    }

    /// Park the current credential until the next reference-timezone
    /// midnight. Returns whether any other credential remains usable.
    pub fn mark_day_exhausted(&self) -> bool {
        self.mark_day_exhausted_at(Utc::now())
    }

    fn mark_day_exhausted_at(&self, now_utc: DateTime<Utc>) -> bool {
        let until = next_reference_midnight_utc(now_utc);
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.current_index;
        let total = inner.keys.len();
        {
            let key = &mut inner.keys[idx];
            key.status = KeyStatus::DayExhausted;
            key.failed_at = Some(Instant::now());
            key.error_count += 1;
            key.exhausted_until = Some(until);
        }
        warn!(
            provider = %self.provider_name,
            key = idx + 1,
            total,
            until = %until,
            masked = %mask_key(&inner.keys[idx].key),
            "Key exhausted for the day"
        );
        Self::any_usable(&mut inner, self.cooldown, now_utc)
    }

    /// Clear daily exhaustion on every key and return to index 0.
    ///
    /// Different models under one provider have independent daily quotas, so
    /// a model switch gives every key a fresh chance.
    pub fn reset_for_model_switch(&self) {
        let mut inner = self.inner.lock().unwrap();
        for key in &mut inner.keys {
            key.exhausted_until = None;
            key.error_count = 0;
            key.status = KeyStatus::Healthy;
        }
        inner.current_index = 0;
        info!(
            provider = %self.provider_name,
            keys = inner.keys.len(),
            "Reset all keys for model switch"
        );
    }

    /// `true` when no credential is usable right now.
    pub fn all_exhausted(&self) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        !Self::any_usable(&mut inner, self.cooldown, now)
    }

    /// Per-key health snapshot with masked keys.
    pub fn report(&self) -> Vec<KeyReport> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let current = inner.current_index;
        let cooldown = self.cooldown;
        inner
            .keys
            .iter_mut()
            .enumerate()
            .map(|(index, key)| KeyReport {
                index,
                masked_key: mask_key(&key.key),
                status: key.status,
                error_count: key.error_count,
                is_current: index == current,
                usable: key.is_usable(cooldown, now),
            })
            .collect()
    }

    fn any_usable(inner: &mut PoolInner, cooldown: Duration, now_utc: DateTime<Utc>) -> bool {
        inner
            .keys
            .iter_mut()
            .any(|k| k.is_usable(cooldown, now_utc))
    }
}

/// The next wall-clock midnight in the provider's reference timezone
/// (America/Los_Angeles), expressed in UTC.
pub fn next_reference_midnight_utc(now_utc: DateTime<Utc>) -> DateTime<Utc> {
    let now_local = now_utc.with_timezone(&Los_Angeles);
    let next_day = now_local.date_naive() + chrono::Days::new(1);
    let midnight = next_day.and_hms_opt(0, 0, 0).unwrap();
    // DST gaps cannot land on midnight in this zone, but stay defensive
    // about ambiguous local times.
    match Los_Angeles.from_local_datetime(&midnight) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        chrono::LocalResult::None => (now_utc + chrono::Duration::hours(24))
            .with_timezone(&Utc),
    }
}
