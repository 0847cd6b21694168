//! Local throttling and mutual exclusion: sliding-window rate limiting,
//! dependency circuit breakers, and per-chat analysis slots.

pub mod chat_slots;
pub mod circuit;
pub mod rate_limit;

pub use chat_slots::{AnalysisSlots, SlotGuard};
pub use circuit::{CircuitBreaker, CircuitState};
pub use rate_limit::RateLimiter;
