//! SakaiBot - Telegram userbot that dispatches slash-commands to AI backends

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod jobs;
pub mod limits;
pub mod lock;
pub mod metrics;
pub mod prompts;
pub mod providers;
pub mod settings;
pub mod telegram;
pub mod utils;

pub use commands::{Command, ParserLimits};
pub use config::Config;
pub use dispatch::{AiClient, CommandDispatcher, DispatchRequest, DispatcherParts, MessageSender};
pub use error::{ProviderError, Result, SakaiError};
pub use gate::{classify, Classification, CONFIRMATION_KEYWORD};
pub use jobs::{Job, JobHandler, JobQueue, JobStatus, Lane};
pub use limits::{AnalysisSlots, CircuitBreaker, RateLimiter};
pub use lock::InstanceLock;
pub use metrics::Metrics;
pub use providers::{ImageGenerator, ImageModel, KeyPool, Synthesizer, TextProvider, Transcriber};
pub use settings::{CommandMap, Settings, SettingsStore, TargetGroup};
pub use telegram::{
    ConnectionHealthMonitor, EntityCache, EventRouter, MessageEvent, TelegramApi,
};
