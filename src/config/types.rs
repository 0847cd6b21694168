//! Configuration type definitions.
//!
//! All types implement serde traits for JSON serialization and have sensible
//! defaults, so a partially filled config file loads cleanly.

use serde::{Deserialize, Serialize};

/// Main configuration struct for SakaiBot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Telegram account credentials and session
    pub telegram: TelegramConfig,
    /// Text LLM provider selection and keys
    pub llm: LlmConfig,
    /// Speech-to-text backend
    pub stt: SttConfig,
    /// Text-to-speech backend
    pub tts: TtsConfig,
    /// Image generation workers
    pub image: ImageConfig,
    /// Local limits (rate limiting, analyze caps)
    pub limits: LimitsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Connection health monitoring
    pub health: HealthConfig,
    /// Deployment environment marker ("development" or "production")
    pub environment: String,
    /// Verbose diagnostics flag
    pub debug: bool,
}

/// Telegram MTProto account configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// API id from my.telegram.org
    pub api_id: i32,
    /// API hash from my.telegram.org
    pub api_hash: String,
    /// Phone number of the owner account (international format)
    pub phone: String,
    /// Session file name under the data directory
    pub session_name: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_id: 0,
            api_hash: String::new(),
            phone: String::new(),
            session_name: "sakaibot".to_string(),
        }
    }
}

/// Which text LLM backend serves AI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    Gemini,
    Openrouter,
}

/// Text LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Selected provider
    pub provider: LlmProviderKind,
    /// Model name for the selected provider
    pub model: String,
    /// Ordered credential list; rotation starts at the first entry
    pub api_keys: Vec<String>,
    /// Seconds a key stays in cooldown after a transient failure
    pub cooldown_seconds: u64,
    /// Response token budget
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Gemini,
            model: "gemini-2.5-flash".to_string(),
            api_keys: Vec::new(),
            cooldown_seconds: 60,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Transcription endpoint URL
    pub endpoint: String,
    /// Optional API key sent as a Bearer token
    pub api_key: Option<String>,
    /// Path to the audio transcoder binary
    pub ffmpeg_path: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Synthesis endpoint URL
    pub endpoint: String,
    /// Optional API key sent as a Bearer token
    pub api_key: Option<String>,
    /// Default voice
    pub voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            voice: "fa-IR-DilaraNeural".to_string(),
        }
    }
}

/// Image generation worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ImageConfig {
    /// Flux worker base URL (GET with `?prompt=`)
    pub flux_url: Option<String>,
    /// SDXL worker base URL (POST with JSON body)
    pub sdxl_url: Option<String>,
    /// SDXL Bearer token
    pub sdxl_api_key: Option<String>,
    /// Per-request generation timeout in seconds
    pub timeout_seconds: u64,
}

/// Local throttling and sizing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max AI commands per principal per window
    pub rate_limit_max: u32,
    /// Rate-limit window in seconds
    pub rate_limit_window_seconds: u64,
    /// Upper bound for `/analyze` and `/tellme` history depth
    pub max_analyze_messages: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: 10,
            rate_limit_window_seconds: 60,
            max_analyze_messages: 5000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter (overridden by `RUST_LOG`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Connection health monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between liveness probes
    pub interval_seconds: u64,
    /// Base reconnect backoff in seconds
    pub base_retry_seconds: u64,
    /// Backoff cap in seconds
    pub max_retry_seconds: u64,
    /// Consecutive failures before the restart hook fires
    pub restart_hook_threshold: u32,
    /// External command restarting network-side helpers, e.g.
    /// ["systemctl", "restart", "xray", "redsocks"]
    pub restart_hook: Vec<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 120,
            base_retry_seconds: 5,
            max_retry_seconds: 300,
            restart_hook_threshold: 3,
            restart_hook: Vec::new(),
        }
    }
}
