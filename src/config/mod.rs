//! Configuration loading and saving.
//!
//! Configuration lives at `~/.sakaibot/config.json` and can be overridden
//! with `SAKAIBOT_*` environment variables, so containerized deployments can
//! run without a config file at all.

mod types;

pub use types::*;

use crate::error::{Result, SakaiError};
use std::path::PathBuf;

impl Config {
    /// The SakaiBot data directory (`~/.sakaibot`).
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sakaibot")
    }

    /// Path to the config file.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Path to the user settings file.
    pub fn settings_path() -> PathBuf {
        Self::dir().join("user_settings.json")
    }

    /// Path to the instance lock file.
    pub fn lock_path() -> PathBuf {
        Self::dir().join(".sakaibot.lock")
    }

    /// Directory for in-flight media; disposable between runs.
    pub fn temp_dir() -> PathBuf {
        Self::dir().join("tmp")
    }

    /// Path to the entity display-name cache.
    pub fn cache_path() -> PathBuf {
        Self::dir().join("entity_cache.json")
    }

    /// Load configuration from the default path with environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to the default path, creating the directory.
    pub fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject configurations that cannot possibly run.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.api_id == 0 || self.telegram.api_hash.is_empty() {
            return Err(SakaiError::Config(
                "telegram.api_id and telegram.api_hash are required".into(),
            ));
        }
        if self.telegram.phone.is_empty() {
            return Err(SakaiError::Config("telegram.phone is required".into()));
        }
        if self.llm.api_keys.iter().all(|k| k.is_empty()) {
            return Err(SakaiError::Config(
                "at least one llm.api_keys entry is required".into(),
            ));
        }
        Ok(())
    }

    /// Apply `SAKAIBOT_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SAKAIBOT_TELEGRAM_API_ID") {
            if let Ok(v) = val.parse() {
                self.telegram.api_id = v;
            }
        }
        if let Ok(val) = std::env::var("SAKAIBOT_TELEGRAM_API_HASH") {
            self.telegram.api_hash = val;
        }
        if let Ok(val) = std::env::var("SAKAIBOT_TELEGRAM_PHONE") {
            self.telegram.phone = val;
        }
        if let Ok(val) = std::env::var("SAKAIBOT_TELEGRAM_SESSION_NAME") {
            self.telegram.session_name = val;
        }

        if let Ok(val) = std::env::var("SAKAIBOT_LLM_PROVIDER") {
            match val.to_lowercase().as_str() {
                "gemini" => self.llm.provider = LlmProviderKind::Gemini,
                "openrouter" => self.llm.provider = LlmProviderKind::Openrouter,
                other => tracing::warn!(provider = other, "Unknown LLM provider; keeping config"),
            }
        }
        if let Ok(val) = std::env::var("SAKAIBOT_LLM_MODEL") {
            self.llm.model = val;
        }
        // Comma-separated list so multiple keys fit one variable.
        if let Ok(val) = std::env::var("SAKAIBOT_LLM_API_KEYS") {
            self.llm.api_keys = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(val) = std::env::var("SAKAIBOT_STT_ENDPOINT") {
            self.stt.endpoint = val;
        }
        if let Ok(val) = std::env::var("SAKAIBOT_STT_API_KEY") {
            self.stt.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("SAKAIBOT_FFMPEG_PATH") {
            self.stt.ffmpeg_path = val;
        }

        if let Ok(val) = std::env::var("SAKAIBOT_TTS_ENDPOINT") {
            self.tts.endpoint = val;
        }
        if let Ok(val) = std::env::var("SAKAIBOT_TTS_API_KEY") {
            self.tts.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("SAKAIBOT_TTS_VOICE") {
            self.tts.voice = val;
        }

        if let Ok(val) = std::env::var("SAKAIBOT_FLUX_URL") {
            self.image.flux_url = Some(val);
        }
        if let Ok(val) = std::env::var("SAKAIBOT_SDXL_URL") {
            self.image.sdxl_url = Some(val);
        }
        if let Ok(val) = std::env::var("SAKAIBOT_SDXL_API_KEY") {
            self.image.sdxl_api_key = Some(val);
        }

        if let Ok(val) = std::env::var("SAKAIBOT_MAX_ANALYZE_MESSAGES") {
            if let Ok(v) = val.parse() {
                self.limits.max_analyze_messages = v;
            }
        }
        if let Ok(val) = std::env::var("SAKAIBOT_ENVIRONMENT") {
            self.environment = val;
        }
        if let Ok(val) = std::env::var("SAKAIBOT_DEBUG") {
            self.debug = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(val) = std::env::var("SAKAIBOT_LOG_LEVEL") {
            self.logging.level = val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let path = PathBuf::from("/nonexistent/sakaibot/config.json");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.limits.rate_limit_max, 10);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"telegram": {"api_id": 99, "api_hash": "h", "phone": "+1"}}"#,
        )
        .unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.telegram.api_id, 99);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_validate_rejects_empty() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_minimal() {
        let mut config = Config::default();
        config.telegram.api_id = 1;
        config.telegram.api_hash = "hash".into();
        config.telegram.phone = "+10000000000".into();
        config.llm.api_keys = vec!["key".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_api_keys_split() {
        let mut config = Config::default();
        std::env::set_var("SAKAIBOT_LLM_API_KEYS", "k1, k2 ,,k3");
        config.apply_env_overrides();
        std::env::remove_var("SAKAIBOT_LLM_API_KEYS");
        assert_eq!(config.llm.api_keys, vec!["k1", "k2", "k3"]);
    }
}
