//! Configuration for PocketAgent
//!
//! Sources, lowest to highest precedence: built-in defaults, the JSON config
//! file, `auth.json` credentials, environment variables (`.env` included).
//! CLI flags are applied on top by the binary.

use crate::auth::AuthConfig;
use crate::coordinator::CoordinatorConfig;
use crate::provider::ProviderConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the bot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub planner: PlannerConfig,
    pub telegram: TelegramConfig,
    pub session: SessionConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider type (openai, openrouter, custom)
    pub provider: LlmProvider,

    /// API key (can also be set via environment variable)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL for the API (for custom endpoints like LM Studio)
    pub base_url: Option<String>,

    /// Model used for routing and clarification normalization
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAI,
    OpenRouter,
    /// Custom OpenAI-compatible endpoint (e.g., LM Studio, vLLM)
    Custom,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "openai",
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Planner service URL; without one only scripted plans can run
    pub base_url: Option<String>,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// Planner calls allowed while handling one message
    pub max_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,

    /// Usernames allowed to talk to the bot; empty allows everyone
    pub allowed_usernames: Vec<String>,

    /// Long-poll timeout for getUpdates
    pub poll_timeout_secs: u64,

    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Age after which a pending clarification is dropped; 0 keeps it forever
    pub pending_ttl_secs: u64,

    /// Most options offered for a verification
    pub max_choices: usize,

    /// Seconds a chat worker waits for the next message before it exits
    pub chat_idle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Directory for log files and the telemetry database
    pub log_dir: PathBuf,

    /// Enable verbose logging
    pub verbose: bool,

    /// OpenTelemetry collector endpoint (e.g., http://localhost:4318)
    pub otel_endpoint: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            api_key: None,
            base_url: None,
            model: "gpt-5-nano".to_string(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 300,
            max_steps: 64,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowed_usernames: Vec::new(),
            poll_timeout_secs: 30,
            api_base: crate::transport::TELEGRAM_API_BASE.to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 30 * 60,
            max_choices: 8,
            chat_idle_secs: 10 * 60,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_dir: default_data_dir(),
            verbose: false,
            otel_endpoint: None,
        }
    }
}

/// Default data directory for logs, history and telemetry
/// Uses XDG_DATA_HOME if set, otherwise ~/.pocket_agent
pub fn default_data_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join("pocket-agent")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".pocket_agent")
    } else {
        PathBuf::from(".pocket_agent")
    }
}

impl Config {
    /// Load configuration from every source below the CLI
    ///
    /// `path` is the `--config` flag. Without it the default path is used when the
    /// file exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_auth(&AuthConfig::load().unwrap_or_default());
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// `$XDG_CONFIG_HOME/pocket-agent/config.json`
    pub fn default_path() -> Option<PathBuf> {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(dirs::config_dir)?;
        Some(base.join("pocket-agent").join("config.json"))
    }

    /// Fill credentials from auth.json entries: the LLM provider's own entry,
    /// `telegram` and `planner`
    pub fn apply_auth(&mut self, auth: &AuthConfig) {
        if let Some(entry) = auth.get(self.llm.provider.as_str()) {
            self.llm.api_key = Some(entry.api_key().to_string());
            if let Some(base_url) = entry.base_url() {
                self.llm.base_url = Some(base_url.to_string());
            }
        }
        if let Some(token) = auth.api_key("telegram") {
            self.telegram.bot_token = Some(token.to_string());
        }
        if let Some(entry) = auth.get("planner") {
            self.planner.api_key = Some(entry.api_key().to_string());
            if let Some(base_url) = entry.base_url() {
                self.planner.base_url = Some(base_url.to_string());
            }
        }
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let key_env = self.provider_config().api_key_env;
        if let Some(key) = var(&key_env) {
            self.llm.api_key = Some(key);
        }

        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(usernames) = var("TELEGRAM_USERNAME") {
            self.telegram.allowed_usernames = usernames
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }
        if let Some(url) = var("PLANNER_URL") {
            self.planner.base_url = Some(url);
        }
        if let Some(key) = var("PLANNER_API_KEY") {
            self.planner.api_key = Some(key);
        }
    }

    /// Provider settings for the completion client
    pub fn provider_config(&self) -> ProviderConfig {
        let base = match self.llm.provider {
            LlmProvider::OpenAI => ProviderConfig::openai(),
            LlmProvider::OpenRouter => ProviderConfig::openrouter(),
            LlmProvider::Custom => ProviderConfig::custom(
                "Custom",
                "http://localhost:1234/v1",
                "LLM_API_KEY",
                self.llm.model.clone(),
            ),
        };

        let mut provider = base.with_model(self.llm.model.clone());
        if let Some(base_url) = &self.llm.base_url {
            provider.base_url = base_url.clone();
        }
        if let Some(api_key) = &self.llm.api_key {
            provider = provider.with_api_key(api_key.clone());
        }
        provider
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_steps: self.planner.max_steps,
            pending_ttl: match self.session.pending_ttl_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    pub fn chat_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session.chat_idle_secs.max(1))
    }

    /// Set verbose logging
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.telemetry.verbose = self.telemetry.verbose || verbose;
        self
    }

    /// Set log directory
    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.telemetry.log_dir = log_dir;
        self
    }

    /// Set model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.llm.model = model.into();
        self
    }

    /// Set API key
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.llm.api_key = Some(api_key);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"llm": {"model": "gpt-4o-mini"}, "session": {"pending_ttl_secs": 0}}"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.provider, LlmProvider::OpenAI);
        assert_eq!(config.session.max_choices, 8);
        assert_eq!(config.planner.max_steps, 64);
        assert!(config.coordinator_config().pending_ttl.is_none());
        assert_eq!(config.chat_idle_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_env_overrides_auth() {
        let dir = tempfile::tempdir().unwrap();
        let auth_path = dir.path().join("auth.json");
        std::fs::write(
            &auth_path,
            r#"{
                "telegram": {"type": "api", "key": "auth-token"},
                "planner": {"type": "api", "key": "planner-key", "base_url": "http://planner:8000"},
                "openai": {"type": "api", "key": "sk-auth"}
            }"#,
        )
        .unwrap();
        let auth = AuthConfig::load_from(&auth_path).unwrap();

        let mut config = Config::default();
        config.apply_auth(&auth);
        assert_eq!(config.telegram.bot_token.as_deref(), Some("auth-token"));
        assert_eq!(config.planner.base_url.as_deref(), Some("http://planner:8000"));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-auth"));

        config.apply_env(env(&[
            ("TELEGRAM_BOT_TOKEN", "env-token"),
            ("TELEGRAM_USERNAME", "alice, bob"),
            ("PLANNER_URL", ""),
        ]));
        assert_eq!(config.telegram.bot_token.as_deref(), Some("env-token"));
        assert_eq!(config.telegram.allowed_usernames, vec!["alice", "bob"]);
        // Blank variables do not clear configured values
        assert_eq!(config.planner.base_url.as_deref(), Some("http://planner:8000"));
        assert_eq!(config.planner.api_key.as_deref(), Some("planner-key"));
    }

    #[test]
    fn test_provider_config() {
        let mut config = Config::default().with_model("gpt-4o-mini");
        let provider = config.provider_config();
        assert_eq!(provider.default_model, "gpt-4o-mini");
        assert_eq!(provider.api_key_env, "OPENAI_API_KEY");
        assert!(provider.api_key.is_none());

        config.llm.provider = LlmProvider::Custom;
        config.llm.base_url = Some("http://localhost:8080/v1".to_string());
        config = config.with_api_key("lm-studio".to_string());
        let provider = config.provider_config();
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.api_key.as_deref(), Some("lm-studio"));
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = Config::default();
        config.telegram.bot_token = Some("secret".to_string());
        config.llm.api_key = Some("sk-secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
