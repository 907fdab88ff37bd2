//! Credential loading
//!
//! Loads API keys and endpoints for the services the bot talks to from:
//! - $XDG_DATA_HOME/pocket-agent/auth.json (preferred)
//! - ~/.local/share/pocket-agent/auth.json (fallback)
//!
//! Keys are service names: `openai` (or any provider name), `telegram`, `planner`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Authentication entry for a service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthEntry {
    /// Simple API key or bot token
    #[serde(rename = "api")]
    Api {
        key: String,
        #[serde(default)]
        base_url: Option<String>,
    },
}

impl AuthEntry {
    /// Get the API key
    pub fn api_key(&self) -> &str {
        match self {
            AuthEntry::Api { key, .. } => key,
        }
    }

    /// Get the base URL if configured
    pub fn base_url(&self) -> Option<&str> {
        match self {
            AuthEntry::Api { base_url, .. } => base_url.as_deref(),
        }
    }
}

/// Authentication configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthConfig {
    pub services: HashMap<String, AuthEntry>,
}

impl AuthConfig {
    /// Load auth config from the default location
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load auth config from a specific path. A missing file is an empty config.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: AuthConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Get the default config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
            let path = PathBuf::from(xdg_data).join("pocket-agent/auth.json");
            if path.exists() {
                return Ok(path);
            }
        }

        if let Some(data_dir) = dirs::data_dir() {
            return Ok(data_dir.join("pocket-agent").join("auth.json"));
        }

        Ok(PathBuf::from(".pocket-agent/auth.json"))
    }

    /// Get auth entry for a service
    pub fn get(&self, service: &str) -> Option<&AuthEntry> {
        self.services.get(service)
    }

    /// Get API key for a service
    pub fn api_key(&self, service: &str) -> Option<&str> {
        self.services.get(service).map(|e| e.api_key())
    }

    /// Get base URL for a service
    pub fn base_url(&self, service: &str) -> Option<&str> {
        self.services.get(service).and_then(|e| e.base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_auth_config() {
        let json = r#"{
            "openai": {"type": "api", "key": "sk-xxx"},
            "telegram": {"type": "api", "key": "123:abc"},
            "planner": {"type": "api", "key": "pk-1", "base_url": "http://localhost:8700"}
        }"#;

        let config: AuthConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.api_key("openai"), Some("sk-xxx"));
        assert_eq!(config.base_url("openai"), None);
        assert_eq!(config.api_key("telegram"), Some("123:abc"));
        assert_eq!(config.base_url("planner"), Some("http://localhost:8700"));
        assert!(config.get("missing").is_none());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let config = AuthConfig::load_from(&temp.path().join("auth.json")).unwrap();
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("auth.json");
        std::fs::write(&path, r#"{"telegram": {"type": "api", "key": "tok"}}"#).unwrap();

        let config = AuthConfig::load_from(&path).unwrap();
        assert_eq!(config.api_key("telegram"), Some("tok"));
    }
}
