use crate::core::error::EspejoError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

mod credentials;

pub use credentials::{CredentialPool, mask_key};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

fn default_true() -> bool {
    true
}

/// Settings for the model/key/version dispatch cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub base_url: String,
    /// Highest preference first.
    pub models: Vec<String>,
    /// Tried in order for every (model, key) pair.
    pub api_versions: Vec<String>,
    pub request_timeout_secs: u64,
    /// Pause after an HTTP 429 before the next attempt.
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub shuffle_keys: bool,
    /// Case-insensitive patterns marking a key as revoked or leaked.
    pub revoked_patterns: Vec<String>,
    /// Case-insensitive patterns marking a content policy rejection.
    pub policy_patterns: Vec<String>,
    pub default_image_caption: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            models: vec![
                "gemini-3-flash-preview".to_string(),
                "gemini-3-pro".to_string(),
                "gemini-3-flash-8b".to_string(),
                "gemini-3-flash".to_string(),
                "gemini-1.5-flash".to_string(),
            ],
            api_versions: vec!["v1beta".to_string(), "v1".to_string()],
            request_timeout_secs: 30,
            rate_limit_backoff_ms: 1500,
            shuffle_keys: true,
            revoked_patterns: vec![
                "leaked".to_string(),
                "API key not valid".to_string(),
                "API_KEY_INVALID".to_string(),
                "API key expired".to_string(),
            ],
            policy_patterns: vec![
                "safety".to_string(),
                "PROHIBITED_CONTENT".to_string(),
                "blocked due to".to_string(),
                "BLOCKLIST".to_string(),
            ],
            default_image_caption: "Analyze this image.".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }
}

/// Dedicated single-key route used by the image viewer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisorConfig {
    pub model: String,
    pub max_output_tokens: u32,
}

impl Default for VisorConfig {
    fn default() -> Self {
        Self {
            model: "gemini-pro".to_string(),
            max_output_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
    #[serde(default = "default_conversations_table")]
    pub conversations_table: String,
    #[serde(default = "default_agents_table")]
    pub agents_table: String,
}

fn default_conversations_table() -> String {
    "conversations".to_string()
}

fn default_agents_table() -> String {
    "agents".to_string()
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            key: key.into(),
            conversations_table: default_conversations_table(),
            agents_table: default_agents_table(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dispatch: DispatchConfig,
    pub visor: VisorConfig,
    pub server: ServerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supabase: Option<SupabaseConfig>,
    /// YAML file listing agents, used when no remote registry is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents_file: Option<PathBuf>,
    /// Fixed owner id for stored conversations; otherwise one is obtained
    /// from anonymous sign-in or generated per run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl Config {
    fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".espejo")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.yaml")
    }

    /// Loads `~/.espejo/config.yaml`, writing a default file on first run.
    pub fn load() -> Result<Config, EspejoError> {
        let path = Self::config_path();
        if path.exists() {
            return Self::load_from(&path).map(Config::with_env_overrides);
        }

        let config = Config::default();
        if let Err(e) = config.save() {
            warn!("Could not write default config to {}: {}", path.display(), e);
        }
        Ok(config.with_env_overrides())
    }

    pub fn load_from(path: &Path) -> Result<Config, EspejoError> {
        let contents = fs::read_to_string(path)?;
        let config = serde_yml::from_str::<Config>(&contents)
            .map_err(|e| EspejoError::Config(format!("Parse {}: {}", path.display(), e)))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self) -> Result<(), EspejoError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml_content = serde_yml::to_string(self)?;
        fs::write(&path, yaml_content)?;
        Ok(())
    }

    /// `SUPABASE_URL` and `SUPABASE_KEY` take precedence over the file.
    pub fn with_env_overrides(self) -> Config {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Config {
        let url = lookup("SUPABASE_URL").filter(|v| !v.trim().is_empty());
        let key = lookup("SUPABASE_KEY").filter(|v| !v.trim().is_empty());
        match (url, key, self.supabase.take()) {
            (Some(url), Some(key), Some(mut existing)) => {
                existing.url = url.trim_end_matches('/').to_string();
                existing.key = key;
                self.supabase = Some(existing);
            }
            (Some(url), Some(key), None) => self.supabase = Some(SupabaseConfig::new(url, key)),
            (_, _, existing) => self.supabase = existing,
        }
        self
    }

    pub fn history_dir() -> PathBuf {
        Self::config_dir().join("history")
    }

    pub fn input_history_path() -> PathBuf {
        Self::config_dir().join("input_history.txt")
    }

    /// Owner id remembered from a previous anonymous sign-in.
    pub fn owner_id_path() -> PathBuf {
        Self::config_dir().join("owner_id")
    }

    pub fn agents_path(&self) -> PathBuf {
        self.agents_file
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("agents.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "dispatch:\n  models: [m1, m2]\n  rate_limit_backoff_ms: 0\nserver:\n  port: 8080\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();

        assert_eq!(config.dispatch.models, vec!["m1", "m2"]);
        assert_eq!(config.dispatch.api_versions, vec!["v1beta", "v1"]);
        assert_eq!(config.dispatch.rate_limit_backoff(), Duration::ZERO);
        assert!(config.dispatch.shuffle_keys);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.supabase.is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "dispatch: [not, a, map]").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, EspejoError::Config(_)));
    }

    #[test]
    fn env_overrides_supabase_section() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SUPABASE_URL", "https://demo.supabase.co/"),
            ("SUPABASE_KEY", "anon"),
        ]);
        let config = Config::default().with_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        let supabase = config.supabase.unwrap();
        assert_eq!(supabase.url, "https://demo.supabase.co");
        assert_eq!(supabase.key, "anon");
        assert_eq!(supabase.conversations_table, "conversations");
    }

    #[test]
    fn missing_env_keeps_file_supabase() {
        let mut config = Config::default();
        config.supabase = Some(SupabaseConfig::new("https://file.supabase.co", "k"));
        let config = config.with_overrides_from(|_| None);
        assert_eq!(config.supabase.unwrap().url, "https://file.supabase.co");
    }
}
