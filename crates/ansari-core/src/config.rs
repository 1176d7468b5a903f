//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Ansari configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<ProvidersConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<ChannelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whole-turn failure budget across provider retries and tool failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_failures: Option<u32>,

    /// Tool-calling rounds allowed before the agent is forced into
    /// words-only mode for the remainder of the turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_rounds: Option<u32>,

    /// Fixed backoff between provider retries, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt_template: Option<String>,
}

// --- Typed provider config ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<ProviderConfig>,
}

/// Configuration for a single LLM provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` first, then `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Tool backends ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Kalimat semantic-search backend (Qur'an and Hadith).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kalimat: Option<KalimatConfig>,

    /// Vectara corpus backend (fiqh encyclopedia and tafsir).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectara: Option<VectaraConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KalimatConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl KalimatConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectaraConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mawsuah_corpus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tafsir_corpus: Option<String>,
}

impl VectaraConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Typed channel configs ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<WhatsAppConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordConfig>,
}

/// WhatsApp Business Cloud API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_secret_env: Option<String>,
    #[serde(default = "default_whatsapp_port")]
    pub webhook_port: u16,
}

fn default_whatsapp_port() -> u16 {
    3101
}

impl WhatsAppConfig {
    pub fn resolve_access_token(&self) -> Option<String> {
        resolve_secret_field(&self.access_token, &self.access_token_env)
    }
    pub fn resolve_app_secret(&self) -> Option<String> {
        resolve_secret_field(&self.app_secret, &self.app_secret_env)
    }
}

/// Discord bot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token_env: Option<String>,
    #[serde(default)]
    pub allowed_channels: Vec<String>,
}

impl DiscordConfig {
    pub fn resolve_bot_token(&self) -> Option<String> {
        resolve_secret_field(&self.bot_token, &self.bot_token_env)
    }
}

// --- Gateway / storage / prompts / logging ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default)]
    pub hot_reload: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Resolve a secret from its inline value or an environment variable.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

impl Config {
    /// Load config from a JSON5 file. A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(crate::error::AnsariError::Io)?;
        let config: Config = json5::from_str(&raw)
            .map_err(|e| crate::error::AnsariError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn default_model(&self) -> String {
        self.agents
            .as_ref()
            .and_then(|a| a.model.clone())
            .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string())
    }

    pub fn max_tokens(&self) -> u32 {
        self.agents
            .as_ref()
            .and_then(|a| a.max_tokens)
            .unwrap_or(4096)
    }

    pub fn max_failures(&self) -> u32 {
        self.agents
            .as_ref()
            .and_then(|a| a.max_failures)
            .unwrap_or(3)
    }

    pub fn max_tool_rounds(&self) -> u32 {
        self.agents
            .as_ref()
            .and_then(|a| a.max_tool_rounds)
            .unwrap_or(4)
    }

    pub fn retry_backoff_secs(&self) -> u64 {
        self.agents
            .as_ref()
            .and_then(|a| a.retry_backoff_secs)
            .unwrap_or(5)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().and_then(|g| g.port).unwrap_or(8000)
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| data_dir().join("threads"))
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.prompts
            .as_ref()
            .and_then(|p| p.dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| PathBuf::from("resources/templates"))
    }

    pub fn prompts_hot_reload(&self) -> bool {
        self.prompts.as_ref().is_some_and(|p| p.hot_reload)
    }
}

/// Default data directory: `~/.ansari`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ansari")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_accessors() {
        let config = Config::default();
        assert_eq!(config.max_failures(), 3);
        assert_eq!(config.max_tool_rounds(), 4);
        assert_eq!(config.retry_backoff_secs(), 5);
        assert_eq!(config.gateway_port(), 8000);
    }

    #[test]
    fn test_load_json5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(
            &path,
            r#"{
                // comments are fine in json5
                agents: { max_failures: 1, retry_backoff_secs: 0 },
                gateway: { port: 9000 },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_failures(), 1);
        assert_eq!(config.retry_backoff_secs(), 0);
        assert_eq!(config.gateway_port(), 9000);
    }

    #[test]
    fn test_missing_file_defaults() {
        let config = Config::load(Path::new("/nonexistent/ansari.json5")).unwrap();
        assert_eq!(config.max_tokens(), 4096);
    }

    #[test]
    fn test_resolve_secret_field() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_ANSARI_KEY", "sk-123") };
        let resolved = resolve_secret_field(&None, &Some("TEST_ANSARI_KEY".into()));
        assert_eq!(resolved.as_deref(), Some("sk-123"));
        unsafe { std::env::remove_var("TEST_ANSARI_KEY") };

        let direct = resolve_secret_field(&Some("inline".into()), &None);
        assert_eq!(direct.as_deref(), Some("inline"));
    }
}
