use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub unsubscribe: UnsubscribeConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_query")]
    pub query: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            fetch_concurrency: default_fetch_concurrency(),
            query: default_query(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_classify_max_tokens")]
    pub classify_max_tokens: u32,
    #[serde(default = "default_summarize_max_tokens")]
    pub summarize_max_tokens: u32,
    /// Message bodies are truncated to this many characters inside prompts
    #[serde(default = "default_body_char_limit")]
    pub body_char_limit: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            classify_max_tokens: default_classify_max_tokens(),
            summarize_max_tokens: default_summarize_max_tokens(),
            body_char_limit: default_body_char_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeConfig {
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_post_click_wait_secs")]
    pub post_click_wait_secs: u64,
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
    #[serde(default = "default_request_subject")]
    pub request_subject: String,
    #[serde(default = "default_request_body")]
    pub request_body: String,
}

impl Default for UnsubscribeConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: default_navigation_timeout_secs(),
            post_click_wait_secs: default_post_click_wait_secs(),
            chrome_path: None,
            sandbox: default_sandbox(),
            request_subject: default_request_subject(),
            request_body: default_request_body(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    /// Environment variable holding the SMTP password
    #[serde(default = "default_smtp_password_env")]
    pub password_env: String,
    #[serde(default)]
    pub from: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password_env: default_smtp_password_env(),
            from: String::new(),
        }
    }
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.from.is_empty()
    }
}

/// How category counters are kept in step with the email set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CounterMode {
    /// Apply +1/-1 deltas on every change
    #[default]
    BestEffort,
    /// Recount the affected category from the stored emails after every change
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub counter_mode: CounterMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            counter_mode: CounterMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// OAuth client secret JSON; falls back to GMAIL_CLIENT_ID/GMAIL_CLIENT_SECRET
    #[serde(default)]
    pub client_secret_path: Option<PathBuf>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_secret_path: None,
            token_uri: default_token_uri(),
        }
    }
}

fn default_max_results() -> u32 {
    50
}

fn default_fetch_concurrency() -> usize {
    10
}

fn default_query() -> String {
    "is:unread in:inbox".to_string()
}

fn default_ai_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_classify_max_tokens() -> u32 {
    300
}

fn default_summarize_max_tokens() -> u32 {
    150
}

fn default_body_char_limit() -> usize {
    4000
}

fn default_navigation_timeout_secs() -> u64 {
    15
}

fn default_post_click_wait_secs() -> u64 {
    3
}

fn default_sandbox() -> bool {
    true
}

fn default_request_subject() -> String {
    "Unsubscribe".to_string()
}

fn default_request_body() -> String {
    "Please unsubscribe me from this mailing list.".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_password_env() -> String {
    "SMTP_PASSWORD".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from(".inbox-triage/triage.db")
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::Config(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_results == 0 || self.sync.max_results > 500 {
            return Err(TriageError::Config(
                "sync.max_results must be between 1 and 500".to_string(),
            ));
        }

        if self.sync.fetch_concurrency == 0 {
            return Err(TriageError::Config(
                "sync.fetch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.sync.fetch_concurrency > 50 {
            return Err(TriageError::Config(
                "sync.fetch_concurrency cannot exceed 50 (to stay under Gmail API rate limits)"
                    .to_string(),
            ));
        }

        if self.sync.query.trim().is_empty() {
            return Err(TriageError::Config("sync.query cannot be empty".to_string()));
        }

        if !self.ai.base_url.starts_with("http://") && !self.ai.base_url.starts_with("https://") {
            return Err(TriageError::Config(format!(
                "ai.base_url must be an http(s) URL, got '{}'",
                self.ai.base_url
            )));
        }
        if self.ai.model.is_empty() {
            return Err(TriageError::Config("ai.model cannot be empty".to_string()));
        }
        if self.ai.classify_max_tokens == 0 || self.ai.summarize_max_tokens == 0 {
            return Err(TriageError::Config(
                "ai max token bounds must be greater than 0".to_string(),
            ));
        }
        if self.ai.body_char_limit == 0 {
            return Err(TriageError::Config(
                "ai.body_char_limit must be greater than 0".to_string(),
            ));
        }

        if self.unsubscribe.navigation_timeout_secs == 0 {
            return Err(TriageError::Config(
                "unsubscribe.navigation_timeout_secs must be greater than 0".to_string(),
            ));
        }

        // Host and sender go together; either both set or neither
        if self.smtp.host.is_empty() != self.smtp.from.is_empty() {
            return Err(TriageError::Config(
                "smtp.host and smtp.from must be set together".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
