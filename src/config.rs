use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::ChannelRef;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openrouter,
    Ollama,
    Openai,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::Openai => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/');
        }
        match self.provider {
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
            LlmProvider::Openai => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(alias = "openrouter")]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_ledger_config")]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Channel usernames or numeric ids to comment on
    pub channels: Vec<String>,
    #[serde(default)]
    pub reply_to_direct_messages: bool,
}

/// Operator risk tolerance for posting volume
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateProfile {
    #[default]
    Safe,
    Permissive,
}

impl RateProfile {
    /// (max per hour, max per day)
    pub fn ceilings(self) -> (usize, usize) {
        match self {
            RateProfile::Safe => (8, 50),
            RateProfile::Permissive => (50, 50),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub profile: RateProfile,
    /// Overrides the profile's hourly ceiling
    pub max_per_hour: Option<usize>,
    /// Overrides the profile's daily ceiling
    pub max_per_day: Option<usize>,
    /// Drop events that waited longer than this for a posting slot.
    /// Unset means every queued event is eventually answered.
    pub max_event_age_secs: Option<u64>,
}

impl RateLimitConfig {
    pub fn max_per_hour(&self) -> usize {
        self.max_per_hour.unwrap_or(self.profile.ceilings().0)
    }

    pub fn max_per_day(&self) -> usize {
        self.max_per_day.unwrap_or(self.profile.ceilings().1)
    }

    pub fn max_event_age(&self) -> Option<Duration> {
        self.max_event_age_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
    /// Cron expression (with seconds) for the periodic flush
    #[serde(default = "default_flush_cron")]
    pub flush_cron: String,
    /// Also flush immediately after every recorded reply
    #[serde(default)]
    pub flush_on_send: bool,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_system_prompt() -> String {
    "You are an assistant that generates contextually relevant and friendly comments \
     for Telegram posts. Keep comments fairly brief (1-3 sentences) and conversational."
        .to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("bot_messages.json")
}

fn default_flush_cron() -> String {
    "0 */10 * * * *".to_string()
}

fn default_ledger_config() -> LedgerConfig {
    LedgerConfig {
        path: default_ledger_path(),
        flush_cron: default_flush_cron(),
        flush_on_send: false,
    }
}

impl Config {
    /// Parsed channel references, blanks dropped.
    pub fn channel_refs(&self) -> Vec<ChannelRef> {
        self.telegram
            .channels
            .iter()
            .filter_map(|raw| ChannelRef::parse(raw))
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config file")?;

        // Same variable the old .env based setup used
        if config.llm.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
                config.llm.api_key = key;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.channel_refs().is_empty() {
            anyhow::bail!("[telegram] channels must list at least one channel username or id");
        }
        if self.llm.model.trim().is_empty() {
            anyhow::bail!("[llm] model must not be empty");
        }
        if self.rate_limit.max_per_hour() == 0 || self.rate_limit.max_per_day() == 0 {
            anyhow::bail!("[rate_limit] ceilings must be positive");
        }
        if self.rate_limit.max_event_age_secs == Some(0) {
            anyhow::bail!("[rate_limit] max_event_age_secs must be positive when set");
        }
        Ok(())
    }
}
