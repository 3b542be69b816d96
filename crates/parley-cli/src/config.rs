//! Relay configuration.
//!
//! Loaded once at startup from an optional `parley.toml`, then overridden by
//! environment variables (including those from a `.env` file).

use anyhow::Context;
use parley_agent::ModelConfig;
use parley_core::{ParleyError, ParleyResult, Persona};
use parley_dispatch::DispatcherConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Values interpolated into the persona prompt and greeting.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_company_name")]
    pub company_name: String,
    /// Defaults to the model id.
    #[serde(default)]
    pub model_identity: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            company_name: default_company_name(),
            model_identity: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: None,
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Upper bound on each backend call, media download and send.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_presence_timeout")]
    pub presence_timeout_secs: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            presence_timeout_secs: default_presence_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_bot_name() -> String {
    "Parley".to_string()
}
fn default_company_name() -> String {
    "Parley".to_string()
}
fn default_poll_timeout() -> u64 {
    30
}
fn default_call_timeout() -> u64 {
    120
}
fn default_presence_timeout() -> u64 {
    10
}
fn default_event_buffer() -> usize {
    256
}

impl ParleyConfig {
    /// Reads `path` if it exists; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    /// Applies environment overrides. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("BOT_NAME") {
            self.bot.name = v;
        }
        if let Some(v) = var("COMPANY_NAME") {
            self.bot.company_name = v;
        }
        if let Some(v) = var("MODEL_IDENTITY") {
            self.bot.model_identity = Some(v);
        }
        if let Some(v) = var("MODEL_NAME") {
            self.model.model_id = v;
        }
        if let Some(v) = var("GOOGLE_API_KEY") {
            self.model.api_key = v;
        }
        if let Some(v) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
    }

    pub fn validate(&self) -> ParleyResult<()> {
        self.model.validate()?;
        if self.relay.call_timeout_secs == 0 {
            return Err(ParleyError::Config(
                "relay.call_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.relay.event_buffer == 0 {
            return Err(ParleyError::Config(
                "relay.event_buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn persona(&self) -> Persona {
        let identity = self
            .bot
            .model_identity
            .clone()
            .unwrap_or_else(|| self.model.model_id.clone());
        Persona::new(&self.bot.name, identity, &self.bot.company_name)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            call_timeout: Duration::from_secs(self.relay.call_timeout_secs),
            presence_timeout: Duration::from_secs(self.relay.presence_timeout_secs),
        }
    }
}
