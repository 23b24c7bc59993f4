//! Configuration management for tgdispatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to load configuration from a `tgdispatch.toml` file and merge it
//! with environment variables and command-line flags.

use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use tracing::Level;

use crate::cli::Cli;

/// The file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "tgdispatch.toml";

/// Bot API limits, in UTF-16 code units.
pub const API_MAX_MESSAGE_LENGTH: usize = 4096;
pub const API_MAX_CAPTION_LENGTH: usize = 1024;

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the local console output.
    pub log_level: String,
    /// Bot credentials and transport settings.
    pub bot: BotConfig,
    /// The well-known main, report and error groups.
    pub group: GroupConfig,
    /// Additional named groups.
    #[serde(default)]
    pub groups: Vec<NamedGroupConfig>,
    /// Forwarding of local log events to the error group.
    pub logging: LoggingConfig,
    /// Outgoing message settings.
    pub message: MessageConfig,
}

/// Bot credentials and transport settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BotConfig {
    pub enabled: bool,
    /// The token issued by BotFather.
    pub token: Option<String>,
    /// Base URL of the Bot API.
    pub api_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// The main, report and error groups.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct GroupConfig {
    /// Main group/chat id.
    pub id: Option<String>,
    /// Forum topic inside the main group.
    pub topic_id: Option<i64>,
    pub report_id: Option<String>,
    pub report_topic_id: Option<i64>,
    /// Group receiving forwarded log events.
    pub error_id: Option<String>,
    pub error_topic_id: Option<i64>,
}

/// An ad-hoc named group.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NamedGroupConfig {
    pub name: String,
    pub chat_id: String,
    #[serde(default)]
    pub topic_id: Option<i64>,
}

/// Forwarding of local log events.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Comma-separated list of forwarded levels, e.g. "ERROR,WARN".
    pub levels: String,
    pub include_stack_trace: bool,
    pub max_stack_trace_lines: usize,
    /// Capacity of the hand-off queue between the logging call site and the workers.
    pub queue_size: usize,
    /// Number of delivery workers draining the queue.
    pub workers: usize,
    /// How long shutdown waits for the queue to drain.
    pub shutdown_timeout_ms: u64,
    /// Targets (prefix match) that are never forwarded.
    #[serde(default)]
    pub exempt_targets: Vec<String>,
}

/// Outgoing message settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MessageConfig {
    pub max_length: usize,
    pub caption_max_length: usize,
    pub disable_web_page_preview: bool,
    pub disable_notification: bool,
    /// Messages allowed per rate window.
    pub rate_limit: u32,
    pub rate_window_seconds: u64,
    /// Fixed UTC offset used for timestamps, e.g. "+05:00".
    pub time_offset: String,
}

impl Config {
    /// Loads the configuration by layering defaults, the TOML file, the
    /// environment and the command-line flags.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        match &cli.config {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found at specified path: {}", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if Path::new(DEFAULT_CONFIG_FILE).exists() {
                    figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
                }
            }
        }

        let config: Config = figment
            // e.g. TGDISPATCH_BOT__TOKEN=123:abc
            .merge(Env::prefixed("TGDISPATCH_").split("__"))
            .merge(cli.clone())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML string on top of the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.bot.enabled && !self.has_valid_bot_config() {
            bail!("bot.enabled is set but bot.token is empty");
        }
        if self.message.rate_limit == 0 {
            bail!("message.rate_limit must be greater than 0");
        }
        if self.message.rate_window_seconds == 0 {
            bail!("message.rate_window_seconds must be greater than 0");
        }
        if self.message.max_length == 0 || self.message.caption_max_length == 0 {
            bail!("message length limits must be greater than 0");
        }
        if self.message.max_length > API_MAX_MESSAGE_LENGTH {
            bail!("message.max_length must not exceed {API_MAX_MESSAGE_LENGTH}");
        }
        if self.message.caption_max_length > API_MAX_CAPTION_LENGTH {
            bail!("message.caption_max_length must not exceed {API_MAX_CAPTION_LENGTH}");
        }
        if self.logging.queue_size == 0 {
            bail!("logging.queue_size must be greater than 0");
        }
        if self.logging.workers == 0 {
            bail!("logging.workers must be greater than 0");
        }
        self.logging.parse_levels()?;
        self.message.offset()?;
        Ok(())
    }

    pub fn has_valid_bot_config(&self) -> bool {
        self.bot.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn is_bot_enabled(&self) -> bool {
        self.bot.enabled && self.has_valid_bot_config()
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.logging.enabled && self.has_valid_bot_config()
    }
}

impl LoggingConfig {
    /// Parses the comma-separated level list. Names are case-insensitive.
    pub fn parse_levels(&self) -> Result<BTreeSet<Level>> {
        let mut levels = BTreeSet::new();
        for name in self.levels.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let level = Level::from_str(name)
                .map_err(|_| anyhow::anyhow!("unknown log level in logging.levels: {name:?}"))?;
            levels.insert(level);
        }
        Ok(levels)
    }
}

impl MessageConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        let raw = self.time_offset.trim();
        if raw.eq_ignore_ascii_case("utc") || raw.eq_ignore_ascii_case("z") {
            return Ok(Utc.fix());
        }
        FixedOffset::from_str(raw)
            .with_context(|| format!("invalid message.time_offset: {raw:?}"))
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bot: BotConfig {
                enabled: false,
                token: None,
                api_url: "https://api.telegram.org".to_string(),
                request_timeout_seconds: 10,
            },
            group: GroupConfig::default(),
            groups: Vec::new(),
            logging: LoggingConfig {
                enabled: false,
                levels: "ERROR,WARN".to_string(),
                include_stack_trace: true,
                max_stack_trace_lines: 5,
                queue_size: 1000,
                workers: 1,
                shutdown_timeout_ms: 2000,
                exempt_targets: Vec::new(),
            },
            message: MessageConfig {
                max_length: 4000,
                caption_max_length: 1024,
                disable_web_page_preview: true,
                disable_notification: false,
                rate_limit: 30,
                rate_window_seconds: 60,
                time_offset: "+00:00".to_string(),
            },
        }
    }
}
