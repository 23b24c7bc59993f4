//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the operator binary using
//! the `clap` crate. Global flags are merged on top of the `tgdispatch.toml`
//! file and environment variables; the subcommand selects what to send.

use clap::{Parser, Subcommand};
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Send notifications to Telegram groups and topics.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Bot token, overriding the configuration.
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Console log level (trace, debug, info, warn, error).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Send a text message to one group.
    Send {
        /// Logical group name (main, report, error or a [[groups]] name).
        #[arg(long, default_value = "main", conflicts_with = "chat_id")]
        group: String,
        /// Address the group by chat id instead of by name.
        #[arg(long, value_name = "ID")]
        chat_id: Option<String>,
        /// Reply to this message id in the chat given by --chat-id.
        #[arg(long, value_name = "MESSAGE_ID", requires = "chat_id")]
        reply_to: Option<i64>,
        message: String,
    },
    /// Send a text message to every configured group.
    Broadcast { message: String },
    /// Send a photo to one group.
    Photo {
        #[arg(long, default_value = "main", conflicts_with = "chat_id")]
        group: String,
        #[arg(long, value_name = "ID")]
        chat_id: Option<String>,
        path: PathBuf,
        #[arg(long)]
        caption: Option<String>,
    },
    /// Send a document to one group.
    Document {
        #[arg(long, default_value = "main", conflicts_with = "chat_id")]
        group: String,
        #[arg(long, value_name = "ID")]
        chat_id: Option<String>,
        path: PathBuf,
        #[arg(long)]
        caption: Option<String>,
    },
    /// Validate the configuration and list the configured destinations.
    CheckConfig,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        // A token on the command line implies the bot should be used.
        if let Some(token) = &self.token {
            let mut bot = Dict::new();
            bot.insert("token".into(), Value::from(token.clone()));
            bot.insert("enabled".into(), Value::from(true));
            dict.insert("bot".into(), Value::from(bot));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
