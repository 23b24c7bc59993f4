//! tgdispatch - Telegram notification dispatch
//!
//! Operator binary: sends text, photos and documents to configured groups and
//! validates configuration.

use anyhow::{bail, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tgdispatch::{
    cli::{Cli, Command},
    config::Config,
    core::{Body, DeliveryOutcome},
    notification::{dispatcher::NotificationDispatcher, sink::{LogEventSink, SinkHandle}},
    registry::DestinationRegistry,
    services::{setup_notification_pipeline, start_log_forwarding},
    task_manager::TaskManager,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            error!("Failed to load configuration: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    let (sink, sink_handle) = match LogEventSink::new(&config) {
        Ok(parts) => parts,
        Err(err) => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            error!("Failed to set up log forwarding: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    // The console filter applies to the console only; the sink filters by its own levels.
    let console_filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(sink)
        .init();

    info!("tgdispatch starting up...");

    let tasks = TaskManager::new();
    let result = run(&cli.command, &config, &sink_handle, &tasks).await;
    sink_handle.shutdown(tasks).await;

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Runs one command. Returns whether every delivery succeeded.
async fn run(
    command: &Command,
    config: &Config,
    sink_handle: &SinkHandle,
    tasks: &TaskManager,
) -> Result<bool> {
    if let Command::CheckConfig = command {
        return check_config(config);
    }

    let Some(dispatcher) = setup_notification_pipeline(config)? else {
        bail!("Telegram bot is not enabled; set bot.enabled and bot.token");
    };
    if config.is_logging_enabled() {
        start_log_forwarding(sink_handle, dispatcher.clone(), tasks);
    }

    match command {
        Command::Send {
            group,
            chat_id,
            reply_to,
            message,
        } => {
            let body = Body::Text(message.clone());
            let outcome = match (chat_id, reply_to) {
                (Some(id), Some(reply_to)) => dispatcher.send_reply(id, *reply_to, message).await?,
                (Some(id), None) => dispatcher.dispatch_by_id(id, body).await?,
                (None, _) => dispatcher.dispatch_by_name(group, body).await?,
            };
            Ok(report(chat_id.as_deref().unwrap_or(group), &outcome))
        }
        Command::Broadcast { message } => {
            let outcomes = dispatcher.broadcast_to_all_groups(message).await;
            if outcomes.is_empty() {
                bail!("No groups configured");
            }
            let mut all_ok = true;
            for (label, outcome) in &outcomes {
                all_ok &= report(label, outcome);
            }
            Ok(all_ok)
        }
        Command::Photo {
            group,
            chat_id,
            path,
            caption,
        } => {
            let body = Body::Photo(path.clone());
            send_media(&dispatcher, group, chat_id.as_deref(), body, caption).await
        }
        Command::Document {
            group,
            chat_id,
            path,
            caption,
        } => {
            let body = Body::Document(path.clone());
            send_media(&dispatcher, group, chat_id.as_deref(), body, caption).await
        }
        Command::CheckConfig => Ok(true),
    }
}

async fn send_media(
    dispatcher: &Arc<NotificationDispatcher>,
    group: &str,
    chat_id: Option<&str>,
    body: Body,
    caption: &Option<String>,
) -> Result<bool> {
    let caption = caption.as_deref();
    let outcome = match chat_id {
        Some(id) => dispatcher.send_media_by_id(id, body, caption).await?,
        None => dispatcher.send_media(group, body, caption).await?,
    };
    Ok(report(chat_id.unwrap_or(group), &outcome))
}

fn report(target: &str, outcome: &DeliveryOutcome) -> bool {
    match outcome {
        DeliveryOutcome::Delivered => {
            println!("{target}: delivered");
            true
        }
        DeliveryOutcome::Failed { kind, detail } => {
            println!("{target}: {kind}: {detail}");
            false
        }
    }
}

fn check_config(config: &Config) -> Result<bool> {
    let registry = DestinationRegistry::from_config(config)?;

    println!("-------------------- Configuration --------------------");
    println!("Bot enabled: {}", config.is_bot_enabled());
    println!("API URL: {}", config.bot.api_url);
    println!(
        "Rate limit: {} messages / {}s",
        config.message.rate_limit, config.message.rate_window_seconds
    );
    println!(
        "Log forwarding: {} (levels: {})",
        if config.is_logging_enabled() { "enabled" } else { "disabled" },
        config.logging.levels
    );
    println!("Destinations ({}):", registry.len());
    for destination in registry.all() {
        println!("  {destination}");
    }
    Ok(true)
}
