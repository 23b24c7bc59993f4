//! Wiring of the notification pipeline from configuration.

use crate::{
    config::Config,
    formatting::{FormatOptions, HtmlFormatter},
    notification::{
        dispatcher::NotificationDispatcher,
        sink::SinkHandle,
        telegram::{BotApiTransport, DeliveryClient, DeliverySettings, Transport},
    },
    rate_limit::RateLimiter,
    registry::DestinationRegistry,
    task_manager::TaskManager,
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Builds a dispatcher on top of the given transport.
pub fn build_dispatcher(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<NotificationDispatcher> {
    let registry = Arc::new(DestinationRegistry::from_config(config)?);
    let formatter = Box::new(HtmlFormatter::new(FormatOptions::from_config(config)?));
    let limiter = Arc::new(RateLimiter::new(
        config.message.rate_limit,
        Duration::from_secs(config.message.rate_window_seconds),
    ));
    let client = DeliveryClient::new(transport, DeliverySettings::from_config(config));

    info!(
        destinations = registry.len(),
        rate_limit = config.message.rate_limit,
        "Notification pipeline ready."
    );
    Ok(NotificationDispatcher::new(registry, formatter, limiter, client))
}

/// Sets up the Telegram notification pipeline if the bot is enabled.
///
/// Returns `Ok(None)` when the bot is disabled or has no token.
pub fn setup_notification_pipeline(config: &Config) -> Result<Option<Arc<NotificationDispatcher>>> {
    if !config.bot.enabled {
        info!("Telegram bot disabled.");
        return Ok(None);
    }
    if !config.has_valid_bot_config() {
        warn!("Telegram bot is enabled, but no token was provided. Notifications will be disabled.");
        return Ok(None);
    }

    let transport = Arc::new(BotApiTransport::from_config(config)?);
    Ok(Some(Arc::new(build_dispatcher(config, transport)?)))
}

/// Starts forwarding log events to the error group.
///
/// A missing error group leaves the sink inert; it is not fatal.
pub fn start_log_forwarding(
    handle: &SinkHandle,
    dispatcher: Arc<NotificationDispatcher>,
    tasks: &TaskManager,
) -> bool {
    match handle.start(dispatcher, tasks) {
        Ok(()) => handle.is_started(),
        Err(e) => {
            warn!(error = %e, "Log forwarding not started: no error group configured.");
            false
        }
    }
}
