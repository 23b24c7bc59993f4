#![allow(dead_code)]
pub mod mock_transport;

use tgdispatch::config::{Config, NamedGroupConfig};

/// A config with the bot enabled and the main, report and error groups set.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.bot.enabled = true;
    config.bot.token = Some("123456:TEST-TOKEN".to_string());
    config.group.id = Some("100".to_string());
    config.group.topic_id = Some(7);
    config.group.report_id = Some("200".to_string());
    config.group.error_id = Some("300".to_string());
    config.group.error_topic_id = Some(2);
    config
}

pub fn with_named_group(mut config: Config, name: &str, chat_id: &str) -> Config {
    config.groups.push(NamedGroupConfig {
        name: name.to_string(),
        chat_id: chat_id.to_string(),
        topic_id: None,
    });
    config
}
