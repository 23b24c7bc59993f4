use clap::Parser;
use std::io::Write;
use tempfile::NamedTempFile;
use tgdispatch::cli::Cli;
use tgdispatch::config::Config;
use tgdispatch::registry::DestinationRegistry;

fn cli_with_file(file: &NamedTempFile, extra: &[&str]) -> Cli {
    let path = file.path().to_str().unwrap();
    let mut args = vec!["tgdispatch", "--config", path];
    args.extend_from_slice(extra);
    args.push("check-config");
    Cli::try_parse_from(args).unwrap()
}

#[test]
fn test_load_full_valid_config() {
    let toml_content = r#"
        log_level = "debug"
        [bot]
        enabled = true
        token = "123456:ABC"
        api_url = "http://localhost:8081"
        request_timeout_seconds = 3
        [group]
        id = "-1001"
        topic_id = 7
        report_id = "-1002"
        error_id = "-1003"
        error_topic_id = 0
        [[groups]]
        name = "ops"
        chat_id = "-1004"
        topic_id = 12
        [logging]
        enabled = true
        levels = "error"
        include_stack_trace = false
        [message]
        max_length = 2000
        rate_limit = 10
        time_offset = "+05:00"
    "#;

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();

    let config = Config::load(&cli_with_file(&file, &[])).unwrap();

    assert_eq!(config.log_level, "debug");
    assert!(config.is_bot_enabled());
    assert_eq!(config.bot.api_url, "http://localhost:8081");
    assert_eq!(config.bot.request_timeout_seconds, 3);
    assert_eq!(config.message.max_length, 2000);
    assert_eq!(config.message.rate_limit, 10);
    assert_eq!(config.message.rate_window_seconds, 60); // default
    assert_eq!(config.message.caption_max_length, 1024); // default
    assert!(config.is_logging_enabled());
    assert!(!config.logging.include_stack_trace);
    assert_eq!(config.logging.queue_size, 1000); // default

    let registry = DestinationRegistry::from_config(&config).unwrap();
    assert_eq!(registry.len(), 4);
    assert_eq!(registry.resolve_by_name("main").unwrap().thread_id(), Some(7));
    // A non-positive topic id means "no topic".
    assert_eq!(registry.resolve_by_name("error").unwrap().thread_id(), None);
    assert_eq!(registry.resolve_by_id("-1004").unwrap().name(), Some("ops"));
}

#[test]
fn test_cli_flags_override_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "log_level = \"warn\"\n[bot]\nenabled = false\n").unwrap();

    let config = Config::load(&cli_with_file(
        &file,
        &["--log-level", "trace", "--token", "999:XYZ"],
    ))
    .unwrap();

    assert_eq!(config.log_level, "trace");
    assert_eq!(config.bot.token.as_deref(), Some("999:XYZ"));
    assert!(config.is_bot_enabled());
}

#[test]
fn test_missing_config_file_is_an_error() {
    let cli = Cli::try_parse_from([
        "tgdispatch",
        "--config",
        "/nonexistent/tgdispatch.toml",
        "check-config",
    ])
    .unwrap();

    let err = Config::load(&cli).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn test_invalid_values_are_rejected() {
    for toml in [
        "[logging]\nlevels = \"ERROR,LOUD\"",
        "[message]\nrate_limit = 0",
        "[message]\nmax_length = 5000",
        "[message]\ncaption_max_length = 2048",
        "[message]\ntime_offset = \"Mars/Olympus\"",
        "[bot]\nenabled = true",
    ] {
        assert!(Config::from_toml_str(toml).is_err(), "accepted: {toml}");
    }
}

#[test]
fn test_duplicate_group_names_are_rejected() {
    let config = Config::from_toml_str(
        r#"
        [group]
        id = "1"
        [[groups]]
        name = "main"
        chat_id = "2"
        "#,
    )
    .unwrap();

    assert!(DestinationRegistry::from_config(&config).is_err());
}
