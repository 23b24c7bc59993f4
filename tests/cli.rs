use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn tgdispatch() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("tgdispatch")?;
    // Keep the developer's environment out of the layered config.
    cmd.env_remove("TGDISPATCH_BOT__TOKEN")
        .env_remove("TGDISPATCH_BOT__ENABLED");
    Ok(cmd)
}

#[test]
fn test_check_config_lists_destinations() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::new()?;
    write!(
        file,
        "[group]\nid = \"-1001\"\ntopic_id = 7\nerror_id = \"-1003\"\n"
    )?;

    tgdispatch()?
        .arg("--config")
        .arg(file.path())
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Destinations (2):"))
        .stdout(predicate::str::contains("main (-1001#7)"))
        .stdout(predicate::str::contains("error (-1003)"));
    Ok(())
}

#[test]
fn test_missing_config_file_fails() -> Result<(), Box<dyn std::error::Error>> {
    tgdispatch()?
        .args(["--config", "/nonexistent/tgdispatch.toml", "check-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
    Ok(())
}

#[test]
fn test_send_without_bot_fails() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::new()?;
    write!(file, "[group]\nid = \"-1001\"\n")?;

    tgdispatch()?
        .arg("--config")
        .arg(file.path())
        .args(["send", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bot is not enabled"));
    Ok(())
}

#[test]
fn test_send_rejects_group_and_chat_id_together() -> Result<(), Box<dyn std::error::Error>> {
    tgdispatch()?
        .args(["send", "--group", "main", "--chat-id", "1", "hello"])
        .assert()
        .failure();
    Ok(())
}
