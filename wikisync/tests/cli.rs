use std::fs::write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

/// Minimal config the CLI can load without talking to any service.
fn create_minimal_config() -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        concat!(
            "wiki:\n",
            "  api_url: \"http://wiki.local/api.php\"\n",
            "  username: sync\n",
            "  password: secret\n",
            "sources:\n",
            "  api_url: \"http://psms.local/api/v1\"\n",
            "docstore:\n",
            "  url: \"http://localhost:9200\"\n",
            "  index_prefix: wiki\n",
        ),
    )
    .expect("Writing temp config failed");
    config
}

#[test]
fn help_lists_the_publishing_commands() {
    let mut cmd = Command::cargo_bin("wikisync").expect("Binary exists");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains("sync")
                .and(predicate::str::contains("articles"))
                .and(predicate::str::contains("authors"))
                .and(predicate::str::contains("sources")),
        );
}

#[test]
fn config_command_prints_settings() {
    let config = create_minimal_config();
    let mut cmd = Command::cargo_bin("wikisync").expect("Binary exists");
    cmd.arg("config").arg("--config").arg(config.path());
    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains("http://wiki.local/api.php")
                .and(predicate::str::contains("http://localhost:9200")),
        );
}

#[test]
fn destroy_requires_confirmation() {
    let config = create_minimal_config();
    let mut cmd = Command::cargo_bin("wikisync").expect("Binary exists");
    cmd.arg("destroy").arg("--config").arg(config.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--confirm"));
}

#[test]
fn unreadable_config_fails_before_any_network_activity() {
    let mut cmd = Command::cargo_bin("wikisync").expect("Binary exists");
    cmd.arg("sync").arg("--config").arg("/nonexistent/wikisync.yml");
    cmd.assert().failure();
}
