// ABOUTME: Tests for configuration loading and validation
// ABOUTME: Verifies TOML parsing, env var overrides, and required field validation

use relaybot::config::Config;
use serial_test::serial;
use std::io::Write;
use std::path::PathBuf;

/// Helper to clear all config-related env vars
fn clear_config_env_vars() {
    std::env::remove_var("RELAYBOT_CONFIG_PATH");
    std::env::remove_var("RELAYBOT_HOME_SERVER");
    std::env::remove_var("RELAYBOT_USER_ID");
    std::env::remove_var("RELAYBOT_ACCESS_TOKEN");
    std::env::remove_var("RELAYBOT_DATABASE_PATH");
    std::env::remove_var("RELAYBOT_HTTP_PORT");
    std::env::remove_var("RELAYBOT_SYNC_TIMEOUT_MS");
}

fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

const FULL_CONFIG: &str = r#"
[[clients]]
user_id = "@bot:test.example.org"
home_server = "https://matrix.test.example.org"
access_token = "syt_abc"
auto_join_rooms = true
allowed_inviters = ["@alice:test.example.org"]

[[clients]]
user_id = "@helper:test.example.org"
home_server = "https://matrix.test.example.org"
access_token = "syt_def"
sync = false

[sync]
timeout_ms = 15000
retry_backoff_secs = 3

[database]
path = "/tmp/relaybot-test.db"

[http]
host = "0.0.0.0"
port = 9090

[[services]]
id = "status"
type = "url_watch"
owner = "@alice:test.example.org"

[services.config]
url = "https://status.test.example.org"
"#;

#[test]
#[serial]
fn test_config_loads_from_env_path() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, FULL_CONFIG);
    std::env::set_var("RELAYBOT_CONFIG_PATH", path.to_str().unwrap());

    let config = Config::load().unwrap();

    assert_eq!(config.clients.len(), 2);
    assert_eq!(config.clients[0].user_id, "@bot:test.example.org");
    assert!(config.clients[0].auto_join_rooms);
    assert_eq!(config.clients[0].allowed_inviters, vec!["@alice:test.example.org"]);
    assert!(!config.clients[1].sync);
    assert_eq!(config.sync.timeout_ms, 15_000);
    assert_eq!(config.sync.retry_backoff_secs, 3);
    assert_eq!(config.sync.channel_capacity, 5);
    assert_eq!(config.database.path, "/tmp/relaybot-test.db");
    assert_eq!(config.http_addr(), "0.0.0.0:9090");
    assert_eq!(config.services.len(), 1);
    assert_eq!(config.services[0].service_type, "url_watch");

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_config_load_from_explicit_path() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, FULL_CONFIG);

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.clients[1].user_id, "@helper:test.example.org");
}

#[test]
#[serial]
fn test_env_overrides_first_client_and_tunables() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, FULL_CONFIG);

    std::env::set_var("RELAYBOT_HOME_SERVER", "https://override.example.org");
    std::env::set_var("RELAYBOT_ACCESS_TOKEN", "syt_override");
    std::env::set_var("RELAYBOT_DATABASE_PATH", "/tmp/override.db");
    std::env::set_var("RELAYBOT_HTTP_PORT", "7070");
    std::env::set_var("RELAYBOT_SYNC_TIMEOUT_MS", "1000");

    let config = Config::load_from(&path).unwrap();

    assert_eq!(config.clients[0].home_server, "https://override.example.org");
    assert_eq!(config.clients[0].access_token, "syt_override");
    assert_eq!(config.clients[0].user_id, "@bot:test.example.org");
    // Only the first client is overridden.
    assert_eq!(config.clients[1].access_token, "syt_def");
    assert_eq!(config.database.path, "/tmp/override.db");
    assert_eq!(config.http.port, 7070);
    assert_eq!(config.sync.timeout_ms, 1000);

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_env_creates_client_when_none_configured() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "");

    std::env::set_var("RELAYBOT_HOME_SERVER", "https://matrix.example.org");
    std::env::set_var("RELAYBOT_USER_ID", "@envbot:example.org");
    std::env::set_var("RELAYBOT_ACCESS_TOKEN", "syt_env");

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.clients.len(), 1);
    assert_eq!(config.clients[0].user_id, "@envbot:example.org");
    assert!(config.clients[0].sync);
    assert!(!config.clients[0].auto_join_rooms);

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_partial_env_identity_creates_nothing() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "");

    std::env::set_var("RELAYBOT_USER_ID", "@envbot:example.org");

    let config = Config::load_from(&path).unwrap();
    assert!(config.clients.is_empty());

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_invalid_port_env_is_an_error() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "");

    std::env::set_var("RELAYBOT_HTTP_PORT", "not-a-port");
    let err = Config::load_from(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("RELAYBOT_HTTP_PORT"));

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_missing_access_token_fails_validation() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[[clients]]
user_id = "@bot:example.org"
home_server = "https://matrix.example.org"
access_token = ""
"#,
    );

    let err = Config::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("access_token"));
}

#[test]
#[serial]
fn test_malformed_toml_reports_path() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[[clients]\nuser_id = ");

    let err = Config::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}

#[test]
#[serial]
fn test_tilde_in_database_path_is_expanded() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[database]
path = "~/relaybot/test.db"
"#,
    );

    let config = Config::load_from(&path).unwrap();
    assert!(!config.database.path.starts_with('~'));
    assert!(config.database.path.ends_with("relaybot/test.db"));
}
