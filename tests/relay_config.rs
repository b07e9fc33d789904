use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use motion_relay::config::{BackendKind, RelayConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RELAY_CONFIG",
        "BOT_TOKEN",
        "TELEGRAM_BOT_TOKEN",
        "CHAT_ID",
        "TELEGRAM_CHAT_ID",
        "LOCAL_STORAGE_PATH",
        "RELAY_BACKEND",
        "BLINK_SECRETS_PATH",
        "RELAY_POLL_INTERVAL_SECS",
        "RELAY_ERROR_BACKOFF_SECS",
        "RELAY_MAX_SOURCE_FAILURES",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "backend": "cloud",
            "blink": {
                "secrets_path": "/etc/relay/blink.json",
                "poll_interval_secs": 45,
                "capture_settle_secs": 3,
                "motion_lookback_secs": 90
            },
            "telegram": {
                "bot_token": "file-token",
                "chat_id": "1111",
                "request_timeout_secs": 20
            },
            "monitor": {
                "error_backoff_secs": 90,
                "max_source_failures": 4
            }
        }"#,
    );

    std::env::set_var("RELAY_CONFIG", file.path());
    std::env::set_var("BOT_TOKEN", "env-token");
    std::env::set_var("RELAY_POLL_INTERVAL_SECS", "15");

    let cfg = RelayConfig::load().expect("load config");

    assert_eq!(cfg.backend, BackendKind::Cloud);
    assert_eq!(cfg.telegram.bot_token, "env-token");
    assert_eq!(cfg.telegram.chat_id, "1111");
    assert_eq!(cfg.telegram.api_base, "https://api.telegram.org");
    assert_eq!(cfg.telegram.request_timeout, Duration::from_secs(20));
    assert_eq!(cfg.blink.secrets_path, PathBuf::from("/etc/relay/blink.json"));
    assert_eq!(cfg.blink.poll_interval, Duration::from_secs(15));
    assert_eq!(cfg.blink.capture_settle, Duration::from_secs(3));
    assert_eq!(cfg.blink.motion_lookback, Duration::from_secs(90));
    assert_eq!(cfg.blink.request_timeout, Duration::from_secs(20));
    assert_eq!(cfg.monitor.error_backoff, Duration::from_secs(90));
    assert_eq!(cfg.monitor.max_consecutive_failures, 4);

    clear_env();
}

#[test]
fn env_only_uses_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
    std::env::set_var("TELEGRAM_CHAT_ID", "4242");

    let cfg = RelayConfig::load().expect("load config");

    assert_eq!(cfg.backend, BackendKind::Cloud);
    assert_eq!(cfg.telegram.bot_token, "123:abc");
    assert_eq!(cfg.telegram.chat_id, "4242");
    assert_eq!(cfg.blink.secrets_path, PathBuf::from("config/secrets.json"));
    assert_eq!(cfg.blink.poll_interval, Duration::from_secs(30));
    assert_eq!(cfg.blink.motion_lookback, Duration::from_secs(120));
    assert_eq!(cfg.monitor.error_backoff, Duration::from_secs(60));
    assert_eq!(cfg.monitor.max_consecutive_failures, 10);
    assert_eq!(cfg.local.storage_path, None);
    assert_eq!(cfg.local.settle_delay, Duration::from_secs(2));

    clear_env();
}

#[test]
fn primary_names_win_over_fallbacks() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BOT_TOKEN", "primary");
    std::env::set_var("TELEGRAM_BOT_TOKEN", "fallback");
    std::env::set_var("CHAT_ID", "1");
    std::env::set_var("TELEGRAM_CHAT_ID", "2");

    let cfg = RelayConfig::load().expect("load config");
    assert_eq!(cfg.telegram.bot_token, "primary");
    assert_eq!(cfg.telegram.chat_id, "1");

    clear_env();
}

#[test]
fn storage_path_selects_local_backend() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BOT_TOKEN", "t");
    std::env::set_var("CHAT_ID", "1");
    std::env::set_var("LOCAL_STORAGE_PATH", "/srv/recordings");

    let cfg = RelayConfig::load().expect("load config");
    assert_eq!(cfg.backend, BackendKind::Local);
    assert_eq!(cfg.local.storage_path, Some(PathBuf::from("/srv/recordings")));

    std::env::set_var("RELAY_BACKEND", "cloud");
    let cfg = RelayConfig::load().expect("load config");
    assert_eq!(cfg.backend, BackendKind::Cloud);

    clear_env();
}

#[test]
fn blank_storage_path_keeps_file_backend() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{"backend": "cloud", "local": {"settle_secs": 7}}"#);
    std::env::set_var("BOT_TOKEN", "t");
    std::env::set_var("CHAT_ID", "1");
    std::env::set_var("LOCAL_STORAGE_PATH", "  ");

    let cfg = RelayConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.backend, BackendKind::Cloud);
    assert_eq!(cfg.local.storage_path, None);
    assert_eq!(cfg.local.settle_delay, Duration::from_secs(7));

    clear_env();
}

#[test]
fn rejects_missing_credentials_and_bad_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    assert!(RelayConfig::load().is_err());

    std::env::set_var("BOT_TOKEN", "t");
    assert!(RelayConfig::load().is_err());

    std::env::set_var("CHAT_ID", "1");
    std::env::set_var("RELAY_BACKEND", "local");
    let err = RelayConfig::load().unwrap_err();
    assert!(err.to_string().contains("LOCAL_STORAGE_PATH"));

    std::env::set_var("RELAY_BACKEND", "satellite");
    assert!(RelayConfig::load().is_err());

    std::env::set_var("RELAY_BACKEND", "cloud");
    std::env::set_var("RELAY_POLL_INTERVAL_SECS", "0");
    assert!(RelayConfig::load().is_err());

    std::env::set_var("RELAY_POLL_INTERVAL_SECS", "soon");
    assert!(RelayConfig::load().is_err());

    clear_env();
}

#[test]
fn unreadable_or_invalid_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BOT_TOKEN", "t");
    std::env::set_var("CHAT_ID", "1");

    let file = write_config("{ not json");
    assert!(RelayConfig::load_from(Some(file.path())).is_err());

    let missing = file.path().with_extension("missing");
    assert!(RelayConfig::load_from(Some(&missing)).is_err());

    clear_env();
}
