use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::LoopSettings;
use crate::error::RelayError;

const DEFAULT_SECRETS_PATH: &str = "config/secrets.json";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_CAPTURE_SETTLE_SECS: u64 = 5;
const DEFAULT_MOTION_LOOKBACK_SECS: u64 = 120;
const DEFAULT_ERROR_BACKOFF_SECS: u64 = 60;
const DEFAULT_MAX_SOURCE_FAILURES: u32 = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_SETTLE_SECS: u64 = 2;
const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    backend: Option<String>,
    blink: Option<BlinkConfigFile>,
    local: Option<LocalConfigFile>,
    telegram: Option<TelegramConfigFile>,
    monitor: Option<MonitorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BlinkConfigFile {
    secrets_path: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
    capture_settle_secs: Option<u64>,
    motion_lookback_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LocalConfigFile {
    storage_path: Option<PathBuf>,
    queue_capacity: Option<usize>,
    settle_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramConfigFile {
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    error_backoff_secs: Option<u64>,
    max_source_failures: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Cloud,
    Local,
}

impl BackendKind {
    pub fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cloud" | "blink" => Ok(BackendKind::Cloud),
            "local" | "fs" | "filesystem" => Ok(BackendKind::Local),
            other => Err(anyhow!(
                "unknown backend '{}'; expected 'cloud' or 'local'",
                other
            )),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Cloud => f.write_str("cloud"),
            BackendKind::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub backend: BackendKind,
    pub blink: BlinkSettings,
    pub local: LocalSettings,
    pub telegram: TelegramSettings,
    pub monitor: LoopSettings,
}

#[derive(Debug, Clone)]
pub struct BlinkSettings {
    pub secrets_path: PathBuf,
    pub poll_interval: Duration,
    pub capture_settle: Duration,
    /// How far before the previous refresh a clip may have started and
    /// still count as new motion.
    pub motion_lookback: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub storage_path: Option<PathBuf>,
    pub queue_capacity: usize,
    /// How long a recording must stay unchanged before it is relayed when
    /// the platform does not report the writer closing it.
    pub settle_delay: Duration,
}

#[derive(Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl RelayConfig {
    /// Load from the JSON file named by `RELAY_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RELAY_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => RelayConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let blink = file.blink.unwrap_or_default();
        let local = file.local.unwrap_or_default();
        let telegram = file.telegram.unwrap_or_default();
        let monitor = file.monitor.unwrap_or_default();

        let request_timeout = Duration::from_secs(
            telegram
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        );
        let storage_path = local.storage_path;
        let backend = match file.backend.as_deref() {
            Some(name) => BackendKind::from_str(name)?,
            None => default_backend(storage_path.as_ref()),
        };
        Ok(Self {
            backend,
            blink: BlinkSettings {
                secrets_path: blink
                    .secrets_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRETS_PATH)),
                poll_interval: Duration::from_secs(
                    blink.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
                ),
                capture_settle: Duration::from_secs(
                    blink
                        .capture_settle_secs
                        .unwrap_or(DEFAULT_CAPTURE_SETTLE_SECS),
                ),
                motion_lookback: Duration::from_secs(
                    blink
                        .motion_lookback_secs
                        .unwrap_or(DEFAULT_MOTION_LOOKBACK_SECS),
                ),
                request_timeout,
            },
            local: LocalSettings {
                storage_path,
                queue_capacity: local.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
                settle_delay: Duration::from_secs(
                    local.settle_secs.unwrap_or(DEFAULT_SETTLE_SECS),
                ),
            },
            telegram: TelegramSettings {
                bot_token: telegram.bot_token.unwrap_or_default(),
                chat_id: telegram.chat_id.unwrap_or_default(),
                api_base: telegram
                    .api_base
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_string()),
                request_timeout,
            },
            monitor: LoopSettings {
                error_backoff: Duration::from_secs(
                    monitor
                        .error_backoff_secs
                        .unwrap_or(DEFAULT_ERROR_BACKOFF_SECS),
                ),
                max_consecutive_failures: monitor
                    .max_source_failures
                    .unwrap_or(DEFAULT_MAX_SOURCE_FAILURES),
                ..LoopSettings::default()
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(token) = env_value(&["BOT_TOKEN", "TELEGRAM_BOT_TOKEN"]) {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = env_value(&["CHAT_ID", "TELEGRAM_CHAT_ID"]) {
            self.telegram.chat_id = chat_id;
        }
        if let Some(path) = env_value(&["LOCAL_STORAGE_PATH"]) {
            self.local.storage_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_value(&["BLINK_SECRETS_PATH"]) {
            self.blink.secrets_path = PathBuf::from(path);
        }
        if let Some(secs) = env_value(&["RELAY_POLL_INTERVAL_SECS"]) {
            self.blink.poll_interval =
                Duration::from_secs(parse_env("RELAY_POLL_INTERVAL_SECS", &secs)?);
        }
        if let Some(secs) = env_value(&["RELAY_ERROR_BACKOFF_SECS"]) {
            self.monitor.error_backoff =
                Duration::from_secs(parse_env("RELAY_ERROR_BACKOFF_SECS", &secs)?);
        }
        if let Some(count) = env_value(&["RELAY_MAX_SOURCE_FAILURES"]) {
            self.monitor.max_consecutive_failures =
                parse_env("RELAY_MAX_SOURCE_FAILURES", &count)?;
        }
        match env_value(&["RELAY_BACKEND"]) {
            Some(name) => self.backend = BackendKind::from_str(&name)?,
            // a storage path in the environment implies the local backend
            // unless RELAY_BACKEND says otherwise
            None if env_value(&["LOCAL_STORAGE_PATH"]).is_some() => {
                self.backend = BackendKind::Local;
            }
            None => {}
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(invalid("BOT_TOKEN must be set"));
        }
        if self.telegram.chat_id.trim().is_empty() {
            return Err(invalid("CHAT_ID must be set"));
        }
        if self.backend == BackendKind::Local && self.local.storage_path.is_none() {
            return Err(invalid("LOCAL_STORAGE_PATH must be set for the local backend"));
        }
        if self.blink.poll_interval.is_zero() {
            return Err(invalid("poll interval must be greater than zero"));
        }
        if self.monitor.error_backoff.is_zero() {
            return Err(invalid("error backoff must be greater than zero"));
        }
        if self.local.queue_capacity == 0 {
            return Err(invalid("event queue capacity must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> anyhow::Error {
    RelayError::Config(reason.to_string()).into()
}

fn default_backend(storage_path: Option<&PathBuf>) -> BackendKind {
    if storage_path.is_some() {
        BackendKind::Local
    } else {
        BackendKind::Cloud
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// First non-blank value among `keys`.
fn env_value(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
        .map(|value| value.trim().to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("{} must be a non-negative integer", key))
}
