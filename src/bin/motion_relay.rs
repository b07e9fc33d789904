//! motion_relay - camera motion alerts over a Telegram bot.
//!
//! 1. Loads configuration (optional JSON file, then environment)
//! 2. Builds the camera source selected by the backend setting
//! 3. Relays each detected motion to the configured chat
//! 4. Answers /get-photo, /get-video, /disconnect and /help until
//!    disconnected or interrupted

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use motion_relay::config::{BackendKind, RelayConfig};
use motion_relay::{
    CameraSource, ChatSink, ConnectionState, Coordinator, Outcome, TelegramApi,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Relay camera motion alerts and on-demand media to a Telegram chat"
)]
struct Args {
    /// Optional JSON config file. Environment variables override its values.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Camera backend: "cloud" (Blink) or "local" (storage directory).
    #[arg(long)]
    backend: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = RelayConfig::load_from(args.config.as_deref())?;
    if let Some(backend) = &args.backend {
        cfg.backend = BackendKind::from_str(backend)?;
        cfg.validate()?;
    }
    log::info!(
        "motion relay {} starting, backend={}",
        env!("CARGO_PKG_VERSION"),
        cfg.backend
    );
    log::debug!("telegram settings: {:?}", cfg.telegram);

    let connection = ConnectionState::new();
    let signal_connection = connection.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        signal_connection.disconnect();
    })
    .context("failed to install signal handler")?;

    let outcome = match cfg.backend {
        BackendKind::Cloud => run_cloud(&cfg, connection)?,
        BackendKind::Local => run_local(&cfg, connection)?,
    };

    match outcome {
        Outcome::Disconnected => {
            log::info!("motion relay stopped");
            Ok(())
        }
        other => Err(anyhow!("motion relay stopped: {}", other)),
    }
}

#[cfg(feature = "backend-blink")]
fn run_cloud(cfg: &RelayConfig, connection: ConnectionState) -> Result<Outcome> {
    use motion_relay::{BlinkClient, BlinkCredentials, CloudSource};

    let credentials = BlinkCredentials::load(&cfg.blink.secrets_path)?;
    let client = BlinkClient::new(credentials, &cfg.blink)?;
    log::info!("polling Blink every {:?}", cfg.blink.poll_interval);
    let source = CloudSource::new(Arc::new(client), cfg.blink.poll_interval);
    Ok(run_relay(source, cfg, connection))
}

#[cfg(not(feature = "backend-blink"))]
fn run_cloud(_cfg: &RelayConfig, _connection: ConnectionState) -> Result<Outcome> {
    Err(anyhow!("cloud backend not compiled in (enable feature backend-blink)"))
}

#[cfg(feature = "backend-local")]
fn run_local(cfg: &RelayConfig, connection: ConnectionState) -> Result<Outcome> {
    use motion_relay::LocalSource;

    let root = cfg
        .local
        .storage_path
        .clone()
        .ok_or_else(|| anyhow!("LOCAL_STORAGE_PATH must be set for the local backend"))?;
    let source = LocalSource::new(root, cfg.local.queue_capacity)
        .with_settle_delay(cfg.local.settle_delay);
    Ok(run_relay(source, cfg, connection))
}

#[cfg(not(feature = "backend-local"))]
fn run_local(_cfg: &RelayConfig, _connection: ConnectionState) -> Result<Outcome> {
    Err(anyhow!("local backend not compiled in (enable feature backend-local)"))
}

fn run_relay<S: CameraSource>(source: S, cfg: &RelayConfig, connection: ConnectionState) -> Outcome {
    let api = TelegramApi::new(&cfg.telegram);
    let sink = Arc::new(ChatSink::new(api, source.media_fetcher(), connection));
    let mut coordinator = Coordinator::new(source, sink, cfg.monitor.clone());
    // the listener may sit in a long poll; it is abandoned at exit
    coordinator.run()
}
