//! Music kiosk: a fixed audio player switching between a CD transport, a
//! Spotify Connect receiver and a Bluetooth sink.
//!
//! The primary loop lives in [`kiosk::orchestrator`]; the HTTP API posts
//! commands into it and reads the status the presenter folds from UI events.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiosk::cli::Args;
use kiosk::config::KioskConfig;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kiosk=info")),
        )
        .init();

    if args.list_devices {
        return kiosk::runtime::list_devices();
    }

    let mut settings = KioskConfig::discover(args.config.as_deref())?.resolve()?;
    if let Some(bind) = args.http_bind {
        settings.http_bind = bind;
    }
    tracing::info!(
        version = kiosk::cli::VERSION,
        http_bind = %settings.http_bind,
        volume = settings.initial_volume,
        "kiosk starting"
    );
    kiosk::runtime::run(settings, args.source, true)
}
