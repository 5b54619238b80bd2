use anyhow::{Context, Result};
use facebadge_core::{OnnxFaceMatcher, Roster};
use facebadge_hw::{Camera, Framebuffer};
use facebadge_upload::{BackupStore, Dispatcher, HttpDelivery};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod kiosk;
mod presenter;
mod screens;

use config::Config;
use kiosk::Kiosk;
use presenter::Presenter;
use screens::Screens;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facebadged starting");

    let config = Config::from_env().context("invalid configuration")?;

    let mut matcher = OnnxFaceMatcher::load(&config.model_dir)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))?;
    let roster = Roster::load(&mut matcher, &config.roster_dir, &config.avatar_dir)
        .context("failed to load roster")?;
    if roster.is_empty() {
        tracing::warn!(dir = %config.roster_dir.display(), "roster is empty; every face will be rejected");
    }

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    let display = Framebuffer::open(&config.framebuffer)
        .with_context(|| format!("failed to open display {}", config.framebuffer.display()))?;
    let (width, height) = display.size();
    let screens = Screens::load(&config.asset_dir, width, height);

    let mut kiosk = Kiosk::new(camera, matcher, display, roster, screens, config.kiosk_settings());

    match (&config.endpoint_url, config.remote_logging) {
        (Some(endpoint), true) => {
            let delivery = HttpDelivery::new(endpoint.clone()).context("failed to build HTTP client")?;
            let backup = Arc::new(BackupStore::new(&config.backup_dir));
            let handle = Dispatcher::new(Arc::new(delivery), backup)
                .spawn(&tokio::runtime::Handle::current(), config.max_in_flight);
            kiosk = kiosk.with_dispatcher(handle);
            tracing::info!(endpoint = %endpoint, backup = %config.backup_dir.display(), "attendance reporting enabled");
        }
        _ => tracing::info!("attendance reporting disabled"),
    }

    let running = kiosk.running_flag();
    let mut kiosk_loop = tokio::task::spawn_blocking(move || kiosk.run());

    tracing::info!("facebadged ready");

    tokio::select! {
        joined = &mut kiosk_loop => {
            joined.context("kiosk loop panicked")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("facebadged shutting down");
            running.store(false, Ordering::SeqCst);
            kiosk_loop.await.context("kiosk loop panicked")?;
        }
    }

    Ok(())
}
