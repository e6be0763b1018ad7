use anyhow::{Context, Result};
use rollcall_core::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let cancel = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping after current frame");
            signal_flag.store(true, Ordering::Relaxed);
        }
    });

    // Capture and inference block, so the loop gets its own thread.
    let summary = tokio::task::spawn_blocking(move || engine::run(&config, &cancel))
        .await
        .context("capture loop panicked")??;

    tracing::info!(
        frames = summary.frames,
        faces = summary.faces,
        recorded = summary.recorded,
        "rollcalld shutting down"
    );
    Ok(())
}
