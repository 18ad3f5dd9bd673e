use anyhow::{Context, Result};
use facegate_core::{OnnxFaceAnalyzer, Orchestrator};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod responses;

use config::{Bus, Config};
use dbus_interface::{FacegateService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("facegated starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        bus = ?config.bus,
        intra_threads = config.intra_threads,
        "configuration loaded"
    );

    // Without models the daemon still serves Compare, CheckUniqueness and Status.
    let engine = match OnnxFaceAnalyzer::load(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.intra_threads,
    ) {
        Ok(analyzer) => {
            let orchestrator = Orchestrator::new(analyzer, config.thresholds.clone());
            Some(engine::spawn_engine(orchestrator).context("failed to start engine")?)
        }
        Err(e) => {
            tracing::error!(error = %e, "face models unavailable; image operations will fail");
            None
        }
    };

    let service = FacegateService::new(engine, config.thresholds.clone());

    let builder = match config.bus {
        Bus::System => zbus::connection::Builder::system(),
        Bus::Session => zbus::connection::Builder::session(),
    }
    .context("failed to connect to D-Bus")?;

    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME}"))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
