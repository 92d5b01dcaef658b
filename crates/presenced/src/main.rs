use anyhow::Result;
use presence_core::AttendanceEngine;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod response;
mod store;

use config::Config;
use dbus_interface::{PresenceService, BUS_NAME, OBJECT_PATH};
use engine::EngineHandle;
use store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = Config::load()?;
    let store = SqliteStore::open(&config.db_path)?;
    tracing::info!(path = %config.db_path.display(), "database ready");

    let extractor = config.build_extractor()?;
    tracing::info!(
        extractor = extractor.name(),
        threshold = config.match_threshold,
        late_cutoff = %config.late_cutoff,
        "engine configured"
    );

    let engine = EngineHandle::new(AttendanceEngine::new(store, extractor, config.engine_config()));
    let service = PresenceService::new(engine, config.db_path.clone());

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, session = config.session_bus, "presenced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("presenced shutting down");

    Ok(())
}
