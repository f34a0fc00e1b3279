pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod engine;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod store;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use tokio::sync::watch;

use crate::core::{config::Settings, state::AppState, telemetry};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let stores = store::postgres::PgExamStore::stores(db_pool);
    let state = AppState::new(settings, stores);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = tokio::spawn(tasks::reaper::run(state.clone(), shutdown_rx));

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        addr = %state.settings().server_addr(),
        environment = %state.settings().runtime().environment.as_str(),
        "ExamGuard API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }
    if let Err(err) = reaper.await {
        tracing::error!(error = %err, "Background task join failed");
    }

    result?;

    Ok(())
}
