mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod models;
mod routes;
mod scheduling;

use std::sync::Arc;

use crate::{config::Config, models::AppState};
use crate::scheduling::{
    notify::OutboxNotifier,
    pg::{PgAppointmentStore, PgWaitlistStore},
    ClinicService, SystemClock,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, &cfg.db).await?;

    let clinic = Arc::new(ClinicService::new(
        Arc::new(PgAppointmentStore::new(pool.clone())),
        Arc::new(PgWaitlistStore::new(pool.clone())),
        Arc::new(OutboxNotifier::new(pool.clone())),
        Arc::new(SystemClock),
        Arc::new(cfg.hours.clone()),
        cfg.jobs.clone(),
    ));
    let jobs = clinic.spawn_jobs();
    tracing::info!(jobs = jobs.len(), "background jobs started");

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        clinic,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for handle in jobs {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
