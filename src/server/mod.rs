//! HTTP API for plans, schedules and blueprint boards.

mod error;
mod handlers;
mod websocket;

use crate::config::Config;
use crate::datasources::build_weather_source;
use crate::db::Database;
use crate::error::Result;
use crate::logic::{ClimatologyPredictor, Coordinator, GreedyAllocator, PipelineServices};
use axum::routing::{get, patch, post};
use axum::Router;
use chrono::NaiveDate;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    /// Fixed reference date, otherwise the local date at request time
    pub today: Option<NaiveDate>,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            today: None,
        }
    }

    pub fn db(&self) -> &Database {
        &self.coordinator.services().db
    }

    pub fn config(&self) -> &Config {
        &self.coordinator.services().config
    }

    pub fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}

/// Pipeline services with the configured weather source, predictor and
/// optimizer.
pub fn build_services(config: Config, db: Database) -> PipelineServices {
    PipelineServices {
        weather: build_weather_source(&config.weather, &db),
        predictor: Arc::new(ClimatologyPredictor),
        allocator: Arc::new(GreedyAllocator::new(&config.optimizer)),
        db,
        config,
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/plans/{id}", get(handlers::get_plan))
        .route("/plans/{id}/start", post(handlers::start_plan))
        .route("/plans/{id}/progress", get(websocket::progress_ws))
        .route("/plans/{id}/schedule", get(handlers::get_schedule))
        .route("/blueprints/{id}", patch(handlers::patch_blueprint))
        .route("/crops/{crop_id}/board", get(handlers::get_board))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Starts pipeline workers and serves the API until Ctrl-C.
pub async fn serve(config: Config, db: Database, port_override: Option<u16>) -> Result<()> {
    let host = config.server.host.clone();
    let port = port_override.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port).parse().map_err(|e| {
        crate::error::CropOpsError::Config(format!("Invalid listen address {}:{}: {}", host, port, e))
    })?;

    let coordinator = Coordinator::new(build_services(config, db));
    let app = build_router(AppState::new(coordinator));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
