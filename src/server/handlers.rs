use super::error::ApiError;
use super::AppState;
use crate::error::{CropOpsError, Result as CropResult};
use crate::logic::board::{load_board, reposition_blueprint, BoardView, RepositionOutcome, RepositionRequest};
use crate::logic::pipeline::StartedPipeline;
use crate::logic::timeline::{load_timeline, Timeline, TimelineQuery};
use crate::models::CultivationPlan;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

type ApiResult<T> = Result<T, ApiError>;

/// Runs synchronous database work off the async executor.
pub(super) async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> CropResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(CropOpsError::InvalidData(format!("Request task failed: {}", e))))?
        .map_err(ApiError::from)
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn start_plan(
    Path(plan_id): Path<i64>,
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<StartedPipeline>)> {
    let started = state.coordinator.start(plan_id, state.today()).await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

pub async fn get_plan(
    Path(plan_id): Path<i64>,
    State(state): State<AppState>,
) -> ApiResult<Json<CultivationPlan>> {
    let db = state.db().clone();
    let plan = blocking(move || db.require_plan(plan_id)).await?;
    Ok(Json(plan))
}

pub async fn get_schedule(
    Path(plan_id): Path<i64>,
    Query(query): Query<TimelineQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Timeline>> {
    let db = state.db().clone();
    let today = state.today();
    let timeline = blocking(move || load_timeline(&db, plan_id, &query, today)).await?;
    Ok(Json(timeline))
}

pub async fn patch_blueprint(
    Path(blueprint_id): Path<i64>,
    State(state): State<AppState>,
    Json(request): Json<RepositionRequest>,
) -> ApiResult<Json<RepositionOutcome>> {
    let db = state.db().clone();
    let board = state.config().board.clone();
    let outcome =
        blocking(move || reposition_blueprint(&db, &board, blueprint_id, &request)).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct BoardQuery {
    pub plan_id: Option<i64>,
}

pub async fn get_board(
    Path(crop_id): Path<i64>,
    Query(query): Query<BoardQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<BoardView>> {
    let db = state.db().clone();
    let board = state.config().board.clone();
    let view = blocking(move || load_board(&db, &board, crop_id, query.plan_id)).await?;
    Ok(Json(view))
}
