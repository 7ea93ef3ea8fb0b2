use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use super::AppState;
use crate::error::{ApiResult, AppError};
use crate::jobs::{GenerationFilter, GenerationPage, GenerationRecord, GenerationRequest, JobError};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/generation", get(list_generations))
        .route("/generation/advanced", post(start_generation))
        .route("/generation/analytics/{id}", get(generation_analytics))
        .route("/generation/{id}", get(get_generation).delete(delete_generation))
        .route("/generation/{id}/cancel", post(cancel_generation))
}

async fn start_generation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<Json<GenerationRecord>> {
    if request.project_id.trim().is_empty() {
        return Err(AppError::BadRequest("project_id is required".to_string()));
    }
    Ok(Json(state.runner.submit(request).await))
}

async fn get_generation(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<GenerationRecord>> {
    let record = state.runner.store().get(&id).await.ok_or(JobError::NotFound(id))?;
    Ok(Json(record))
}

async fn cancel_generation(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.runner.store().cancel(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Generation cancelled successfully",
        "generation_id": id,
    })))
}

async fn delete_generation(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.runner.store().delete(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Generation deleted successfully",
        "generation_id": id,
    })))
}

async fn list_generations(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<GenerationFilter>,
) -> Json<GenerationPage> {
    Json(state.runner.store().list(&filter).await)
}

async fn generation_analytics(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let record = state.runner.store().get(&id).await.ok_or(JobError::NotFound(id))?;
    Ok(Json(record.analytics_report()?))
}
