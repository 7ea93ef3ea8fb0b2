use anyhow::{anyhow, Context};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use chrono::Utc;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::AppState;
use crate::error::{ApiResult, AppError};
use crate::providers::catalog::{self, TaskCategory};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/install", post(install_model))
        .route("/models/performance", get(models_performance))
        .route("/models/refresh", post(refresh_models))
        .route("/models/recommend/{task}", get(recommend_model))
        .route("/models/{name}", get(model_info).delete(remove_model))
}

/// Entries of recent performance history returned per model
const RECENT_HISTORY: usize = 10;

#[derive(Debug, Deserialize)]
struct InstallRequest {
    model_name: String,
}

/// Installed models with their catalog specs and tracked health
async fn list_models(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let installed = state
        .models
        .provider()
        .list_models()
        .await
        .context("Failed to list models")?;
    let statuses = state.models.model_statuses().await;

    let models: Vec<Value> = installed
        .iter()
        .map(|name| {
            let status = statuses.get(name);
            json!({
                "name": name,
                "specs": catalog::model_specs(name),
                "essential": catalog::is_essential(name),
                "status": status.map(|s| s.status),
                "healthy": status.map(|s| s.is_healthy()).unwrap_or(false),
                "performance_score": status.map(|s| s.performance_score),
            })
        })
        .collect();

    Ok(Json(json!({
        "models": models,
        "total_count": installed.len(),
        "tracked_count": statuses.len(),
    })))
}

async fn model_info(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<Json<Value>> {
    let status = state
        .models
        .model_status(&name)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Model {} not found", name)))?;
    let usage = state.models.usage_stats(&name).await.unwrap_or_default();
    let recent = state.models.performance_history(&name, RECENT_HISTORY).await;

    Ok(Json(json!({
        "name": name,
        "healthy": status.is_healthy(),
        "status": status,
        "specs": catalog::model_specs(&name),
        "essential": catalog::is_essential(&name),
        "usage": usage.summary(),
        "recovery_attempts": state.models.recovery_attempts(&name).await,
        "performance_history": recent,
    })))
}

/// Reloads the installed model list from the runtime
async fn refresh_models(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    info!("Refreshing model list");
    let installed = state.models.refresh_models().await.context("Failed to refresh models")?;
    let statuses = state.models.model_statuses().await;
    let available = installed
        .iter()
        .filter(|name| statuses.get(*name).map(|s| s.is_healthy()).unwrap_or(false))
        .count();

    Ok(Json(json!({
        "success": true,
        "message": "Model list refreshed successfully",
        "total_models": installed.len(),
        "available_models": available,
        "timestamp": Utc::now(),
    })))
}

async fn install_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InstallRequest>,
) -> ApiResult<Json<Value>> {
    let model = request.model_name.trim().to_string();
    if model.is_empty() {
        return Err(AppError::BadRequest("model_name is required".to_string()));
    }

    if state.models.is_model_healthy(&model).await {
        return Ok(Json(json!({
            "success": true,
            "message": format!("Model {} is already available", model),
            "model_name": model,
        })));
    }

    info!(model = %model, "Installing model");
    let models = state.models.clone();
    let name = model.clone();
    tokio::spawn(async move {
        if !models.force_model_download(&name).await {
            warn!(model = %name, "Model installation did not produce a healthy model");
        }
    });

    Ok(Json(json!({
        "success": true,
        "message": format!("Model {} installation started", model),
        "model_name": model,
    })))
}

async fn remove_model(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> ApiResult<Json<Value>> {
    if state.models.model_status(&name).await.is_none() {
        return Err(AppError::NotFound(format!("Model {} not found", name)));
    }
    if !state.models.remove_model(&name).await {
        return Err(anyhow!("Failed to remove model {}", name).into());
    }
    Ok(Json(json!({
        "success": true,
        "message": format!("Model {} removed", name),
        "model_name": name,
    })))
}

/// Best model for a task plus the settings it should run with
async fn recommend_model(State(state): State<Arc<AppState>>, Path(task): Path<String>) -> Json<Value> {
    let category = TaskCategory::from_name(&task);
    let model = state.models.get_best_model(category).await;
    let config = catalog::model_for_task(category);

    Json(json!({
        "task_type": category,
        "recommended_model": model,
        "fallback_model": catalog::resolve_model_alias(config.fallback),
        "description": config.description,
        "settings": catalog::recommended_settings(category),
        "specs": catalog::model_specs(&model),
        "healthy": state.models.is_model_healthy(&model).await,
    }))
}

async fn models_performance(State(state): State<Arc<AppState>>) -> Json<Value> {
    let statuses = state.models.model_statuses().await;
    let mut performance = Vec::with_capacity(statuses.len());
    for (name, status) in &statuses {
        let usage = state.models.usage_stats(name).await.unwrap_or_default();
        performance.push(json!({
            "name": name,
            "status": status.status,
            "performance_score": status.performance_score,
            "test_latency": status.test_latency,
            "error_count": status.error_count,
            "usage": usage.summary(),
        }));
    }

    Json(json!({
        "models": performance,
        "optimized_selection": state.models.optimize_model_selection().await,
        "overall_health": state.models.overall_health().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_models_includes_specs() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/api/v1/models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 2);
        assert_eq!(body["models"][0]["name"], "llama3.1:8b");
        assert_eq!(body["models"][0]["essential"], true);
        assert_eq!(body["models"][0]["specs"]["size_gb"], 4.7);
    }

    #[tokio::test]
    async fn test_install_validates_name() {
        let app = test_app();
        let (status, body) = send(&app, "POST", "/api/v1/models/install", Some(json!({ "model_name": " " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "model_name is required");
        assert_eq!(body["status"], 400);

        let (status, body) =
            send(&app, "POST", "/api/v1/models/install", Some(json!({ "model_name": "phi3:mini" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Model phi3:mini installation started");
    }

    #[tokio::test]
    async fn test_remove_unknown_model_is_404() {
        let app = test_app();
        let (status, body) = send(&app, "DELETE", "/api/v1/models/ghost:1b", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Model ghost:1b not found");
    }

    #[tokio::test]
    async fn test_recommend_model_for_task() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/api/v1/models/recommend/seo_optimization", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task_type"], "seo_optimization");
        assert!(body["recommended_model"].is_string());
        assert!(body["settings"]["temperature"].is_number());
    }

    #[tokio::test]
    async fn test_model_info_after_refresh() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/api/v1/models/mistral:7b", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Model mistral:7b not found");

        let (status, body) = send(&app, "POST", "/api/v1/models/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Model list refreshed successfully");
        assert_eq!(body["total_models"], 2);
        assert_eq!(body["available_models"], 2);

        send(&app, "GET", "/api/v1/models/recommend/seo_optimization", None).await;

        let (status, body) = send(&app, "GET", "/api/v1/models/mistral:7b", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "mistral:7b");
        assert_eq!(body["healthy"], true);
        assert_eq!(body["status"]["status"], "available");
        assert_eq!(body["essential"], true);
        assert_eq!(body["usage"]["total_requests"], 1);
        let history = body["performance_history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["operation"], "get_best_model_seo_optimization");
    }

    #[tokio::test]
    async fn test_performance_lists_selection() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/api/v1/models/performance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["models"].as_array().unwrap().is_empty());
        assert_eq!(body["optimized_selection"].as_object().unwrap().len(), 6);
    }
}
