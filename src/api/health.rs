use anyhow::Context;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use super::{AppState, SERVICE_NAME};
use crate::error::ApiResult;
use crate::registry::{HealthReport, OverallHealth};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/models", get(models_health))
        .route("/health/refresh", post(refresh_health))
}

fn model_summary(report: &HealthReport) -> Value {
    let healthy = report.models.values().filter(|m| m.healthy).count();
    json!({
        "status": if healthy > 0 { "healthy" } else { "unhealthy" },
        "overall_status": report.overall_status,
        "tracked": report.models.len(),
        "healthy": healthy,
        "pending_downloads": report.pending_downloads,
        "alerts": report.alerts,
    })
}

/// Provider reachability, model health and the settings that shape generation
async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let started = Instant::now();
    let provider = state.models.provider();
    let report = state.models.health_report().await;
    let healthy = report.provider_connected && report.overall_status != OverallHealth::Critical;

    Json(json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
        "response_time": format!("{:.2}ms", started.elapsed().as_secs_f64() * 1000.0),
        "checks": {
            "provider": {
                "status": if report.provider_connected { "healthy" } else { "unhealthy" },
                "name": provider.name(),
                "url": report.provider.base_url,
            },
            "models": model_summary(&report),
        },
        "configuration": {
            "environment": state.config.environment,
            "port": state.config.port,
            "default_model": state.config.default_model,
            "max_concurrent_workflows": state.config.max_concurrent_workflows,
        },
    }))
}

async fn models_health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.models.health_report().await)
}

/// Forces a provider recheck and a fresh model list before reporting
async fn refresh_health(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.models.refresh_models().await.context("Health refresh failed")?;
    state.models.run_monitoring_cycle().await;
    let report = state.models.health_report().await;
    Ok(Json(json!({
        "success": true,
        "message": "Health status refreshed successfully",
        "timestamp": Utc::now(),
        "report": report,
    })))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health_reports_provider_and_configuration() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "siteforge");
        assert_eq!(body["checks"]["provider"]["status"], "healthy");
        assert_eq!(body["checks"]["provider"]["name"], "demo");
        assert_eq!(body["configuration"]["port"], 3002);
        assert_eq!(body["configuration"]["max_concurrent_workflows"], 5);
        assert!(body["response_time"].as_str().unwrap().ends_with("ms"));
    }

    #[tokio::test]
    async fn test_models_health_returns_report() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/health/models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["provider_connected"], true);
        assert_eq!(body["alerts"][0], "No models initialized");
    }

    #[tokio::test]
    async fn test_refresh_returns_report() {
        let app = test_app();
        let (status, body) = send(&app, "POST", "/health/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["report"]["overall_status"].is_string());
        // Installed models that were never tracked are picked up and tested
        assert_eq!(body["report"]["models"]["llama3.1:8b"]["healthy"], true);
        assert_eq!(body["report"]["models"]["mistral:7b"]["healthy"], true);
        assert_eq!(body["report"]["overall_status"], "healthy");
    }
}
