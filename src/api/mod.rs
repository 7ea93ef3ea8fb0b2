use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::jobs::GenerationRunner;
use crate::registry::ModelManager;

mod generation;
mod health;
mod models;

pub const SERVICE_NAME: &str = "siteforge";

/// Shared by every handler
pub struct AppState {
    pub config: ServiceConfig,
    pub models: Arc<ModelManager>,
    pub runner: GenerationRunner,
}

impl AppState {
    pub fn new(config: ServiceConfig, models: Arc<ModelManager>, runner: GenerationRunner) -> Self {
        Self { config, models, runner }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .merge(health::routes())
        .nest("/api/v1", models::routes().merge(generation::routes()))
        .with_state(Arc::new(state))
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "timestamp": Utc::now(),
        "endpoints": {
            "health": "/health",
            "models_health": "/health/models",
            "refresh_health": "/health/refresh",
            "models": "/api/v1/models",
            "generation": "/api/v1/generation",
            "advanced_generation": "/api/v1/generation/advanced",
        },
    }))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_service_info() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "siteforge");
        assert_eq!(body["status"], "running");
        assert_eq!(body["endpoints"]["health"], "/health");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_app();
        let (status, _) = send(&app, "GET", "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
