pub mod agents;
pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod providers;
pub mod registry;
pub mod workflow;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use config::{ProviderKind, ServiceConfig};
use jobs::{GenerationRunner, GenerationStore};
use providers::{DemoProvider, LLMProvider, OllamaClient};
use registry::ModelManager;

pub fn build_provider(config: &ServiceConfig) -> Result<Arc<dyn LLMProvider>> {
    let provider: Arc<dyn LLMProvider> = match config.provider {
        ProviderKind::Ollama => Arc::new(OllamaClient::new(config.provider_config())?),
        ProviderKind::Demo => Arc::new(DemoProvider::new()),
    };
    Ok(provider)
}

/// Starts model upkeep and serves the HTTP API until the listener fails
pub async fn serve(config: ServiceConfig) -> Result<()> {
    info!(
        environment = %config.environment,
        provider = ?config.provider,
        "Starting siteforge"
    );

    let provider = build_provider(&config)?;
    let models = Arc::new(ModelManager::new(provider));

    if config.initialize_models_on_startup {
        // The service still answers health checks while the runtime is down
        if let Err(e) = models.initialize_models().await {
            warn!(error = %e, "Model initialization incomplete");
        }
    }
    let _monitor = models.start_monitoring(config.health_check_interval());

    let runner = GenerationRunner::new(
        Arc::new(GenerationStore::new()),
        models.clone(),
        config.max_concurrent_workflows,
        config.workflow_timeout(),
    );

    let address = config.bind_address();
    let app = api::router(api::AppState::new(config, models, runner));
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!(address = %address, "Listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
