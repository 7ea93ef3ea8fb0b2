use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::state::{WorkflowState, WorkflowStatus};
use super::validation::validate_output;
use crate::agents::json::truthy;
use crate::agents::{safe_execute, Agent, ContentGenerator, RequirementsAnalyzer, SeoOptimizer, StructurePlanner};
use crate::providers::catalog::TaskCategory;
use crate::providers::LLMProvider;
use crate::registry::ModelManager;

pub const WORKFLOW_VERSION: &str = "1.0.0";

/// Exponential backoff between whole-pipeline attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all, for tests
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base, ...
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowOptions {
    /// Keep going after a stage reports errors
    pub skip_on_errors: bool,
    #[serde(skip)]
    pub retry: RetryPolicy,
}

/// The model each stage runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageModels {
    pub requirements: String,
    pub content: String,
    pub seo: String,
    pub structure: String,
}

impl StageModels {
    /// Asks the registry for the best healthy model of each stage's task category
    pub async fn select(manager: &ModelManager) -> Self {
        Self {
            requirements: manager.get_best_model(TaskCategory::Analysis).await,
            content: manager.get_best_model(TaskCategory::ContentGeneration).await,
            seo: manager.get_best_model(TaskCategory::SeoOptimization).await,
            structure: manager.get_best_model(TaskCategory::Analysis).await,
        }
    }

    /// Distinct model names, sorted
    pub fn distinct(&self) -> Vec<String> {
        let mut models = vec![
            self.requirements.clone(),
            self.content.clone(),
            self.seo.clone(),
            self.structure.clone(),
        ];
        models.sort();
        models.dedup();
        models
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Continue,
    Error,
}

/// Requirements, content, SEO and structure stages run in order over one state
pub struct WebsiteGenerationWorkflow {
    provider: Arc<dyn LLMProvider>,
    requirements: RequirementsAnalyzer,
    content: ContentGenerator,
    seo: SeoOptimizer,
    structure: StructurePlanner,
    options: WorkflowOptions,
}

impl WebsiteGenerationWorkflow {
    pub fn new(provider: Arc<dyn LLMProvider>, options: WorkflowOptions) -> Self {
        tracing::info!(skip_on_errors = options.skip_on_errors, "Initialized website generation workflow");
        Self {
            requirements: RequirementsAnalyzer::new(provider.clone()),
            content: ContentGenerator::new(provider.clone()),
            seo: SeoOptimizer::new(provider.clone()),
            structure: StructurePlanner::new(provider.clone()),
            provider,
            options,
        }
    }

    /// Report every model call of every stage to the registry
    pub fn with_usage_tracking(mut self, manager: Arc<ModelManager>) -> Self {
        self.requirements = self.requirements.with_usage_tracking(manager.clone());
        self.content = self.content.with_usage_tracking(manager.clone());
        self.seo = self.seo.with_usage_tracking(manager.clone());
        self.structure = self.structure.with_usage_tracking(manager);
        self
    }

    pub fn with_models(mut self, models: &StageModels) -> Self {
        self.requirements = self.requirements.with_model(&models.requirements);
        self.content = self.content.with_model(&models.content);
        self.seo = self.seo.with_model(&models.seo);
        self.structure = self.structure.with_model(&models.structure);
        self
    }

    pub fn agents(&self) -> [&dyn Agent; 4] {
        [&self.requirements, &self.content, &self.seo, &self.structure]
    }

    pub async fn run(&self, mut state: WorkflowState) -> WorkflowState {
        state.status = WorkflowStatus::Running;
        tracing::info!(
            workflow_id = %state.workflow_id,
            project_id = %state.project_id,
            "Starting workflow execution"
        );

        if self.execute_with_retry(&mut state).await.is_ok() && !state.has_errors() {
            state.update_progress("Workflow completed", 100.0, Some(WorkflowStatus::Completed));
        } else {
            state.status = WorkflowStatus::Failed;
        }

        tracing::info!(
            workflow_id = %state.workflow_id,
            status = ?state.status,
            progress = state.progress,
            errors = state.errors.len(),
            warnings = state.warnings.len(),
            "Workflow execution completed"
        );
        state
    }

    async fn execute_with_retry(&self, state: &mut WorkflowState) -> Result<()> {
        loop {
            let Err(e) = self.execute_graph(state).await else {
                return Ok(());
            };
            let attempt = format!("Execution attempt {} failed: {:#}", state.retry_count + 1, e);

            if !state.can_retry() {
                state.add_error(format!("Max retries reached. {}", attempt), None);
                return Err(e);
            }

            state.increment_retry();
            state.add_warning(format!("Retrying after error: {:#}", e), None);
            let delay = self.options.retry.delay(state.retry_count);
            tracing::warn!(
                workflow_id = %state.workflow_id,
                retry_count = state.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Workflow execution failed, retrying"
            );
            tokio::time::sleep(delay).await;
            state.reset_for_retry();
        }
    }

    /// One pass over the stage graph; only an unreachable backend is an error worth retrying
    async fn execute_graph(&self, state: &mut WorkflowState) -> Result<()> {
        let healthy = if state.retry_count > 0 {
            self.provider.refresh_health().await
        } else {
            self.provider.health_check().await
        };
        if !healthy {
            return Err(anyhow!("LLM provider '{}' is unavailable", self.provider.name()));
        }

        let failed = self.analyze(state).await == Route::Error
            || self.generate(state).await == Route::Error
            || self.optimize(state).await == Route::Error
            || self.plan(state).await == Route::Error;

        if failed {
            self.handle_error(state);
        } else {
            self.finalize(state);
        }
        Ok(())
    }

    fn route(&self, state: &WorkflowState) -> Route {
        if state.has_errors() && !self.options.skip_on_errors {
            Route::Error
        } else {
            Route::Continue
        }
    }

    async fn analyze(&self, state: &mut WorkflowState) -> Route {
        state.update_progress("Analyzing requirements", 10.0, Some(WorkflowStatus::Running));
        safe_execute(&self.requirements, state).await;

        if let Some(strategy) = state.content_strategy() {
            let missing: Vec<&str> = ["target_audience", "content_goals", "seo_keywords"]
                .into_iter()
                .filter(|key| !truthy(strategy.get(*key)))
                .collect();
            if !missing.is_empty() {
                let warning = format!("Content strategy missing: {}", missing.join(", "));
                state.add_warning(warning, None);
            }
        }

        if self.route(state) == Route::Error {
            return Route::Error;
        }
        if !truthy(state.content_strategy()) {
            state.add_error("Requirements analysis failed to generate content strategy", None);
            return Route::Error;
        }
        Route::Continue
    }

    async fn generate(&self, state: &mut WorkflowState) -> Route {
        state.update_progress("Generating website content", 30.0, None);
        safe_execute(&self.content, state).await;

        if !state.generated_content.is_empty() && !state.generated_content.contains_key("homepage") {
            state.add_warning("Missing essential content: homepage", None);
        }

        if self.route(state) == Route::Error {
            return Route::Error;
        }
        if state.generated_content.is_empty() {
            state.add_error("Content generation failed to produce content", None);
            return Route::Error;
        }
        Route::Continue
    }

    async fn optimize(&self, state: &mut WorkflowState) -> Route {
        state.update_progress("Optimizing for SEO", 65.0, None);
        safe_execute(&self.seo, state).await;

        if state.metadata.seo_optimization.is_empty() {
            state.add_warning("SEO optimization produced no results", None);
        }
        self.route(state)
    }

    async fn plan(&self, state: &mut WorkflowState) -> Route {
        state.update_progress("Planning site structure", 85.0, None);
        safe_execute(&self.structure, state).await;

        let metadata = &state.metadata;
        if !truthy(metadata.site_structure.as_ref()) || !truthy(metadata.navigation.as_ref()) {
            state.add_warning("Structure planning incomplete", None);
        }
        self.route(state)
    }

    fn finalize(&self, state: &mut WorkflowState) {
        state.update_progress("Finalizing output", 98.0, None);

        let metadata = &state.metadata;
        let or_empty = |value: &Option<Value>| value.clone().unwrap_or_else(|| json!({}));
        let mut output = json!({
            "metadata": {
                "workflow_id": state.workflow_id,
                "generated_at": Utc::now().to_rfc3339(),
                "workflow_version": WORKFLOW_VERSION,
                "agents_used": self.agents().iter().map(|a| a.name()).collect::<Vec<_>>(),
            },
            "content": state.generated_content,
            "seo": metadata.seo_optimization,
            "structure": or_empty(&metadata.site_structure),
            "navigation": or_empty(&metadata.navigation),
            "url_structure": or_empty(&metadata.url_structure),
            "structured_data": or_empty(&metadata.structured_data),
            "strategy": or_empty(&metadata.content_strategy),
            "page_hierarchy": or_empty(&metadata.page_hierarchy),
            "footer_structure": or_empty(&metadata.footer_structure),
            "seo_recommendations": metadata.seo_recommendations,
            "sitemap_structure": or_empty(&metadata.sitemap_structure),
        });

        let validation = validate_output(&output);
        let missing: Vec<&str> = ["content", "structure", "navigation"]
            .into_iter()
            .filter(|section| !truthy(output.get(*section)))
            .collect();
        output["validation"] = json!(validation);

        if !missing.is_empty() {
            state.add_error(format!("Missing required sections: {}", missing.join(", ")), None);
            state.status = WorkflowStatus::Failed;
            return;
        }

        tracing::info!(
            workflow_id = %state.workflow_id,
            validation_score = validation.overall_score,
            warnings = state.warnings.len(),
            "Website generation workflow completed"
        );
        state.metadata.final_output = Some(output);
        state.update_progress("Website generation completed", 100.0, Some(WorkflowStatus::Completed));
    }

    /// Marks the run failed and keeps whatever the finished stages produced
    fn handle_error(&self, state: &mut WorkflowState) {
        tracing::error!(
            workflow_id = %state.workflow_id,
            errors = ?state.errors,
            step = %state.current_step,
            "Workflow error handling activated"
        );
        state.status = WorkflowStatus::Failed;

        if state.generated_content.is_empty() && state.metadata.is_empty() {
            return;
        }

        let mut completed = Vec::new();
        if truthy(state.content_strategy()) {
            completed.push("requirements_analysis");
        }
        if !state.generated_content.is_empty() {
            completed.push("content_generation");
        }
        if !state.metadata.seo_optimization.is_empty() {
            completed.push("seo_optimization");
        }
        if truthy(state.metadata.site_structure.as_ref()) {
            completed.push("structure_planning");
        }

        let metadata: Map<String, Value> = match serde_json::to_value(&state.metadata) {
            Ok(Value::Object(map)) => map.into_iter().filter(|(_, v)| truthy(Some(v))).collect(),
            _ => Map::new(),
        };

        tracing::info!(workflow_id = %state.workflow_id, completed_steps = ?completed, "Partial results preserved");
        state.metadata.partial_output = Some(json!({
            "partial": true,
            "completed_steps": completed,
            "content": state.generated_content,
            "metadata": metadata,
            "errors": state.errors,
            "warnings": state.warnings,
        }));
    }
}
