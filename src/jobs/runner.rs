use serde_json::Map;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{error, info, warn};

use super::*;
use crate::agents::json::truthy;
use crate::providers::LLMProvider;
use crate::registry::ModelManager;
use crate::workflow::{
    validate_output, RetryPolicy, StageModels, WebsiteGenerationWorkflow, WorkflowState, WorkflowStatus,
};

/// Record steps the workflow progress moves through, in order
const STAGES: [(&str, GenerationStatus, f64); 4] = [
    ("initialization", GenerationStatus::Initializing, 5.0),
    ("analysis", GenerationStatus::Analyzing, 15.0),
    ("content_generation", GenerationStatus::Generating, 50.0),
    ("optimization", GenerationStatus::Optimizing, 80.0),
];

fn stage_for_progress(progress: f64) -> usize {
    if progress < 10.0 {
        0
    } else if progress < 30.0 {
        1
    } else if progress < 65.0 {
        2
    } else {
        3
    }
}

/// Runs generation requests in the background and records their progress
#[derive(Clone)]
pub struct GenerationRunner {
    store: Arc<GenerationStore>,
    models: Arc<ModelManager>,
    provider: Arc<dyn LLMProvider>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl GenerationRunner {
    pub fn new(store: Arc<GenerationStore>, models: Arc<ModelManager>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            provider: models.provider(),
            store,
            models,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<GenerationStore> {
        &self.store
    }

    /// Queues the request and starts working on it
    pub async fn submit(&self, request: GenerationRequest) -> GenerationRecord {
        let record = self.store.create(request.clone()).await;
        let id = record.generation_id.clone();

        let runner = self.clone();
        let task_id = id.clone();
        let (attached_tx, attached_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            // Runs only once the abort handle is stored
            if attached_rx.await.is_err() {
                return;
            }
            runner.process(&task_id, request).await;
            runner.store.detach_task(&task_id).await;
        });
        self.store.attach_task(&id, handle.abort_handle()).await;
        let _ = attached_tx.send(());
        record
    }

    async fn process(&self, id: &str, request: GenerationRequest) {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            self.store.update(id, |r| r.fail("Generation runner is shutting down")).await;
            return;
        };

        let started = Instant::now();
        self.store
            .update(id, |r| r.start_step("initialization", GenerationStatus::Initializing, 5.0))
            .await;
        info!(generation_id = %id, project_id = %request.project_id, "Starting generation");

        let stage_models = self.prepare_models(id).await;
        let mut options = request.workflow_options.clone();
        options.retry = self.retry;
        let workflow = WebsiteGenerationWorkflow::new(self.provider.clone(), options)
            .with_models(&stage_models)
            .with_usage_tracking(self.models.clone());

        let user = request.user_id.clone().unwrap_or_else(|| "anonymous".to_string());
        let mut state = WorkflowState::new(request.project_id.clone(), user, request.wizard_data.clone());
        let (tx, rx) = mpsc::unbounded_channel::<f64>();
        state.add_observer(move |s| {
            let _ = tx.send(s.progress);
        });
        let forwarder = tokio::spawn(forward_progress(self.store.clone(), id.to_string(), rx));

        let outcome = tokio::time::timeout(self.timeout, workflow.run(state)).await;
        let (tokens, mut models_used) = workflow.agents().iter().fold((0, Vec::new()), |(tokens, mut models), agent| {
            models.push(agent.model().to_string());
            (tokens + agent.stats().total_tokens, models)
        });
        models_used.sort();
        models_used.dedup();

        // The observer owns the sender, so the forwarder drains once the state is gone.
        let finished = match outcome {
            Ok(state) => Ok(Finished::from_state(state)),
            Err(_) => Err(format!("Generation timed out after {:?}", self.timeout)),
        };
        let _ = forwarder.await;

        let elapsed = started.elapsed().as_secs_f64();
        match finished {
            Ok(Finished::Completed(output)) => {
                let analytics = request.include_analytics.then(|| content_analytics(&output));
                self.store
                    .update(id, |r| {
                        if r.status.is_finished() {
                            return;
                        }
                        if let Some(analytics) = analytics {
                            r.start_step("analytics", GenerationStatus::Finalizing, 90.0);
                            r.analytics = Some(analytics.clone());
                            r.complete_step("analytics", Some(analytics));
                        }
                        r.start_step("finalization", GenerationStatus::Finalizing, 95.0);
                        r.content = output;
                        r.metadata.models_used = models_used;
                        r.metadata.total_tokens = tokens;
                        r.metadata.generation_time = Some(elapsed);
                        r.complete_step("finalization", None);
                        r.status = GenerationStatus::Completed;
                        r.progress = 100.0;
                        r.current_step = Some("completed".to_string());
                        r.completed_at = Some(chrono::Utc::now());
                    })
                    .await;
                info!(generation_id = %id, seconds = elapsed, tokens, "Generation completed");
            }
            Ok(Finished::Failed { message, partial }) => {
                self.store
                    .update(id, |r| {
                        if r.status.is_finished() {
                            return;
                        }
                        if let Some(partial) = partial {
                            r.content = partial;
                        }
                        r.metadata.models_used = models_used;
                        r.metadata.total_tokens = tokens;
                        r.metadata.generation_time = Some(elapsed);
                        r.fail(message.clone());
                    })
                    .await;
                error!(generation_id = %id, error = %message, "Generation failed");
            }
            Err(message) => {
                self.store.update(id, |r| r.fail(message.clone())).await;
                warn!(generation_id = %id, error = %message, "Generation timed out");
            }
        }
    }
}

impl GenerationRunner {
    /// Picks each stage's model from the registry and makes sure it is installed
    async fn prepare_models(&self, id: &str) -> StageModels {
        let stage_models = StageModels::select(&self.models).await;
        for model in stage_models.distinct() {
            if !self.models.ensure_model_available(&model).await {
                warn!(generation_id = %id, model = %model, "Model may not be available");
            }
        }
        info!(generation_id = %id, models = ?stage_models, "Selected stage models");

        let output = json!({ "models": stage_models });
        self.store
            .update(id, |r| r.complete_step("initialization", Some(output)))
            .await;
        stage_models
    }
}

enum Finished {
    Completed(Value),
    Failed { message: String, partial: Option<Value> },
}

impl Finished {
    fn from_state(state: WorkflowState) -> Self {
        if state.status == WorkflowStatus::Completed {
            if let Some(output) = state.metadata.final_output {
                return Self::Completed(output);
            }
        }
        let message = if state.errors.is_empty() {
            "Workflow failed".to_string()
        } else {
            state.errors.join("; ")
        };
        Self::Failed {
            message,
            partial: state.metadata.partial_output,
        }
    }
}

/// Moves the record forward through its steps as workflow progress arrives
async fn forward_progress(store: Arc<GenerationStore>, id: String, mut rx: mpsc::UnboundedReceiver<f64>) {
    let mut current = 0;
    while let Some(progress) = rx.recv().await {
        let stage = stage_for_progress(progress);
        if stage <= current {
            continue;
        }
        current = stage;
        let (name, status, record_progress) = STAGES[stage];
        store
            .update(&id, |r| {
                if !r.status.is_finished() {
                    r.start_step(name, status, record_progress);
                }
            })
            .await;
    }
}

fn word_count(value: &Value) -> usize {
    match value {
        Value::String(text) => text.split_whitespace().count(),
        Value::Array(items) => items.iter().map(word_count).sum(),
        Value::Object(map) => map.values().map(word_count).sum(),
        _ => 0,
    }
}

/// Validation scores and size figures for a finished package
pub fn content_analytics(output: &Value) -> Value {
    let report = validate_output(output);
    let content = output.get("content").and_then(Value::as_object).cloned().unwrap_or_default();

    let mut section_words = Map::new();
    for (section, value) in &content {
        section_words.insert(section.clone(), json!(word_count(value)));
    }
    let services = content.get("services").and_then(Value::as_array).map_or(0, Vec::len);
    let seo_pages = output
        .get("seo")
        .and_then(Value::as_object)
        .map_or(0, |seo| seo.values().filter(|v| truthy(Some(v))).count());

    json!({
        "quality_metrics": report,
        "content_metrics": {
            "total_sections": content.len(),
            "total_words": word_count(&Value::Object(content.clone())),
            "section_words": section_words,
            "services_count": services,
            "seo_pages": seo_pages,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::demo::DemoProvider;
    use crate::workflow::wizard::sample_wizard;

    fn runner(provider: DemoProvider, timeout: Duration) -> GenerationRunner {
        let models = Arc::new(ModelManager::new(Arc::new(provider)));
        GenerationRunner::new(Arc::new(GenerationStore::new()), models, 2, timeout)
            .with_retry_policy(RetryPolicy::immediate())
    }

    async fn wait_until_finished(runner: &GenerationRunner, id: &str) -> GenerationRecord {
        for _ in 0..500 {
            if let Some(record) = runner.store().get(id).await {
                if record.status.is_finished() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("generation {} did not finish", id);
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(stage_for_progress(5.0), 0);
        assert_eq!(stage_for_progress(10.0), 1);
        assert_eq!(stage_for_progress(30.0), 2);
        assert_eq!(stage_for_progress(65.0), 3);
        assert_eq!(stage_for_progress(100.0), 3);
    }

    #[test]
    fn test_word_count_walks_nested_values() {
        let value = json!({ "a": "one two", "b": ["three", { "c": "four five six" }], "d": 7 });
        assert_eq!(word_count(&value), 6);
    }

    #[tokio::test]
    async fn test_generation_completes_with_steps_and_analytics() {
        let runner = runner(DemoProvider::new(), Duration::from_secs(30));
        let queued = runner.submit(GenerationRequest::new("proj-1", sample_wizard())).await;
        assert_eq!(queued.status, GenerationStatus::Queued);

        let record = wait_until_finished(&runner, &queued.generation_id).await;
        assert_eq!(record.status, GenerationStatus::Completed, "error: {:?}", record.error);
        assert_eq!(record.progress, 100.0);

        let steps: Vec<&str> = record.workflow_steps.iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(
            steps,
            vec!["initialization", "analysis", "content_generation", "optimization", "analytics", "finalization"]
        );
        assert!(record
            .workflow_steps
            .iter()
            .all(|s| s.status == StepStatus::Completed && s.duration.is_some()));

        assert!(record.content["content"]["homepage"].is_object());
        assert_eq!(record.metadata.models_used, vec!["llama3.1:8b", "mistral:7b"]);
        assert!(record.metadata.generation_time.is_some());

        let analytics = record.analytics.as_ref().unwrap();
        assert_eq!(analytics["quality_metrics"]["overall_score"], 100);
        assert_eq!(analytics["content_metrics"]["services_count"], 2);
        assert!(analytics["content_metrics"]["total_words"].as_u64().unwrap() > 0);

        let report = record.analytics_report().unwrap();
        assert_eq!(report["performance"]["step_breakdown"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_unhealthy_primary_routes_stages_to_fallback() {
        let models = Arc::new(ModelManager::new(Arc::new(DemoProvider::new())));
        models.register_model("llama3.1:8b").await;
        models.register_model("mistral:7b").await;
        assert!(models.test_model_health("mistral:7b").await);
        let runner = GenerationRunner::new(Arc::new(GenerationStore::new()), models, 2, Duration::from_secs(30))
            .with_retry_policy(RetryPolicy::immediate());

        let queued = runner.submit(GenerationRequest::new("proj-1", sample_wizard())).await;
        let record = wait_until_finished(&runner, &queued.generation_id).await;

        assert_eq!(record.status, GenerationStatus::Completed, "error: {:?}", record.error);
        assert_eq!(record.metadata.models_used, vec!["mistral:7b"]);
        let initialization = &record.workflow_steps[0];
        assert_eq!(initialization.step_name, "initialization");
        let selected = &initialization.output.as_ref().unwrap()["models"];
        assert_eq!(selected["content"], "mistral:7b");
        assert_eq!(selected["requirements"], "mistral:7b");
        assert_eq!(selected["seo"], "mistral:7b");
    }

    #[tokio::test]
    async fn test_finished_generation_releases_its_task() {
        let runner = runner(DemoProvider::new(), Duration::from_secs(30));
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(runner.submit(GenerationRequest::new("proj-1", WizardData::default())).await.generation_id);
        }
        for id in &ids {
            wait_until_finished(&runner, id).await;
        }

        for _ in 0..100 {
            if runner.store().running_tasks().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task handles left behind: {}", runner.store().running_tasks().await);
    }

    #[tokio::test]
    async fn test_generation_without_analytics_skips_step() {
        let runner = runner(DemoProvider::new(), Duration::from_secs(30));
        let mut request = GenerationRequest::new("proj-1", sample_wizard());
        request.include_analytics = false;
        let queued = runner.submit(request).await;

        let record = wait_until_finished(&runner, &queued.generation_id).await;
        assert_eq!(record.status, GenerationStatus::Completed);
        assert!(record.analytics.is_none());
        assert!(record.workflow_steps.iter().all(|s| s.step_name != "analytics"));
    }

    #[tokio::test]
    async fn test_invalid_wizard_fails_the_record() {
        let runner = runner(DemoProvider::new(), Duration::from_secs(30));
        let queued = runner.submit(GenerationRequest::new("proj-1", WizardData::default())).await;

        let record = wait_until_finished(&runner, &queued.generation_id).await;
        assert_eq!(record.status, GenerationStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("Business name is required"));
        let last = record.workflow_steps.last().unwrap();
        assert_eq!(last.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_timeout_fails_the_record() {
        let slow = DemoProvider::new().with_latency(Duration::from_millis(200));
        let runner = runner(slow, Duration::from_millis(50));
        let queued = runner.submit(GenerationRequest::new("proj-1", sample_wizard())).await;

        let record = wait_until_finished(&runner, &queued.generation_id).await;
        assert_eq!(record.status, GenerationStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Generation timed out after 50ms"));
    }

    #[tokio::test]
    async fn test_cancel_stops_running_generation() {
        let slow = DemoProvider::new().with_latency(Duration::from_millis(200));
        let runner = runner(slow, Duration::from_secs(30));
        let queued = runner.submit(GenerationRequest::new("proj-1", sample_wizard())).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        runner.store().cancel(&queued.generation_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let record = runner.store().get(&queued.generation_id).await.unwrap();
        assert_eq!(record.status, GenerationStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Generation cancelled by user"));
        assert!(record.content.as_object().unwrap().is_empty());
    }
}
