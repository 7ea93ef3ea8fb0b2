use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::wizard::WizardData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl WorkflowStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Everything the stages leave behind for later stages and the final package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_strategy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_goals: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_keywords: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competitive_analysis: Option<Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub seo_optimization: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sitemap_structure: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub seo_recommendations: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_structure: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_structure: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_hierarchy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer_structure: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responsive_navigation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_output: Option<Value>,
}

impl WorkflowMetadata {
    pub fn is_empty(&self) -> bool {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.is_empty(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub result: Value,
    pub timestamp: DateTime<Utc>,
    pub step: String,
}

pub type ProgressObserver = Arc<dyn Fn(&WorkflowState) + Send + Sync>;

#[derive(Clone, Default)]
struct Observers(Vec<ProgressObserver>);

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observers({})", self.0.len())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub project_id: String,
    pub user_id: String,
    pub wizard_data: WizardData,
    pub generated_content: Map<String, Value>,
    pub current_step: String,
    pub progress: f64,
    pub status: WorkflowStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: WorkflowMetadata,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub agent_results: BTreeMap<String, AgentRecord>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip)]
    observers: Observers,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub project_id: String,
    pub status: WorkflowStatus,
    pub progress: f64,
    pub current_step: String,
    pub duration_secs: f64,
    pub errors_count: usize,
    pub warnings_count: usize,
    pub agents: BTreeMap<String, bool>,
    pub retry_count: u32,
    pub content_sections: Vec<String>,
}

impl WorkflowState {
    pub fn new(project_id: impl Into<String>, user_id: impl Into<String>, wizard_data: WizardData) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            wizard_data,
            generated_content: Map::new(),
            current_step: String::new(),
            progress: 0.0,
            status: WorkflowStatus::Pending,
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata: WorkflowMetadata::default(),
            started_at: now,
            completed_at: None,
            last_updated: now,
            agent_results: BTreeMap::new(),
            retry_count: 0,
            max_retries: 3,
            observers: Observers::default(),
        }
    }

    /// Called after every progress, error or warning change
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: Fn(&WorkflowState) + Send + Sync + 'static,
    {
        self.observers.0.push(Arc::new(observer));
    }

    fn notify(&self) {
        for observer in &self.observers.0 {
            observer(self);
        }
    }

    pub fn update_progress(&mut self, step: &str, progress: f64, status: Option<WorkflowStatus>) {
        self.current_step = step.to_string();
        self.progress = progress.clamp(0.0, 100.0);
        self.last_updated = Utc::now();

        if let Some(status) = status {
            self.status = status;
            if status == WorkflowStatus::Completed {
                self.completed_at = Some(self.last_updated);
                self.progress = 100.0;
            }
        }
        self.notify();
    }

    pub fn add_error(&mut self, error: impl AsRef<str>, step: Option<&str>) {
        let error = error.as_ref();
        tracing::error!(
            workflow_id = %self.workflow_id,
            step = step.unwrap_or(&self.current_step),
            error,
            "Workflow error"
        );
        self.errors.push(tag_message(error, step));
        self.last_updated = Utc::now();
        self.notify();
    }

    pub fn add_warning(&mut self, warning: impl AsRef<str>, step: Option<&str>) {
        let warning = warning.as_ref();
        tracing::warn!(
            workflow_id = %self.workflow_id,
            step = step.unwrap_or(&self.current_step),
            warning,
            "Workflow warning"
        );
        self.warnings.push(tag_message(warning, step));
        self.last_updated = Utc::now();
        self.notify();
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
        self.last_updated = Utc::now();
    }

    pub fn reset_for_retry(&mut self) {
        self.errors.clear();
        self.status = WorkflowStatus::Pending;
        self.progress = 0.0;
        self.current_step.clear();
        self.last_updated = Utc::now();
    }

    pub fn set_agent_result(&mut self, agent: &str, result: Value) {
        self.agent_results.insert(
            agent.to_string(),
            AgentRecord {
                result,
                timestamp: Utc::now(),
                step: self.current_step.clone(),
            },
        );
    }

    pub fn agent_result(&self, agent: &str) -> Option<&Value> {
        self.agent_results.get(agent).map(|r| &r.result)
    }

    pub fn content_strategy(&self) -> Option<&Value> {
        self.metadata.content_strategy.as_ref()
    }

    pub fn summary(&self) -> WorkflowSummary {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        WorkflowSummary {
            workflow_id: self.workflow_id.clone(),
            project_id: self.project_id.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            duration_secs: (end - self.started_at).num_milliseconds() as f64 / 1000.0,
            errors_count: self.errors.len(),
            warnings_count: self.warnings.len(),
            agents: self
                .agent_results
                .iter()
                .map(|(name, record)| {
                    let ok = record.result.get("success").and_then(Value::as_bool).unwrap_or(false);
                    (name.clone(), ok)
                })
                .collect(),
            retry_count: self.retry_count,
            content_sections: self.generated_content.keys().cloned().collect(),
        }
    }
}

fn tag_message(message: &str, step: Option<&str>) -> String {
    match step {
        Some(step) => format!("[{}] {}", step, message),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn state() -> WorkflowState {
        WorkflowState::new("proj-1", "user-1", WizardData::default())
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut state = state();
        state.update_progress("Analyzing", 140.0, Some(WorkflowStatus::Running));
        assert_eq!(state.progress, 100.0);
        assert_eq!(state.status, WorkflowStatus::Running);
        assert!(state.completed_at.is_none());

        state.update_progress("Rewinding", -5.0, None);
        assert_eq!(state.progress, 0.0);
        assert_eq!(state.current_step, "Rewinding");
    }

    #[test]
    fn test_completion_forces_full_progress() {
        let mut state = state();
        state.update_progress("Done", 42.0, Some(WorkflowStatus::Completed));
        assert_eq!(state.progress, 100.0);
        assert!(state.completed_at.is_some());
        assert!(state.status.is_finished());
    }

    #[test]
    fn test_messages_are_tagged_only_with_step() {
        let mut state = state();
        state.add_error("boom", Some("ContentGenerator"));
        state.add_error("plain", None);
        state.add_warning("thin", Some("SEOOptimizer"));

        assert_eq!(state.errors, vec!["[ContentGenerator] boom", "plain"]);
        assert_eq!(state.warnings, vec!["[SEOOptimizer] thin"]);
    }

    #[test]
    fn test_retry_bookkeeping() {
        let mut state = state();
        state.add_error("offline", None);
        state.update_progress("Analyzing", 10.0, Some(WorkflowStatus::Running));

        for _ in 0..3 {
            assert!(state.can_retry());
            state.increment_retry();
        }
        assert!(!state.can_retry());

        state.reset_for_retry();
        assert!(state.errors.is_empty());
        assert_eq!(state.status, WorkflowStatus::Pending);
        assert_eq!(state.progress, 0.0);
        assert!(state.current_step.is_empty());
    }

    #[test]
    fn test_observers_see_every_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut state = state();
        let sink = seen.clone();
        state.add_observer(move |s| sink.lock().unwrap().push((s.progress, s.errors.len())));

        state.update_progress("a", 10.0, None);
        state.add_error("bad", None);
        state.add_warning("meh", None);

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![(10.0, 0), (10.0, 1), (10.0, 1)]);
    }

    #[test]
    fn test_agent_results_and_summary() {
        let mut state = state();
        state.update_progress("Generating", 30.0, None);
        state.set_agent_result("ContentGenerator", json!({ "success": true }));
        state.set_agent_result("SEOOptimizer", json!({ "success": false }));
        state.generated_content.insert("homepage".into(), json!({ "hero": {} }));

        assert_eq!(state.agent_results["ContentGenerator"].step, "Generating");
        assert_eq!(state.agent_result("ContentGenerator"), Some(&json!({ "success": true })));
        assert!(state.agent_result("Missing").is_none());

        let summary = state.summary();
        assert!(summary.agents["ContentGenerator"]);
        assert!(!summary.agents["SEOOptimizer"]);
        assert_eq!(summary.content_sections, vec!["homepage"]);
    }

    #[test]
    fn test_metadata_emptiness_and_serialization() {
        let mut metadata = WorkflowMetadata::default();
        assert!(metadata.is_empty());

        metadata.navigation = Some(json!({ "main_menu": [] }));
        assert!(!metadata.is_empty());

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value, json!({ "navigation": { "main_menu": [] } }));
    }
}
