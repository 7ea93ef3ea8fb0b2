use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::workflow::{WizardData, WorkflowOptions};

pub mod runner;
pub mod store;

pub use runner::GenerationRunner;
pub use store::GenerationStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationType {
    #[default]
    WebsiteContent,
    BlogPost,
    ProductDescription,
    MarketingCopy,
    SeoContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Queued,
    Initializing,
    Analyzing,
    Generating,
    Optimizing,
    Finalizing,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Queued => "queued",
            Self::Initializing => "initializing",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Optimizing => "optimizing",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(text)
    }
}

fn default_quality_level() -> String {
    "standard".to_string()
}

fn default_true() -> bool {
    true
}

/// Body of an advanced generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub project_id: String,
    #[serde(default)]
    pub generation_type: GenerationType,
    #[serde(default, alias = "business_context")]
    pub wizard_data: WizardData,
    #[serde(default)]
    pub workflow_options: WorkflowOptions,
    #[serde(default = "default_quality_level")]
    pub quality_level: String,
    #[serde(default = "default_true")]
    pub include_analytics: bool,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(project_id: impl Into<String>, wizard_data: WizardData) -> Self {
        Self {
            project_id: project_id.into(),
            generation_type: GenerationType::default(),
            wizard_data,
            workflow_options: WorkflowOptions::default(),
            quality_level: default_quality_level(),
            include_analytics: true,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds between start and completion
    pub duration: Option<f64>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl WorkflowStep {
    fn start(name: &str) -> Self {
        Self {
            step_name: name.to_string(),
            status: StepStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration: None,
            output: None,
            error: None,
        }
    }

    fn finish(&mut self, status: StepStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration = Some((now - self.started_at).num_milliseconds() as f64 / 1000.0);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub models_used: Vec<String>,
    pub total_tokens: u64,
    pub generation_time: Option<f64>,
    pub quality_level: String,
    pub generation_type: GenerationType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation_id: String,
    pub project_id: String,
    pub request: GenerationRequest,
    pub status: GenerationStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub workflow_steps: Vec<WorkflowStep>,
    pub content: Value,
    pub metadata: GenerationMetadata,
    pub analytics: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl GenerationRecord {
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            generation_id: uuid::Uuid::new_v4().to_string(),
            project_id: request.project_id.clone(),
            status: GenerationStatus::Queued,
            progress: 0.0,
            current_step: None,
            workflow_steps: Vec::new(),
            content: json!({}),
            metadata: GenerationMetadata {
                quality_level: request.quality_level.clone(),
                generation_type: request.generation_type,
                ..Default::default()
            },
            analytics: None,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            request,
        }
    }

    /// Opens a step, closing whichever step was still running
    pub fn start_step(&mut self, name: &str, status: GenerationStatus, progress: f64) {
        if let Some(previous) = self.workflow_steps.last_mut() {
            if previous.status == StepStatus::Running {
                previous.finish(StepStatus::Completed);
            }
        }
        self.workflow_steps.push(WorkflowStep::start(name));
        self.status = status;
        self.progress = progress;
        self.current_step = Some(name.to_string());
    }

    pub fn complete_step(&mut self, name: &str, output: Option<Value>) {
        if let Some(step) = self.workflow_steps.iter_mut().rev().find(|s| s.step_name == name) {
            step.finish(StepStatus::Completed);
            step.output = output;
        }
    }

    /// Marks the record failed and the step it was on with it
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        if let Some(step) = self.workflow_steps.last_mut() {
            if step.status == StepStatus::Running {
                step.finish(StepStatus::Failed);
                step.error = Some(error.clone());
            }
        }
        self.status = GenerationStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn summary(&self) -> GenerationSummary {
        GenerationSummary {
            generation_id: self.generation_id.clone(),
            project_id: self.project_id.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            generation_type: self.metadata.generation_type,
            quality_level: self.metadata.quality_level.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }

    /// Timing and quality report for a finished generation
    pub fn analytics_report(&self) -> Result<Value, JobError> {
        if self.status != GenerationStatus::Completed {
            return Err(JobError::NotCompleted(self.generation_id.clone()));
        }

        let total: f64 = self.workflow_steps.iter().filter_map(|s| s.duration).sum();
        let breakdown: Vec<Value> = self
            .workflow_steps
            .iter()
            .map(|step| {
                let duration = step.duration.unwrap_or(0.0);
                let percentage = if total > 0.0 { duration / total * 100.0 } else { 0.0 };
                json!({
                    "step_name": step.step_name,
                    "duration": duration,
                    "percentage": percentage,
                })
            })
            .collect();

        let analytics = self.analytics.clone().unwrap_or_else(|| json!({}));
        Ok(json!({
            "generation_id": self.generation_id,
            "analytics": analytics,
            "performance": {
                "total_duration": self.metadata.generation_time.unwrap_or(total),
                "models_used": self.metadata.models_used,
                "total_tokens": self.metadata.total_tokens,
                "step_breakdown": breakdown,
            },
            "quality_metrics": analytics.get("quality_metrics").cloned().unwrap_or_else(|| json!({})),
            "content_metrics": analytics.get("content_metrics").cloned().unwrap_or_else(|| json!({})),
        }))
    }
}

/// List view of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub generation_id: String,
    pub project_id: String,
    pub status: GenerationStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub generation_type: GenerationType,
    pub quality_level: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationFilter {
    pub status: Option<GenerationStatus>,
    pub project_id: Option<String>,
    pub generation_type: Option<GenerationType>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for GenerationFilter {
    fn default() -> Self {
        Self {
            status: None,
            project_id: None,
            generation_type: None,
            offset: 0,
            limit: default_limit(),
        }
    }
}

impl GenerationFilter {
    fn matches(&self, record: &GenerationRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self.project_id.as_deref().map_or(true, |p| record.project_id == p)
            && self.generation_type.map_or(true, |t| record.metadata.generation_type == t)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationPage {
    pub generations: Vec<GenerationSummary>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Generation not found: {0}")]
    NotFound(String),

    #[error("Generation already finished: {0}")]
    AlreadyFinished(String),

    #[error("Generation not completed yet: {0}")]
    NotCompleted(String),
}
