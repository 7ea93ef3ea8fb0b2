use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

use crate::workflow::WorkflowState;

pub mod base;
pub mod content;
pub mod json;
pub mod requirements;
pub mod seo;
pub mod structure;

pub use base::{GenerationOptions, LLMAgent};
pub use content::ContentGenerator;
pub use requirements::RequirementsAnalyzer;
pub use seo::SeoOptimizer;
pub use structure::StructurePlanner;

/// One stage of the generation pipeline
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Problems that make running the stage pointless
    fn validate_inputs(&self, state: &WorkflowState) -> Vec<String>;

    async fn execute(&self, state: &mut WorkflowState) -> Result<()>;

    fn stats(&self) -> AgentStats;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub total_tokens: u64,
    pub total_time: f64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl AgentStats {
    pub fn record(&mut self, success: bool, tokens: u64, seconds: f64) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        }
        self.total_tokens += tokens;
        self.total_time += seconds;
        self.last_execution = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.successful_executions as f64 / self.total_executions as f64
    }

    pub fn average_time(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.total_time / self.total_executions as f64
    }
}

/// Validates, runs and records one agent; failures land in the state instead of bubbling up
pub async fn safe_execute(agent: &dyn Agent, state: &mut WorkflowState) -> bool {
    let started = Instant::now();
    tracing::info!(
        agent = agent.name(),
        workflow_id = %state.workflow_id,
        "Starting agent execution"
    );

    let problems = agent.validate_inputs(state);
    if !problems.is_empty() {
        for problem in &problems {
            state.add_error(problem, Some(agent.name()));
        }
        tracing::warn!(agent = agent.name(), count = problems.len(), "Agent input validation failed");
        return false;
    }

    let outcome = agent.execute(state).await;
    let elapsed = started.elapsed().as_secs_f64();

    match outcome {
        Ok(()) => {
            state.set_agent_result(
                agent.name(),
                json!({
                    "success": true,
                    "execution_time": elapsed,
                    "model_used": agent.model(),
                    "stats": agent.stats(),
                }),
            );
            tracing::info!(agent = agent.name(), elapsed, "Agent execution completed");
            true
        }
        Err(e) => {
            let message = format!("Agent {} failed: {:#}", agent.name(), e);
            state.add_error(&message, None);
            state.set_agent_result(
                agent.name(),
                json!({
                    "success": false,
                    "error": format!("{:#}", e),
                    "execution_time": elapsed,
                    "model_used": agent.model(),
                }),
            );
            tracing::error!(agent = agent.name(), error = %message, elapsed, "Agent execution failed");
            false
        }
    }
}
