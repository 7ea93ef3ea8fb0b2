use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::providers::catalog;
use crate::providers::{GenerateResponse, ProviderStatistics};

pub mod manager;

pub use manager::{ManagerSettings, ModelManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Available,
    Downloading,
    Failed,
    Unknown,
}

/// Health of one tracked model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub name: String,
    pub status: ModelState,
    pub last_tested: Option<DateTime<Utc>>,
    /// Seconds taken by the last health test
    pub test_latency: f64,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub download_progress: f64,
    pub size_gb: f64,
    pub performance_score: f64,
}

impl ModelStatus {
    pub fn new(name: &str, status: ModelState) -> Self {
        Self {
            name: name.to_string(),
            status,
            last_tested: None,
            test_latency: 0.0,
            error_count: 0,
            last_error: None,
            download_progress: 0.0,
            size_gb: catalog::model_specs(name).map(|s| s.size_gb).unwrap_or(0.0),
            performance_score: 0.0,
        }
    }

    pub fn mark_available(&mut self, latency: f64, sample: &GenerateResponse) {
        self.status = ModelState::Available;
        self.last_tested = Some(Utc::now());
        self.test_latency = latency;
        self.error_count = 0;
        self.last_error = None;
        self.download_progress = 100.0;
        self.performance_score = performance_score(latency, self.error_count, sample);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ModelState::Failed;
        self.error_count += 1;
        self.last_error = Some(error.into());
        self.last_tested = Some(Utc::now());
    }

    /// Available, few errors, tested within the hour, and scoring at least 50
    pub fn is_healthy_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != ModelState::Available || self.error_count > 5 {
            return false;
        }
        if let Some(tested) = self.last_tested {
            if now - tested > Duration::hours(1) {
                return false;
            }
        }
        self.performance_score >= 50.0
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy_at(Utc::now())
    }
}

/// Scores a health test response out of 100
pub fn performance_score(latency: f64, error_count: u32, sample: &GenerateResponse) -> f64 {
    let mut score: f64 = 100.0;

    // Target: under 2 seconds
    if latency > 2.0 {
        score -= ((latency - 2.0) * 10.0).min(30.0);
    }

    if error_count > 0 {
        score -= (error_count as f64 * 5.0).min(20.0);
    }

    // Target: 10+ tokens/second
    if let Some(tps) = sample.tokens_per_second() {
        if tps < 10.0 {
            score -= ((10.0 - tps) * 2.0).min(20.0);
        }
    }

    score.max(0.0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub tokens: u64,
    pub latency: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub total_tokens: u64,
    pub total_latency: f64,
    pub operations: BTreeMap<String, OperationStats>,
    pub last_used: Option<DateTime<Utc>>,
    pub average_tokens_per_request: f64,
}

impl UsageStats {
    pub fn record(&mut self, operation: &str, tokens: u64, latency: f64) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.total_tokens += tokens;
        self.total_latency += latency;
        self.last_used = Some(Utc::now());
        self.average_tokens_per_request = self.total_tokens as f64 / self.total_requests as f64;

        let op = self.operations.entry(operation.to_string()).or_default();
        op.count += 1;
        op.tokens += tokens;
        op.latency += latency;
    }

    pub fn summary(&self) -> UsageSummary {
        let requests = self.total_requests.max(1) as f64;
        UsageSummary {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            success_rate: self.successful_requests as f64 / requests * 100.0,
            total_tokens: self.total_tokens,
            average_latency: self.total_latency / requests,
            average_tokens_per_request: self.average_tokens_per_request,
            last_used: self.last_used,
            operations: self.operations.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    pub total_tokens: u64,
    pub average_latency: f64,
    pub average_tokens_per_request: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub operations: BTreeMap<String, OperationStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub tokens: u64,
    pub latency: f64,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Unknown,
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    #[serde(flatten)]
    pub status: ModelStatus,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall_status: OverallHealth,
    pub last_health_check: Option<DateTime<Utc>>,
    pub models: BTreeMap<String, ModelReport>,
    pub usage_summary: BTreeMap<String, UsageSummary>,
    pub provider: ProviderStatistics,
    pub provider_connected: bool,
    pub pending_downloads: Vec<String>,
    pub recommendations: Vec<Recommendation>,
    pub alerts: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(eval_count: u64, eval_secs: f64) -> GenerateResponse {
        GenerateResponse {
            response: "Hello".to_string(),
            eval_count,
            eval_duration_ns: (eval_secs * 1e9) as u64,
            ..Default::default()
        }
    }

    #[test]
    fn test_performance_score_penalties() {
        assert_eq!(performance_score(0.5, 0, &sample(50, 1.0)), 100.0);
        // 2s over target, 5 tokens/s
        assert_eq!(performance_score(4.0, 0, &sample(5, 1.0)), 70.0);
        // Every penalty capped
        assert_eq!(performance_score(60.0, 10, &sample(0, 1.0)), 30.0);
        // No timing data means no throughput penalty
        assert_eq!(performance_score(1.0, 1, &GenerateResponse::default()), 95.0);
    }

    #[test]
    fn test_health_rules() {
        let mut status = ModelStatus::new("llama3.1:8b", ModelState::Unknown);
        assert_eq!(status.size_gb, 4.7);
        assert!(!status.is_healthy());

        status.mark_available(0.4, &sample(50, 1.0));
        assert!(status.is_healthy());
        assert_eq!(status.download_progress, 100.0);

        let later = Utc::now() + Duration::minutes(61);
        assert!(!status.is_healthy_at(later));

        status.performance_score = 49.0;
        assert!(!status.is_healthy());

        status.performance_score = 80.0;
        status.mark_failed("boom");
        assert_eq!(status.status, ModelState::Failed);
        assert_eq!(status.error_count, 1);
        assert!(!status.is_healthy());
    }

    #[test]
    fn test_usage_summary() {
        let mut stats = UsageStats::default();
        stats.record("generate", 100, 2.0);
        stats.record("generate", 50, 1.0);
        stats.record("select", 0, 0.0);

        let summary = stats.summary();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.total_tokens, 150);
        assert_eq!(summary.average_tokens_per_request, 50.0);
        assert_eq!(summary.average_latency, 1.0);
        assert_eq!(summary.operations["generate"].count, 2);
        assert_eq!(summary.success_rate, 100.0);
    }
}
