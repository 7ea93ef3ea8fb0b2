use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::*;
use crate::providers::catalog::{self, TaskCategory, ESSENTIAL_MODELS, OPTIONAL_MODELS};
use crate::providers::{GenerateRequest, LLMProvider, ProviderError};

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_history_entries: usize,
    pub max_concurrent_downloads: usize,
    pub max_concurrent_tests: usize,
    pub max_recovery_attempts: u32,
    pub auto_recovery: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_history_entries: 100,
            max_concurrent_downloads: 2,
            max_concurrent_tests: 3,
            max_recovery_attempts: 3,
            auto_recovery: true,
        }
    }
}

#[derive(Default)]
struct DownloadQueue {
    pending: VecDeque<String>,
    active: HashSet<String>,
}

/// Tracks model health and usage, and picks the model each task runs on
pub struct ModelManager {
    provider: Arc<dyn LLMProvider>,
    settings: ManagerSettings,
    statuses: RwLock<BTreeMap<String, ModelStatus>>,
    usage: RwLock<BTreeMap<String, UsageStats>>,
    history: RwLock<HashMap<String, VecDeque<PerformanceEntry>>>,
    recovery_attempts: RwLock<HashMap<String, u32>>,
    downloads: Mutex<DownloadQueue>,
    overall: RwLock<(OverallHealth, Option<DateTime<Utc>>)>,
}

impl ModelManager {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self::with_settings(provider, ManagerSettings::default())
    }

    pub fn with_settings(provider: Arc<dyn LLMProvider>, settings: ManagerSettings) -> Self {
        info!(provider = provider.name(), "ModelManager initialized");
        Self {
            provider,
            settings,
            statuses: RwLock::new(BTreeMap::new()),
            usage: RwLock::new(BTreeMap::new()),
            history: RwLock::new(HashMap::new()),
            recovery_attempts: RwLock::new(HashMap::new()),
            downloads: Mutex::new(DownloadQueue::default()),
            overall: RwLock::new((OverallHealth::Unknown, None)),
        }
    }

    pub fn provider(&self) -> Arc<dyn LLMProvider> {
        Arc::clone(&self.provider)
    }

    pub async fn model_status(&self, model: &str) -> Option<ModelStatus> {
        self.statuses.read().await.get(model).cloned()
    }

    pub async fn model_statuses(&self) -> BTreeMap<String, ModelStatus> {
        self.statuses.read().await.clone()
    }

    pub async fn usage_stats(&self, model: &str) -> Option<UsageStats> {
        self.usage.read().await.get(model).cloned()
    }

    pub async fn overall_health(&self) -> OverallHealth {
        self.overall.read().await.0
    }

    pub async fn recovery_attempts(&self, model: &str) -> u32 {
        self.recovery_attempts.read().await.get(model).copied().unwrap_or(0)
    }

    /// Starts tracking a model without probing it
    pub async fn register_model(&self, model: &str) {
        let mut statuses = self.statuses.write().await;
        if !statuses.contains_key(model) {
            statuses.insert(model.to_string(), ModelStatus::new(model, ModelState::Unknown));
            self.usage.write().await.entry(model.to_string()).or_default();
        }
    }

    /// Check the runtime, seed tracking, fetch missing essentials and test everything installed
    pub async fn initialize_models(&self) -> Result<()> {
        info!("Starting model initialization");

        if !self.provider.health_check().await {
            let base_url = self.provider.statistics().base_url;
            error!(base_url = %base_url, "Model initialization failed: LLM service unavailable");
            return Err(ProviderError::Unavailable(base_url).into());
        }

        let available = self.provider.list_models().await?;
        info!(count = available.len(), "Found existing models");

        for model in ESSENTIAL_MODELS.iter().chain(OPTIONAL_MODELS.iter()) {
            self.register_model(model).await;
        }

        for model in &available {
            if self.statuses.read().await.contains_key(model) {
                self.test_model_health(model).await;
            }
        }

        let missing: Vec<String> = ESSENTIAL_MODELS
            .iter()
            .filter(|m| !available.iter().any(|a| a == *m))
            .map(|m| m.to_string())
            .collect();
        if !missing.is_empty() {
            info!(models = ?missing, "Downloading missing essential models");
            self.download_models_batch(&missing).await;
        }

        self.test_all_models().await;
        self.update_overall_health().await;

        info!("Model initialization completed successfully");
        Ok(())
    }

    /// Recheck the runtime and reload its model list, then track and test anything new
    pub async fn refresh_models(&self) -> Result<Vec<String>> {
        if !self.provider.refresh_health().await {
            let base_url = self.provider.statistics().base_url;
            error!(base_url = %base_url, "Model refresh failed: LLM service unavailable");
            return Err(ProviderError::Unavailable(base_url).into());
        }

        let installed = self.provider.refresh_models().await?;
        let untracked: Vec<String> = {
            let statuses = self.statuses.read().await;
            installed.iter().filter(|m| !statuses.contains_key(*m)).cloned().collect()
        };
        for model in &untracked {
            self.register_model(model).await;
        }

        let new_models = untracked.len();
        futures::stream::iter(untracked)
            .for_each_concurrent(self.settings.max_concurrent_tests, |model| async move {
                self.test_model_health(&model).await;
            })
            .await;
        self.update_overall_health().await;

        info!(installed = installed.len(), new_models, "Model list refreshed");
        Ok(installed)
    }

    /// Installs the model when the runtime does not have it yet
    pub async fn ensure_model_available(&self, model: &str) -> bool {
        if self.is_model_healthy(model).await {
            return true;
        }
        match self.provider.list_models().await {
            Ok(installed) if installed.iter().any(|m| m == model) => true,
            Ok(_) => {
                info!(model = %model, "Model not installed, pulling");
                match self.provider.pull_model(model).await {
                    Ok(pulled) => pulled,
                    Err(e) => {
                        error!(model = %model, error = %e, "Failed to pull model");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(model = %model, error = %e, "Could not check installed models");
                false
            }
        }
    }

    /// Send a model a tiny prompt and record the outcome
    pub async fn test_model_health(&self, model: &str) -> bool {
        let start = Instant::now();
        let request = GenerateRequest::new(model, "Say hello")
            .with_max_tokens(50)
            .with_temperature(0.1);

        match self.provider.generate(request).await {
            Ok(response) if !response.response.trim().is_empty() => {
                let latency = start.elapsed().as_secs_f64();
                if let Some(status) = self.statuses.write().await.get_mut(model) {
                    status.mark_available(latency, &response);
                }
                info!(
                    model = %model,
                    latency_secs = latency,
                    "Model health test passed"
                );
                true
            }
            Ok(_) => {
                self.handle_model_error(model, "Health test failed: empty test response").await;
                false
            }
            Err(e) => {
                self.handle_model_error(model, &format!("Health test failed: {}", e)).await;
                false
            }
        }
    }

    async fn handle_model_error(&self, model: &str, message: &str) {
        if let Some(status) = self.statuses.write().await.get_mut(model) {
            status.mark_failed(message);
        }
        self.recovery_attempts
            .write()
            .await
            .entry(model.to_string())
            .or_insert(0);
        warn!(model = %model, error = %message, "Model error");
    }

    pub async fn is_model_healthy(&self, model: &str) -> bool {
        self.statuses
            .read()
            .await
            .get(model)
            .map(|s| s.is_healthy())
            .unwrap_or(false)
    }

    async fn test_all_models(&self) {
        let available = match self.provider.list_models().await {
            Ok(models) => models,
            Err(e) => {
                error!(error = %e, "Failed to list models for testing");
                return;
            }
        };

        let tracked: Vec<String> = {
            let statuses = self.statuses.read().await;
            available.into_iter().filter(|m| statuses.contains_key(m)).collect()
        };

        futures::stream::iter(tracked)
            .for_each_concurrent(self.settings.max_concurrent_tests, |model| async move {
                self.test_model_health(&model).await;
            })
            .await;
    }

    /// Best healthy model for a task, trying recovery before settling on the primary
    pub async fn get_best_model(&self, category: TaskCategory) -> String {
        let config = catalog::model_for_task(category);
        let candidates = [
            catalog::resolve_model_alias(config.primary),
            catalog::resolve_model_alias(config.fallback),
        ];

        for model in candidates {
            if self.is_model_healthy(model).await {
                self.track_usage(model, &format!("get_best_model_{}", category), 0, 0.0).await;
                return model.to_string();
            }
        }

        if self.settings.auto_recovery {
            for model in candidates {
                if self.attempt_model_recovery(model).await {
                    return model.to_string();
                }
            }
        }

        warn!(category = %category, model = candidates[0], "No healthy models available, using primary");
        candidates[0].to_string()
    }

    async fn attempt_model_recovery(&self, model: &str) -> bool {
        {
            let mut attempts = self.recovery_attempts.write().await;
            let count = attempts.entry(model.to_string()).or_insert(0);
            if *count >= self.settings.max_recovery_attempts {
                warn!(model = %model, "Max recovery attempts reached");
                return false;
            }
            *count += 1;
        }

        info!(model = %model, "Attempting model recovery");

        self.test_model_health(model).await;
        if self.is_model_healthy(model).await {
            info!(model = %model, "Model recovered successfully");
            self.reset_recovery(model).await;
            return true;
        }

        let installed = match self.provider.list_models().await {
            Ok(models) => models,
            Err(e) => {
                error!(model = %model, error = %e, "Model recovery failed");
                return false;
            }
        };

        if !installed.iter().any(|m| m == model) {
            info!(model = %model, "Re-downloading model");
            if self.provider.pull_model(model).await.unwrap_or(false) {
                self.test_model_health(model).await;
                if self.is_model_healthy(model).await {
                    info!(model = %model, "Model recovered after re-download");
                    self.reset_recovery(model).await;
                    return true;
                }
            }
        }

        false
    }

    async fn reset_recovery(&self, model: &str) {
        self.recovery_attempts.write().await.insert(model.to_string(), 0);
    }

    pub async fn track_usage(&self, model: &str, operation: &str, tokens: u64, latency: f64) {
        self.usage
            .write()
            .await
            .entry(model.to_string())
            .or_default()
            .record(operation, tokens, latency);

        let mut history = self.history.write().await;
        let entries = history.entry(model.to_string()).or_default();
        entries.push_back(PerformanceEntry {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            tokens,
            latency,
            success: true,
        });
        while entries.len() > self.settings.max_history_entries {
            entries.pop_front();
        }
    }

    /// Most recent entries, oldest first; a limit of 0 returns everything kept
    pub async fn performance_history(&self, model: &str, limit: usize) -> Vec<PerformanceEntry> {
        let history = self.history.read().await;
        let Some(entries) = history.get(model) else {
            return Vec::new();
        };
        let skip = if limit == 0 { 0 } else { entries.len().saturating_sub(limit) };
        entries.iter().skip(skip).cloned().collect()
    }

    pub async fn pending_downloads(&self) -> Vec<String> {
        self.downloads.lock().await.pending.iter().cloned().collect()
    }

    /// Queue models by priority and download them, a few at a time
    pub async fn download_models_batch(&self, models: &[String]) {
        {
            let mut queue = self.downloads.lock().await;
            for model in catalog::download_order(models) {
                if !queue.pending.contains(&model) && !queue.active.contains(&model) {
                    queue.pending.push_back(model);
                }
            }
        }

        let workers = (0..self.settings.max_concurrent_downloads).map(|_| self.download_worker());
        futures::future::join_all(workers).await;
    }

    async fn download_worker(&self) {
        loop {
            let model = {
                let mut queue = self.downloads.lock().await;
                if queue.active.len() >= self.settings.max_concurrent_downloads {
                    return;
                }
                match queue.pending.pop_front() {
                    Some(model) => {
                        queue.active.insert(model.clone());
                        model
                    }
                    None => return,
                }
            };

            self.download_model_with_tracking(&model).await;
            self.downloads.lock().await.active.remove(&model);
        }
    }

    async fn download_model_with_tracking(&self, model: &str) {
        info!(model = %model, "Starting model download");

        if let Some(status) = self.statuses.write().await.get_mut(model) {
            status.status = ModelState::Downloading;
            status.download_progress = 0.0;
        }

        match self.provider.pull_model(model).await {
            Ok(true) => {
                self.test_model_health(model).await;
                info!(model = %model, "Model downloaded and tested");
            }
            Ok(false) => self.handle_model_error(model, "Download failed").await,
            Err(e) => {
                self.handle_model_error(model, &format!("Download failed: {}", e)).await;
            }
        }
    }

    /// Download a model on demand and report whether it came up healthy
    pub async fn force_model_download(&self, model: &str) -> bool {
        info!(model = %model, "Force downloading model");

        {
            let mut statuses = self.statuses.write().await;
            if !statuses.contains_key(model) {
                statuses.insert(model.to_string(), ModelStatus::new(model, ModelState::Downloading));
                self.usage.write().await.entry(model.to_string()).or_default();
            }
        }

        match self.provider.pull_model(model).await {
            Ok(true) => {
                self.test_model_health(model).await;
                self.is_model_healthy(model).await
            }
            Ok(false) => false,
            Err(e) => {
                error!(model = %model, error = %e, "Force download failed");
                self.handle_model_error(model, &e.to_string()).await;
                false
            }
        }
    }

    pub async fn remove_model(&self, model: &str) -> bool {
        match self.provider.delete_model(model).await {
            Ok(true) => {
                self.statuses.write().await.remove(model);
                self.usage.write().await.remove(model);
                self.history.write().await.remove(model);
                self.recovery_attempts.write().await.remove(model);
                info!(model = %model, "Model removed");
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!(model = %model, error = %e, "Failed to remove model");
                false
            }
        }
    }

    /// Per task, the healthy candidate with the best score (recent use counts for 10)
    pub async fn optimize_model_selection(&self) -> BTreeMap<String, String> {
        let statuses = self.statuses.read().await;
        let usage = self.usage.read().await;
        let now = Utc::now();
        let mut selection = BTreeMap::new();

        for (category, config) in catalog::MODELS_CONFIG.iter() {
            let mut best: Option<(&str, f64)> = None;

            for candidate in [config.primary, config.fallback] {
                let model = catalog::resolve_model_alias(candidate);
                let Some(status) = statuses.get(model) else { continue };
                if !status.is_healthy_at(now) {
                    continue;
                }

                let mut score = status.performance_score;
                let recently_used = usage
                    .get(model)
                    .and_then(|u| u.last_used)
                    .map(|used| now - used < ChronoDuration::days(7))
                    .unwrap_or(false);
                if recently_used {
                    score += 10.0;
                }

                if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                    best = Some((model, score));
                }
            }

            let chosen = best.map(|(m, _)| m).unwrap_or(config.primary);
            selection.insert(category.as_str().to_string(), chosen.to_string());
        }

        selection
    }

    pub async fn update_overall_health(&self) -> OverallHealth {
        let now = Utc::now();
        let health = {
            let statuses = self.statuses.read().await;
            let total = statuses.len();
            let healthy = statuses.values().filter(|s| s.is_healthy_at(now)).count();
            let essential_healthy = ESSENTIAL_MODELS
                .iter()
                .filter(|m| statuses.get(**m).map(|s| s.is_healthy_at(now)).unwrap_or(false))
                .count();

            if total == 0 || essential_healthy == 0 {
                OverallHealth::Critical
            } else if essential_healthy < ESSENTIAL_MODELS.len() {
                OverallHealth::Degraded
            } else if (healthy as f64) < total as f64 * 0.8 {
                OverallHealth::Degraded
            } else {
                OverallHealth::Healthy
            }
        };

        *self.overall.write().await = (health, Some(now));
        health
    }

    pub async fn health_report(&self) -> HealthReport {
        let overall_status = self.update_overall_health().await;
        let last_health_check = self.overall.read().await.1;
        let provider_connected = self.provider.health_check().await;
        let pending_downloads = self.pending_downloads().await;

        let now = Utc::now();
        let statuses = self.statuses.read().await;
        let usage = self.usage.read().await;

        let models: BTreeMap<String, ModelReport> = statuses
            .iter()
            .map(|(name, status)| {
                let report = ModelReport { status: status.clone(), healthy: status.is_healthy_at(now) };
                (name.clone(), report)
            })
            .collect();

        let healthy = models.values().filter(|m| m.healthy).count();
        let essential_healthy = ESSENTIAL_MODELS
            .iter()
            .filter(|m| models.get(**m).map(|r| r.healthy).unwrap_or(false))
            .count();

        let mut alerts = Vec::new();
        if models.is_empty() {
            alerts.push("No models initialized".to_string());
        } else if healthy == 0 {
            alerts.push("No healthy models available".to_string());
        } else if essential_healthy < ESSENTIAL_MODELS.len() {
            alerts.push("Some essential models are unhealthy".to_string());
        } else if healthy < models.len() {
            alerts.push("Some optional models are unhealthy".to_string());
        }
        if !provider_connected {
            alerts.push("LLM service is not reachable".to_string());
        }

        let recommendations = recommendations(&statuses, &usage, &pending_downloads);
        let usage_summary = usage.iter().map(|(k, v)| (k.clone(), v.summary())).collect();

        HealthReport {
            overall_status,
            last_health_check,
            models,
            usage_summary,
            provider: self.provider.statistics(),
            provider_connected,
            pending_downloads,
            recommendations,
            alerts,
        }
    }

    /// One pass of background upkeep: retest a slice of models, try to revive failed ones
    pub async fn run_monitoring_cycle(&self) {
        debug!("Running periodic health checks");

        let names: Vec<String> = self.statuses.read().await.keys().cloned().collect();
        if !names.is_empty() {
            let batch = (names.len() / 3).max(1);
            for model in names.iter().take(batch) {
                let available = self
                    .statuses
                    .read()
                    .await
                    .get(model)
                    .map(|s| s.status == ModelState::Available)
                    .unwrap_or(false);
                if available {
                    self.test_model_health(model).await;
                }
            }
        }

        if self.settings.auto_recovery {
            let failed: Vec<String> = self
                .statuses
                .read()
                .await
                .values()
                .filter(|s| s.status == ModelState::Failed)
                .map(|s| s.name.clone())
                .take(2)
                .collect();
            for model in failed {
                self.attempt_model_recovery(&model).await;
            }
        }

        self.update_overall_health().await;
    }

    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        info!(interval_secs = interval.as_secs(), "Starting model health monitoring");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.run_monitoring_cycle().await;
            }
        })
    }
}

fn recommendations(
    statuses: &BTreeMap<String, ModelStatus>,
    usage: &BTreeMap<String, UsageStats>,
    pending: &[String],
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    let failed: Vec<&str> = statuses
        .values()
        .filter(|s| s.status == ModelState::Failed)
        .map(|s| s.name.as_str())
        .collect();
    if !failed.is_empty() {
        out.push(Recommendation {
            kind: "error".to_string(),
            title: "Failed Models Detected".to_string(),
            description: format!("Models need attention: {}", failed.join(", ")),
            action: "Check logs and attempt model recovery".to_string(),
        });
    }

    let slow: Vec<&str> = statuses
        .values()
        .filter(|s| s.test_latency > 5.0)
        .map(|s| s.name.as_str())
        .collect();
    if !slow.is_empty() {
        out.push(Recommendation {
            kind: "performance".to_string(),
            title: "Slow Model Performance".to_string(),
            description: format!("Models with high latency: {}", slow.join(", ")),
            action: "Consider model optimization or hardware upgrade".to_string(),
        });
    }

    if !pending.is_empty() {
        out.push(Recommendation {
            kind: "info".to_string(),
            title: "Pending Downloads".to_string(),
            description: format!("{} models queued for download", pending.len()),
            action: "Monitor download progress".to_string(),
        });
    }

    let unused = usage.values().filter(|u| u.total_requests == 0).count();
    if unused > 3 {
        out.push(Recommendation {
            kind: "optimization".to_string(),
            title: "Unused Models".to_string(),
            description: format!("{} models have not been used", unused),
            action: "Consider removing unused models to save space".to_string(),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{
        ChatRequest, GenerateResponse, ProviderStatistics, ResponseStream,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Provider whose installed models and broken models are set by the test
    #[derive(Default)]
    struct ScriptedProvider {
        installed: StdMutex<Vec<String>>,
        broken: StdMutex<HashSet<String>>,
        offline: bool,
        pulls: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl ScriptedProvider {
        fn with_models(models: &[&str]) -> Self {
            let provider = Self::default();
            *provider.installed.lock().unwrap() = models.iter().map(|m| m.to_string()).collect();
            provider
        }

        fn break_model(&self, model: &str) {
            self.broken.lock().unwrap().insert(model.to_string());
        }

        fn fix_model(&self, model: &str) {
            self.broken.lock().unwrap().remove(model);
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> bool {
            !self.offline
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(self.installed.lock().unwrap().clone())
        }

        async fn pull_model(&self, model: &str) -> Result<bool> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.installed.lock().unwrap().push(model.to_string());
            Ok(true)
        }

        async fn delete_model(&self, model: &str) -> Result<bool> {
            let mut installed = self.installed.lock().unwrap();
            let before = installed.len();
            installed.retain(|m| m != model);
            Ok(installed.len() != before)
        }

        async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
            if self.broken.lock().unwrap().contains(&request.model) {
                return Err(anyhow::anyhow!("model crashed"));
            }
            Ok(GenerateResponse {
                response: "Hello there".to_string(),
                model: request.model,
                eval_count: 50,
                eval_duration_ns: 1_000_000_000,
                total_duration_ns: 1_200_000_000,
            })
        }

        async fn stream_generate(&self, _request: GenerateRequest) -> Result<ResponseStream> {
            Err(anyhow::anyhow!("not supported"))
        }

        async fn chat(&self, _request: ChatRequest) -> Result<GenerateResponse> {
            Err(anyhow::anyhow!("not supported"))
        }

        fn statistics(&self) -> ProviderStatistics {
            ProviderStatistics {
                base_url: "scripted://".to_string(),
                health_status: !self.offline,
                last_health_check: None,
                available_models: 0,
                request_count: 0,
                error_count: 0,
                error_rate: "0.00%".to_string(),
                uptime: "0.00s".to_string(),
            }
        }
    }

    fn manager_with(provider: Arc<ScriptedProvider>) -> ModelManager {
        ModelManager::new(provider)
    }

    #[tokio::test]
    async fn test_initialize_downloads_missing_essentials() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b"]));
        let manager = manager_with(provider.clone());

        manager.initialize_models().await.unwrap();

        assert_eq!(provider.pulls.load(Ordering::SeqCst), 1);
        assert!(manager.is_model_healthy("llama3.1:8b").await);
        assert!(manager.is_model_healthy("mistral:7b").await);
        assert_eq!(
            manager.model_status("phi3:mini").await.map(|s| s.status),
            Some(ModelState::Unknown)
        );
        // Both essentials healthy but only 2 of 5 tracked models
        assert_eq!(manager.overall_health().await, OverallHealth::Degraded);
    }

    #[tokio::test]
    async fn test_initialize_fails_when_offline() {
        let provider = Arc::new(ScriptedProvider { offline: true, ..Default::default() });
        let manager = manager_with(provider);

        let err = manager.initialize_models().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ProviderError>(), Some(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_failed_health_test_is_recorded() {
        let provider = Arc::new(ScriptedProvider::with_models(&["mistral:7b"]));
        provider.break_model("mistral:7b");
        let manager = manager_with(provider);
        manager.register_model("mistral:7b").await;

        assert!(!manager.test_model_health("mistral:7b").await);
        assert!(!manager.test_model_health("mistral:7b").await);

        let status = manager.model_status("mistral:7b").await.unwrap();
        assert_eq!(status.status, ModelState::Failed);
        assert_eq!(status.error_count, 2);
        assert!(status.last_error.unwrap().contains("model crashed"));
    }

    #[tokio::test]
    async fn test_best_model_prefers_primary_then_fallback() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b", "mistral:7b"]));
        let manager = manager_with(provider.clone());
        manager.register_model("llama3.1:8b").await;
        manager.register_model("mistral:7b").await;
        manager.test_model_health("llama3.1:8b").await;
        manager.test_model_health("mistral:7b").await;

        assert_eq!(manager.get_best_model(TaskCategory::SeoOptimization).await, "mistral:7b");
        assert_eq!(manager.get_best_model(TaskCategory::Analysis).await, "llama3.1:8b");

        provider.break_model("mistral:7b");
        manager.test_model_health("mistral:7b").await;
        assert_eq!(manager.get_best_model(TaskCategory::SeoOptimization).await, "llama3.1:8b");

        let usage = manager.usage_stats("llama3.1:8b").await.unwrap();
        assert_eq!(usage.operations["get_best_model_seo_optimization"].count, 1);
    }

    #[tokio::test]
    async fn test_recovery_attempts_are_capped() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b", "mistral:7b"]));
        provider.break_model("llama3.1:8b");
        provider.break_model("mistral:7b");
        let manager = manager_with(provider.clone());
        manager.register_model("llama3.1:8b").await;
        manager.register_model("mistral:7b").await;

        for _ in 0..5 {
            assert_eq!(manager.get_best_model(TaskCategory::ContentGeneration).await, "llama3.1:8b");
        }
        assert_eq!(manager.recovery_attempts("llama3.1:8b").await, 3);
        assert_eq!(manager.recovery_attempts("mistral:7b").await, 3);

        let status = manager.model_status("llama3.1:8b").await.unwrap();
        assert_eq!(status.error_count, 3);
    }

    #[tokio::test]
    async fn test_successful_recovery_resets_counter() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b"]));
        provider.break_model("llama3.1:8b");
        provider.break_model("mistral:7b");
        let manager = manager_with(provider.clone());
        manager.register_model("llama3.1:8b").await;
        manager.register_model("mistral:7b").await;

        manager.get_best_model(TaskCategory::Analysis).await;
        assert_eq!(manager.recovery_attempts("llama3.1:8b").await, 1);

        provider.fix_model("llama3.1:8b");
        assert_eq!(manager.get_best_model(TaskCategory::Analysis).await, "llama3.1:8b");
        assert_eq!(manager.recovery_attempts("llama3.1:8b").await, 0);
    }

    #[tokio::test]
    async fn test_download_queue_dedupes_and_limits_concurrency() {
        let provider = Arc::new(ScriptedProvider::default());
        let manager = manager_with(provider.clone());

        let models: Vec<String> = ["phi3:mini", "mistral:7b", "mistral:7b", "llama3.1:8b", "codellama:13b"]
            .iter()
            .map(|m| m.to_string())
            .collect();
        manager.download_models_batch(&models).await;

        assert_eq!(provider.pulls.load(Ordering::SeqCst), 4);
        assert!(provider.peak_in_flight.load(Ordering::SeqCst) <= 2);
        assert!(manager.pending_downloads().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let manager = manager_with(Arc::new(ScriptedProvider::default()));
        for i in 0..120u64 {
            manager.track_usage("llama3.1:8b", "generate", i, 0.1).await;
        }

        let all = manager.performance_history("llama3.1:8b", 0).await;
        assert_eq!(all.len(), 100);
        assert_eq!(all[0].tokens, 20);

        let recent = manager.performance_history("llama3.1:8b", 5).await;
        assert_eq!(recent.iter().map(|e| e.tokens).collect::<Vec<_>>(), vec![115, 116, 117, 118, 119]);
        assert_eq!(manager.usage_stats("llama3.1:8b").await.unwrap().total_requests, 120);
    }

    #[tokio::test]
    async fn test_health_report_flags_failures() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b", "mistral:7b"]));
        provider.break_model("mistral:7b");
        let manager = manager_with(provider);

        let empty = manager.health_report().await;
        assert_eq!(empty.overall_status, OverallHealth::Critical);
        assert_eq!(empty.alerts, vec!["No models initialized".to_string()]);

        manager.register_model("llama3.1:8b").await;
        manager.register_model("mistral:7b").await;
        manager.test_model_health("llama3.1:8b").await;
        manager.test_model_health("mistral:7b").await;

        let report = manager.health_report().await;
        assert_eq!(report.overall_status, OverallHealth::Degraded);
        assert!(report.models["llama3.1:8b"].healthy);
        assert!(!report.models["mistral:7b"].healthy);
        assert!(report.alerts.contains(&"Some essential models are unhealthy".to_string()));
        assert_eq!(report.recommendations[0].title, "Failed Models Detected");
        assert!(report.recommendations[0].description.contains("mistral:7b"));
    }

    #[tokio::test]
    async fn test_optimize_selection_uses_healthy_candidates() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b", "mistral:7b"]));
        provider.break_model("llama3.1:8b");
        let manager = manager_with(provider);
        manager.register_model("llama3.1:8b").await;
        manager.register_model("mistral:7b").await;
        manager.test_model_health("llama3.1:8b").await;
        manager.test_model_health("mistral:7b").await;

        let selection = manager.optimize_model_selection().await;
        assert_eq!(selection["content_generation"], "mistral:7b");
        assert_eq!(selection["seo_optimization"], "mistral:7b");
        // Neither codellama candidate is healthy, so the primary stands
        assert_eq!(selection["code_generation"], "codellama:13b");
    }

    #[tokio::test]
    async fn test_force_download_and_remove() {
        let provider = Arc::new(ScriptedProvider::default());
        let manager = manager_with(provider.clone());

        assert!(manager.force_model_download("phi3:mini").await);
        assert_eq!(manager.model_status("phi3:mini").await.unwrap().size_gb, 2.2);
        manager.track_usage("phi3:mini", "generate", 10, 0.5).await;

        assert!(manager.remove_model("phi3:mini").await);
        assert!(manager.model_status("phi3:mini").await.is_none());
        assert!(manager.usage_stats("phi3:mini").await.is_none());
        assert!(manager.performance_history("phi3:mini", 0).await.is_empty());
        assert!(!manager.remove_model("phi3:mini").await);
    }

    #[tokio::test]
    async fn test_refresh_tracks_newly_installed_models() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b"]));
        let manager = manager_with(provider.clone());
        manager.register_model("llama3.1:8b").await;

        provider.installed.lock().unwrap().push("gemma:2b".to_string());
        let installed = manager.refresh_models().await.unwrap();

        assert_eq!(installed, vec!["llama3.1:8b".to_string(), "gemma:2b".to_string()]);
        assert!(manager.is_model_healthy("gemma:2b").await);
        // Already tracked models are left to the monitoring cycle
        assert_eq!(
            manager.model_status("llama3.1:8b").await.map(|s| s.status),
            Some(ModelState::Unknown)
        );
    }

    #[tokio::test]
    async fn test_refresh_fails_when_offline() {
        let provider = Arc::new(ScriptedProvider { offline: true, ..Default::default() });
        let manager = manager_with(provider);

        let err = manager.refresh_models().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ProviderError>(), Some(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_ensure_model_available_pulls_missing() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b"]));
        let manager = manager_with(provider.clone());

        assert!(manager.ensure_model_available("llama3.1:8b").await);
        assert_eq!(provider.pulls.load(Ordering::SeqCst), 0);

        assert!(manager.ensure_model_available("mistral:7b").await);
        assert_eq!(provider.pulls.load(Ordering::SeqCst), 1);
        assert!(provider.installed.lock().unwrap().contains(&"mistral:7b".to_string()));
    }

    #[tokio::test]
    async fn test_monitoring_batch_is_a_third_of_tracked_models() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b", "mistral:7b"]));
        let manager = manager_with(provider.clone());
        for model in ["codellama:13b", "llama3.1:8b", "mistral:7b", "phi3:mini", "qwen2:7b"] {
            manager.register_model(model).await;
            manager.test_model_health(model).await;
        }
        let first_tested = manager.model_status("codellama:13b").await.unwrap().last_tested;
        let second_tested = manager.model_status("llama3.1:8b").await.unwrap().last_tested;

        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.run_monitoring_cycle().await;

        // Five tracked models retest one per cycle, in name order
        let first = manager.model_status("codellama:13b").await.unwrap();
        let second = manager.model_status("llama3.1:8b").await.unwrap();
        assert!(first.last_tested > first_tested);
        assert_eq!(second.last_tested, second_tested);
    }

    #[tokio::test]
    async fn test_monitoring_cycle_revives_failed_models() {
        let provider = Arc::new(ScriptedProvider::with_models(&["llama3.1:8b", "mistral:7b"]));
        provider.break_model("mistral:7b");
        let manager = manager_with(provider.clone());
        manager.register_model("llama3.1:8b").await;
        manager.register_model("mistral:7b").await;
        manager.test_model_health("llama3.1:8b").await;
        manager.test_model_health("mistral:7b").await;

        provider.fix_model("mistral:7b");
        manager.run_monitoring_cycle().await;

        assert!(manager.is_model_healthy("mistral:7b").await);
        assert_eq!(manager.overall_health().await, OverallHealth::Healthy);
    }
}
