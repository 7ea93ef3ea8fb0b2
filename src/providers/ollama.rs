use super::*;
use async_trait::async_trait;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const HEALTH_CACHE_SECS: i64 = 30;
const HEALTH_TIMEOUT_SECS: u64 = 10;
const PULL_TIMEOUT_SECS: u64 = 600;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Client for a local Ollama runtime
pub struct OllamaClient {
    config: ProviderConfig,
    base_url: String,
    client: reqwest::Client,
    available_models: RwLock<Vec<String>>,
    health: Mutex<Option<(DateTime<Utc>, bool)>>,
    request_count: AtomicU64,
    error_count: AtomicU64,
    started: Instant,
}

impl OllamaClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let base_url = Self::normalize_base_url(
            config.base_url.as_deref().unwrap_or("http://localhost:11434"),
        );

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(
                config.timeout_secs.unwrap_or(900) // Local models can be slow on CPU
            ))
            .user_agent(concat!("siteforge-ollama-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        info!(base_url = %base_url, "Ollama client initialized");

        Ok(Self {
            config,
            base_url,
            client,
            available_models: RwLock::new(Vec::new()),
            health: Mutex::new(None),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            started: Instant::now(),
        })
    }

    /// Trims trailing slashes and adds a scheme when one is missing
    pub fn normalize_base_url(raw: &str) -> String {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries.unwrap_or(3)
    }

    /// Sends a request, retrying connection failures and gateway errors with doubling delays
    async fn request_json(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.request_with_retries(method, endpoint, body, timeout, self.max_retries()).await
    }

    async fn request_with_retries(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
        retries: u32,
    ) -> Result<Value> {
        let mut attempt = 0;
        loop {
            match self.send_once(method.clone(), endpoint, body, timeout).await {
                Err(e) if attempt < retries && is_transient(&e) => {
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << attempt.min(6));
                    attempt += 1;
                    warn!(
                        endpoint = %endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying Ollama request"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        debug!(method = %method, url = %url, "Sending request to Ollama");

        let mut builder = self.client.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                if e.is_timeout() {
                    error!(url = %url, "Ollama request timed out");
                    return Err(ProviderError::Timeout(url).into());
                }
                return Err(anyhow::Error::from(e))
                    .with_context(|| format!("Failed to send request to {}", url));
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(|s| s.to_string()))
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| {
                    if text.is_empty() {
                        format!("Ollama request failed: {}", status.as_u16())
                    } else {
                        text.clone()
                    }
                });

            error!(
                url = %url,
                status_code = status.as_u16(),
                error = %message,
                response_time_ms = start.elapsed().as_millis() as u64,
                "Ollama request failed"
            );
            return Err(ProviderError::Http { status: status.as_u16(), message }.into());
        }

        let value: Value = response.json().await.map_err(|e| {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            ProviderError::InvalidResponse(e.to_string())
        })?;

        debug!(url = %url, response_time_ms = start.elapsed().as_millis() as u64, "Ollama request successful");
        Ok(value)
    }

    /// Installed models with their full metadata
    pub async fn model_details(&self) -> Result<Vec<Value>> {
        let response = self.request_json(Method::GET, "/api/tags", None, None).await?;
        Ok(response["models"].as_array().cloned().unwrap_or_default())
    }

    pub async fn check_model_available(&self, model: &str) -> bool {
        match self.list_models().await {
            Ok(models) => models.iter().any(|m| m == model),
            Err(e) => {
                error!(error = %e, "Failed to get available models");
                false
            }
        }
    }

    async fn ensure_model(&self, model: &str) -> Result<()> {
        if self.check_model_available(model).await {
            return Ok(());
        }
        warn!(model = %model, "Model not available, attempting to pull");
        if self.pull_model(model).await? {
            Ok(())
        } else {
            Err(ProviderError::ModelNotFound(model.to_string()).into())
        }
    }

    fn generate_body(request: &GenerateRequest, stream: bool) -> Value {
        let mut options = json!({
            "temperature": request.temperature,
            "top_p": request.top_p,
        });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        if let Some(stop) = &request.stop {
            options["stop"] = json!(stop);
        }

        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": stream,
            "options": options,
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        body
    }
}

/// Connection failures and gateway statuses are worth another attempt
fn is_transient(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<ProviderError>() {
        Some(ProviderError::Http { status, .. }) => matches!(status, 502 | 503 | 504),
        Some(_) => false,
        None => error
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(|e| e.is_connect()),
    }
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    eval_duration: u64,
    #[serde(default)]
    total_duration: u64,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: String,
    message: Option<OllamaChatMessage>,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    eval_duration: u64,
    #[serde(default)]
    total_duration: u64,
}

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    #[serde(default)]
    content: String,
}

fn chunk_from(value: Value) -> StreamChunk {
    let response = value["response"]
        .as_str()
        .or_else(|| value["message"]["content"].as_str())
        .unwrap_or_default()
        .to_string();
    let done = value["done"].as_bool().unwrap_or(false);
    StreamChunk { response, done, raw: value }
}

/// Splits an NDJSON byte stream into decoded chunks, skipping lines that are not JSON
fn ndjson_stream<S, B>(bytes: S) -> ResponseStream
where
    S: futures::Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = futures::stream::unfold(
        (Box::pin(bytes), String::new(), false),
        |(mut bytes, mut buffer, mut finished)| async move {
            loop {
                if let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    match serde_json::from_str::<Value>(line.trim()) {
                        Ok(value) => return Some((Ok(chunk_from(value)), (bytes, buffer, finished))),
                        Err(_) => continue,
                    }
                }

                if finished {
                    let rest = std::mem::take(&mut buffer);
                    return serde_json::from_str::<Value>(rest.trim())
                        .ok()
                        .map(|value| (Ok(chunk_from(value)), (bytes, buffer, finished)));
                }

                match bytes.next().await {
                    Some(Ok(data)) => buffer.push_str(&String::from_utf8_lossy(data.as_ref())),
                    Some(Err(e)) => {
                        return Some((
                            Err(anyhow::Error::from(e).context("Streaming generation failed")),
                            (bytes, buffer, true),
                        ))
                    }
                    None => finished = true,
                }
            }
        },
    );
    Box::pin(stream)
}

#[async_trait]
impl LLMProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> bool {
        if let Ok(guard) = self.health.lock() {
            if let Some((checked_at, healthy)) = *guard {
                if Utc::now() - checked_at < chrono::Duration::seconds(HEALTH_CACHE_SECS) {
                    return healthy;
                }
            }
        }

        let healthy = match self
            .request_with_retries(
                Method::GET,
                "/api/tags",
                None,
                Some(Duration::from_secs(HEALTH_TIMEOUT_SECS)),
                0,
            )
            .await
        {
            Ok(_) => {
                debug!("Ollama health check passed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Ollama health check failed");
                false
            }
        };

        if let Ok(mut guard) = self.health.lock() {
            *guard = Some((Utc::now(), healthy));
        }
        healthy
    }

    async fn refresh_health(&self) -> bool {
        if let Ok(mut guard) = self.health.lock() {
            *guard = None;
        }
        self.health_check().await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        {
            let cached = self.available_models.read().await;
            if !cached.is_empty() {
                return Ok(cached.clone());
            }
        }
        self.refresh_models().await
    }

    async fn refresh_models(&self) -> Result<Vec<String>> {
        let models: Vec<String> = self
            .model_details()
            .await?
            .iter()
            .filter_map(|m| m["name"].as_str().map(|s| s.to_string()))
            .collect();

        info!(count = models.len(), "Found available models");
        *self.available_models.write().await = models.clone();
        Ok(models)
    }

    async fn pull_model(&self, model: &str) -> Result<bool> {
        info!(model = %model, "Pulling model");
        let body = json!({ "name": model, "stream": false });

        match self
            .request_json(Method::POST, "/api/pull", Some(&body), Some(Duration::from_secs(PULL_TIMEOUT_SECS)))
            .await
        {
            Ok(_) => {
                info!(model = %model, "Successfully pulled model");
                if let Err(e) = self.refresh_models().await {
                    warn!(error = %e, "Failed to refresh model list after pull");
                }
                Ok(true)
            }
            Err(e) => {
                error!(model = %model, error = %e, "Failed to pull model");
                Ok(false)
            }
        }
    }

    async fn delete_model(&self, model: &str) -> Result<bool> {
        let body = json!({ "name": model });
        match self.request_json(Method::DELETE, "/api/delete", Some(&body), None).await {
            Ok(_) => {
                self.available_models.write().await.retain(|m| m != model);
                info!(model = %model, "Deleted model");
                Ok(true)
            }
            Err(e) => {
                error!(model = %model, error = %e, "Failed to delete model");
                Ok(false)
            }
        }
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        self.ensure_model(&request.model).await?;

        info!(
            model = %request.model,
            prompt_length = request.prompt.len(),
            temperature = request.temperature,
            max_tokens = ?request.max_tokens,
            "Generating content"
        );

        let start = Instant::now();
        let body = Self::generate_body(&request, false);
        let value = self.request_json(Method::POST, "/api/generate", Some(&body), None).await?;
        let parsed: OllamaGenerateResponse = serde_json::from_value(value)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        info!(
            model = %request.model,
            generation_time_ms = start.elapsed().as_millis() as u64,
            response_length = parsed.response.len(),
            "Content generation completed"
        );

        Ok(GenerateResponse {
            response: parsed.response,
            model: if parsed.model.is_empty() { request.model } else { parsed.model },
            eval_count: parsed.eval_count,
            eval_duration_ns: parsed.eval_duration,
            total_duration_ns: parsed.total_duration,
        })
    }

    async fn stream_generate(&self, request: GenerateRequest) -> Result<ResponseStream> {
        self.ensure_model(&request.model).await?;

        let url = format!("{}/api/generate", self.base_url);
        let body = Self::generate_body(&request, true);
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send streaming request")?;

        if !response.status().is_success() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, message }.into());
        }

        Ok(ndjson_stream(response.bytes_stream()))
    }

    async fn chat(&self, request: ChatRequest) -> Result<GenerateResponse> {
        self.ensure_model(&request.model).await?;

        info!(model = %request.model, messages = request.messages.len(), "Starting chat");

        let mut options = json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": options,
        });

        let value = self.request_json(Method::POST, "/api/chat", Some(&body), None).await?;
        let parsed: OllamaChatResponse = serde_json::from_value(value)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(GenerateResponse {
            response: parsed.message.map(|m| m.content).unwrap_or_default(),
            model: if parsed.model.is_empty() { request.model } else { parsed.model },
            eval_count: parsed.eval_count,
            eval_duration_ns: parsed.eval_duration,
            total_duration_ns: parsed.total_duration,
        })
    }

    fn statistics(&self) -> ProviderStatistics {
        let requests = self.request_count.load(Ordering::Relaxed);
        let errors = self.error_count.load(Ordering::Relaxed);
        let error_rate = errors as f64 / requests.max(1) as f64 * 100.0;
        let (last_health_check, health_status) = self
            .health
            .lock()
            .ok()
            .and_then(|guard| *guard)
            .map(|(at, healthy)| (Some(at), healthy))
            .unwrap_or((None, false));
        let available_models = self
            .available_models
            .try_read()
            .map(|models| models.len())
            .unwrap_or(0);

        ProviderStatistics {
            base_url: self.base_url.clone(),
            health_status,
            last_health_check,
            available_models,
            request_count: requests,
            error_count: errors,
            error_rate: format!("{:.2}%", error_rate),
            uptime: format!("{:.2}s", self.started.elapsed().as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    struct MockOllama {
        models: Mutex<Vec<String>>,
        pulls: AtomicUsize,
        tags_hits: AtomicUsize,
        /// Number of upcoming `/api/tags` calls answered with 503
        tags_failures: AtomicUsize,
    }

    async fn tags(State(state): State<Arc<MockOllama>>) -> Response {
        state.tags_hits.fetch_add(1, Ordering::SeqCst);
        let failing = state
            .tags_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "starting up" }))).into_response();
        }
        let models = state.models.lock().unwrap().clone();
        let entries: Vec<Value> = models.iter().map(|m| json!({ "name": m, "size": 1 })).collect();
        Json(json!({ "models": entries })).into_response()
    }

    async fn pull(State(state): State<Arc<MockOllama>>, Json(body): Json<Value>) -> Response {
        state.pulls.fetch_add(1, Ordering::SeqCst);
        let name = body["name"].as_str().unwrap_or_default().to_string();
        if name == "unpullable" {
            return (StatusCode::NOT_FOUND, Json(json!({ "error": "pull model manifest: file does not exist" })))
                .into_response();
        }
        state.models.lock().unwrap().push(name);
        Json(json!({ "status": "success" })).into_response()
    }

    async fn generate(Json(body): Json<Value>) -> Response {
        if body["model"] == "broken:1b" {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "boom" }))).into_response();
        }
        if body["stream"] == json!(true) {
            let lines = "{\"response\":\"Hel\",\"done\":false}\nnot json\n{\"response\":\"lo\",\"done\":false}\n{\"response\":\"\",\"done\":true}";
            return lines.into_response();
        }
        Json(json!({
            "model": body["model"],
            "response": format!("echo: {}", body["prompt"].as_str().unwrap_or_default()),
            "eval_count": 40,
            "eval_duration": 2_000_000_000u64,
            "total_duration": 2_500_000_000u64,
            "system_seen": body["system"],
            "num_predict": body["options"]["num_predict"],
        }))
        .into_response()
    }

    async fn chat(Json(body): Json<Value>) -> Json<Value> {
        let last = body["messages"].as_array().and_then(|m| m.last()).cloned().unwrap_or_default();
        Json(json!({
            "model": body["model"],
            "message": { "role": "assistant", "content": format!("re: {}", last["content"].as_str().unwrap_or_default()) },
            "eval_count": 3,
        }))
    }

    async fn remove(State(state): State<Arc<MockOllama>>, Json(body): Json<Value>) -> StatusCode {
        let name = body["name"].as_str().unwrap_or_default().to_string();
        let mut models = state.models.lock().unwrap();
        let before = models.len();
        models.retain(|m| m != &name);
        if models.len() == before {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        }
    }

    async fn spawn_mock(models: &[&str]) -> (String, Arc<MockOllama>) {
        let state = Arc::new(MockOllama {
            models: Mutex::new(models.iter().map(|m| m.to_string()).collect()),
            pulls: AtomicUsize::new(0),
            tags_hits: AtomicUsize::new(0),
            tags_failures: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/api/tags", get(tags))
            .route("/api/pull", post(pull))
            .route("/api/generate", post(generate))
            .route("/api/chat", post(chat))
            .route("/api/delete", delete(remove))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), state)
    }

    fn client_for(base_url: &str) -> OllamaClient {
        OllamaClient::new(ProviderConfig {
            base_url: Some(base_url.to_string()),
            timeout_secs: Some(5),
            max_retries: Some(1),
        })
        .unwrap()
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(OllamaClient::normalize_base_url("localhost:11434/"), "http://localhost:11434");
        assert_eq!(OllamaClient::normalize_base_url("https://llm.internal//"), "https://llm.internal");
        assert_eq!(OllamaClient::normalize_base_url("http://ollama:11434"), "http://ollama:11434");
    }

    #[tokio::test]
    async fn test_health_check_and_model_listing() {
        let (url, _state) = spawn_mock(&["llama3.1:8b", "mistral:7b"]).await;
        let client = client_for(&url);

        assert!(client.health_check().await);
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.1:8b".to_string(), "mistral:7b".to_string()]);

        let stats = client.statistics();
        assert!(stats.health_status);
        assert_eq!(stats.error_count, 0);
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let client = client_for("127.0.0.1:1");
        assert!(!client.health_check().await);
        assert_eq!(client.statistics().error_count, 1);
    }

    #[tokio::test]
    async fn test_refresh_health_bypasses_cached_failure() {
        let (url, state) = spawn_mock(&["llama3.1:8b"]).await;
        state.tags_failures.store(1, Ordering::SeqCst);
        let client = client_for(&url);

        assert!(!client.health_check().await);
        // Still inside the cache window
        assert!(!client.health_check().await);
        assert_eq!(state.tags_hits.load(Ordering::SeqCst), 1);

        assert!(client.refresh_health().await);
        assert_eq!(state.tags_hits.load(Ordering::SeqCst), 2);
        assert!(client.health_check().await);
        assert!(client.statistics().health_status);
    }

    #[tokio::test]
    async fn test_refresh_models_replaces_cached_list() {
        let (url, state) = spawn_mock(&["llama3.1:8b"]).await;
        let client = client_for(&url);

        assert_eq!(client.list_models().await.unwrap(), vec!["llama3.1:8b".to_string()]);
        state.models.lock().unwrap().push("mistral:7b".to_string());
        assert_eq!(client.list_models().await.unwrap().len(), 1);

        let refreshed = client.refresh_models().await.unwrap();
        assert_eq!(refreshed, vec!["llama3.1:8b".to_string(), "mistral:7b".to_string()]);
        assert!(client.check_model_available("mistral:7b").await);
    }

    #[tokio::test]
    async fn test_requests_retry_gateway_errors() {
        let (url, state) = spawn_mock(&["llama3.1:8b"]).await;
        state.tags_failures.store(1, Ordering::SeqCst);
        let client = client_for(&url);

        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.1:8b".to_string()]);
        assert_eq!(state.tags_hits.load(Ordering::SeqCst), 2);
        assert_eq!(client.statistics().error_count, 1);
    }

    #[tokio::test]
    async fn test_requests_give_up_after_max_retries() {
        let (url, state) = spawn_mock(&["llama3.1:8b"]).await;
        state.tags_failures.store(5, Ordering::SeqCst);
        let client = client_for(&url);

        let err = client.list_models().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::Http { status: 503, .. })
        ));
        // One try plus one retry
        assert_eq!(state.tags_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generate_pulls_missing_model() {
        let (url, state) = spawn_mock(&["llama3.1:8b"]).await;
        let client = client_for(&url);

        let request = GenerateRequest::new("mistral:7b", "Say hello")
            .with_system("be brief")
            .with_max_tokens(50);
        let response = client.generate(request).await.unwrap();

        assert_eq!(response.response, "echo: Say hello");
        assert_eq!(response.eval_count, 40);
        assert_eq!(response.tokens_per_second(), Some(20.0));
        assert_eq!(state.pulls.load(Ordering::SeqCst), 1);
        assert!(client.check_model_available("mistral:7b").await);
    }

    #[tokio::test]
    async fn test_generate_fails_when_pull_fails() {
        let (url, _state) = spawn_mock(&["llama3.1:8b"]).await;
        let client = client_for(&url);

        let err = client.generate(GenerateRequest::new("unpullable", "hi")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::ModelNotFound(name)) if name == "unpullable"
        ));
    }

    #[tokio::test]
    async fn test_generate_surfaces_error_message() {
        let (url, _state) = spawn_mock(&["broken:1b"]).await;
        let client = client_for(&url);

        let err = client.generate(GenerateRequest::new("broken:1b", "hi")).await.unwrap_err();
        match err.downcast_ref::<ProviderError>() {
            Some(ProviderError::Http { status, message }) => {
                assert_eq!(*status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(client.statistics().error_count, 1);
    }

    #[tokio::test]
    async fn test_stream_generate_skips_bad_lines() {
        let (url, _state) = spawn_mock(&["llama3.1:8b"]).await;
        let client = client_for(&url);

        let mut stream = client
            .stream_generate(GenerateRequest::new("llama3.1:8b", "hi"))
            .await
            .unwrap();

        let mut text = String::new();
        let mut done = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            text.push_str(&chunk.response);
            done = chunk.done;
        }
        assert_eq!(text, "Hello");
        assert!(done);
    }

    #[tokio::test]
    async fn test_chat_and_delete() {
        let (url, _state) = spawn_mock(&["llama3.1:8b"]).await;
        let client = client_for(&url);

        let reply = client
            .chat(ChatRequest {
                model: "llama3.1:8b".to_string(),
                messages: vec![ChatMessage { role: MessageRole::User, content: "ping".to_string() }],
                temperature: 0.2,
                max_tokens: None,
            })
            .await
            .unwrap();
        assert_eq!(reply.response, "re: ping");

        assert!(client.delete_model("llama3.1:8b").await.unwrap());
        assert!(!client.delete_model("llama3.1:8b").await.unwrap());
    }
}
