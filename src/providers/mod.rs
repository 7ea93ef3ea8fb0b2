use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use futures::Stream;
use anyhow::Result;

pub mod ollama;
pub mod demo;
pub mod catalog;

pub use ollama::OllamaClient;
pub use demo::DemoProvider;

/// A single generation request against a local model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: None,
            stop: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from a generation call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    pub model: String,
    /// Tokens produced by the model
    pub eval_count: u64,
    /// Time spent producing those tokens, in nanoseconds
    pub eval_duration_ns: u64,
    pub total_duration_ns: u64,
}

impl GenerateResponse {
    pub fn tokens_per_second(&self) -> Option<f64> {
        if self.eval_duration_ns == 0 {
            return None;
        }
        Some(self.eval_count as f64 / (self.eval_duration_ns as f64 / 1e9))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// One decoded line of a streaming generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub response: String,
    pub done: bool,
    pub raw: serde_json::Value,
}

/// Connection settings for a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

/// Usage counters exposed by a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatistics {
    pub base_url: String,
    pub health_status: bool,
    pub last_health_check: Option<chrono::DateTime<chrono::Utc>>,
    pub available_models: usize,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: String,
    pub uptime: String,
}

/// Stream type for responses
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Main trait every LLM runtime backend implements
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Get provider name
    fn name(&self) -> &str;

    /// Whether the runtime answers at all
    async fn health_check(&self) -> bool;

    /// Health check that ignores any cached answer
    async fn refresh_health(&self) -> bool {
        self.health_check().await
    }

    /// Names of locally installed models
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Installed models fetched from the runtime, replacing any cached list
    async fn refresh_models(&self) -> Result<Vec<String>> {
        self.list_models().await
    }

    /// Download a model into the runtime
    async fn pull_model(&self, model: &str) -> Result<bool>;

    async fn delete_model(&self, model: &str) -> Result<bool>;

    /// Complete a prompt (non-streaming)
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    /// Complete a prompt (streaming)
    async fn stream_generate(&self, request: GenerateRequest) -> Result<ResponseStream>;

    async fn chat(&self, request: ChatRequest) -> Result<GenerateResponse>;

    fn statistics(&self) -> ProviderStatistics;
}

/// Error types for providers
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("LLM service is not available at {0}")]
    Unavailable(String),

    #[error("Model {0} is not available and could not be pulled")]
    ModelNotFound(String),

    #[error("Request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
