use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::json::{extract_json, validate_schema};
use super::AgentStats;
use crate::providers::catalog::{self, TaskCategory};
use crate::providers::{GenerateRequest, LLMProvider};
use crate::registry::ModelManager;

const STRUCTURED_SYSTEM_PROMPT: &str =
    "You are a data structuring expert. Return only valid JSON without additional text.";
const STRUCTURED_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system: Option<String>,
}

impl GenerationOptions {
    pub fn temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }
}

/// Shared prompting machinery behind every pipeline stage
pub struct LLMAgent {
    name: &'static str,
    provider: Arc<dyn LLMProvider>,
    model: String,
    category: TaskCategory,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
    usage: Option<Arc<ModelManager>>,
    stats: Mutex<AgentStats>,
}

impl LLMAgent {
    pub fn new(name: &'static str, provider: Arc<dyn LLMProvider>, category: TaskCategory) -> Self {
        let settings = catalog::recommended_settings(category);
        tracing::debug!(agent = name, model = %settings.model, task = %category, "Initialized agent");
        Self {
            name,
            provider,
            model: settings.model,
            category,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            system_prompt: catalog::system_prompt(category).to_string(),
            usage: None,
            stats: Mutex::new(AgentStats::default()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Report every call to the model registry
    pub fn with_usage_tracking(mut self, manager: Arc<ModelManager>) -> Self {
        self.usage = Some(manager);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn category(&self) -> TaskCategory {
        self.category
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn stats(&self) -> AgentStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, success: bool, tokens: u64, seconds: f64) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.record(success, tokens, seconds);
        }
    }

    pub async fn generate_content(
        &self,
        prompt: &str,
        context: Option<&Map<String, Value>>,
        options: GenerationOptions,
    ) -> Result<String> {
        let started = Instant::now();
        let full_prompt = build_prompt(prompt, context);
        let temperature = options.temperature.unwrap_or(self.temperature);

        let request = GenerateRequest::new(&self.model, full_prompt)
            .with_system(options.system.unwrap_or_else(|| self.system_prompt.clone()))
            .with_temperature(temperature)
            .with_max_tokens(options.max_tokens.unwrap_or(self.max_tokens));

        tracing::debug!(
            agent = self.name,
            model = %self.model,
            temperature,
            prompt_length = request.prompt.len(),
            "Generating content"
        );

        match self.provider.generate(request).await {
            Ok(response) => {
                let elapsed = started.elapsed().as_secs_f64();
                self.record(true, response.eval_count, elapsed);
                if let Some(manager) = &self.usage {
                    manager
                        .track_usage(&self.model, self.category.as_str(), response.eval_count, elapsed)
                        .await;
                }
                tracing::info!(
                    agent = self.name,
                    model = %self.model,
                    tokens = response.eval_count,
                    elapsed,
                    "Content generated"
                );
                Ok(response.response)
            }
            Err(e) => {
                let elapsed = started.elapsed().as_secs_f64();
                self.record(false, 0, elapsed);
                tracing::error!(agent = self.name, model = %self.model, error = %e, "Content generation failed");
                Err(e).context("LLM request failed")
            }
        }
    }

    /// JSON output checked against `schema`; malformed answers are retried a little hotter
    pub async fn generate_structured_content(
        &self,
        prompt: &str,
        context: Option<&Map<String, Value>>,
        schema: &Value,
        temperature: f32,
    ) -> Result<Value> {
        let structured_prompt = build_structured_prompt(prompt, Some(schema));
        let mut temperature = temperature;

        for attempt in 1..=STRUCTURED_ATTEMPTS {
            let options = GenerationOptions {
                temperature: Some(temperature),
                max_tokens: None,
                system: Some(STRUCTURED_SYSTEM_PROMPT.to_string()),
            };
            let text = self.generate_content(&structured_prompt, context, options).await?;

            match extract_json(&text).and_then(|data| validate_schema(&data, schema).map(|_| data)) {
                Ok(data) => return Ok(data),
                Err(e) => {
                    tracing::warn!(agent = self.name, attempt, error = %e, "Structured content attempt failed");
                    temperature = (temperature + 0.1).min(0.8);
                }
            }
        }

        Err(anyhow!(
            "Failed to generate valid structured content after {} attempts",
            STRUCTURED_ATTEMPTS
        ))
    }
}

/// Prefixes a task with a `Key Name: value` context block
pub fn build_prompt(prompt: &str, context: Option<&Map<String, Value>>) -> String {
    let Some(context) = context.filter(|c| !c.is_empty()) else {
        return prompt.to_string();
    };

    let lines: Vec<String> = context
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::Object(_) | Value::Array(_) => {
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
                }
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}: {}", title_case(key), rendered)
        })
        .collect();

    format!(
        "Context Information:\n{}\n\nTask:\n{}\n\nPlease provide a comprehensive response based on the context information above.",
        lines.join("\n"),
        prompt
    )
}

pub fn build_structured_prompt(prompt: &str, schema: Option<&Value>) -> String {
    let mut out = format!(
        "\n{}\n\nResponse Requirements:\n\
         - Respond ONLY with valid JSON\n\
         - Do not include any explanatory text before or after the JSON\n\
         - Ensure all JSON keys and values are properly formatted\n\
         - Use double quotes for all strings\n",
        prompt.trim()
    );
    if let Some(schema) = schema {
        let rendered = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
        out.push_str(&format!("- Follow this JSON schema structure:\n{}\n", rendered));
    }
    out
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
