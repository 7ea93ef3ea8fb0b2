use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::providers::ProviderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    Demo,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "demo" => Ok(ProviderKind::Demo),
            other => Err(anyhow::anyhow!("Unknown LLM provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub provider: ProviderKind,
    pub ollama_base_url: String,
    pub ollama_timeout_secs: u64,
    pub ollama_max_retries: u32,
    pub default_model: String,
    pub max_concurrent_workflows: usize,
    pub workflow_timeout_secs: u64,
    pub model_health_check_interval_secs: u64,
    pub initialize_models_on_startup: bool,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
            environment: "development".to_string(),
            provider: ProviderKind::Ollama,
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_timeout_secs: 900,
            ollama_max_retries: 3,
            default_model: "llama3.1:8b".to_string(),
            max_concurrent_workflows: 5,
            workflow_timeout_secs: 1200,
            model_health_check_interval_secs: 300,
            initialize_models_on_startup: true,
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Defaults, then the config file if present, then `.env`, then the environment
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };

        // A missing .env is normal outside development
        let _ = dotenvy::dotenv();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("SITEFORGE_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".config").join("siteforge").join("config.toml"))
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| -> Option<String> {
            lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };

        if let Some(v) = text("HOST") {
            self.host = v;
        }
        if let Some(v) = parse_number(&lookup, "PORT")? {
            self.port = v;
        }
        if let Some(v) = text("ENVIRONMENT") {
            self.environment = v.to_lowercase();
        }
        if let Some(v) = text("LLM_PROVIDER") {
            self.provider = v.parse()?;
        }
        if let Some(v) = text("OLLAMA_BASE_URL").or(text("OLLAMA_HOST")) {
            self.ollama_base_url = v;
        }
        if let Some(v) = parse_number(&lookup, "OLLAMA_TIMEOUT")? {
            self.ollama_timeout_secs = v;
        }
        if let Some(v) = parse_number(&lookup, "OLLAMA_MAX_RETRIES")? {
            self.ollama_max_retries = v;
        }
        if let Some(v) = text("DEFAULT_MODEL") {
            self.default_model = v;
        }
        if let Some(v) = parse_number(&lookup, "MAX_CONCURRENT_WORKFLOWS")? {
            self.max_concurrent_workflows = v;
        }
        if let Some(v) = parse_number(&lookup, "WORKFLOW_TIMEOUT")? {
            self.workflow_timeout_secs = v;
        }
        if let Some(v) = parse_number(&lookup, "MODEL_HEALTH_CHECK_INTERVAL")? {
            self.model_health_check_interval_secs = v;
        }
        if let Some(v) = text("INITIALIZE_MODELS") {
            self.initialize_models_on_startup = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = text("LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn workflow_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.model_health_check_interval_secs)
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            base_url: Some(self.ollama_base_url.clone()),
            timeout_secs: Some(self.ollama_timeout_secs),
            max_retries: Some(self.ollama_max_retries),
        }
    }
}

fn parse_number<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} must be a number, got {:?}: {}", key, raw, e)),
        None => Ok(None),
    }
}
