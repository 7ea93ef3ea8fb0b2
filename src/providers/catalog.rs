use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kinds of work a model can be picked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    ContentGeneration,
    CodeGeneration,
    StructuredData,
    CreativeWriting,
    Analysis,
    SeoOptimization,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 6] = [
        TaskCategory::ContentGeneration,
        TaskCategory::CodeGeneration,
        TaskCategory::StructuredData,
        TaskCategory::CreativeWriting,
        TaskCategory::Analysis,
        TaskCategory::SeoOptimization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::ContentGeneration => "content_generation",
            TaskCategory::CodeGeneration => "code_generation",
            TaskCategory::StructuredData => "structured_data",
            TaskCategory::CreativeWriting => "creative_writing",
            TaskCategory::Analysis => "analysis",
            TaskCategory::SeoOptimization => "seo_optimization",
        }
    }

    /// Unknown names map to content generation
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .unwrap_or(TaskCategory::ContentGeneration)
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct TaskModelConfig {
    pub primary: &'static str,
    pub fallback: &'static str,
    pub description: &'static str,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSpecs {
    pub size_gb: f64,
    pub params: &'static str,
    pub context_length: u32,
    pub recommended_ram_gb: u32,
    pub good_for: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: String,
}

pub const ESSENTIAL_MODELS: [&str; 2] = ["llama3.1:8b", "mistral:7b"];

pub const OPTIONAL_MODELS: [&str; 3] = ["codellama:13b", "llama3.1:70b", "phi3:mini"];

pub static MODELS_CONFIG: [(TaskCategory, TaskModelConfig); 6] = [
    (TaskCategory::ContentGeneration, TaskModelConfig {
        primary: "llama3.1:8b",
        fallback: "mistral:7b",
        description: "Best for content creation and writing",
        temperature: 0.8,
        max_tokens: 2000,
    }),
    (TaskCategory::CodeGeneration, TaskModelConfig {
        primary: "codellama:13b",
        fallback: "llama3.1:8b",
        description: "Optimized for code and technical content",
        temperature: 0.3,
        max_tokens: 4000,
    }),
    (TaskCategory::StructuredData, TaskModelConfig {
        primary: "mistral:7b",
        fallback: "llama3.1:8b",
        description: "Good for JSON and structured output",
        temperature: 0.2,
        max_tokens: 1500,
    }),
    (TaskCategory::CreativeWriting, TaskModelConfig {
        primary: "llama3.1:8b",
        fallback: "mistral:7b",
        description: "Creative and engaging content",
        temperature: 0.9,
        max_tokens: 3000,
    }),
    (TaskCategory::Analysis, TaskModelConfig {
        primary: "llama3.1:8b",
        fallback: "mistral:7b",
        description: "Analysis and reasoning tasks",
        temperature: 0.3,
        max_tokens: 2000,
    }),
    (TaskCategory::SeoOptimization, TaskModelConfig {
        primary: "mistral:7b",
        fallback: "llama3.1:8b",
        description: "SEO metadata and optimization",
        temperature: 0.4,
        max_tokens: 1000,
    }),
];

lazy_static::lazy_static! {
    pub static ref MODEL_ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("llama3:8b", "llama3.1:8b");
        m.insert("llama3", "llama3.1:8b");
        m.insert("mistral", "mistral:7b");
        m.insert("codellama", "codellama:13b");
        m
    };

    pub static ref MODEL_SPECS: HashMap<&'static str, ModelSpecs> = {
        let mut m = HashMap::new();

        m.insert("llama3.1:8b", ModelSpecs {
            size_gb: 4.7,
            params: "8B",
            context_length: 128_000,
            recommended_ram_gb: 8,
            good_for: &["general", "content", "analysis", "creative"],
        });

        m.insert("mistral:7b", ModelSpecs {
            size_gb: 4.1,
            params: "7B",
            context_length: 32_768,
            recommended_ram_gb: 6,
            good_for: &["structured", "seo", "concise"],
        });

        m.insert("codellama:13b", ModelSpecs {
            size_gb: 7.4,
            params: "13B",
            context_length: 16_384,
            recommended_ram_gb: 12,
            good_for: &["code", "technical", "programming"],
        });

        m.insert("phi3:mini", ModelSpecs {
            size_gb: 2.2,
            params: "3.8B",
            context_length: 128_000,
            recommended_ram_gb: 4,
            good_for: &["lightweight", "quick", "basic"],
        });

        m
    };

    /// Download priority, higher first
    pub static ref MODEL_PRIORITY: HashMap<&'static str, u32> = {
        let mut m = HashMap::new();
        m.insert("llama3.1:8b", 100);
        m.insert("mistral:7b", 90);
        m.insert("codellama:13b", 70);
        m.insert("phi3:mini", 60);
        m.insert("llama3.1:70b", 30);
        m
    };

    static ref SYSTEM_PROMPTS: HashMap<TaskCategory, &'static str> = {
        let mut m = HashMap::new();

        m.insert(TaskCategory::ContentGeneration,
            "You are a professional content writer specializing in website copy. \
Create engaging, clear, and compelling content that resonates with the target audience. \
Focus on benefits, use active voice, and maintain a professional yet approachable tone.");

        m.insert(TaskCategory::SeoOptimization,
            "You are an SEO specialist. Create SEO-optimized content and metadata \
that will rank well in search engines while maintaining readability and user value. \
Focus on relevant keywords, proper meta descriptions, and structured data.");

        m.insert(TaskCategory::StructuredData,
            "You are a data structuring expert. Create well-formatted JSON \
and structured data that follows specified schemas. Ensure all required fields are present \
and data types are correct. Return only valid JSON without additional text.");

        m.insert(TaskCategory::Analysis,
            "You are a business analyst. Analyze the provided information thoroughly \
and provide insights, recommendations, and strategic guidance. Be objective, thorough, \
and provide actionable recommendations.");

        m.insert(TaskCategory::CreativeWriting,
            "You are a creative writer. Create engaging, imaginative, and \
compelling content that captures attention and tells a story. Use vivid language, \
vary sentence structure, and create emotional connections with readers.");

        m
    };
}

pub fn model_for_task(task: TaskCategory) -> &'static TaskModelConfig {
    MODELS_CONFIG
        .iter()
        .find(|(category, _)| *category == task)
        .map(|(_, config)| config)
        .unwrap_or(&MODELS_CONFIG[0].1)
}

pub fn resolve_model_alias(model: &str) -> &str {
    MODEL_ALIASES.get(model).copied().unwrap_or(model)
}

pub fn model_specs(model: &str) -> Option<&'static ModelSpecs> {
    MODEL_SPECS.get(resolve_model_alias(model))
}

pub fn recommended_settings(task: TaskCategory) -> RecommendedSettings {
    let config = model_for_task(task);
    RecommendedSettings {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        model: config.primary.to_string(),
    }
}

pub fn model_priority(model: &str) -> u32 {
    MODEL_PRIORITY.get(resolve_model_alias(model)).copied().unwrap_or(0)
}

/// Sorts models by download priority; ties keep their input order
pub fn download_order<S: AsRef<str>>(models: &[S]) -> Vec<String> {
    let mut ordered: Vec<String> = models.iter().map(|m| m.as_ref().to_string()).collect();
    ordered.sort_by(|a, b| model_priority(b).cmp(&model_priority(a)));
    ordered
}

pub fn is_essential(model: &str) -> bool {
    ESSENTIAL_MODELS.contains(&resolve_model_alias(model))
}

pub fn system_prompt(task: TaskCategory) -> &'static str {
    SYSTEM_PROMPTS
        .get(&task)
        .or_else(|| SYSTEM_PROMPTS.get(&TaskCategory::ContentGeneration))
        .copied()
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelFootprint {
    pub model: String,
    pub size_gb: f64,
    pub ram_gb: u32,
    pub params: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryEstimate {
    pub total_disk_space_gb: f64,
    pub recommended_ram_gb: u32,
    pub models: Vec<ModelFootprint>,
    pub can_run_simultaneously: bool,
}

/// Disk adds up, RAM does not: models are loaded one at a time
pub fn estimate_memory_requirements<S: AsRef<str>>(models: &[S]) -> MemoryEstimate {
    let mut total_size = 0.0;
    let mut ram = 0;
    let mut details = Vec::new();

    for model in models {
        let resolved = resolve_model_alias(model.as_ref());
        if let Some(specs) = MODEL_SPECS.get(resolved) {
            total_size += specs.size_gb;
            ram = ram.max(specs.recommended_ram_gb);
            details.push(ModelFootprint {
                model: resolved.to_string(),
                size_gb: specs.size_gb,
                ram_gb: specs.recommended_ram_gb,
                params: specs.params.to_string(),
            });
        }
    }

    MemoryEstimate {
        total_disk_space_gb: (total_size * 10.0_f64).round() / 10.0,
        recommended_ram_gb: ram,
        models: details,
        can_run_simultaneously: ram <= 32,
    }
}
