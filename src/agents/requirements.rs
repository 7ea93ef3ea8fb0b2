use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::json::list;
use super::{Agent, AgentStats, LLMAgent};
use crate::providers::catalog::TaskCategory;
use crate::providers::LLMProvider;
use crate::registry::ModelManager;
use crate::workflow::{WizardData, WorkflowState};

const SYSTEM_PROMPT: &str = "You are a website requirements analyst and content strategist. \
Analyze user requirements thoroughly and create a comprehensive content strategy that will guide \
the entire website creation process.

Your analysis should consider:
- Target audience identification and personas
- Business goals and objectives
- Content priorities and messaging hierarchy
- SEO opportunities and keyword strategy
- Competitive positioning
- User experience considerations

Always respond with valid JSON containing structured analysis.";

/// Turns the wizard answers into a content strategy for the later stages
pub struct RequirementsAnalyzer {
    llm: LLMAgent,
}

impl RequirementsAnalyzer {
    pub const NAME: &'static str = "RequirementsAnalyzer";

    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            llm: LLMAgent::new(Self::NAME, provider, TaskCategory::Analysis)
                .with_model("llama3.1:8b")
                .with_system_prompt(SYSTEM_PROMPT),
        }
    }

    pub fn with_usage_tracking(mut self, manager: Arc<ModelManager>) -> Self {
        self.llm = self.llm.with_usage_tracking(manager);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.llm = self.llm.with_model(model);
        self
    }

    pub fn analysis_prompt(wizard: &WizardData) -> String {
        let business = &wizard.business_info;
        let purpose = &wizard.website_purpose;
        let audience = &wizard.target_audience;
        let location = &wizard.location_info;
        let branding = &wizard.branding;
        let demographics = if audience.demographics.is_null() {
            "{}".to_string()
        } else {
            audience.demographics.to_string()
        };

        format!(
            "Analyze the following website requirements and create a comprehensive content strategy:

BUSINESS INFORMATION:
- Website Type: {website_type}
- Business Name: {name}
- Business Description: {description}
- Industry: {industry}

WEBSITE PURPOSE & GOALS:
- Primary Purpose: {primary}
- Secondary Goals: {secondary}
- Success Metrics: {metrics}

SERVICES & OFFERINGS:
{services}

TARGET AUDIENCE:
- Demographics: {demographics}
- Interests: {interests}
- Pain Points: {pain_points}
- Goals: {goals}

LOCATION & MARKET:
- Location: {city}, {state}, {country}
- Market Type: {market_type}
- Service Area: {service_area}

BRANDING PREFERENCES:
- Tone: {tone}
- Style: {style}
- Values: {values}
- Unique Selling Points: {usps}

WEBSITE FEATURES:
{features}

ANALYSIS REQUIREMENTS:
Create a comprehensive content strategy that includes:

1. TARGET AUDIENCE ANALYSIS: primary persona with demographics, psychographics and behavior patterns; \
secondary personas if applicable; user journey and touchpoints; pain points and motivations.
2. CONTENT GOALS & OBJECTIVES: primary objectives aligned with business goals; supporting goals; \
success metrics and KPIs; content hierarchy.
3. MESSAGING STRATEGY: core value proposition; key messages for each audience segment; \
tone and voice guidelines; brand positioning statements.
4. SEO STRATEGY: primary keywords (high-volume, business-relevant); secondary long-tail keywords; \
local SEO keywords if applicable; content topics for SEO.
5. COMPETITIVE POSITIONING: market differentiation strategy; competitive advantages to highlight; \
unique selling propositions; market positioning approach.
6. CONTENT PRIORITIES: most important content sections; secondary priorities; \
optional or future content ideas; update requirements.

Respond with valid JSON following the specified schema.",
            website_type = wizard.website_category().unwrap_or("business"),
            name = business.name.as_deref().unwrap_or("Not specified"),
            description = business.description.as_deref().unwrap_or("Not provided"),
            industry = business.industry.as_deref().unwrap_or("Not specified"),
            primary = purpose.primary.as_deref().unwrap_or("Not specified"),
            secondary = list(&purpose.secondary),
            metrics = list(&purpose.metrics),
            services = format_services(wizard),
            demographics = demographics,
            interests = list(&audience.interests),
            pain_points = list(&audience.pain_points),
            goals = list(&audience.goals),
            city = location.city.as_deref().unwrap_or(""),
            state = location.state.as_deref().unwrap_or(""),
            country = location.country.as_deref().unwrap_or(""),
            market_type = location.market_type.as_deref().unwrap_or("Not specified"),
            service_area = location.service_area.as_deref().unwrap_or("Not specified"),
            tone = branding.tone.as_deref().unwrap_or("Not specified"),
            style = branding.style.as_deref().unwrap_or("Not specified"),
            values = list(&branding.values),
            usps = list(&branding.unique_selling_points),
            features = format_features(&wizard.website_features),
        )
    }

    fn analysis_schema() -> Value {
        json!({
            "type": "object",
            "required": [
                "target_audience",
                "content_goals",
                "messaging_strategy",
                "seo_keywords",
                "competitive_positioning",
                "content_priorities"
            ],
            "properties": {
                "target_audience": {
                    "type": "object",
                    "properties": {
                        "primary_persona": { "type": "object" },
                        "secondary_personas": { "type": "array" },
                        "user_journey": { "type": "array" }
                    }
                },
                "content_goals": { "type": "array" },
                "messaging_strategy": {
                    "type": "object",
                    "properties": {
                        "value_proposition": { "type": "string" },
                        "key_messages": { "type": "array" },
                        "brand_voice": { "type": "string" }
                    }
                },
                "seo_keywords": {
                    "type": "object",
                    "properties": {
                        "primary": { "type": "array" },
                        "secondary": { "type": "array" },
                        "local": { "type": "array" },
                        "long_tail": { "type": "array" }
                    }
                },
                "competitive_positioning": { "type": "object" },
                "content_priorities": { "type": "array" }
            }
        })
    }

    /// Stamps the analysis and folds in what the wizard already tells us
    pub fn process_analysis(mut analysis: Value, wizard: &WizardData) -> Value {
        if let Some(strategy) = analysis.as_object_mut() {
            enrich_strategy(strategy, wizard);
        }
        analysis
    }
}

fn enrich_strategy(strategy: &mut Map<String, Value>, wizard: &WizardData) {
    strategy.insert(
        "analysis_metadata".to_string(),
        json!({
            "created_at": Utc::now().to_rfc3339(),
            "analyzer_version": "1.0.0",
            "business_type": wizard.website_category().unwrap_or("unknown"),
            "has_services": !wizard.selected_services.is_empty(),
            "has_location": wizard.location_info.city().is_some(),
            "features_count": wizard.website_features.len(),
        }),
    );

    if let Some(keywords) = strategy.get_mut("seo_keywords").and_then(Value::as_object_mut) {
        let name = wizard.business_name();
        if !name.is_empty() {
            if let Some(primary) = keywords.get_mut("primary").and_then(Value::as_array_mut) {
                let known = primary
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|k| k.to_lowercase() == name.to_lowercase());
                if !known {
                    primary.insert(0, json!(name));
                }
            }
        }

        if let Some(city) = wizard.location_info.city() {
            let mut local: Vec<Value> = keywords
                .get("local")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut add = |keyword: String| {
                if !local.iter().any(|k| k.as_str() == Some(keyword.as_str())) {
                    local.push(json!(keyword));
                }
            };
            add(city.to_string());
            if let Some(state) = wizard.location_info.state.as_deref().filter(|s| !s.is_empty()) {
                add(format!("{} {}", city, state));
            }
            keywords.insert("local".to_string(), Value::Array(local));
        }
    }

    strategy.insert(
        "content_recommendations".to_string(),
        content_recommendations(wizard.website_category().unwrap_or("")),
    );
}

#[async_trait]
impl Agent for RequirementsAnalyzer {
    fn name(&self) -> &str {
        self.llm.name()
    }

    fn model(&self) -> &str {
        self.llm.model()
    }

    fn validate_inputs(&self, state: &WorkflowState) -> Vec<String> {
        let wizard = &state.wizard_data;
        let mut errors = Vec::new();
        if wizard.business_name().is_empty() {
            errors.push("Business name is required for analysis".to_string());
        }
        if wizard.website_category().is_none() {
            errors.push("Website type is required for analysis".to_string());
        }
        if wizard.website_purpose.primary.as_deref().unwrap_or("").is_empty() {
            errors.push("Website purpose is required for analysis".to_string());
        }
        errors
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<()> {
        state.update_progress("Analyzing requirements", 5.0, None);

        let prompt = Self::analysis_prompt(&state.wizard_data);
        let analysis = self
            .llm
            .generate_structured_content(&prompt, None, &Self::analysis_schema(), 0.3)
            .await
            .context("Requirements analysis failed")?;

        let strategy = Self::process_analysis(analysis, &state.wizard_data);
        let field = |key: &str, default: Value| strategy.get(key).cloned().unwrap_or(default);

        state.metadata.target_audience = Some(field("target_audience", json!({})));
        state.metadata.content_goals = Some(field("content_goals", json!([])));
        state.metadata.seo_keywords = Some(field("seo_keywords", json!({})));
        state.metadata.competitive_analysis = Some(field("competitive_positioning", json!({})));

        tracing::info!(
            workflow_id = %state.workflow_id,
            keywords = strategy["seo_keywords"]["primary"].as_array().map(Vec::len).unwrap_or(0),
            goals = strategy["content_goals"].as_array().map(Vec::len).unwrap_or(0),
            "Requirements analysis completed"
        );
        state.metadata.content_strategy = Some(strategy);
        state.update_progress("Requirements analysis completed", 15.0, None);
        Ok(())
    }

    fn stats(&self) -> AgentStats {
        self.llm.stats()
    }
}

fn format_services(wizard: &WizardData) -> String {
    if wizard.selected_services.is_empty() {
        return "- No services specified".to_string();
    }
    wizard
        .selected_services
        .iter()
        .enumerate()
        .map(|(i, service)| {
            let name = service
                .name
                .clone()
                .unwrap_or_else(|| format!("Service {}", i + 1));
            format!(
                "- {}: {} (Price: {})",
                name,
                service.description.as_deref().unwrap_or("No description"),
                service.price_text().unwrap_or_else(|| "Not specified".to_string())
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_features(features: &[String]) -> String {
    if features.is_empty() {
        return "- No specific features requested".to_string();
    }
    features
        .iter()
        .map(|f| format!("- {}", f))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Page and content suggestions per kind of site; unknown kinds get the business set
pub fn content_recommendations(website_type: &str) -> Value {
    match website_type {
        "portfolio" => json!({
            "essential_pages": ["home", "portfolio", "about", "contact"],
            "recommended_content": ["project_details", "testimonials", "process", "blog"],
            "content_focus": ["visual_showcase", "expertise_demonstration", "creative_process"]
        }),
        "ecommerce" => json!({
            "essential_pages": ["home", "products", "cart", "checkout", "account"],
            "recommended_content": ["product_reviews", "buying_guides", "policies", "support"],
            "content_focus": ["product_benefits", "trust_signals", "purchase_facilitation"]
        }),
        "blog" => json!({
            "essential_pages": ["home", "blog", "about", "contact"],
            "recommended_content": ["categories", "archives", "author_bio", "newsletter"],
            "content_focus": ["valuable_content", "audience_engagement", "expertise_sharing"]
        }),
        "nonprofit" => json!({
            "essential_pages": ["home", "mission", "programs", "donate", "volunteer"],
            "recommended_content": ["impact_stories", "team", "events", "reports"],
            "content_focus": ["mission_communication", "impact_demonstration", "donation_encouragement"]
        }),
        _ => json!({
            "essential_pages": ["home", "about", "services", "contact"],
            "recommended_content": ["testimonials", "case_studies", "team", "faq"],
            "content_focus": ["trust_building", "service_explanation", "credibility"]
        }),
    }
}
