use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::json::{inline, list, text, truthy};
use super::{Agent, AgentStats, LLMAgent};
use crate::providers::catalog::TaskCategory;
use crate::providers::LLMProvider;
use crate::registry::ModelManager;
use crate::workflow::{WizardData, WorkflowState};

/// Writes the copy for every page the wizard asked for
pub struct ContentGenerator {
    llm: LLMAgent,
}

/// What every page prompt needs to know about the business and its audience
struct Brief<'a> {
    name: &'a str,
    industry: &'a str,
    description: &'a str,
    persona: String,
    pain_points: String,
    goals: String,
    value_proposition: String,
    key_messages: String,
    brand_voice: String,
}

impl<'a> Brief<'a> {
    fn new(wizard: &'a WizardData, strategy: Option<&Value>) -> Self {
        let audience = strategy.and_then(|s| s.get("target_audience"));
        let persona = audience.and_then(|a| a.get("primary_persona"));
        let messaging = strategy.and_then(|s| s.get("messaging_strategy"));

        let persona_name = match (persona, audience.and_then(|a| a.get("primary"))) {
            (Some(p), _) => text(Some(p), "name", "Target Customer").to_string(),
            (None, Some(Value::String(primary))) => primary.clone(),
            _ => "Target Customer".to_string(),
        };
        let from_persona_or_audience = |key: &str| {
            persona
                .and_then(|p| p.get(key))
                .or_else(|| audience.and_then(|a| a.get(key)))
        };

        Self {
            name: wizard.business_name(),
            industry: wizard.business_info.industry.as_deref().unwrap_or("General"),
            description: wizard.business_info.description.as_deref().unwrap_or(""),
            persona: persona_name,
            pain_points: inline(from_persona_or_audience("pain_points")),
            goals: inline(from_persona_or_audience("goals")),
            value_proposition: text(messaging, "value_proposition", "").to_string(),
            key_messages: inline(messaging.and_then(|m| m.get("key_messages"))),
            brand_voice: messaging
                .and_then(|m| m.get("brand_voice").or_else(|| m.get("tone")))
                .and_then(Value::as_str)
                .unwrap_or("professional and friendly")
                .to_string(),
        }
    }

    fn business(&self) -> String {
        format!(
            "Business: {}\nIndustry: {}\nDescription: {}",
            self.name, self.industry, self.description
        )
    }

    fn audience(&self) -> String {
        format!(
            "TARGET AUDIENCE:\n- Primary: {}\n- Pain Points: {}\n- Goals: {}",
            self.persona, self.pain_points, self.goals
        )
    }
}

/// Object schema where every listed property is required
fn page_schema(properties: &[(&str, &str)]) -> Value {
    let props: serde_json::Map<String, Value> = properties
        .iter()
        .map(|(key, kind)| (key.to_string(), json!({ "type": kind })))
        .collect();
    let required: Vec<&str> = properties.iter().map(|(key, _)| *key).collect();
    json!({ "type": "object", "required": required, "properties": props })
}

impl ContentGenerator {
    pub const NAME: &'static str = "ContentGenerator";

    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            llm: LLMAgent::new(Self::NAME, provider, TaskCategory::ContentGeneration).with_model("llama3.1:8b"),
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

    pub fn homepage_prompt(wizard: &WizardData, strategy: Option<&Value>) -> String {
        let brief = Brief::new(wizard, strategy);
        format!(
            "Create compelling homepage content for {name}.\n\n\
            BUSINESS CONTEXT:\n{business}\n\
            Primary Goal: {goal}\n\
            Services: {services}\n\n\
            {audience}\n\n\
            MESSAGING:\n\
            - Value Proposition: {value}\n\
            - Key Messages: {messages}\n\
            - Brand Voice: {voice}\n\n\
            Write a hero section with headline, subheadline and call to action, a clear value \
            proposition, a services overview, reasons to choose the business, a short about preview \
            and a closing contact call to action.",
            name = brief.name,
            business = brief.business(),
            goal = wizard.website_purpose.primary.as_deref().unwrap_or("Generate leads"),
            services = list(&wizard.service_names(5)),
            audience = brief.audience(),
            value = brief.value_proposition,
            messages = brief.key_messages,
            voice = brief.brand_voice,
        )
    }

    pub fn about_prompt(wizard: &WizardData, strategy: Option<&Value>) -> String {
        let brief = Brief::new(wizard, strategy);
        let branding = &wizard.branding;
        format!(
            "Create an engaging About page for {name}.\n\n\
            BUSINESS CONTEXT:\n{business}\n\
            Founded: {founded}\n\
            Mission: {mission}\n\
            Vision: {vision}\n\
            Values: {values}\n\n\
            {audience}\n\n\
            Tell the company story in a {voice} voice, describe the mission and values, introduce \
            the team, list what sets the business apart and end with a call to action.",
            name = brief.name,
            business = brief.business(),
            founded = wizard.business_info.founded.as_deref().unwrap_or("Not specified"),
            mission = branding.mission.as_deref().unwrap_or("Not specified"),
            vision = branding.vision.as_deref().unwrap_or("Not specified"),
            values = list(&branding.values),
            audience = brief.audience(),
            voice = brief.brand_voice,
        )
    }

    pub fn service_prompt(wizard: &WizardData, strategy: Option<&Value>, index: usize) -> String {
        let brief = Brief::new(wizard, strategy);
        let service = &wizard.selected_services[index];
        format!(
            "Create a detailed service page for {service} offered by {name}.\n\n\
            SERVICE DETAILS:\n\
            - Name: {service}\n\
            - Description: {description}\n\
            - Price: {price}\n\
            - Duration: {duration}\n\n\
            BUSINESS CONTEXT:\n{business}\n\n\
            {audience}\n\n\
            Explain what the service includes, pair each feature with its benefit, walk through the \
            process step by step, describe pricing and close with a call to action.",
            service = service.name(),
            name = brief.name,
            description = service.description.as_deref().unwrap_or("No description"),
            price = service.price_text().unwrap_or_else(|| "Contact for pricing".to_string()),
            duration = service.duration.as_deref().unwrap_or("Varies"),
            business = brief.business(),
            audience = brief.audience(),
        )
    }

    pub fn contact_prompt(wizard: &WizardData, strategy: Option<&Value>) -> String {
        let brief = Brief::new(wizard, strategy);
        let location = &wizard.location_info;
        let contact = &wizard.contact_info;
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        format!(
            "Create a welcoming contact page for {name}.\n\n\
            CONTACT DETAILS:\n\
            - Address: {address}\n\
            - City: {city}\n\
            - State: {state}\n\
            - Zip: {zip}\n\
            - Phone: {phone}\n\
            - Email: {email}\n\n\
            Brand Voice: {voice}\n\n\
            Write an inviting header, describe each way to get in touch, list business hours and \
            give helpful directions for visitors.",
            name = brief.name,
            address = field(&location.address),
            city = field(&location.city),
            state = field(&location.state),
            zip = field(&location.zip_code),
            phone = field(&contact.phone),
            email = field(&contact.email),
            voice = brief.brand_voice,
        )
    }

    pub fn blog_prompt(wizard: &WizardData, strategy: Option<&Value>) -> String {
        let brief = Brief::new(wizard, strategy);
        let keywords = strategy
            .and_then(|s| s.get("seo_keywords"))
            .and_then(|k| k.get("primary"));
        format!(
            "Plan blog content for {name}.\n\n\
            BUSINESS CONTEXT:\n{business}\n\n\
            {audience}\n\n\
            Primary Keywords: {keywords}\n\n\
            Outline a posting strategy with themes and frequency, then draft sample posts with a \
            title, excerpt and category each.",
            name = brief.name,
            business = brief.business(),
            audience = brief.audience(),
            keywords = inline(keywords),
        )
    }

    pub fn faq_prompt(wizard: &WizardData, strategy: Option<&Value>) -> String {
        let brief = Brief::new(wizard, strategy);
        format!(
            "Write frequently asked questions for {name}.\n\n\
            BUSINESS CONTEXT:\n{business}\n\
            Services: {services}\n\n\
            {audience}\n\n\
            Group the questions into categories and answer each one clearly and briefly.",
            name = brief.name,
            business = brief.business(),
            services = list(&wizard.service_names(0)),
            audience = brief.audience(),
        )
    }

    pub fn testimonials_prompt(wizard: &WizardData, strategy: Option<&Value>) -> String {
        let brief = Brief::new(wizard, strategy);
        format!(
            "Create a testimonials section for {name}.\n\n\
            BUSINESS CONTEXT:\n{business}\n\
            Services: {services}\n\n\
            Write a headline and realistic placeholder testimonials with a quote, author and rating. \
            Mark them clearly as examples to be replaced with real customer feedback.",
            name = brief.name,
            business = brief.business(),
            services = list(&wizard.service_names(0)),
        )
    }

    pub fn legal_prompt(wizard: &WizardData, document: LegalDocument) -> String {
        let location = &wizard.location_info;
        let jurisdiction = [location.state.as_deref(), location.country.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        let (opening, topics) = match document {
            LegalDocument::Privacy => (
                "Create a privacy policy",
                "what information is collected, how it is used, cookies, third parties, data retention and user rights",
            ),
            LegalDocument::Terms => (
                "Create terms of service",
                "use of the website, services and payments, intellectual property, liability and governing law",
            ),
        };
        format!(
            "{opening} for {name}.\n\n\
            Website: {name} official website\n\
            Contact Email: {email}\n\
            Jurisdiction: {jurisdiction}\n\n\
            Cover {topics}. Use plain language and split the document into titled sections.",
            opening = opening,
            name = wizard.business_name(),
            email = wizard.contact_info.email.as_deref().unwrap_or("Not specified"),
            jurisdiction = if jurisdiction.is_empty() { "Not specified" } else { jurisdiction.as_str() },
            topics = topics,
        )
    }

    async fn generate_page(&self, prompt: &str, schema: Value, temperature: f32) -> Result<Value> {
        self.llm
            .generate_structured_content(prompt, None, &schema, temperature)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegalDocument {
    Privacy,
    Terms,
}

#[async_trait]
impl Agent for ContentGenerator {
    fn name(&self) -> &str {
        self.llm.name()
    }

    fn model(&self) -> &str {
        self.llm.model()
    }

    fn validate_inputs(&self, state: &WorkflowState) -> Vec<String> {
        let mut errors = Vec::new();
        if state.wizard_data.business_name().is_empty() {
            errors.push("Business name is required for content generation".to_string());
        }
        if !truthy(state.content_strategy()) {
            errors.push("Content strategy is required for content generation".to_string());
        }
        errors
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<()> {
        state.update_progress("Starting content generation", 25.0, None);
        self.generate_all(state).await.context("Content generation failed")?;

        tracing::info!(
            workflow_id = %state.workflow_id,
            sections = state.generated_content.len(),
            "Content generation completed"
        );
        state.update_progress("Content generation completed", 60.0, None);
        Ok(())
    }

    fn stats(&self) -> AgentStats {
        self.llm.stats()
    }
}

impl ContentGenerator {
    async fn generate_all(&self, state: &mut WorkflowState) -> Result<()> {
        let wizard = state.wizard_data.clone();
        let strategy = state.content_strategy().cloned();
        let strategy = strategy.as_ref();

        state.update_progress("Generating homepage content", 30.0, None);
        let homepage = self
            .generate_page(
                &Self::homepage_prompt(&wizard, strategy),
                page_schema(&[
                    ("hero", "object"),
                    ("value_proposition", "string"),
                    ("services_overview", "object"),
                    ("why_choose_us", "object"),
                    ("about_preview", "object"),
                    ("contact_cta", "object"),
                ]),
                0.8,
            )
            .await?;
        state.generated_content.insert("homepage".to_string(), homepage);

        state.update_progress("Generating about page content", 40.0, None);
        let about = self
            .generate_page(
                &Self::about_prompt(&wizard, strategy),
                page_schema(&[
                    ("company_story", "string"),
                    ("mission_values", "object"),
                    ("team", "object"),
                    ("differentiators", "array"),
                    ("cta", "object"),
                ]),
                0.7,
            )
            .await?;
        state.generated_content.insert("about".to_string(), about);

        if !wizard.selected_services.is_empty() {
            state.update_progress("Generating service pages", 45.0, None);
            let mut services = Vec::with_capacity(wizard.selected_services.len());
            for (index, service) in wizard.selected_services.iter().enumerate() {
                let mut page = self
                    .generate_page(
                        &Self::service_prompt(&wizard, strategy, index),
                        page_schema(&[
                            ("overview", "string"),
                            ("features_benefits", "array"),
                            ("process", "array"),
                            ("pricing", "object"),
                            ("why_choose", "string"),
                            ("cta", "object"),
                        ]),
                        0.7,
                    )
                    .await
                    .with_context(|| format!("Service page '{}' failed", service.name()))?;
                if let Some(page) = page.as_object_mut() {
                    page.insert("service_name".to_string(), json!(service.name()));
                    page.insert("service_id".to_string(), json!(service.id_text()));
                }
                services.push(page);
            }
            state.generated_content.insert("services".to_string(), Value::Array(services));
        }

        state.update_progress("Generating contact page content", 50.0, None);
        let contact = self
            .generate_page(
                &Self::contact_prompt(&wizard, strategy),
                page_schema(&[
                    ("header", "object"),
                    ("contact_methods", "array"),
                    ("business_hours", "object"),
                    ("location_info", "object"),
                ]),
                0.6,
            )
            .await?;
        state.generated_content.insert("contact".to_string(), contact);

        if wizard.has_blog() {
            state.update_progress("Generating blog content", 55.0, None);
            let blog = self
                .generate_page(
                    &Self::blog_prompt(&wizard, strategy),
                    page_schema(&[("strategy", "object"), ("sample_posts", "array")]),
                    0.8,
                )
                .await?;
            state.generated_content.insert("blog_posts".to_string(), blog);
        }

        self.generate_additional_pages(state, &wizard, strategy).await
    }

    async fn generate_additional_pages(
        &self,
        state: &mut WorkflowState,
        wizard: &WizardData,
        strategy: Option<&Value>,
    ) -> Result<()> {
        if wizard.has_page("faq") {
            let faq = self
                .generate_page(
                    &Self::faq_prompt(wizard, strategy),
                    page_schema(&[("categories", "array"), ("faqs", "array")]),
                    0.5,
                )
                .await?;
            state.generated_content.insert("faq".to_string(), faq);
        }

        if wizard.has_page("testimonials") {
            let testimonials = self
                .generate_page(
                    &Self::testimonials_prompt(wizard, strategy),
                    page_schema(&[("headline", "string"), ("testimonials", "array")]),
                    0.7,
                )
                .await?;
            state.generated_content.insert("testimonials".to_string(), testimonials);
        }

        for (page, document) in [("privacy", LegalDocument::Privacy), ("terms", LegalDocument::Terms)] {
            if !wizard.has_page(page) {
                continue;
            }
            let legal = self
                .generate_page(
                    &Self::legal_prompt(wizard, document),
                    page_schema(&[("title", "string"), ("sections", "array")]),
                    0.3,
                )
                .await?;
            state.generated_content.insert(page.to_string(), legal);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{safe_execute, RequirementsAnalyzer};
    use crate::providers::demo::DemoProvider;
    use crate::workflow::wizard::sample_wizard;

    fn strategy() -> Value {
        json!({
            "target_audience": {
                "primary_persona": { "name": "Busy Homeowner", "pain_points": ["Leaks"], "goals": ["Fast fix"] }
            },
            "messaging_strategy": { "value_proposition": "Same-day repairs", "key_messages": ["Licensed"] }
        })
    }

    #[test]
    fn test_homepage_prompt_uses_strategy() {
        let prompt = ContentGenerator::homepage_prompt(&sample_wizard(), Some(&strategy()));
        assert!(prompt.contains("Create compelling homepage content for Bright Plumbing."));
        assert!(prompt.contains("- Primary: Busy Homeowner"));
        assert!(prompt.contains("- Pain Points: [\"Leaks\"]"));
        assert!(prompt.contains("- Value Proposition: Same-day repairs"));
        assert!(prompt.contains("- Brand Voice: professional and friendly"));
        assert!(prompt.contains("Services: [\"Drain Cleaning\",\"Water Heaters\"]"));
    }

    #[test]
    fn test_audience_falls_back_to_plain_primary() {
        let strategy = json!({ "target_audience": { "primary": "Local homeowners", "pain_points": ["Cost"] } });
        let prompt = ContentGenerator::about_prompt(&sample_wizard(), Some(&strategy));
        assert!(prompt.contains("- Primary: Local homeowners"));
        assert!(prompt.contains("- Pain Points: [\"Cost\"]"));
        assert!(prompt.contains("- Goals: []"));
    }

    #[test]
    fn test_contact_and_legal_prompts() {
        let wizard = sample_wizard();
        let contact = ContentGenerator::contact_prompt(&wizard, None);
        assert!(contact.contains("- City: Austin"));
        assert!(contact.contains("- Phone: 555-0100"));

        let privacy = ContentGenerator::legal_prompt(&wizard, LegalDocument::Privacy);
        assert!(privacy.starts_with("Create a privacy policy for Bright Plumbing."));
        assert!(privacy.contains("Jurisdiction: TX"));
        let terms = ContentGenerator::legal_prompt(&wizard, LegalDocument::Terms);
        assert!(terms.starts_with("Create terms of service"));
    }

    #[test]
    fn test_validation_messages() {
        let generator = ContentGenerator::new(Arc::new(DemoProvider::new()));
        let state = WorkflowState::new("p", "u", WizardData::default());
        assert_eq!(
            generator.validate_inputs(&state),
            vec![
                "Business name is required for content generation",
                "Content strategy is required for content generation"
            ]
        );
    }

    #[test]
    fn test_page_schema_requires_every_key() {
        let schema = page_schema(&[("title", "string"), ("sections", "array")]);
        assert_eq!(schema["required"], json!(["title", "sections"]));
        assert_eq!(schema["properties"]["sections"]["type"], "array");
    }

    #[tokio::test]
    async fn test_generates_selected_pages() {
        let provider: Arc<dyn LLMProvider> = Arc::new(DemoProvider::new());
        let mut state = WorkflowState::new("p", "u", sample_wizard());
        assert!(safe_execute(&RequirementsAnalyzer::new(provider.clone()), &mut state).await);

        let generator = ContentGenerator::new(provider);
        assert!(safe_execute(&generator, &mut state).await);
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.progress, 60.0);

        let content = &state.generated_content;
        assert!(content["homepage"]["value_proposition"].is_string());
        assert!(content["about"]["company_story"].is_string());
        assert_eq!(content["services"].as_array().map(Vec::len), Some(2));
        assert_eq!(content["services"][0]["service_name"], "Drain Cleaning");
        assert_eq!(content["services"][1]["service_id"], "s2");
        assert!(content["contact"]["contact_methods"].is_array());
        assert!(content["blog_posts"]["sample_posts"].is_array());
        assert!(content["faq"]["faqs"].is_array());
        assert_eq!(content["testimonials"]["headline"], "What Our Clients Say");
        assert_eq!(content["privacy"]["title"], "Privacy Policy");
        assert_eq!(content["terms"]["title"], "Terms of Service");
    }

    #[tokio::test]
    async fn test_skips_unselected_pages() {
        let mut wizard = sample_wizard();
        wizard.selected_services.clear();
        wizard.website_structure = None;

        let mut state = WorkflowState::new("p", "u", wizard);
        state.metadata.content_strategy = Some(strategy());

        let generator = ContentGenerator::new(Arc::new(DemoProvider::new()));
        assert!(safe_execute(&generator, &mut state).await);
        let keys: Vec<&str> = state.generated_content.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["about", "contact", "homepage"]);
    }
}
