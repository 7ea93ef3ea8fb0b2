use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::json::{list, text, truthy};
use super::{Agent, AgentStats, LLMAgent};
use crate::providers::catalog::TaskCategory;
use crate::providers::LLMProvider;
use crate::registry::ModelManager;
use crate::workflow::{WizardData, WorkflowState};

const SYSTEM_PROMPT: &str = "You are a website architecture specialist and UX strategist. \
Plan site structure and navigation that gives visitors a clear path through the content while supporting SEO goals. \
Consider the user journey, navigation hierarchy, SEO-friendly URLs, mobile navigation and accessibility. \
Create structures that are intuitive, scalable and conversion-focused.";

/// Page ids that already have a dedicated entry in the URL plan
const CORE_PAGES: [&str; 4] = ["home", "about", "services", "contact"];

/// Plans the site map, navigation, URLs and footer around the generated pages
pub struct StructurePlanner {
    llm: LLMAgent,
}

impl StructurePlanner {
    pub const NAME: &'static str = "StructurePlanner";

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

    fn single_page_schema() -> Value {
        json!({
            "type": "object",
            "required": ["sections", "navigation", "user_experience"],
            "properties": {
                "sections": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "title": { "type": "string" },
                            "anchor": { "type": "string" },
                            "order": { "type": "number" }
                        }
                    }
                },
                "navigation": { "type": "object" },
                "user_experience": { "type": "object" }
            }
        })
    }

    fn multi_page_schema() -> Value {
        json!({
            "type": "object",
            "required": ["pages", "navigation_structure", "user_flow"],
            "properties": {
                "pages": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "title": { "type": "string" },
                            "url": { "type": "string" },
                            "parent": { "type": "string" },
                            "order": { "type": "number" }
                        }
                    }
                },
                "navigation_structure": { "type": "object" },
                "user_flow": { "type": "object" }
            }
        })
    }

    fn navigation_schema() -> Value {
        json!({
            "type": "object",
            "required": ["main_menu", "mobile_navigation", "footer_navigation"],
            "properties": {
                "main_menu": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "label": { "type": "string" },
                            "url": { "type": "string" },
                            "dropdown": { "type": "array" }
                        }
                    }
                },
                "mobile_navigation": { "type": "object" },
                "footer_navigation": { "type": "object" },
                "breadcrumbs": { "type": "object" }
            }
        })
    }

    pub fn single_page_prompt(wizard: &WizardData, content: &Map<String, Value>) -> String {
        let sections = wizard
            .website_structure
            .as_ref()
            .map(|s| list(&s.selected_sections))
            .unwrap_or_else(|| "[]".to_string());
        format!(
            "Plan a single-page website structure with the best section order and content flow.\n\n\
            WEBSITE CONTEXT:\n\
            - Website Type: {kind}\n\
            - Business: {name}\n\
            - Services: {services}\n\
            - Selected Sections: {sections}\n\n\
            CONTENT AVAILABLE:\n\
            - Homepage Content: {homepage}\n\
            - About Content: {about}\n\
            - Services Content: {has_services}\n\
            - Contact Content: {contact}\n\n\
            Give every section an id, title, anchor and display order, describe the scrolling \
            navigation and explain where calls to action belong.",
            kind = wizard.website_category().unwrap_or("business"),
            name = wizard.business_name(),
            services = list(&wizard.service_names(0)),
            sections = sections,
            homepage = truthy(content.get("homepage")),
            about = truthy(content.get("about")),
            has_services = truthy(content.get("services")),
            contact = truthy(content.get("contact")),
        )
    }

    pub fn multi_page_prompt(wizard: &WizardData, content: &Map<String, Value>) -> String {
        let additional: Vec<&str> = content
            .keys()
            .map(String::as_str)
            .filter(|k| !["homepage", "about", "services", "contact", "blog_posts"].contains(k))
            .collect();
        format!(
            "Plan a multi-page website structure with a clear page hierarchy.\n\n\
            WEBSITE CONTEXT:\n\
            - Website Type: {kind}\n\
            - Business: {name}\n\
            - Services: {services}\n\
            - Selected Pages: {pages}\n\n\
            CONTENT AVAILABLE:\n\
            - Homepage: {homepage}\n\
            - About: {about}\n\
            - Services: {has_services}\n\
            - Contact: {contact}\n\
            - Blog: {blog}\n\
            - Additional: {additional}\n\n\
            List every page with its id, title, url, parent page and display order, group the \
            pages into primary, secondary and utility navigation and describe the main user flows \
            from landing page to conversion.",
            kind = wizard.website_category().unwrap_or("business"),
            name = wizard.business_name(),
            services = list(&wizard.service_names(0)),
            pages = list(wizard.selected_pages()),
            homepage = truthy(content.get("homepage")),
            about = truthy(content.get("about")),
            has_services = truthy(content.get("services")),
            contact = truthy(content.get("contact")),
            blog = truthy(content.get("blog_posts")),
            additional = list(&additional),
        )
    }

    pub fn navigation_prompt(wizard: &WizardData, site_structure: &Value, strategy: Option<&Value>) -> String {
        let audience = strategy
            .and_then(|s| s.get("target_audience"))
            .and_then(|a| a.get("primary_persona"));
        let details = serde_json::to_string_pretty(site_structure).unwrap_or_default();
        let details: String = details.chars().take(500).collect();
        let total = site_structure
            .get("total_pages")
            .or_else(|| site_structure.get("total_sections"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        format!(
            "Create website navigation for the planned site structure.\n\n\
            BUSINESS CONTEXT:\n\
            - Business: {name}\n\
            - Industry: {industry}\n\
            - Target Audience: {audience}\n\n\
            SITE STRUCTURE:\n\
            - Type: {kind}\n\
            - Total Pages/Sections: {total}\n\
            - Structure Details: {details}...\n\n\
            Provide the main menu with labels and urls in journey order, a touch friendly mobile \
            menu, footer navigation with legal links, and breadcrumbs for deeper pages. Keep the \
            navigation keyboard and screen reader friendly.",
            name = wizard.business_name(),
            industry = wizard.business_info.industry.as_deref().unwrap_or(""),
            audience = text(audience, "name", "General Audience"),
            kind = text(Some(site_structure), "type", "multi-page"),
            total = total,
            details = details,
        )
    }

    async fn plan_site_structure(&self, wizard: &WizardData, content: &Map<String, Value>) -> Result<Value> {
        if wizard.is_single_page() {
            let mut plan = self
                .llm
                .generate_structured_content(
                    &Self::single_page_prompt(wizard, content),
                    None,
                    &Self::single_page_schema(),
                    0.4,
                )
                .await?;
            let total = plan["sections"].as_array().map(Vec::len).unwrap_or(0);
            if let Some(plan) = plan.as_object_mut() {
                plan.insert("type".to_string(), json!("single-page"));
                plan.insert("total_sections".to_string(), json!(total));
                plan.insert("scroll_navigation".to_string(), json!(true));
                plan.insert("mobile_optimized".to_string(), json!(true));
            }
            return Ok(plan);
        }

        let mut plan = self
            .llm
            .generate_structured_content(
                &Self::multi_page_prompt(wizard, content),
                None,
                &Self::multi_page_schema(),
                0.4,
            )
            .await?;
        let pages = plan["pages"].as_array().cloned().unwrap_or_default();
        if let Some(plan) = plan.as_object_mut() {
            plan.insert("type".to_string(), json!("multi-page"));
            plan.insert("total_pages".to_string(), json!(pages.len()));
            plan.insert(
                "has_subpages".to_string(),
                json!(pages.iter().any(|p| truthy(p.get("parent")))),
            );
        }
        Ok(plan)
    }

    async fn plan(&self, state: &mut WorkflowState) -> Result<()> {
        let wizard = state.wizard_data.clone();
        let content = state.generated_content.clone();
        let strategy = state.content_strategy().cloned();

        state.update_progress("Analyzing site architecture", 86.0, None);
        let site_structure = self
            .plan_site_structure(&wizard, &content)
            .await
            .context("Site structure planning failed")?;

        state.update_progress("Designing navigation", 88.0, None);
        let navigation = self
            .llm
            .generate_structured_content(
                &Self::navigation_prompt(&wizard, &site_structure, strategy.as_ref()),
                None,
                &Self::navigation_schema(),
                0.5,
            )
            .await
            .context("Navigation design failed")?;

        state.update_progress("Planning URL structure", 90.0, None);
        let url_structure = url_structure(&wizard, &site_structure);

        state.update_progress("Creating page hierarchy", 92.0, None);
        let page_hierarchy = page_hierarchy(&site_structure, &content);

        state.update_progress("Planning footer structure", 94.0, None);
        let footer = footer_structure(&wizard, &navigation);
        let responsive = responsive_navigation(&navigation);

        tracing::info!(
            workflow_id = %state.workflow_id,
            structure_type = text(Some(&site_structure), "type", "unknown"),
            navigation_items = navigation["main_menu"].as_array().map(Vec::len).unwrap_or(0),
            "Structure planning completed"
        );

        state.metadata.site_structure = Some(site_structure);
        state.metadata.navigation = Some(navigation);
        state.metadata.url_structure = Some(url_structure);
        state.metadata.page_hierarchy = Some(page_hierarchy);
        state.metadata.footer_structure = Some(footer);
        state.metadata.responsive_navigation = Some(responsive);
        Ok(())
    }
}

#[async_trait]
impl Agent for StructurePlanner {
    fn name(&self) -> &str {
        self.llm.name()
    }

    fn model(&self) -> &str {
        self.llm.model()
    }

    fn validate_inputs(&self, state: &WorkflowState) -> Vec<String> {
        let mut errors = Vec::new();
        if state.wizard_data.website_structure.is_none() {
            errors.push("Website structure information is required".to_string());
        }
        if state.generated_content.is_empty() {
            errors.push("Generated content is required for structure planning".to_string());
        }
        errors
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<()> {
        state.update_progress("Planning website structure", 85.0, None);
        self.plan(state).await.context("Structure planning failed")?;
        state.update_progress("Website structure planning completed", 95.0, None);
        Ok(())
    }

    fn stats(&self) -> AgentStats {
        self.llm.stats()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

pub fn url_structure(wizard: &WizardData, site_structure: &Value) -> Value {
    let name = wizard.business_name();
    let mut urls = Map::new();

    urls.insert(
        "homepage".to_string(),
        json!({ "path": "/", "seo_title": format!("{} - Home", name), "priority": 1.0 }),
    );
    for page in ["about", "services", "contact"] {
        urls.insert(
            page.to_string(),
            json!({
                "path": format!("/{}/", page),
                "seo_title": format!("{} - {}", capitalize(page), name),
                "priority": if page == "services" { 0.8 } else { 0.6 },
            }),
        );
    }

    if !wizard.selected_services.is_empty() {
        let service_pages: Vec<Value> = wizard
            .selected_services
            .iter()
            .map(|service| {
                json!({
                    "service_name": service.name(),
                    "path": format!("/services/{}/", service.slug()),
                    "parent": "/services/",
                    "seo_title": format!("{} - {}", service.name(), name),
                    "priority": 0.7,
                })
            })
            .collect();
        urls.insert("service_pages".to_string(), Value::Array(service_pages));
    }

    if site_structure.get("type").and_then(Value::as_str) == Some("multi-page") {
        for page in site_structure["pages"].as_array().into_iter().flatten() {
            let id = text(Some(page), "id", "");
            if id.is_empty() || CORE_PAGES.contains(&id) || id.starts_with("service-") {
                continue;
            }
            let title = page
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| capitalize(id));
            urls.insert(
                id.to_string(),
                json!({
                    "path": format!("/{}/", id),
                    "seo_title": format!("{} - {}", title, name),
                    "priority": 0.5,
                }),
            );
        }
    }

    json!({
        "structure": urls,
        "patterns": {
            "services": "/services/{service-slug}/",
            "blog": "/blog/{post-slug}/",
            "categories": "/category/{category-slug}/"
        },
        "seo_guidelines": {
            "use_hyphens": true,
            "lowercase_only": true,
            "descriptive_slugs": true,
            "avoid_deep_nesting": true,
            "max_url_length": 100
        }
    })
}

/// Content key for a page or section id
fn content_key(id: &str) -> String {
    let key = id.replace('-', "_");
    if key == "home" {
        "homepage".to_string()
    } else {
        key
    }
}

pub fn page_hierarchy(site_structure: &Value, content: &Map<String, Value>) -> Value {
    let mut levels = Map::new();
    let mut relationships = Map::new();
    let mut mapping = Map::new();

    if site_structure.get("type").and_then(Value::as_str) == Some("single-page") {
        let sections = site_structure["sections"].as_array().cloned().unwrap_or_default();
        let ids: Vec<Value> = sections.iter().map(|s| s.get("id").cloned().unwrap_or(Value::Null)).collect();
        levels.insert(
            "0".to_string(),
            json!([{ "id": "homepage", "title": "Home", "type": "page", "sections": ids }]),
        );
        for section in &sections {
            let id = text(Some(section), "id", "");
            mapping.insert(
                id.to_string(),
                json!({
                    "content_source": content.get(&id.replace('-', "_")),
                    "anchor": section.get("anchor"),
                    "order": section.get("order"),
                }),
            );
        }
    } else {
        for page in site_structure["pages"].as_array().into_iter().flatten() {
            let id = text(Some(page), "id", "");
            let parent = page.get("parent").and_then(Value::as_str).filter(|p| !p.is_empty());
            let level = if parent.is_some() { "1" } else { "0" };

            if let Value::Array(entries) = levels.entry(level).or_insert_with(|| json!([])) {
                entries.push(page.clone());
            }
            mapping.insert(
                id.to_string(),
                json!({
                    "content_source": content.get(&content_key(id)),
                    "url": page.get("url"),
                    "title": page.get("title"),
                }),
            );
            if let Some(parent) = parent {
                if let Value::Array(children) = relationships.entry(parent).or_insert_with(|| json!([])) {
                    children.push(json!(id));
                }
            }
        }
    }

    json!({ "levels": levels, "relationships": relationships, "content_mapping": mapping })
}

pub fn footer_structure(wizard: &WizardData, navigation: &Value) -> Value {
    let business = &wizard.business_info;
    let company = business.name.as_deref().unwrap_or("Company");
    let description: String = business.description.as_deref().unwrap_or("").chars().take(150).collect();

    let mut columns = vec![json!({
        "title": company,
        "type": "company_info",
        "content": { "logo": true, "description": description, "social_links": true },
    })];

    if let Some(menu) = navigation["main_menu"].as_array().filter(|m| !m.is_empty()) {
        let links: Vec<Value> = menu
            .iter()
            .take(5)
            .map(|item| json!({ "title": item.get("label"), "url": item.get("url") }))
            .collect();
        columns.push(json!({ "title": "Quick Links", "type": "navigation", "content": { "links": links } }));
    }

    if !wizard.selected_services.is_empty() {
        let links: Vec<Value> = wizard
            .selected_services
            .iter()
            .take(5)
            .map(|s| json!({ "title": s.name(), "url": format!("/services/{}/", s.slug()) }))
            .collect();
        columns.push(json!({ "title": "Services", "type": "services", "content": { "links": links } }));
    }

    let location = &wizard.location_info;
    if !wizard.contact_info.is_empty() || !location.is_empty() {
        let address = format!(
            "{}, {}",
            location.city.as_deref().unwrap_or(""),
            location.state.as_deref().unwrap_or("")
        );
        columns.push(json!({
            "title": "Contact",
            "type": "contact_info",
            "content": {
                "phone": wizard.contact_info.phone.as_deref().unwrap_or(""),
                "email": wizard.contact_info.email.as_deref().unwrap_or(""),
                "address": address.trim_matches(|c: char| c == ',' || c == ' '),
            },
        }));
    }

    json!({
        "layout": "multi-column",
        "columns": columns,
        "bottom": {
            "copyright": format!("© {} {}. All rights reserved.", Utc::now().year(), company),
            "legal_links": [
                { "title": "Privacy Policy", "url": "/privacy/" },
                { "title": "Terms of Service", "url": "/terms/" }
            ],
            "back_to_top": true
        }
    })
}

pub fn responsive_navigation(navigation: &Value) -> Value {
    let items = navigation["main_menu"].as_array().map(Vec::len).unwrap_or(0);
    json!({
        "mobile": {
            "type": "hamburger",
            "breakpoint": "768px",
            "menu_style": "slide_in",
            "close_on_link_click": true,
            "search_in_menu": true
        },
        "tablet": {
            "type": "horizontal",
            "breakpoint": "1024px",
            "dropdown_behavior": "hover_click",
            "search_visible": true
        },
        "desktop": {
            "type": "horizontal",
            "dropdown_behavior": "hover",
            "mega_menu": items > 6,
            "search_prominent": true
        },
        "accessibility": {
            "keyboard_navigation": true,
            "skip_links": true,
            "aria_labels": true,
            "focus_indicators": true
        }
    })
}
