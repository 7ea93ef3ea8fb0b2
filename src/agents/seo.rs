use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::json::{inline, list, text, truthy};
use super::{Agent, AgentStats, LLMAgent};
use crate::providers::catalog::TaskCategory;
use crate::providers::LLMProvider;
use crate::registry::ModelManager;
use crate::workflow::{WizardData, WorkflowState};

const WEBSITE_URL: &str = "{{WEBSITE_URL}}";
const CURRENT_DATE: &str = "{{CURRENT_DATE}}";

/// Optional pages that get a sitemap entry: (page, changefreq, priority)
const SITEMAP_PAGES: &[(&str, &str, &str)] = &[
    ("blog", "monthly", "0.8"),
    ("faq", "yearly", "0.5"),
    ("testimonials", "yearly", "0.6"),
    ("privacy", "yearly", "0.3"),
    ("terms", "yearly", "0.3"),
];

/// Adds search metadata, JSON-LD and a sitemap to the generated pages
pub struct SeoOptimizer {
    llm: LLMAgent,
}

impl SeoOptimizer {
    pub const NAME: &'static str = "SEOOptimizer";

    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            llm: LLMAgent::new(Self::NAME, provider, TaskCategory::SeoOptimization).with_model("mistral:7b"),
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

    fn page_schema() -> Value {
        json!({
            "type": "object",
            "required": ["title", "meta_description", "headers", "keywords", "open_graph"],
            "properties": {
                "title": { "type": "string" },
                "meta_description": { "type": "string" },
                "headers": { "type": "object" },
                "keywords": { "type": "array" },
                "open_graph": { "type": "object" },
                "twitter_card": { "type": "object" },
                "internal_links": { "type": "array" }
            }
        })
    }

    fn service_schema() -> Value {
        json!({
            "type": "object",
            "required": ["title", "meta_description", "headers", "schema_markup"],
            "properties": {
                "title": { "type": "string" },
                "meta_description": { "type": "string" },
                "headers": { "type": "object" },
                "schema_markup": { "type": "object" },
                "faq_schema": { "type": "array" }
            }
        })
    }

    /// Prompt for a regular page; `highlights` are a few lines lifted from its content
    pub fn page_prompt(wizard: &WizardData, strategy: Option<&Value>, page: &str, highlights: &str) -> String {
        let keywords = strategy.and_then(|s| s.get("seo_keywords"));
        let messaging = strategy.and_then(|s| s.get("messaging_strategy"));
        let location = &wizard.location_info;
        format!(
            "Create comprehensive SEO optimization for the {page} page of this website.\n\n\
            BUSINESS CONTEXT:\n\
            - Business Name: {name}\n\
            - Industry: {industry}\n\
            - Description: {description}\n\
            - Location: {city}, {state}\n\
            - Services: {services}\n\n\
            SEO STRATEGY:\n\
            - Primary Keywords: {primary}\n\
            - Secondary Keywords: {secondary}\n\
            - Local Keywords: {local}\n\
            - Value Proposition: {value}\n\n\
            PAGE CONTENT:\n{highlights}\n\n\
            Provide a title tag of 50-60 characters with the primary keyword and business name, a \
            meta description of 150-160 characters ending in a call to action, an H1 and H2 header \
            outline, the keywords to target on the page, and Open Graph data for social sharing.",
            page = page,
            name = wizard.business_name(),
            industry = wizard.business_info.industry.as_deref().unwrap_or(""),
            description = wizard.business_info.description.as_deref().unwrap_or(""),
            city = location.city.as_deref().unwrap_or(""),
            state = location.state.as_deref().unwrap_or(""),
            services = list(&wizard.service_names(5)),
            primary = inline(keywords.and_then(|k| k.get("primary"))),
            secondary = inline(keywords.and_then(|k| k.get("secondary"))),
            local = inline(keywords.and_then(|k| k.get("local"))),
            value = text(messaging, "value_proposition", ""),
            highlights = highlights,
        )
    }

    pub fn service_prompt(wizard: &WizardData, strategy: Option<&Value>, service: &Value) -> String {
        let keywords = strategy.and_then(|s| s.get("seo_keywords"));
        let location = &wizard.location_info;
        format!(
            "Create SEO optimization for a service page.\n\n\
            SERVICE INFORMATION:\n\
            - Service Name: {service}\n\
            - Business: {name}\n\
            - Location: {city}, {state}\n\
            - Industry: {industry}\n\
            - Overview: {overview}\n\n\
            SEO KEYWORDS:\n\
            - Primary Keywords: {primary}\n\
            - Secondary Keywords: {secondary}\n\
            - Local Keywords: {local}\n\n\
            Provide a title tag with the service name and location, a service specific meta \
            description with a call to action, a header structure with the service keyword in the H1, \
            and Service schema markup.",
            service = text(Some(service), "service_name", "Service"),
            name = wizard.business_name(),
            city = location.city.as_deref().unwrap_or(""),
            state = location.state.as_deref().unwrap_or(""),
            industry = wizard.business_info.industry.as_deref().unwrap_or(""),
            overview = text(Some(service), "overview", ""),
            primary = inline(keywords.and_then(|k| k.get("primary"))),
            secondary = inline(keywords.and_then(|k| k.get("secondary"))),
            local = inline(keywords.and_then(|k| k.get("local"))),
        )
    }

    async fn optimize_page(&self, wizard: &WizardData, strategy: Option<&Value>, page: &str, content: &Value) -> Result<Value> {
        let prompt = Self::page_prompt(wizard, strategy, page, &page_highlights(page, content));
        self.llm
            .generate_structured_content(&prompt, None, &Self::page_schema(), 0.4)
            .await
            .with_context(|| format!("SEO for the {} page failed", page))
    }

    async fn optimize_services(&self, wizard: &WizardData, strategy: Option<&Value>, services: &[Value]) -> Result<Value> {
        let mut optimized = Vec::with_capacity(services.len());
        for service in services {
            let prompt = Self::service_prompt(wizard, strategy, service);
            let mut seo = self
                .llm
                .generate_structured_content(&prompt, None, &Self::service_schema(), 0.4)
                .await
                .context("Service page SEO failed")?;
            if let Some(seo) = seo.as_object_mut() {
                seo.insert("service_name".to_string(), json!(text(Some(service), "service_name", "Service")));
                seo.insert("service_id".to_string(), json!(text(Some(service), "service_id", "")));
            }
            optimized.push(seo);
        }
        Ok(Value::Array(optimized))
    }

    async fn optimize_all(&self, state: &mut WorkflowState) -> Result<()> {
        let wizard = state.wizard_data.clone();
        let content = state.generated_content.clone();
        let strategy = state.content_strategy().cloned();
        let strategy = strategy.as_ref();

        let mut seo = Map::new();
        for (key, seo_key, step, progress) in [
            ("homepage", "homepage", "Optimizing homepage SEO", 67.0),
            ("about", "about", "Optimizing about page SEO", 69.0),
            ("services", "services", "Optimizing services SEO", 71.0),
            ("contact", "contact", "Optimizing contact page SEO", 73.0),
            ("blog_posts", "blog", "Optimizing blog SEO", 75.0),
        ] {
            let page = content.get(key);
            if !truthy(page) {
                continue;
            }
            state.update_progress(step, progress, None);
            let optimized = match page {
                Some(Value::Array(services)) => self.optimize_services(&wizard, strategy, services).await?,
                Some(page) => self.optimize_page(&wizard, strategy, seo_key, page).await?,
                None => continue,
            };
            seo.insert(seo_key.to_string(), optimized);
        }

        state.update_progress("Generating structured data", 77.0, None);
        let structured_data = structured_data(&wizard);

        state.update_progress("Planning sitemap", 79.0, None);
        let sitemap = sitemap_structure(&wizard);

        state.update_progress("Creating SEO recommendations", 80.0, None);
        let recommendations = seo_recommendations(&wizard, &content);

        tracing::info!(
            workflow_id = %state.workflow_id,
            pages_optimized = seo.len(),
            recommendations = recommendations.len(),
            "SEO optimization completed"
        );

        state.metadata.seo_optimization = seo;
        state.metadata.structured_data = Some(structured_data);
        state.metadata.sitemap_structure = Some(sitemap);
        state.metadata.seo_recommendations = recommendations;
        Ok(())
    }
}

#[async_trait]
impl Agent for SeoOptimizer {
    fn name(&self) -> &str {
        self.llm.name()
    }

    fn model(&self) -> &str {
        self.llm.model()
    }

    fn validate_inputs(&self, state: &WorkflowState) -> Vec<String> {
        let mut errors = Vec::new();
        if state.generated_content.is_empty() {
            errors.push("Generated content is required for SEO optimization".to_string());
        }
        if !truthy(state.content_strategy().and_then(|s| s.get("seo_keywords"))) {
            errors.push("SEO keywords from content strategy are required".to_string());
        }
        errors
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<()> {
        state.update_progress("Optimizing content for SEO", 65.0, None);
        self.optimize_all(state).await.context("SEO optimization failed")?;
        state.update_progress("SEO optimization completed", 82.0, None);
        Ok(())
    }

    fn stats(&self) -> AgentStats {
        self.llm.stats()
    }
}

/// A few content lines that tell the model what the page is about
fn page_highlights(page: &str, content: &Value) -> String {
    match page {
        "homepage" => format!(
            "- Hero Headline: {}\n- Hero Description: {}",
            text(content.get("hero"), "headline", ""),
            text(content.get("hero"), "subheadline", "")
        ),
        "about" => format!("- Story: {}", text(Some(content), "company_story", "")),
        "contact" => format!("- Headline: {}", text(content.get("header"), "headline", "")),
        _ => {
            let titles: Vec<&str> = content
                .get("sample_posts")
                .and_then(Value::as_array)
                .map(|posts| posts.iter().filter_map(|p| p.get("title").and_then(Value::as_str)).collect())
                .unwrap_or_default();
            format!("- Post Titles: {}", list(&titles))
        }
    }
}

/// JSON-LD blocks built straight from the wizard answers
pub fn structured_data(wizard: &WizardData) -> Value {
    let name = wizard.business_name();
    let description = wizard.business_info.description.as_deref().unwrap_or("");
    let location = &wizard.location_info;
    let contact = &wizard.contact_info;

    let mut organization = json!({
        "@context": "https://schema.org",
        "@type": "Organization",
        "name": name,
        "description": description,
        "url": WEBSITE_URL,
        "logo": format!("{}/images/logo.png", WEBSITE_URL),
        "image": format!("{}/images/hero-image.jpg", WEBSITE_URL),
    });
    if !contact.is_empty() {
        organization["telephone"] = json!(contact.phone.as_deref().unwrap_or(""));
        organization["email"] = json!(contact.email.as_deref().unwrap_or(""));
    }
    if !location.is_empty() {
        organization["address"] = json!({
            "@type": "PostalAddress",
            "streetAddress": location.address.as_deref().unwrap_or(""),
            "addressLocality": location.city.as_deref().unwrap_or(""),
            "addressRegion": location.state.as_deref().unwrap_or(""),
            "postalCode": location.zip_code.as_deref().unwrap_or(""),
            "addressCountry": location.country.as_deref().unwrap_or("US"),
        });
        if let (Some(latitude), Some(longitude)) = (location.latitude, location.longitude) {
            organization["geo"] = json!({
                "@type": "GeoCoordinates",
                "latitude": latitude,
                "longitude": longitude,
            });
        }
    }

    let local_business = match location.city() {
        Some(_) => json!({
            "@context": "https://schema.org",
            "@type": "LocalBusiness",
            "name": name,
            "description": description,
            "url": WEBSITE_URL,
            "telephone": contact.phone.as_deref().unwrap_or(""),
            "email": contact.email.as_deref().unwrap_or(""),
            "address": organization.get("address").cloned().unwrap_or_else(|| json!({})),
            "geo": organization.get("geo").cloned().unwrap_or_else(|| json!({})),
            "openingHours": "Mo-Fr 09:00-17:00",
            "priceRange": "$$",
        }),
        None => Value::Null,
    };

    let services: Vec<Value> = wizard
        .selected_services
        .iter()
        .map(|service| {
            let mut schema = json!({
                "@type": "Service",
                "name": service.name(),
                "description": service.description.as_deref().unwrap_or(""),
                "provider": { "@type": "Organization", "name": name },
            });
            if let Some(price) = &service.price {
                if truthy(Some(price)) {
                    schema["offers"] = json!({ "@type": "Offer", "price": price, "priceCurrency": "USD" });
                }
            }
            schema
        })
        .collect();

    let website = json!({
        "@context": "https://schema.org",
        "@type": "WebSite",
        "name": format!("{} - Official Website", name),
        "url": WEBSITE_URL,
        "description": description,
        "publisher": { "@type": "Organization", "name": name },
        "potentialAction": {
            "@type": "SearchAction",
            "target": format!("{}/search?q={{search_term_string}}", WEBSITE_URL),
            "query-input": "required name=search_term_string",
        },
    });

    let breadcrumb = json!({
        "@context": "https://schema.org",
        "@type": "BreadcrumbList",
        "itemListElement": [
            { "@type": "ListItem", "position": 1, "name": "Home", "item": WEBSITE_URL }
        ],
    });

    json!({
        "organization": organization,
        "local_business": local_business,
        "services": services,
        "website": website,
        "breadcrumb_template": breadcrumb,
    })
}

fn sitemap_url(path: &str, changefreq: &str, priority: &str) -> Value {
    json!({
        "loc": format!("{}{}", WEBSITE_URL, path),
        "changefreq": changefreq,
        "priority": priority,
        "lastmod": CURRENT_DATE,
    })
}

pub fn sitemap_structure(wizard: &WizardData) -> Value {
    let mut urls = vec![
        sitemap_url("/", "weekly", "1.0"),
        sitemap_url("/about/", "monthly", "0.8"),
    ];

    if !wizard.selected_services.is_empty() {
        urls.push(sitemap_url("/services/", "monthly", "0.9"));
        for service in &wizard.selected_services {
            urls.push(sitemap_url(&format!("/services/{}/", service.slug()), "monthly", "0.7"));
        }
    }

    urls.push(sitemap_url("/contact/", "yearly", "0.6"));

    for page in wizard.selected_pages() {
        if let Some((_, changefreq, priority)) = SITEMAP_PAGES.iter().find(|(p, _, _)| p == page) {
            urls.push(sitemap_url(&format!("/{}/", page), changefreq, priority));
        }
    }

    json!({
        "total_urls": urls.len(),
        "urls": urls,
        "generated_at": Utc::now().to_rfc3339(),
    })
}

fn recommendation(category: &str, priority: &str, title: &str, description: &str, implementation: &str) -> Value {
    json!({
        "category": category,
        "priority": priority,
        "title": title,
        "description": description,
        "implementation": implementation,
    })
}

pub fn seo_recommendations(wizard: &WizardData, content: &Map<String, Value>) -> Vec<Value> {
    let mut out = vec![
        recommendation(
            "Content",
            "High",
            "Add compelling meta descriptions",
            "Ensure all pages have unique, keyword-rich meta descriptions under 160 characters",
            "Include primary keywords naturally while maintaining readability",
        ),
        recommendation(
            "Technical",
            "High",
            "Implement structured data",
            "Add JSON-LD structured data for organization, services, and local business",
            "Use generated schema markup on relevant pages",
        ),
    ];

    if wizard.location_info.city().is_some() {
        out.push(recommendation(
            "Local SEO",
            "High",
            "Optimize for local search",
            "Include location-based keywords and create Google My Business profile",
            "Add city/state to title tags and create location-specific content",
        ));
    }

    out.push(recommendation(
        "Images",
        "Medium",
        "Optimize images for SEO",
        "Add descriptive alt text and optimize file sizes",
        "Use keywords in alt text naturally, compress images for faster loading",
    ));
    out.push(recommendation(
        "Internal Linking",
        "Medium",
        "Create strategic internal links",
        "Link between related pages using keyword-rich anchor text",
        "Link from homepage to important service pages, create topic clusters",
    ));

    if truthy(content.get("blog_posts")) {
        out.push(recommendation(
            "Content Marketing",
            "Medium",
            "Maintain content freshness",
            "Regularly publish new blog content and update existing pages",
            "Follow the generated content calendar and update service pages quarterly",
        ));
    }

    out.push(recommendation(
        "Performance",
        "High",
        "Optimize page loading speed",
        "Ensure fast loading times for better user experience and SEO",
        "Compress images, minify CSS/JS, use CDN for static assets",
    ));
    out.push(recommendation(
        "Mobile",
        "High",
        "Ensure mobile responsiveness",
        "Optimize for mobile devices and touch interactions",
        "Use responsive design, test on various devices, optimize touch targets",
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{safe_execute, ContentGenerator, RequirementsAnalyzer};
    use crate::providers::demo::DemoProvider;
    use crate::workflow::wizard::sample_wizard;

    #[test]
    fn test_structured_data_from_wizard() {
        let mut wizard = sample_wizard();
        wizard.location_info.latitude = Some(30.27);
        wizard.location_info.longitude = Some(-97.74);
        let data = structured_data(&wizard);

        let org = &data["organization"];
        assert_eq!(org["url"], "{{WEBSITE_URL}}");
        assert_eq!(org["telephone"], "555-0100");
        assert_eq!(org["address"]["addressCountry"], "US");
        assert_eq!(org["geo"]["@type"], "GeoCoordinates");
        assert_eq!(data["local_business"]["openingHours"], "Mo-Fr 09:00-17:00");
        assert_eq!(data["services"][0]["offers"]["price"], "$99");
        assert!(data["services"][1].get("offers").is_none());
        assert_eq!(data["website"]["name"], "Bright Plumbing - Official Website");
        assert_eq!(
            data["website"]["potentialAction"]["target"],
            "{{WEBSITE_URL}}/search?q={search_term_string}"
        );
    }

    #[test]
    fn test_structured_data_without_location() {
        let wizard = WizardData::default();
        let data = structured_data(&wizard);
        assert!(data["local_business"].is_null());
        assert!(data["organization"].get("address").is_none());
        assert!(data["organization"].get("telephone").is_none());
    }

    #[test]
    fn test_sitemap_urls() {
        let sitemap = sitemap_structure(&sample_wizard());
        let locs: Vec<&str> = sitemap["urls"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["loc"].as_str().unwrap())
            .collect();
        assert_eq!(
            locs,
            vec![
                "{{WEBSITE_URL}}/",
                "{{WEBSITE_URL}}/about/",
                "{{WEBSITE_URL}}/services/",
                "{{WEBSITE_URL}}/services/drain-cleaning/",
                "{{WEBSITE_URL}}/services/water-heaters/",
                "{{WEBSITE_URL}}/contact/",
                "{{WEBSITE_URL}}/blog/",
                "{{WEBSITE_URL}}/faq/",
                "{{WEBSITE_URL}}/testimonials/",
                "{{WEBSITE_URL}}/privacy/",
                "{{WEBSITE_URL}}/terms/",
            ]
        );
        assert_eq!(sitemap["total_urls"], 11);
        assert_eq!(sitemap["urls"][6]["changefreq"], "monthly");
        assert_eq!(sitemap["urls"][9]["priority"], "0.3");
        assert_eq!(sitemap["urls"][0]["lastmod"], "{{CURRENT_DATE}}");
    }

    #[test]
    fn test_recommendations_follow_site() {
        let wizard = sample_wizard();
        let without_blog = seo_recommendations(&wizard, &Map::new());
        assert_eq!(without_blog.len(), 7);
        assert_eq!(without_blog[2]["category"], "Local SEO");

        let mut content = Map::new();
        content.insert("blog_posts".to_string(), json!({ "sample_posts": [1] }));
        let with_blog = seo_recommendations(&WizardData::default(), &content);
        let categories: Vec<&str> = with_blog.iter().map(|r| r["category"].as_str().unwrap()).collect();
        assert_eq!(
            categories,
            vec!["Content", "Technical", "Images", "Internal Linking", "Content Marketing", "Performance", "Mobile"]
        );
    }

    #[test]
    fn test_validation_messages() {
        let optimizer = SeoOptimizer::new(Arc::new(DemoProvider::new()));
        let state = WorkflowState::new("p", "u", WizardData::default());
        assert_eq!(
            optimizer.validate_inputs(&state),
            vec![
                "Generated content is required for SEO optimization",
                "SEO keywords from content strategy are required"
            ]
        );
    }

    #[tokio::test]
    async fn test_optimizes_generated_site() {
        let provider: Arc<dyn LLMProvider> = Arc::new(DemoProvider::new());
        let mut state = WorkflowState::new("p", "u", sample_wizard());
        assert!(safe_execute(&RequirementsAnalyzer::new(provider.clone()), &mut state).await);
        assert!(safe_execute(&ContentGenerator::new(provider.clone()), &mut state).await);

        let optimizer = SeoOptimizer::new(provider);
        assert!(safe_execute(&optimizer, &mut state).await);
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.progress, 82.0);

        let seo = &state.metadata.seo_optimization;
        let pages: Vec<&str> = seo.keys().map(String::as_str).collect();
        assert_eq!(pages, vec!["about", "blog", "contact", "homepage", "services"]);
        assert!(seo["homepage"]["open_graph"].is_object());
        assert_eq!(seo["services"][0]["service_name"], "Drain Cleaning");
        assert!(seo["services"][0]["schema_markup"].is_object());
        assert_eq!(state.metadata.sitemap_structure.as_ref().unwrap()["total_urls"], 11);
        assert_eq!(state.metadata.seo_recommendations.len(), 8);
    }
}
