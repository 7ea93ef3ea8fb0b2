use super::*;
use async_trait::async_trait;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

/// Offline provider that answers pipeline prompts with canned JSON.
///
/// Prompts are matched against quoted schema keys or stage phrases in order, so prompts that
/// carry earlier stage output as context still resolve to their own stage.
pub struct DemoProvider {
    responses: Vec<(&'static str, Value)>,
    models: Mutex<Vec<String>>,
    latency: Duration,
    request_count: AtomicU64,
}

impl DemoProvider {
    pub fn new() -> Self {
        Self {
            responses: canned_responses(),
            models: Mutex::new(
                catalog::ESSENTIAL_MODELS.iter().map(|m| m.to_string()).collect(),
            ),
            latency: Duration::ZERO,
            request_count: AtomicU64::new(0),
        }
    }

    /// Simulated thinking time per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn find_response(&self, prompt: &str) -> String {
        if prompt.contains("Say hello") {
            return "Hello! The demo model is up and running.".to_string();
        }

        for (needle, response) in &self.responses {
            if prompt.contains(needle) {
                let body = serde_json::to_string_pretty(response).unwrap_or_default();
                return format!("Here is the requested JSON:\n```json\n{}\n```", body);
            }
        }

        format!(
            "Demo mode only understands the website generation prompts. Your prompt was {} characters long.\n\n\
            Point LLM_PROVIDER at ollama to use real models.",
            prompt.len()
        )
    }

    fn respond(&self, model: &str, text: String) -> GenerateResponse {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let tokens = (text.len() / 4).max(1) as u64;
        GenerateResponse {
            response: text,
            model: model.to_string(),
            eval_count: tokens,
            // Pretend 100 tokens per second
            eval_duration_ns: tokens * 10_000_000,
            total_duration_ns: tokens * 12_000_000,
        }
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for DemoProvider {
    fn name(&self) -> &str {
        "demo"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.models.lock().map(|m| m.clone()).unwrap_or_default())
    }

    async fn pull_model(&self, model: &str) -> Result<bool> {
        if let Ok(mut models) = self.models.lock() {
            if !models.iter().any(|m| m == model) {
                models.push(model.to_string());
            }
        }
        Ok(true)
    }

    async fn delete_model(&self, model: &str) -> Result<bool> {
        let mut removed = false;
        if let Ok(mut models) = self.models.lock() {
            let before = models.len();
            models.retain(|m| m != model);
            removed = models.len() != before;
        }
        Ok(removed)
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let text = self.find_response(&request.prompt);
        Ok(self.respond(&request.model, text))
    }

    async fn stream_generate(&self, request: GenerateRequest) -> Result<ResponseStream> {
        let text = self.find_response(&request.prompt);
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let words: Vec<String> = text
            .split_inclusive(char::is_whitespace)
            .map(|w| w.to_string())
            .collect();

        let stream = stream::iter(words)
            .map(|word| {
                Ok(StreamChunk {
                    raw: json!({ "response": word, "done": false }),
                    response: word,
                    done: false,
                })
            })
            .chain(stream::once(async {
                Ok(StreamChunk {
                    response: String::new(),
                    done: true,
                    raw: json!({ "response": "", "done": true }),
                })
            }));

        Ok(Box::pin(stream))
    }

    async fn chat(&self, request: ChatRequest) -> Result<GenerateResponse> {
        let user_message = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, MessageRole::User))
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let text = self.find_response(user_message);
        Ok(self.respond(&request.model, text))
    }

    fn statistics(&self) -> ProviderStatistics {
        let requests = self.request_count.load(Ordering::Relaxed);
        ProviderStatistics {
            base_url: "demo://local".to_string(),
            health_status: true,
            last_health_check: Some(chrono::Utc::now()),
            available_models: self.models.lock().map(|m| m.len()).unwrap_or(0),
            request_count: requests,
            error_count: 0,
            error_rate: "0.00%".to_string(),
            uptime: "0.00s".to_string(),
        }
    }
}

fn canned_responses() -> Vec<(&'static str, Value)> {
    vec![
        ("\"footer_navigation\"", json!({
            "main_menu": [
                { "label": "Home", "url": "/" },
                { "label": "About", "url": "/about/" },
                { "label": "Services", "url": "/services/" },
                { "label": "Contact", "url": "/contact/" }
            ],
            "mobile_navigation": { "style": "hamburger", "sticky": true },
            "footer_navigation": { "columns": ["Company", "Services", "Contact"] }
        })),
        ("\"navigation_structure\"", json!({
            "pages": [
                { "id": "home", "title": "Home", "url": "/", "sections": ["hero", "services", "testimonials"] },
                { "id": "about", "title": "About Us", "url": "/about/" },
                { "id": "services", "title": "Services", "url": "/services/" },
                { "id": "contact", "title": "Contact", "url": "/contact/" },
                { "id": "gallery", "title": "Gallery", "url": "/gallery/" }
            ],
            "navigation_structure": { "primary": ["home", "about", "services", "contact"], "secondary": ["gallery"] },
            "user_flow": { "entry": "home", "conversion": "contact", "paths": [["home", "services", "contact"]] }
        })),
        ("\"user_experience\"", json!({
            "sections": [
                { "id": "hero", "title": "Welcome", "order": 1 },
                { "id": "about", "title": "About Us", "order": 2 },
                { "id": "services", "title": "What We Do", "order": 3 },
                { "id": "contact", "title": "Get In Touch", "order": 4 }
            ],
            "navigation": { "type": "anchor", "sticky_header": true },
            "user_experience": { "primary_cta": "Contact us", "scroll_behavior": "smooth" }
        })),
        ("\"schema_markup\"", json!({
            "title": "Professional Service | Expert Help Near You",
            "meta_description": "Reliable, affordable professional service delivered by an experienced local team. Request a free quote today.",
            "headers": { "h1": "Professional Service", "h2": ["What's Included", "Our Process", "Pricing"] },
            "schema_markup": { "@type": "Service", "serviceType": "Professional Service" }
        })),
        ("\"open_graph\"", json!({
            "title": "Trusted Local Experts | Quality Work Guaranteed",
            "meta_description": "Discover trusted local experts offering quality work, honest pricing and friendly service. Get in touch for a free consultation.",
            "headers": { "h1": "Trusted Local Experts", "h2": ["Our Services", "Why Choose Us", "Contact Us"] },
            "keywords": ["local experts", "quality service", "free consultation"],
            "open_graph": { "og:title": "Trusted Local Experts", "og:description": "Quality work, honest pricing.", "og:type": "website" }
        })),
        ("\"sample_posts\"", json!({
            "strategy": { "posting_frequency": "weekly", "themes": ["tips", "case studies", "news"] },
            "sample_posts": [
                { "title": "5 Questions to Ask Before Hiring a Pro", "excerpt": "Make the right choice with this checklist.", "category": "tips" },
                { "title": "Behind the Scenes of a Recent Project", "excerpt": "How we delivered on time and on budget.", "category": "case studies" }
            ]
        })),
        ("\"faqs\"", json!({
            "categories": ["General", "Pricing", "Scheduling"],
            "faqs": [
                { "question": "Do you offer free estimates?", "answer": "Yes, every project starts with a free estimate.", "category": "Pricing" },
                { "question": "How soon can you start?", "answer": "Most projects start within one week.", "category": "Scheduling" }
            ]
        })),
        ("Create a privacy policy", json!({
            "title": "Privacy Policy",
            "sections": [
                { "heading": "Information We Collect", "content": "We collect the details you provide through our contact form." },
                { "heading": "How We Use Information", "content": "We only use your information to respond to your requests." }
            ]
        })),
        ("Create terms of service", json!({
            "title": "Terms of Service",
            "sections": [
                { "heading": "Use of This Website", "content": "Content on this site is provided for general information." },
                { "heading": "Limitation of Liability", "content": "We are not liable for decisions made based on site content." }
            ]
        })),
        ("Create a testimonials section", json!({
            "headline": "What Our Clients Say",
            "testimonials": [
                { "quote": "Professional, punctual and great value.", "author": "Jamie R.", "rating": 5 },
                { "quote": "They exceeded our expectations.", "author": "Morgan T.", "rating": 5 }
            ]
        })),
        ("\"contact_methods\"", json!({
            "header": { "headline": "Get In Touch", "subheadline": "We usually reply within one business day." },
            "contact_methods": [
                { "type": "phone", "label": "Call us", "description": "Speak with our team directly." },
                { "type": "email", "label": "Email us", "description": "Send us the details of your project." }
            ],
            "business_hours": { "weekdays": "9:00 AM - 5:00 PM", "weekends": "Closed" },
            "location_info": { "description": "Conveniently located downtown with free parking." }
        })),
        ("\"features_benefits\"", json!({
            "overview": "A complete, hassle-free service tailored to your needs.",
            "features_benefits": [
                { "feature": "Certified professionals", "benefit": "Work done right the first time" },
                { "feature": "Transparent pricing", "benefit": "No surprises on your invoice" }
            ],
            "process": [
                { "step": 1, "title": "Consultation", "description": "We learn about your goals." },
                { "step": 2, "title": "Delivery", "description": "We complete the work on schedule." }
            ],
            "pricing": { "model": "fixed quote", "note": "Free estimates for every project." },
            "why_choose": "Years of experience and a satisfaction guarantee.",
            "cta": { "headline": "Ready to get started?", "button_text": "Request a Quote" }
        })),
        ("\"company_story\"", json!({
            "company_story": "Founded by a small team of specialists, we have grown by treating every client like a neighbour.",
            "mission_values": { "mission": "Deliver dependable work with a personal touch.", "values": ["Integrity", "Quality", "Community"] },
            "team": { "headline": "Meet the Team", "description": "Experienced, certified and friendly." },
            "differentiators": ["Local ownership", "Satisfaction guarantee", "Clear communication"],
            "cta": { "headline": "Let's work together", "button_text": "Contact Us" }
        })),
        ("\"services_overview\"", json!({
            "hero": { "headline": "Quality Work You Can Trust", "subheadline": "Local experts ready to help.", "cta_text": "Get a Free Quote" },
            "value_proposition": "Dependable service, honest pricing and results that last.",
            "services_overview": { "headline": "Our Services", "description": "Everything you need under one roof." },
            "why_choose_us": { "headline": "Why Choose Us", "points": ["Experienced team", "Fair prices", "Guaranteed results"] },
            "about_preview": { "headline": "About Us", "content": "A locally owned business serving the community." },
            "contact_cta": { "headline": "Start Your Project Today", "button_text": "Contact Us" }
        })),
        ("\"competitive_positioning\"", json!({
            "target_audience": {
                "primary": "Local homeowners and small businesses",
                "pain_points": ["Unreliable providers", "Hidden costs"],
                "motivations": ["Quality", "Convenience"]
            },
            "content_goals": ["Build trust", "Explain services clearly", "Generate qualified leads"],
            "messaging_strategy": {
                "tone": "professional and approachable",
                "key_messages": ["Experienced local team", "Transparent pricing"]
            },
            "seo_keywords": {
                "primary": ["professional services", "local experts"],
                "secondary": ["free estimate", "licensed and insured"],
                "local": []
            },
            "competitive_positioning": {
                "unique_selling_points": ["Satisfaction guarantee", "Same-week scheduling"],
                "differentiation": "Personal service backed by professional standards"
            },
            "content_priorities": ["homepage", "services", "about", "contact"]
        })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_answers_by_schema_key() {
        let provider = DemoProvider::new();
        let prompt = "Create homepage content.\n\nRequired keys: [\"hero\", \"services_overview\"]";
        let response = provider.generate(GenerateRequest::new("llama3.1:8b", prompt)).await.unwrap();

        assert!(response.response.contains("\"value_proposition\""));
        assert_eq!(response.model, "llama3.1:8b");
        assert!(response.tokens_per_second().unwrap() > 10.0);
    }

    #[tokio::test]
    async fn test_health_prompt_and_fallback() {
        let provider = DemoProvider::default();
        let hello = provider.generate(GenerateRequest::new("mistral:7b", "Say hello")).await.unwrap();
        assert!(!hello.response.is_empty());

        let other = provider.generate(GenerateRequest::new("mistral:7b", "what is rust?")).await.unwrap();
        assert!(other.response.starts_with("Demo mode"));
        assert_eq!(provider.statistics().request_count, 2);
    }

    #[tokio::test]
    async fn test_model_management() {
        let provider = DemoProvider::new();
        assert!(provider.pull_model("phi3:mini").await.unwrap());
        assert!(provider.list_models().await.unwrap().contains(&"phi3:mini".to_string()));
        assert!(provider.delete_model("phi3:mini").await.unwrap());
        assert!(!provider.delete_model("phi3:mini").await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_reassembles() {
        let provider = DemoProvider::new();
        let mut stream = provider
            .stream_generate(GenerateRequest::new("llama3.1:8b", "Say hello"))
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap().response);
        }
        assert_eq!(text, "Hello! The demo model is up and running.");
    }
}
