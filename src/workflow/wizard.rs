use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Business description collected by the site wizard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WizardData {
    pub website_type: WebsiteType,
    pub business_info: BusinessInfo,
    pub selected_services: Vec<ServiceOffering>,
    pub website_purpose: WebsitePurpose,
    pub target_audience: AudienceInfo,
    pub location_info: LocationInfo,
    pub contact_info: ContactInfo,
    pub branding: Branding,
    pub website_features: Vec<String>,
    pub website_structure: Option<WebsiteStructure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsiteType {
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub founded: Option<String>,
}

/// Ids and prices arrive as either strings or numbers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOffering {
    pub id: Option<Value>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Value>,
    pub duration: Option<String>,
    pub category: Option<String>,
}

impl ServiceOffering {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn id_text(&self) -> String {
        self.id.as_ref().map(value_text).unwrap_or_default()
    }

    pub fn price_text(&self) -> Option<String> {
        self.price.as_ref().map(value_text).filter(|p| !p.is_empty())
    }

    /// Lowercase, spaces to hyphens, `&` spelled out
    pub fn slug(&self) -> String {
        slugify(self.name())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsitePurpose {
    pub primary: Option<String>,
    pub secondary: Vec<String>,
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudienceInfo {
    pub demographics: Value,
    pub interests: Vec<String>,
    pub pain_points: Vec<String>,
    pub goals: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationInfo {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub market_type: Option<String>,
    pub service_area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl LocationInfo {
    pub fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.zip_code.is_none()
            && self.country.is_none()
            && self.market_type.is_none()
            && self.service_area.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactInfo {
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Branding {
    pub tone: Option<String>,
    pub style: Option<String>,
    pub mission: Option<String>,
    pub vision: Option<String>,
    pub values: Vec<String>,
    pub unique_selling_points: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebsiteStructure {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub has_blog: bool,
    pub selected_pages: Vec<String>,
    pub selected_sections: Vec<String>,
}

impl WizardData {
    pub fn business_name(&self) -> &str {
        self.business_info.name.as_deref().unwrap_or("")
    }

    pub fn website_category(&self) -> Option<&str> {
        self.website_type.category.as_deref().filter(|c| !c.is_empty())
    }

    pub fn selected_pages(&self) -> &[String] {
        self.website_structure
            .as_ref()
            .map(|s| s.selected_pages.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_page(&self, page: &str) -> bool {
        self.selected_pages().iter().any(|p| p == page)
    }

    pub fn has_blog(&self) -> bool {
        match &self.website_structure {
            Some(s) => s.has_blog || self.has_page("blog") || s.kind.as_deref() == Some("blog"),
            None => false,
        }
    }

    pub fn is_single_page(&self) -> bool {
        self.website_structure
            .as_ref()
            .and_then(|s| s.kind.as_deref())
            == Some("single-page")
    }

    /// Up to `limit` service names, every service when `limit` is 0
    pub fn service_names(&self, limit: usize) -> Vec<&str> {
        let take = if limit == 0 { usize::MAX } else { limit };
        self.selected_services.iter().take(take).map(|s| s.name()).collect()
    }
}

pub fn slugify(name: &str) -> String {
    name.to_lowercase().replace(' ', "-").replace('&', "and")
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Wizard payload shared by the stage tests
#[cfg(test)]
pub(crate) fn sample_wizard() -> WizardData {
    serde_json::from_value(serde_json::json!({
        "websiteType": { "category": "business" },
        "businessInfo": { "name": "Bright Plumbing", "description": "Family plumbers", "industry": "Home services" },
        "selectedServices": [
            { "id": "s1", "name": "Drain Cleaning", "description": "Clear any clog", "price": "$99" },
            { "id": "s2", "name": "Water Heaters" }
        ],
        "websitePurpose": { "primary": "Generate leads", "secondary": ["Build trust"] },
        "locationInfo": { "city": "Austin", "state": "TX" },
        "contactInfo": { "phone": "555-0100", "email": "hi@bright.example" },
        "websiteFeatures": ["contact form", "reviews"],
        "websiteStructure": {
            "type": "multi-page",
            "selectedPages": ["blog", "faq", "testimonials", "privacy", "terms"]
        }
    }))
    .expect("valid wizard fixture")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_camel_case_payload() {
        let wizard: WizardData = serde_json::from_value(json!({
            "websiteType": { "category": "business" },
            "businessInfo": { "name": "Bright Plumbing", "industry": "Home services" },
            "selectedServices": [
                { "id": 7, "name": "Drain & Pipe Repair", "price": 120 },
                { "id": "s2", "name": "Water Heaters", "price": "$900" }
            ],
            "locationInfo": { "city": "Austin", "state": "TX", "zipCode": "78701" },
            "websiteStructure": { "type": "multi-page", "selectedPages": ["faq", "blog"] }
        }))
        .unwrap();

        assert_eq!(wizard.business_name(), "Bright Plumbing");
        assert_eq!(wizard.website_category(), Some("business"));
        assert_eq!(wizard.selected_services[0].id_text(), "7");
        assert_eq!(wizard.selected_services[0].price_text().as_deref(), Some("120"));
        assert_eq!(wizard.selected_services[0].slug(), "drain-and-pipe-repair");
        assert_eq!(wizard.location_info.zip_code.as_deref(), Some("78701"));
        assert!(wizard.has_page("faq"));
        assert!(wizard.has_blog());
        assert!(!wizard.is_single_page());
        assert!(wizard.contact_info.is_empty());
    }

    #[test]
    fn test_empty_payload_defaults() {
        let wizard: WizardData = serde_json::from_value(json!({})).unwrap();
        assert_eq!(wizard.business_name(), "");
        assert!(wizard.website_structure.is_none());
        assert!(!wizard.has_blog());
        assert!(wizard.location_info.is_empty());
        assert!(wizard.service_names(0).is_empty());
    }

    #[test]
    fn test_blog_detection() {
        let mut wizard = WizardData::default();
        wizard.website_structure = Some(WebsiteStructure {
            kind: Some("blog".to_string()),
            ..Default::default()
        });
        assert!(wizard.has_blog());

        wizard.website_structure = Some(WebsiteStructure {
            has_blog: true,
            ..Default::default()
        });
        assert!(wizard.has_blog());
    }
}
