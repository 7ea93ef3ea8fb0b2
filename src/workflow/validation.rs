use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::json::truthy;

/// Completeness scores for a packaged site, each out of 100
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub overall_score: u32,
    pub content_quality: u32,
    pub seo_completeness: u32,
    pub structure_validity: u32,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

fn score(checks: &[(bool, u32)]) -> u32 {
    checks.iter().filter(|(present, _)| *present).map(|(_, points)| points).sum()
}

pub fn validate_output(output: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();
    let has = |value: &Value, key: &str| truthy(value.get(key));

    let content = &output["content"];
    if truthy(Some(content)) {
        report.content_quality = score(&[
            (has(content, "homepage"), 40),
            (has(content, "about"), 20),
            (has(content, "services"), 20),
            (has(content, "contact"), 20),
        ]);
        if report.content_quality < 60 {
            report.issues.push("Missing essential content sections".to_string());
        }
    }

    let seo = &output["seo"];
    if truthy(Some(seo)) {
        report.seo_completeness = score(&[
            (has(&seo["homepage"], "title"), 25),
            (has(&seo["homepage"], "meta_description"), 25),
            (has(output, "structured_data"), 25),
            (has(output, "sitemap_structure"), 25),
        ]);
        if report.seo_completeness < 50 {
            report.issues.push("Incomplete SEO optimization".to_string());
        }
    }

    let structure = &output["structure"];
    let navigation = &output["navigation"];
    if truthy(Some(structure)) && truthy(Some(navigation)) {
        report.structure_validity = score(&[
            (has(structure, "type"), 25),
            (has(structure, "pages") || has(structure, "sections"), 25),
            (has(navigation, "main_menu"), 25),
            (has(output, "url_structure"), 25),
        ]);
        if report.structure_validity < 75 {
            report.issues.push("Incomplete site structure".to_string());
        }
    }

    report.overall_score = (report.content_quality + report.seo_completeness + report.structure_validity) / 3;

    if report.overall_score < 70 {
        report.recommendations.push("Review and enhance content quality".to_string());
    }
    if report.seo_completeness < 80 {
        report.recommendations.push("Complete SEO optimization".to_string());
    }
    if report.structure_validity < 80 {
        report.recommendations.push("Refine site structure and navigation".to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_output_scores_full() {
        let output = json!({
            "content": { "homepage": { "hero": {} }, "about": { "a": 1 }, "services": [1], "contact": { "c": 1 } },
            "seo": { "homepage": { "title": "T", "meta_description": "D" } },
            "structured_data": { "organization": {} },
            "sitemap_structure": { "urls": [] },
            "structure": { "type": "multi-page", "pages": [{ "id": "home" }] },
            "navigation": { "main_menu": [{ "label": "Home" }] },
            "url_structure": { "structure": {} }
        });
        let report = validate_output(&output);
        assert_eq!(report.overall_score, 100);
        assert!(report.issues.is_empty());
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_partial_output_reports_issues() {
        let output = json!({
            "content": { "about": { "a": 1 }, "contact": { "c": 1 } },
            "seo": { "about": { "title": "T" } },
            "structure": { "type": "single-page" },
            "navigation": {}
        });
        let report = validate_output(&output);
        assert_eq!(report.content_quality, 40);
        assert_eq!(report.seo_completeness, 0);
        assert_eq!(report.structure_validity, 0);
        assert_eq!(report.overall_score, 13);
        assert_eq!(report.issues, vec!["Missing essential content sections", "Incomplete SEO optimization"]);
        assert_eq!(
            report.recommendations,
            vec![
                "Review and enhance content quality",
                "Complete SEO optimization",
                "Refine site structure and navigation"
            ]
        );
    }

    #[test]
    fn test_empty_output() {
        let report = validate_output(&json!({}));
        assert_eq!(report.overall_score, 0);
        assert!(report.issues.is_empty());
        assert_eq!(report.recommendations.len(), 3);
    }
}
