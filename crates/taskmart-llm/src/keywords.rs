//! Keyword-rule classifier
//!
//! No model involved: the budget is the first dollar amount in the text and
//! skills are ranked by how many of their keywords appear.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;

use taskmart_types::Classification;

use crate::classifier::{ClassifierDefaults, ClassifyError, IntentClassifier};
use crate::types::LLMError;

/// Skill → trigger words. Order breaks ties.
const SKILL_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "development",
        &[
            "build", "website", "web site", "landing page", "app", "application", "code",
            "api", "backend", "frontend", "bug", "script", "deploy", "integration",
        ],
    ),
    (
        "design",
        &["design", "logo", "mockup", "ui", "ux", "figma", "illustration", "banner"],
    ),
    (
        "writing",
        &["write", "article", "blog", "copy", "documentation", "translate", "proofread"],
    ),
    (
        "marketing",
        &["marketing", "seo", "campaign", "social media", "ads", "newsletter"],
    ),
    (
        "data",
        &["data", "analysis", "spreadsheet", "dashboard", "scrape", "report", "csv"],
    ),
];

const BUDGET_PATTERN: &str =
    r"(?i)\$\s*(\d[\d,]*(?:\.\d+)?)|(\d[\d,]*(?:\.\d+)?)\s*(?:usd|dollars?)\b";

fn budget_regex() -> Option<&'static Regex> {
    static BUDGET: OnceLock<Option<Regex>> = OnceLock::new();
    BUDGET.get_or_init(|| Regex::new(BUDGET_PATTERN).ok()).as_ref()
}

/// First dollar amount in `text`: `$200`, `$ 1,500.00`, `300 USD`
pub fn parse_budget(text: &str) -> Option<Decimal> {
    let caps = budget_regex()?.captures(text)?;
    let digits = caps.get(1).or_else(|| caps.get(2))?.as_str().replace(',', "");
    digits.parse().ok()
}

struct SkillRule {
    skill: &'static str,
    pattern: Regex,
}

/// Deterministic [`IntentClassifier`]
pub struct KeywordClassifier {
    rules: Vec<SkillRule>,
    defaults: ClassifierDefaults,
}

impl KeywordClassifier {
    pub fn new(defaults: ClassifierDefaults) -> Result<Self, LLMError> {
        let rules = SKILL_KEYWORDS
            .iter()
            .map(|&(skill, words)| {
                let alternation = words
                    .iter()
                    .map(|w| regex::escape(w))
                    .collect::<Vec<_>>()
                    .join("|");
                Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
                    .map(|pattern| SkillRule { skill, pattern })
                    .map_err(|e| LLMError::ConfigurationError {
                        message: format!("keyword rule for {}: {}", skill, e),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules, defaults })
    }

    /// Classify without going through the async trait
    pub fn classify_text(&self, text: &str) -> Classification {
        let mut scored: Vec<(usize, usize, &str)> = self
            .rules
            .iter()
            .enumerate()
            .map(|(rank, rule)| (rule.pattern.find_iter(text).count(), rank, rule.skill))
            .filter(|(hits, _, _)| *hits > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut skills: Vec<String> = scored.into_iter().map(|(_, _, s)| s.to_string()).collect();
        if skills.is_empty() {
            skills.push(self.defaults.default_skill.clone());
        }

        let estimated_budget = parse_budget(text)
            .filter(|b| *b > Decimal::ZERO)
            .unwrap_or(self.defaults.min_budget);

        Classification {
            summary: text.trim().to_string(),
            estimated_budget,
            skills,
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        Ok(self.classify_text(text))
    }
}
