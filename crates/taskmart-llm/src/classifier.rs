//! Intent classification over an LLM provider
//!
//! The model is asked for a small JSON object. Parsing is lenient about
//! shape (string or numeric budget, one skill or a list, code fences) and
//! strict about substance: text with no JSON object in it is `Malformed`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use taskmart_types::{normalize_skill, Classification, SKILL_GENERAL};

use crate::keywords::parse_budget;
use crate::providers::LLMProvider;
use crate::router::LLMRouter;
use crate::types::{CompletionRequest, LLMError, LlmConfig, Message};

/// Why a request could not be classified
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("classifier timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("malformed classifier output: {reason}")]
    Malformed { reason: String },

    #[error("classifier provider failed: {0}")]
    Provider(#[from] LLMError),
}

/// Turns free text into a summary, budget and ranked skills
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError>;
}

/// Values substituted for fields the classifier left out
#[derive(Debug, Clone)]
pub struct ClassifierDefaults {
    pub min_budget: Decimal,
    pub default_skill: String,
}

impl Default for ClassifierDefaults {
    fn default() -> Self {
        Self {
            min_budget: Decimal::from(10),
            default_skill: SKILL_GENERAL.to_string(),
        }
    }
}

const SYSTEM_PROMPT: &str = r#"You classify task requests for a freelance marketplace.

Respond with a single JSON object and nothing else:
{
  "summary": "one-line task title",
  "estimated_budget": number in USD,
  "skills": ["primary skill", "secondary skill", ...]
}

Use lowercase skill names such as development, design, writing, marketing, data.
If the request states a budget, use it exactly."#;

/// [`IntentClassifier`] backed by an LLM provider
pub struct LlmIntentClassifier {
    provider: Arc<dyn LLMProvider>,
    defaults: ClassifierDefaults,
    timeout: Duration,
}

impl LlmIntentClassifier {
    pub fn new(provider: Arc<dyn LLMProvider>, defaults: ClassifierDefaults, timeout: Duration) -> Self {
        Self {
            provider,
            defaults,
            timeout,
        }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        let request = CompletionRequest::new(vec![Message::user(text)])
            .with_system(SYSTEM_PROMPT)
            .with_temperature(0.0)
            .with_max_tokens(512)
            .with_json_mode();

        let response = tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| ClassifyError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        debug!(provider = self.provider.name(), "classifier responded");
        parse_classification(&response.content, text, &self.defaults)
    }
}

/// Parse a classifier reply, filling gaps from `defaults`.
///
/// `text` is the original request and stands in for a missing summary.
pub fn parse_classification(
    raw: &str,
    text: &str,
    defaults: &ClassifierDefaults,
) -> Result<Classification, ClassifyError> {
    let object = extract_json_object(raw).ok_or_else(|| ClassifyError::Malformed {
        reason: format!("no JSON object in reply: {}", preview(raw)),
    })?;

    let value: Value = serde_json::from_str(object).map_err(|e| ClassifyError::Malformed {
        reason: e.to_string(),
    })?;
    let fields = value.as_object().ok_or_else(|| ClassifyError::Malformed {
        reason: "reply is not a JSON object".to_string(),
    })?;

    let summary = fields
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| text.trim())
        .to_string();

    let estimated_budget = fields
        .get("estimated_budget")
        .or_else(|| fields.get("budget"))
        .and_then(budget_from_value)
        .filter(|b| *b > Decimal::ZERO)
        .unwrap_or(defaults.min_budget);

    let mut skills: Vec<String> = match fields.get("skills").or_else(|| fields.get("skill")) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(normalize_skill)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(normalize_skill)
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    let mut seen = HashSet::new();
    skills.retain(|skill| seen.insert(skill.clone()));
    if skills.is_empty() {
        skills.push(defaults.default_skill.clone());
    }

    Ok(Classification {
        summary,
        estimated_budget,
        skills,
    })
}

fn budget_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse::<Decimal>()
            .ok()
            .or_else(|| parse_budget(s)),
        _ => None,
    }
}

/// Slice from the first `{` to the last `}`, skipping prose or code fences
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn preview(raw: &str) -> String {
    raw.chars().take(80).collect()
}

/// Build the classifier named by the LLM configuration
pub fn classifier_from_config(
    config: &LlmConfig,
    defaults: ClassifierDefaults,
) -> Result<Arc<dyn IntentClassifier>, LLMError> {
    let router = LLMRouter::from_config(config, &defaults)?;
    Ok(Arc::new(LlmIntentClassifier::new(
        router.provider().clone(),
        defaults,
        Duration::from_millis(config.timeout_ms),
    )))
}
