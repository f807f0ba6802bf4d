use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use taskmart_llm::{
    ClassifierDefaults, ClassifyError, CompletionRequest, CompletionResponse, IntentClassifier,
    LLMError, LLMProvider, LlmIntentClassifier, ProviderKind,
};

/// Provider that replies with a canned string after an optional delay
struct CannedProvider {
    reply: Result<String, String>,
    delay: Duration,
}

#[async_trait]
impl LLMProvider for CannedProvider {
    fn name(&self) -> &'static str {
        "Canned"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAICompat
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, request: CompletionRequest) -> taskmart_llm::Result<CompletionResponse> {
        assert!(request.json_mode);
        tokio::time::sleep(self.delay).await;
        match &self.reply {
            Ok(content) => Ok(CompletionResponse::new(content.clone())),
            Err(message) => Err(LLMError::NetworkError {
                message: message.clone(),
            }),
        }
    }
}

fn classifier(reply: Result<&str, &str>, delay: Duration) -> LlmIntentClassifier {
    let provider = CannedProvider {
        reply: reply.map(str::to_string).map_err(str::to_string),
        delay,
    };
    LlmIntentClassifier::new(
        Arc::new(provider),
        ClassifierDefaults {
            min_budget: dec!(15),
            default_skill: "general".to_string(),
        },
        Duration::from_millis(500),
    )
}

#[tokio::test]
async fn classifies_landing_page_request() {
    let c = classifier(
        Ok(r#"{"summary":"Build a landing page","estimated_budget":200,"skills":["development"]}"#),
        Duration::ZERO,
    );
    let result = c.classify("Build a landing page for $200").await.unwrap();
    assert_eq!(result.primary_skill(), "development");
    assert_eq!(result.estimated_budget, dec!(200));
}

#[tokio::test]
async fn partial_reply_falls_back_to_defaults() {
    let c = classifier(Ok(r#"{"summary":"Something vague"}"#), Duration::ZERO);
    let result = c.classify("help").await.unwrap();
    assert_eq!(result.skills, vec!["general"]);
    assert_eq!(result.estimated_budget, dec!(15));
}

#[tokio::test]
async fn prose_reply_is_malformed() {
    let c = classifier(Ok("Sorry, I can't do that."), Duration::ZERO);
    let err = c.classify("help").await.unwrap_err();
    assert!(matches!(err, ClassifyError::Malformed { .. }));
}

#[tokio::test]
async fn provider_failure_is_reported() {
    let c = classifier(Err("connection refused"), Duration::ZERO);
    let err = c.classify("help").await.unwrap_err();
    assert!(matches!(err, ClassifyError::Provider(LLMError::NetworkError { .. })));
}

#[tokio::test(start_paused = true)]
async fn slow_provider_times_out() {
    let c = classifier(Ok("{}"), Duration::from_secs(5));
    let err = c.classify("help").await.unwrap_err();
    assert!(matches!(err, ClassifyError::Timeout { timeout_ms: 500 }));
}
