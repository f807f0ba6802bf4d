//! LLM Router - Selects and manages LLM providers

use std::sync::Arc;

use crate::classifier::ClassifierDefaults;
use crate::providers::*;
use crate::types::*;

/// Holds the provider selected by configuration
pub struct LLMRouter {
    provider: Arc<dyn LLMProvider>,
    kind: ProviderKind,
}

impl LLMRouter {
    /// Create a router with a specific provider
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        let kind = provider.kind();
        Self { provider, kind }
    }

    /// Create a router from the `llm` configuration section. `defaults`
    /// feed the deterministic provider's keyword rules.
    pub fn from_config(config: &LlmConfig, defaults: &ClassifierDefaults) -> Result<Self> {
        let provider: Arc<dyn LLMProvider> = match config.provider {
            ProviderKind::Ollama => Arc::new(OllamaProvider::new(OllamaConfig::from(config))?),
            ProviderKind::OpenAICompat => {
                Arc::new(OpenAICompatProvider::new(OpenAICompatConfig::from(config))?)
            }
            ProviderKind::Deterministic => {
                Arc::new(DeterministicProvider::new(defaults.clone())?)
            }
        };

        tracing::info!(provider = provider.name(), "LLM provider selected");
        Ok(Self::new(provider))
    }

    /// Get the current provider
    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    /// Get the provider kind
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Check if the provider is available
    pub async fn is_available(&self) -> bool {
        self.provider.is_available().await
    }

    /// Complete a request using the current provider
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.provider.complete(request).await
    }
}
