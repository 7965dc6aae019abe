use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig, Strategy};
use crate::errors::{OperatorError, OperatorResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Everything the control loop needs to talk to one model identifier.
#[derive(Clone)]
pub struct ResolvedModel {
    pub model_id: String,
    pub provider: Arc<dyn LlmProvider>,
    pub call: CallConfig,
    pub strategy: Strategy,
}

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// Kept for model lookups (does not need to be mutable after init).
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(llm_config: LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            llm_config,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn active_model(&self) -> &str {
        &self.llm_config.active_model
    }

    /// Resolve a model identifier to its provider and call configuration.
    ///
    /// Unknown identifiers, and identifiers whose provider was never
    /// registered, are `ModelUnrecognized`.
    pub fn resolve(&self, model_id: &str) -> OperatorResult<ResolvedModel> {
        let entry = self
            .llm_config
            .models
            .get(model_id)
            .ok_or_else(|| OperatorError::ModelUnrecognized(model_id.to_string()))?;

        let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
            tracing::error!(model = model_id, provider = %entry.provider, "model references unknown provider");
            OperatorError::ModelUnrecognized(model_id.to_string())
        })?;

        let temperature = entry.temperature.unwrap_or_else(|| {
            self.llm_config
                .providers
                .get(&entry.provider)
                .map(|p| p.temperature)
                .unwrap_or(0.1)
        });

        tracing::debug!(
            model_id,
            provider = %entry.provider,
            model = %entry.model,
            stream = entry.stream,
            temperature,
            strategy = ?entry.strategy,
            "resolved model config"
        );

        Ok(ResolvedModel {
            model_id: model_id.to_string(),
            provider,
            call: CallConfig {
                model: entry.model.clone(),
                stream: entry.stream,
                temperature,
            },
            strategy: entry.strategy,
        })
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `OPERATOR_<ID>_API_KEY`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new(config.llm.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("OPERATOR_{}_API_KEY", id.to_uppercase()))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            let provider = OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        registry
    }
}
