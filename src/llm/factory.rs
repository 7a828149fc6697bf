use async_openai::config::OpenAIConfig;

use crate::config::LlmBinding;
use crate::credentials::{CredentialStore, ProviderCatalog};

use super::{CallOptions, Claude, LLMError, Ollama, OpenAI, LLM};

/// Builds providers from an agent's LLM binding, validating the
/// configuration (model present, key resolvable) before returning an
/// instance.
pub struct LLMFactory {
    catalog: ProviderCatalog,
    credentials: CredentialStore,
}

impl Default for LLMFactory {
    fn default() -> Self {
        Self::new(
            ProviderCatalog::default(),
            CredentialStore::load_default().unwrap_or_else(|e| {
                log::warn!("could not load credentials file: {e}");
                CredentialStore::empty()
            }),
        )
    }
}

impl LLMFactory {
    pub fn new(catalog: ProviderCatalog, credentials: CredentialStore) -> Self {
        Self {
            catalog,
            credentials,
        }
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    pub fn build(&self, binding: &LlmBinding) -> Result<Box<dyn LLM>, LLMError> {
        if binding.model.trim().is_empty() {
            return Err(LLMError::InvalidRequest("model must not be empty".into()));
        }

        let mut options = CallOptions::new();
        if let Some(temperature) = binding.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = binding.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }

        let llm: Box<dyn LLM> = match binding.provider.as_str() {
            "openai" => {
                let api_key = self.require_api_key("openai")?;
                let config = OpenAIConfig::new().with_api_key(api_key);
                Box::new(
                    OpenAI::with_config(config)
                        .with_model(&binding.model)
                        .with_options(options),
                )
            }
            "anthropic" | "claude" => {
                let api_key = self.require_api_key("anthropic")?;
                Box::new(
                    Claude::new()
                        .with_api_key(api_key)
                        .with_model(&binding.model)
                        .with_options(options),
                )
            }
            "ollama" => {
                let mut ollama = Ollama::new()
                    .with_model(&binding.model)
                    .with_options(options);
                if let Some(info) = self.catalog.find("ollama") {
                    ollama = ollama.with_base_url(&info.base_url);
                }
                Box::new(ollama)
            }
            other => return Err(LLMError::UnknownProvider(other.to_string())),
        };

        Ok(llm)
    }

    /// Picks the first enabled provider with resolvable credentials in the
    /// catalog's priority order, bound to its default model.
    pub fn auto_detect(&self) -> Result<Box<dyn LLM>, LLMError> {
        let info = self
            .catalog
            .first_available(&self.credentials)
            .ok_or_else(|| {
                LLMError::OtherError("no provider with available credentials".into())
            })?;

        log::info!("auto-detected provider '{}'", info.id);

        self.build(&LlmBinding {
            provider: info.id.clone(),
            model: info.default_model.clone(),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
        })
    }

    fn require_api_key(&self, provider: &str) -> Result<String, LLMError> {
        let info = self
            .catalog
            .find(provider)
            .ok_or_else(|| LLMError::UnknownProvider(provider.to_string()))?;

        self.catalog
            .resolve_api_key(info, &self.credentials)
            .ok_or_else(|| LLMError::MissingApiKey(provider.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(provider: &str, model: &str) -> LlmBinding {
        LlmBinding {
            provider: provider.into(),
            model: model.into(),
            temperature: Some(0.2),
            max_tokens: Some(512),
            system_prompt: None,
        }
    }

    fn keyless_factory(store: CredentialStore) -> LLMFactory {
        let mut catalog = ProviderCatalog::default();
        for provider in &mut catalog.providers {
            if let Some(env) = &mut provider.api_key_env {
                *env = format!("AGENTFLOW_TEST_UNSET_{}", env);
            }
        }
        LLMFactory::new(catalog, store)
    }

    #[test]
    fn test_empty_model_rejected() {
        let factory = keyless_factory(CredentialStore::empty());
        let err = factory.build(&binding("ollama", "  ")).unwrap_err();
        assert!(matches!(err, LLMError::InvalidRequest(_)));
    }

    #[test]
    fn test_missing_key_rejected() {
        let factory = keyless_factory(CredentialStore::empty());
        let err = factory.build(&binding("openai", "gpt-4o-mini")).unwrap_err();
        assert!(matches!(err, LLMError::MissingApiKey(_)));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let factory = keyless_factory(CredentialStore::empty());
        let err = factory.build(&binding("watson", "jeopardy-1")).unwrap_err();
        assert!(matches!(err, LLMError::UnknownProvider(_)));
    }

    #[test]
    fn test_build_with_stored_key() {
        let mut store = CredentialStore::empty();
        store.set("anthropic", "sk-ant-test", "");
        let factory = keyless_factory(store);

        let llm = factory.build(&binding("anthropic", "claude-sonnet-4-20250514"));
        assert!(llm.is_ok());
    }

    #[test]
    fn test_auto_detect_falls_back_to_ollama() {
        let factory = keyless_factory(CredentialStore::empty());
        let llm = factory.auto_detect().unwrap();
        assert_eq!(llm.models(), vec!["llama3.2"]);
    }
}
