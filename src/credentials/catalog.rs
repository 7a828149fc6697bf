use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::CredentialStore;

/// Everything the runtime knows about a provider before talking to it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    /// Environment variable holding the API key; `None` for providers that
    /// need no key.
    pub api_key_env: Option<String>,
    pub models: Vec<String>,
    pub default_model: String,
    pub capabilities: Capabilities,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Capabilities {
    pub tools: bool,
    pub images: bool,
    pub streaming: bool,
    pub embeddings: bool,
    pub max_tokens: u32,
}

/// The provider table plus the priority order auto-detection walks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderCatalog {
    pub providers: Vec<ProviderInfo>,
    pub priority: Vec<String>,
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderInfo {
                    id: "openai".into(),
                    display_name: "OpenAI".into(),
                    base_url: "https://api.openai.com/v1".into(),
                    api_key_env: Some("OPENAI_API_KEY".into()),
                    models: vec![
                        "gpt-4o".into(),
                        "gpt-4o-mini".into(),
                        "gpt-4.1".into(),
                        "gpt-4.1-mini".into(),
                    ],
                    default_model: "gpt-4o-mini".into(),
                    capabilities: Capabilities {
                        tools: true,
                        images: true,
                        streaming: true,
                        embeddings: true,
                        max_tokens: 128_000,
                    },
                    enabled: true,
                },
                ProviderInfo {
                    id: "anthropic".into(),
                    display_name: "Anthropic".into(),
                    base_url: "https://api.anthropic.com".into(),
                    api_key_env: Some("ANTHROPIC_API_KEY".into()),
                    models: vec![
                        "claude-opus-4-20250514".into(),
                        "claude-sonnet-4-20250514".into(),
                        "claude-3-5-haiku-20241022".into(),
                    ],
                    default_model: "claude-sonnet-4-20250514".into(),
                    capabilities: Capabilities {
                        tools: true,
                        images: true,
                        streaming: true,
                        embeddings: false,
                        max_tokens: 200_000,
                    },
                    enabled: true,
                },
                ProviderInfo {
                    id: "ollama".into(),
                    display_name: "Ollama".into(),
                    base_url: "http://localhost:11434".into(),
                    api_key_env: None,
                    models: vec!["llama3.2".into(), "mistral".into()],
                    default_model: "llama3.2".into(),
                    capabilities: Capabilities {
                        tools: false,
                        images: false,
                        streaming: true,
                        embeddings: true,
                        max_tokens: 32_000,
                    },
                    enabled: true,
                },
            ],
            priority: vec!["anthropic".into(), "openai".into(), "ollama".into()],
        }
    }
}

impl ProviderCatalog {
    pub fn find(&self, id: &str) -> Option<&ProviderInfo> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Resolves a provider's API key: environment first, then the store.
    pub fn resolve_api_key(&self, info: &ProviderInfo, store: &CredentialStore) -> Option<String> {
        if let Some(env) = &info.api_key_env {
            if let Ok(key) = std::env::var(env) {
                if !key.is_empty() {
                    return Some(key);
                }
            }
        }
        store
            .get(&info.id)
            .map(|secret| secret.expose_secret().to_string())
    }

    /// First enabled provider in priority order whose credentials resolve.
    /// Providers without a key requirement count as available.
    pub fn first_available(&self, store: &CredentialStore) -> Option<&ProviderInfo> {
        self.priority
            .iter()
            .filter_map(|id| self.find(id))
            .filter(|info| info.enabled)
            .find(|info| {
                info.api_key_env.is_none() || self.resolve_api_key(info, store).is_some()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyless_catalog() -> ProviderCatalog {
        let mut catalog = ProviderCatalog::default();
        // Strip env fallbacks so the test only sees the store.
        for provider in &mut catalog.providers {
            if let Some(env) = &mut provider.api_key_env {
                *env = format!("AGENTFLOW_TEST_UNSET_{}", env);
            }
        }
        catalog
    }

    #[test]
    fn test_first_available_prefers_priority_order() {
        let catalog = keyless_catalog();
        let mut store = CredentialStore::empty();
        store.set("openai", "sk-1", "");
        store.set("anthropic", "sk-2", "");

        let info = catalog.first_available(&store).unwrap();
        assert_eq!(info.id, "anthropic");
    }

    #[test]
    fn test_first_available_falls_back_to_keyless_provider() {
        let catalog = keyless_catalog();
        let store = CredentialStore::empty();

        let info = catalog.first_available(&store).unwrap();
        assert_eq!(info.id, "ollama");
    }

    #[test]
    fn test_disabled_provider_is_skipped() {
        let mut catalog = keyless_catalog();
        catalog
            .providers
            .iter_mut()
            .for_each(|p| p.enabled = p.id == "openai");
        let mut store = CredentialStore::empty();
        store.set("anthropic", "sk-2", "");
        store.set("openai", "sk-1", "");

        let info = catalog.first_available(&store).unwrap();
        assert_eq!(info.id, "openai");
    }
}
