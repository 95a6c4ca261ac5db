use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig};
use crate::errors::{PilotError, PilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    /// Kept for role-to-model lookups.
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> PilotResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            PilotError::Config(format!("active provider '{}' not found in registry", self.active))
        })
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Return the provider and call configuration for a named agent role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model, temperature and stream flag
    pub fn call_config_for_role(&self, role: &str) -> PilotResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let role_entry = match role {
            "reasoning" => self.llm_config.roles.reasoning.as_ref(),
            other => {
                tracing::warn!(role = other, "unknown role, falling back to active provider");
                None
            }
        };

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                PilotError::Config(format!(
                    "role '{role}' references unknown provider '{}'",
                    entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            tracing::debug!(
                role = role,
                provider = %entry.provider,
                model = %entry.model,
                stream = entry.stream,
                temperature = temperature,
                "resolved role config"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature: temperature as f32,
                },
            ));
        }

        let provider = self.get_active()?;
        let (model, temperature, stream) = self
            .llm_config
            .providers
            .get(&self.active)
            .map(|p| (p.model.clone(), p.temperature, p.stream))
            .unwrap_or_else(|| (String::new(), 0.1, false));
        tracing::debug!(
            role = role,
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((
            provider,
            CallConfig {
                model,
                stream,
                temperature: temperature as f32,
            },
        ))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `DESKPILOT_<ID>_API_KEY`,
    /// falling back to the key stored in config.toml.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(api_key_var(id))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            let provider = OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        registry
    }
}

pub fn api_key_var(provider_id: &str) -> String {
    format!("DESKPILOT_{}_API_KEY", provider_id.to_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(roles: &str) -> AppConfig {
        let text = format!(
            r#"
            [llm]
            active_provider = "local"

            [llm.providers.local]
            display_name = "Local"
            api_base = "http://127.0.0.1:11434/v1/chat/completions"
            model = "qwen2.5-vl"
            stream = true

            [llm.providers.cloud]
            display_name = "Cloud"
            api_base = "https://api.example.com/v1/chat/completions"
            model = "big"
            temperature = 0.4
            {roles}
            "#
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn falls_back_to_active_provider() {
        let reg = ProviderRegistry::from_config(&config(""));
        let (provider, cfg) = reg.call_config_for_role("reasoning").unwrap();
        assert_eq!(provider.name(), "local");
        assert_eq!(cfg.model, "qwen2.5-vl");
        assert!(cfg.stream);
    }

    #[test]
    fn role_entry_wins_and_inherits_temperature() {
        let reg = ProviderRegistry::from_config(&config(
            r#"
            [llm.roles.reasoning]
            provider = "cloud"
            model = "big-tools"
            "#,
        ));
        let (provider, cfg) = reg.call_config_for_role("reasoning").unwrap();
        assert_eq!(provider.name(), "cloud");
        assert_eq!(cfg.model, "big-tools");
        assert!((cfg.temperature - 0.4).abs() < 1e-6);
        assert_eq!(reg.list_names(), vec!["cloud".to_string(), "local".to_string()]);
    }

    #[test]
    fn unknown_role_provider_is_a_config_error() {
        let reg = ProviderRegistry::from_config(&config(
            r#"
            [llm.roles.reasoning]
            provider = "missing"
            model = "m"
            "#,
        ));
        assert!(matches!(reg.call_config_for_role("reasoning"), Err(PilotError::Config(_))));
    }

    #[test]
    fn api_key_variable_name() {
        assert_eq!(api_key_var("open-router"), "DESKPILOT_OPEN_ROUTER_API_KEY");
    }
}
