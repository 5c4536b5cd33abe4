use std::collections::HashMap;

use super::{
    label::{DomainRules, Label, LabelColor},
    provider::ProviderKind,
};

pub const CUSTOM_PROMPT_MAX: usize = 1000;

/// Configuration shared across the user's devices.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub labels: Vec<Label>,
    pub default_label_id: String,
    pub allow_new_labels: bool,
    pub auto_group: bool,
    pub domain_rules_enabled: bool,
    pub domain_rules: DomainRules,
    pub model_openai: String,
    pub model_gemini: String,
    pub model_deepseek: String,
    pub model_zhipu: String,
    pub model_openrouter: String,
    pub custom_prompt: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            labels: default_labels(),
            default_label_id: "other".to_string(),
            allow_new_labels: true,
            auto_group: true,
            domain_rules_enabled: true,
            domain_rules: DomainRules::new(),
            model_openai: "gpt-4o-mini".to_string(),
            model_gemini: "gemini-1.5-flash".to_string(),
            model_deepseek: String::new(),
            model_zhipu: String::new(),
            model_openrouter: String::new(),
            custom_prompt: String::new(),
        }
    }
}

impl SyncSettings {
    pub fn model_for(&self, provider: ProviderKind) -> &str {
        match provider {
            ProviderKind::OpenAi => &self.model_openai,
            ProviderKind::Gemini => &self.model_gemini,
            ProviderKind::DeepSeek => &self.model_deepseek,
            ProviderKind::Zhipu => &self.model_zhipu,
            ProviderKind::OpenRouter => &self.model_openrouter,
        }
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }
}

pub fn default_labels() -> Vec<Label> {
    vec![
        Label::new("work", "Work", LabelColor::Blue),
        Label::new("read", "Read", LabelColor::Yellow),
        Label::new("social", "Social", LabelColor::Pink),
        Label::new("video", "Video", LabelColor::Red),
        Label::new("shopping", "Shopping", LabelColor::Orange),
        Label::new("other", "Other", LabelColor::Grey),
    ]
}

/// Per-device configuration; never synced.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSettings {
    pub api_provider: ProviderKind,
    pub api_keys: HashMap<ProviderKind, String>,
    pub legacy_api_key: String,
    pub logging_enabled: bool,
    pub proxy: ProxySettings,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            api_provider: ProviderKind::OpenAi,
            api_keys: HashMap::new(),
            legacy_api_key: String::new(),
            logging_enabled: true,
            proxy: ProxySettings::default(),
        }
    }
}

impl LocalSettings {
    /// Key for the selected provider, falling back to the shared key older
    /// installs stored before per-provider keys existed.
    pub fn api_key(&self) -> &str {
        self.api_keys
            .get(&self.api_provider)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .unwrap_or(&self.legacy_api_key)
    }

    pub fn key_for(&self, provider: ProviderKind) -> &str {
        self.api_keys
            .get(&provider)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .unwrap_or(&self.legacy_api_key)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProxySettings {
    pub enabled: bool,
    pub host: String,
    pub port: String,
    pub scheme: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_prefers_provider_specific_key() {
        let mut local = LocalSettings {
            api_provider: ProviderKind::Gemini,
            legacy_api_key: "legacy".into(),
            ..Default::default()
        };
        assert_eq!(local.api_key(), "legacy");

        local.api_keys.insert(ProviderKind::Gemini, "g-key".into());
        local.api_keys.insert(ProviderKind::OpenAi, "o-key".into());
        assert_eq!(local.api_key(), "g-key");
    }

    #[test]
    fn defaults_reference_existing_label() {
        let sync = SyncSettings::default();
        assert!(sync.labels.iter().any(|l| l.id == sync.default_label_id));
        assert_eq!(sync.model_for(ProviderKind::Zhipu), "");
        assert_eq!(sync.model_for(ProviderKind::OpenAi), "gpt-4o-mini");
    }
}
