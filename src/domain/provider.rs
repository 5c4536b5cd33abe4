use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote model backends a user can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Gemini,
    DeepSeek,
    Zhipu,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::DeepSeek,
        ProviderKind::Zhipu,
        ProviderKind::OpenRouter,
    ];

    /// Unknown ids fall back to OpenAI, matching what the settings page stores
    /// when nothing has been chosen yet.
    pub fn from_id(id: &str) -> Self {
        match id.trim().to_ascii_lowercase().as_str() {
            "gemini" => ProviderKind::Gemini,
            "deepseek" => ProviderKind::DeepSeek,
            "zhipu" => ProviderKind::Zhipu,
            "openrouter" => ProviderKind::OpenRouter,
            _ => ProviderKind::OpenAi,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Zhipu => "zhipu",
            ProviderKind::OpenRouter => "openrouter",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
