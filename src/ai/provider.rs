use reqwest::RequestBuilder;
use serde::Serialize;
use serde_json::Value;

use crate::domain::ProviderKind;

use super::wire::{
    chat_request, generate_content_request, ChatCompletionResponse, GeminiModelList,
    GenerateContentResponse, ModelList,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    Header(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `POST {base}/chat/completions` with a message array.
    ChatCompletions,
    /// `POST {base}/models/{model}:generateContent` with content parts.
    GenerateContent,
}

/// Everything that differs between providers. Adding a backend means adding
/// one entry here, not another branch at every call site.
#[derive(Debug)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub base_url: &'static str,
    pub auth: AuthScheme,
    pub wire: WireFormat,
    pub extra_headers: &'static [(&'static str, &'static str)],
    /// Used when the user has not picked a model. Providers without one
    /// refuse to run unconfigured.
    pub default_model: Option<&'static str>,
    /// Returned by model listing when the listing endpoint is unavailable.
    pub fallback_models: &'static [&'static str],
}

const OPENROUTER_HEADERS: &[(&str, &str)] = &[
    ("X-Title", "AI LeafyTab"),
    ("HTTP-Referer", "https://ai-leaftab.local"),
];

const ZHIPU_FALLBACK_MODELS: &[&str] = &[
    "glm-4.7",
    "glm-4.6",
    "glm-4.5-air",
    "glm-4.5-airx",
    "glm-4.5-flash",
    "glm-4-flash-250414",
    "glm-4-flash",
];

static OPENAI: ProviderSpec = ProviderSpec {
    kind: ProviderKind::OpenAi,
    base_url: "https://api.openai.com/v1",
    auth: AuthScheme::Bearer,
    wire: WireFormat::ChatCompletions,
    extra_headers: &[],
    default_model: Some("gpt-4o-mini"),
    fallback_models: &[],
};

static GEMINI: ProviderSpec = ProviderSpec {
    kind: ProviderKind::Gemini,
    base_url: "https://generativelanguage.googleapis.com/v1beta",
    auth: AuthScheme::Header("x-goog-api-key"),
    wire: WireFormat::GenerateContent,
    extra_headers: &[],
    default_model: Some("gemini-1.5-flash"),
    fallback_models: &[],
};

static DEEPSEEK: ProviderSpec = ProviderSpec {
    kind: ProviderKind::DeepSeek,
    base_url: "https://api.deepseek.com/v1",
    auth: AuthScheme::Bearer,
    wire: WireFormat::ChatCompletions,
    extra_headers: &[],
    default_model: None,
    fallback_models: &[],
};

static ZHIPU: ProviderSpec = ProviderSpec {
    kind: ProviderKind::Zhipu,
    base_url: "https://open.bigmodel.cn/api/paas/v4",
    auth: AuthScheme::Bearer,
    wire: WireFormat::ChatCompletions,
    extra_headers: &[],
    default_model: None,
    fallback_models: ZHIPU_FALLBACK_MODELS,
};

static OPENROUTER: ProviderSpec = ProviderSpec {
    kind: ProviderKind::OpenRouter,
    base_url: "https://openrouter.ai/api/v1",
    auth: AuthScheme::Bearer,
    wire: WireFormat::ChatCompletions,
    extra_headers: OPENROUTER_HEADERS,
    default_model: None,
    fallback_models: &[],
};

pub fn spec_for(kind: ProviderKind) -> &'static ProviderSpec {
    match kind {
        ProviderKind::OpenAi => &OPENAI,
        ProviderKind::Gemini => &GEMINI,
        ProviderKind::DeepSeek => &DEEPSEEK,
        ProviderKind::Zhipu => &ZHIPU,
        ProviderKind::OpenRouter => &OPENROUTER,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub display: String,
}

impl ModelInfo {
    fn plain(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display: id.to_string(),
        }
    }
}

impl ProviderSpec {
    /// Picks the model to call: the configured one, else the provider default.
    pub fn resolve_model<'a>(&self, configured: &'a str) -> Option<&'a str> {
        let configured = configured.trim();
        if configured.is_empty() {
            self.default_model
        } else {
            Some(configured)
        }
    }

    pub fn completion_url(&self, base: &str, model: &str) -> String {
        match self.wire {
            WireFormat::ChatCompletions => format!("{base}/chat/completions"),
            WireFormat::GenerateContent => {
                let model = model.strip_prefix("models/").unwrap_or(model);
                format!("{base}/models/{model}:generateContent")
            }
        }
    }

    pub fn models_url(&self, base: &str) -> String {
        format!("{base}/models")
    }

    pub fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        let request = match self.auth {
            AuthScheme::Bearer => request.bearer_auth(api_key),
            AuthScheme::Header(name) => request.header(name, api_key),
        };
        self.extra_headers
            .iter()
            .fold(request, |req, (name, value)| req.header(*name, *value))
    }

    pub fn build_request(&self, model: &str, prompt: &str) -> serde_json::Result<Value> {
        match self.wire {
            WireFormat::ChatCompletions => serde_json::to_value(chat_request(model, prompt)),
            WireFormat::GenerateContent => serde_json::to_value(generate_content_request(prompt)),
        }
    }

    /// Extracts the model's free text; a well-formed body without content
    /// yields an empty string.
    pub fn parse_response(&self, body: &str) -> serde_json::Result<String> {
        match self.wire {
            WireFormat::ChatCompletions => {
                serde_json::from_str::<ChatCompletionResponse>(body).map(|r| r.into_text())
            }
            WireFormat::GenerateContent => {
                serde_json::from_str::<GenerateContentResponse>(body).map(|r| r.into_text())
            }
        }
    }

    pub fn parse_models(&self, body: &str) -> serde_json::Result<Vec<ModelInfo>> {
        match self.wire {
            WireFormat::ChatCompletions => {
                let list: ModelList = serde_json::from_str(body)?;
                let mut ids: Vec<String> = list
                    .data
                    .into_iter()
                    .filter_map(|m| m.id)
                    .filter(|id| !id.is_empty())
                    .collect();
                ids.sort();
                Ok(ids.iter().map(|id| ModelInfo::plain(id)).collect())
            }
            WireFormat::GenerateContent => {
                let list: GeminiModelList = serde_json::from_str(body)?;
                let mut models: Vec<ModelInfo> = list
                    .models
                    .into_iter()
                    .filter(|m| {
                        m.supported_generation_methods
                            .as_ref()
                            .map_or(true, |methods| methods.iter().any(|x| x == "generateContent"))
                    })
                    .filter_map(|m| {
                        let id = m
                            .base_model_id
                            .filter(|id| !id.is_empty())
                            .or_else(|| {
                                m.name
                                    .map(|n| n.strip_prefix("models/").unwrap_or(n.as_str()).to_string())
                            })
                            .filter(|id| !id.is_empty())?;
                        let display = m
                            .display_name
                            .filter(|d| !d.is_empty())
                            .unwrap_or_else(|| id.clone());
                        Some(ModelInfo { id, display })
                    })
                    .collect();
                models.sort_by(|a, b| a.display.cmp(&b.display));
                Ok(models)
            }
        }
    }

    pub fn fallback_model_list(&self) -> Vec<ModelInfo> {
        self.fallback_models.iter().map(|id| ModelInfo::plain(id)).collect()
    }
}
