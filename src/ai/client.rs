use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::{config::ProviderEndpoints, domain::ProviderKind};

use super::provider::{spec_for, ModelInfo, ProviderSpec};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("model not set for {0}")]
    MissingModel(ProviderKind),
    #[error("{provider} error: {status} {body}")]
    Status {
        provider: ProviderKind,
        status: StatusCode,
        body: String,
    },
    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected {provider} response body: {source}")]
    Decode {
        provider: ProviderKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Single-shot calls to the remote model providers. No retries: every failure
/// is reported once and the caller decides what it means.
pub struct ProviderClient {
    http: RwLock<Client>,
    endpoints: ProviderEndpoints,
}

impl ProviderClient {
    pub fn new(http: Client, endpoints: ProviderEndpoints) -> Self {
        Self {
            http: RwLock::new(http),
            endpoints,
        }
    }

    /// Swaps the underlying HTTP client, e.g. after the proxy changed.
    /// Requests already in flight keep the client they started with.
    pub fn replace_http(&self, http: Client) {
        *self.http.write() = http;
    }

    fn http(&self) -> Client {
        self.http.read().clone()
    }

    fn base_url(&self, spec: &ProviderSpec) -> String {
        let configured = match spec.kind {
            ProviderKind::OpenAi => self.endpoints.openai.as_deref(),
            ProviderKind::Gemini => self.endpoints.gemini.as_deref(),
            ProviderKind::DeepSeek => self.endpoints.deepseek.as_deref(),
            ProviderKind::Zhipu => self.endpoints.zhipu.as_deref(),
            ProviderKind::OpenRouter => self.endpoints.openrouter.as_deref(),
        };
        configured.unwrap_or(spec.base_url).to_string()
    }

    /// Sends `prompt` and returns the model's raw text answer.
    pub async fn complete(
        &self,
        provider: ProviderKind,
        prompt: &str,
        api_key: &str,
        model: &str,
    ) -> Result<String, ProviderError> {
        let spec = spec_for(provider);
        let model = spec
            .resolve_model(model)
            .ok_or(ProviderError::MissingModel(provider))?;
        let url = spec.completion_url(&self.base_url(spec), model);
        let body = spec
            .build_request(model, prompt)
            .map_err(|source| ProviderError::Decode { provider, source })?;

        tracing::debug!(target: "provider", %provider, model, "sending classification request");
        let request = spec.authorize(self.http().post(&url), api_key).json(&body);
        let text = send(provider, request).await?;
        spec.parse_response(&text)
            .map_err(|source| ProviderError::Decode { provider, source })
    }

    pub async fn list_models(
        &self,
        provider: ProviderKind,
        api_key: &str,
    ) -> Result<Vec<ModelInfo>, ProviderError> {
        let spec = spec_for(provider);
        let url = spec.models_url(&self.base_url(spec));
        let request = spec.authorize(self.http().get(&url), api_key);

        match send(provider, request).await {
            Ok(text) => spec
                .parse_models(&text)
                .map_err(|source| ProviderError::Decode { provider, source }),
            Err(ProviderError::Status { status, .. })
                if !spec.fallback_models.is_empty()
                    && matches!(status, StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED) =>
            {
                tracing::info!(target: "provider", %provider, %status, "model listing unavailable; using built-in list");
                Ok(spec.fallback_model_list())
            }
            Err(err) => Err(err),
        }
    }
}

async fn send(provider: ProviderKind, request: reqwest::RequestBuilder) -> Result<String, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Transport { provider, source })?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|source| ProviderError::Transport { provider, source })?;
    if !status.is_success() {
        return Err(ProviderError::Status {
            provider,
            status,
            body: text,
        });
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn client_for(server: &MockServer) -> ProviderClient {
        let base = Some(server.uri());
        ProviderClient::new(
            Client::new(),
            ProviderEndpoints {
                openai: base.clone(),
                gemini: base.clone(),
                deepseek: base.clone(),
                zhipu: base.clone(),
                openrouter: base,
            },
        )
    }

    fn chat_body(content: &str) -> serde_json::Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    #[tokio::test]
    async fn openai_uses_bearer_auth_and_chat_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "gpt-4o-mini", "temperature": 0.2 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(r#"{"label":"Work"}"#)))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .complete(ProviderKind::OpenAi, "prompt", "sk-test", "")
            .await
            .unwrap();
        assert_eq!(text, r#"{"label":"Work"}"#);
    }

    #[tokio::test]
    async fn gemini_uses_api_key_header_and_parts_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(json!({ "contents": [{ "role": "user", "parts": [{ "text": "prompt" }] }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "Reading" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .complete(ProviderKind::Gemini, "prompt", "g-key", "models/gemini-1.5-flash")
            .await
            .unwrap();
        assert_eq!(text, "Reading");
    }

    #[tokio::test]
    async fn openrouter_sends_attribution_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("x-title", "AI LeafyTab"))
            .and(header("http-referer", "https://ai-leaftab.local"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("Video")))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .complete(ProviderKind::OpenRouter, "prompt", "or-key", "meta/llama")
            .await
            .unwrap();
        assert_eq!(text, "Video");
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(ProviderKind::DeepSeek, "prompt", "bad", "deepseek-chat")
            .await
            .unwrap_err();
        match err {
            ProviderError::Status { status, body, .. } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_model_fails_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(ProviderKind::Zhipu, "prompt", "key", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingModel(ProviderKind::Zhipu)));
    }

    #[tokio::test]
    async fn zhipu_listing_falls_back_on_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let models = client_for(&server)
            .list_models(ProviderKind::Zhipu, "key")
            .await
            .unwrap();
        assert_eq!(models.first().map(|m| m.id.as_str()), Some("glm-4.7"));
        assert_eq!(models.len(), 7);

        let err = client_for(&server)
            .list_models(ProviderKind::DeepSeek, "key")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Status { .. }));
    }

    #[tokio::test]
    async fn openai_compatible_listing_sorts_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "id": "gpt-4o" }, { "id": "gpt-3.5-turbo" }, { "object": "model" }]
            })))
            .mount(&server)
            .await;

        let models = client_for(&server)
            .list_models(ProviderKind::OpenAi, "key")
            .await
            .unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["gpt-3.5-turbo", "gpt-4o"]);
    }
}
