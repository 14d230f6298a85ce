//! OpenAI-compatible `chat/completions` generator.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sourcebound_shared::{Generator, LlmConfig, PromptPair, Result, SourceboundError};
use tracing::{debug, instrument};

/// User-Agent string for generation requests.
const USER_AGENT: &str = concat!("Sourcebound/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// ChatCompletionsGenerator
// ---------------------------------------------------------------------------

/// [`Generator`] backed by an OpenAI-compatible HTTP endpoint.
///
/// Every failure (transport, non-2xx, malformed body, no content) is a
/// [`SourceboundError::Generation`].
#[derive(Debug, Clone)]
pub struct ChatCompletionsGenerator {
    client: Client,
    config: LlmConfig,
    api_key: String,
}

impl ChatCompletionsGenerator {
    /// Build a generator, reading the API key from `config.api_key_env`.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SourceboundError::config(format!(
                    "LLM API key not found. Set the {} environment variable.",
                    config.api_key_env
                ))
            })?;
        Self::with_api_key(config, api_key)
    }

    /// Build a generator with an explicit API key.
    pub fn with_api_key(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SourceboundError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(&self, prompt: &PromptPair) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SourceboundError::Generation(format!("{}: {e}", self.config.api_url)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SourceboundError::Generation(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            return Err(SourceboundError::Generation(format!("HTTP {status}: {snippet}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| SourceboundError::Generation(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SourceboundError::Generation("response contained no answer".into()))?;

        debug!(chars = content.len(), "completion received");
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(api_url: String) -> LlmConfig {
        LlmConfig {
            api_url,
            api_key_env: "SB_TEST_GENERATOR_KEY_UNSET".into(),
            model: "test-model".into(),
            temperature: 0.2,
            max_tokens: 64,
            timeout: Duration::from_secs(5),
        }
    }

    fn prompt() -> PromptPair {
        PromptPair {
            system: "be brief".into(),
            user: "User Question: hi".into(),
        }
    }

    #[tokio::test]
    async fn returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "max_tokens": 64,
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "User Question: hi"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "Hello [1]."}},
                    {"message": {"role": "assistant", "content": "ignored"}}
                ]
            })))
            .mount(&server)
            .await;

        let generator = ChatCompletionsGenerator::with_api_key(
            config(format!("{}/v1/chat/completions", server.uri())),
            "secret",
        )
        .unwrap();
        assert_eq!(generator.model(), "test-model");
        assert_eq!(generator.complete(&prompt()).await.unwrap(), "Hello [1].");
    }

    #[tokio::test]
    async fn http_error_is_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let generator =
            ChatCompletionsGenerator::with_api_key(config(server.uri()), "secret").unwrap();
        let err = generator.complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, SourceboundError::Generation(_)));
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn empty_choices_is_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let generator =
            ChatCompletionsGenerator::with_api_key(config(server.uri()), "secret").unwrap();
        let err = generator.complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, SourceboundError::Generation(_)));
    }

    #[tokio::test]
    async fn malformed_json_is_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let generator =
            ChatCompletionsGenerator::with_api_key(config(server.uri()), "secret").unwrap();
        let err = generator.complete(&prompt()).await.unwrap_err();
        assert!(err.to_string().contains("malformed response"));
    }

    #[test]
    fn missing_key_is_config_error() {
        let err = ChatCompletionsGenerator::new(config("http://localhost".into())).unwrap_err();
        assert!(matches!(err, SourceboundError::Config { .. }));
        assert!(err.to_string().contains("SB_TEST_GENERATOR_KEY_UNSET"));
    }
}
