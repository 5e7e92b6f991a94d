//! Anthropic messages API client.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Completion, LlmConfig, LlmError, Provider, ProviderKind, Usage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    connected: AtomicBool,
    http: reqwest::Client,
}

/// Response from the messages API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            default_model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            connected: AtomicBool::new(false),
            http: super::http_client(),
        }
    }

    fn key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(LlmError::MissingApiKey {
                provider: ProviderKind::Anthropic,
            })
    }

    fn post(&self, path: &str) -> Result<reqwest::RequestBuilder, LlmError> {
        Ok(self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", self.key()?)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json"))
    }
}

pub fn build_body(system: Option<&str>, prompt: &str, config: &LlmConfig, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "messages": [{"role": "user", "content": prompt}],
    });
    if let Some(system) = system {
        body["system"] = Value::String(system.to_string());
    }
    body
}

/// Join the text blocks of a messages API response.
pub fn parse_response(body: Value, requested_model: &str) -> Result<Completion, LlmError> {
    let resp: ApiResponse = serde_json::from_value(body).map_err(|e| LlmError::BadResponse {
        provider: ProviderKind::Anthropic,
        detail: e.to_string(),
    })?;
    let content = resp
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");
    Ok(Completion {
        content,
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
        usage: resp.usage.unwrap_or_default(),
    })
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn initialize(&self) -> Result<(), LlmError> {
        self.key()?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        config: &LlmConfig,
    ) -> Result<Completion, LlmError> {
        let model = config.model.as_deref().unwrap_or(&self.default_model);
        let body = build_body(system, prompt, config, model);

        let resp = self
            .post("/messages")?
            .json(&body)
            .send()
            .await
            .map_err(|source| LlmError::Http {
                provider: ProviderKind::Anthropic,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: ProviderKind::Anthropic,
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp.json().await.map_err(|source| LlmError::Http {
            provider: ProviderKind::Anthropic,
            source,
        })?;
        self.connected.store(true, Ordering::Relaxed);
        parse_response(json, model)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// A one-token request; the messages API has no cheaper probe.
    async fn test_connection(&self) -> Result<bool, LlmError> {
        let mut config = LlmConfig::new(ProviderKind::Anthropic);
        config.max_tokens = 1;
        let ok = self.generate(None, "ping", &config).await.is_ok();
        self.connected.store(ok, Ordering::Relaxed);
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_top_level() {
        let cfg = LlmConfig::new(ProviderKind::Anthropic);
        let body = build_body(Some("terse"), "hi", &cfg, DEFAULT_MODEL);
        assert_eq!(body["system"], "terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], 4096);

        let body = build_body(None, "hi", &cfg, DEFAULT_MODEL);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn joins_text_blocks_and_reads_usage() {
        let body = json!({
            "model": "claude-3-5-haiku-20241022",
            "content": [
                {"type": "text", "text": "Hello, "},
                {"type": "tool_use", "id": "t1", "name": "x", "input": {}},
                {"type": "text", "text": "world"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 9, "output_tokens": 4}
        });
        let c = parse_response(body, DEFAULT_MODEL).unwrap();
        assert_eq!(c.content, "Hello, world");
        assert_eq!(c.model, "claude-3-5-haiku-20241022");
        assert_eq!(c.usage.output_tokens, 4);
    }

    #[tokio::test]
    async fn missing_key_fails_initialize() {
        let p = AnthropicProvider::new(&LlmConfig::new(ProviderKind::Anthropic));
        assert!(matches!(p.initialize().await, Err(LlmError::MissingApiKey { .. })));
    }
}
