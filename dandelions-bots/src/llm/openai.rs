//! OpenAI-compatible chat completions.
//!
//! OpenAI, DeepSeek, Mistral, Groq and Together all speak the same
//! `/chat/completions` dialect; only the base URL and default model differ.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Completion, LlmConfig, LlmError, Provider, ProviderKind, Usage};

/// Default base URL and model per provider.
pub fn defaults(kind: ProviderKind) -> (&'static str, &'static str) {
    match kind {
        ProviderKind::Deepseek => ("https://api.deepseek.com/v1", "deepseek-chat"),
        ProviderKind::Mistral => ("https://api.mistral.ai/v1", "mistral-small-latest"),
        ProviderKind::Groq => ("https://api.groq.com/openai/v1", "llama-3.1-8b-instant"),
        ProviderKind::Together => (
            "https://api.together.xyz/v1",
            "meta-llama/Llama-3.3-70B-Instruct-Turbo",
        ),
        _ => ("https://api.openai.com/v1", "gpt-4o-mini"),
    }
}

pub struct OpenAiCompatible {
    kind: ProviderKind,
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    connected: AtomicBool,
    http: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let kind = config.provider;
        if matches!(kind, ProviderKind::Anthropic | ProviderKind::Ollama) {
            return Err(LlmError::BadResponse {
                provider: kind,
                detail: "not an OpenAI-compatible provider".to_string(),
            });
        }
        let (base, model) = defaults(kind);
        Ok(Self {
            kind,
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| base.to_string())
                .trim_end_matches('/')
                .to_string(),
            default_model: config.model.clone().unwrap_or_else(|| model.to_string()),
            connected: AtomicBool::new(false),
            http: super::http_client(),
        })
    }

    fn key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(LlmError::MissingApiKey { provider: self.kind })
    }
}

/// Request body for `/chat/completions`.
pub fn build_body(system: Option<&str>, prompt: &str, config: &LlmConfig, model: &str) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));
    json!({
        "model": model,
        "messages": messages,
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
    })
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Extract the first choice from a `/chat/completions` response.
pub fn parse_response(kind: ProviderKind, body: Value, requested_model: &str) -> Result<Completion, LlmError> {
    let resp: ChatResponse = serde_json::from_value(body).map_err(|e| LlmError::BadResponse {
        provider: kind,
        detail: e.to_string(),
    })?;
    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::BadResponse {
            provider: kind,
            detail: "no choices in response".to_string(),
        })?;
    let usage = resp
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();
    Ok(Completion {
        content,
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
        usage,
    })
}

#[async_trait]
impl Provider for OpenAiCompatible {
    fn kind(&self) -> ProviderKind {
        self.kind
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
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.key()?)
            .json(&body)
            .send()
            .await
            .map_err(|source| LlmError::Http {
                provider: self.kind,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: self.kind,
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp.json().await.map_err(|source| LlmError::Http {
            provider: self.kind,
            source,
        })?;
        self.connected.store(true, Ordering::Relaxed);
        parse_response(self.kind, json, model)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn test_connection(&self) -> Result<bool, LlmError> {
        let resp = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(self.key()?)
            .send()
            .await
            .map_err(|source| LlmError::Http {
                provider: self.kind,
                source,
            })?;
        let ok = resp.status().is_success();
        self.connected.store(ok, Ordering::Relaxed);
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_includes_system_and_overrides() {
        let mut cfg = LlmConfig::new(ProviderKind::Openai);
        cfg.temperature = 0.2;
        cfg.max_tokens = 64;
        let body = build_body(Some("be brief"), "hello", &cfg, "gpt-4o");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["max_tokens"], 64);
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);

        let no_system = build_body(None, "hello", &cfg, "gpt-4o");
        assert_eq!(no_system["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn parses_choice_and_usage() {
        let body = json!({
            "model": "deepseek-chat",
            "choices": [{"message": {"role": "assistant", "content": "hi!"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        });
        let c = parse_response(ProviderKind::Deepseek, body, "x").unwrap();
        assert_eq!(c.content, "hi!");
        assert_eq!(c.model, "deepseek-chat");
        assert_eq!(c.usage.input_tokens, 12);
        assert_eq!(c.usage.output_tokens, 3);
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = parse_response(ProviderKind::Groq, json!({"choices": []}), "m").unwrap_err();
        assert!(matches!(err, LlmError::BadResponse { .. }));
    }

    #[tokio::test]
    async fn initialize_requires_key() {
        let cfg = LlmConfig::new(ProviderKind::Together);
        let p = OpenAiCompatible::new(&cfg).unwrap();
        assert!(matches!(p.initialize().await, Err(LlmError::MissingApiKey { .. })));
        assert!(!p.is_connected());
    }

    #[test]
    fn base_url_and_model_defaults() {
        let cfg = LlmConfig::new(ProviderKind::Mistral);
        let p = OpenAiCompatible::new(&cfg).unwrap();
        assert_eq!(p.base_url, "https://api.mistral.ai/v1");
        assert_eq!(p.default_model, "mistral-small-latest");

        let mut cfg = LlmConfig::new(ProviderKind::Openai);
        cfg.base_url = Some("http://localhost:8000/v1/".to_string());
        let p = OpenAiCompatible::new(&cfg).unwrap();
        assert_eq!(p.base_url, "http://localhost:8000/v1");
    }
}
