//! Local models through an Ollama server.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Completion, LlmConfig, LlmError, Provider, ProviderKind, Usage};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";

pub struct OllamaProvider {
    base_url: String,
    default_model: String,
    connected: AtomicBool,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
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

    fn http_err(source: reqwest::Error) -> LlmError {
        LlmError::Http {
            provider: ProviderKind::Ollama,
            source,
        }
    }
}

pub fn build_body(system: Option<&str>, prompt: &str, config: &LlmConfig, model: &str) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));
    json!({
        "model": model,
        "messages": messages,
        "stream": false,
        "options": {
            "temperature": config.temperature,
            "num_predict": config.max_tokens,
        },
    })
}

pub fn parse_response(body: Value, requested_model: &str) -> Result<Completion, LlmError> {
    let resp: ChatResponse = serde_json::from_value(body).map_err(|e| LlmError::BadResponse {
        provider: ProviderKind::Ollama,
        detail: e.to_string(),
    })?;
    Ok(Completion {
        content: resp.message.content,
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
        usage: Usage {
            input_tokens: resp.prompt_eval_count,
            output_tokens: resp.eval_count,
        },
    })
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        config: &LlmConfig,
    ) -> Result<Completion, LlmError> {
        let model = config.model.as_deref().unwrap_or(&self.default_model);
        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&build_body(system, prompt, config, model))
            .send()
            .await
            .map_err(Self::http_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: ProviderKind::Ollama,
                status: status.as_u16(),
                body,
            });
        }
        let json: Value = resp.json().await.map_err(Self::http_err)?;
        self.connected.store(true, Ordering::Relaxed);
        parse_response(json, model)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn test_connection(&self) -> Result<bool, LlmError> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(Self::http_err)?;
        let ok = resp.status().is_success();
        self.connected.store(ok, Ordering::Relaxed);
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_disables_streaming() {
        let mut cfg = LlmConfig::new(ProviderKind::Ollama);
        cfg.max_tokens = 256;
        let body = build_body(None, "hi", &cfg, "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 256);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn usage_comes_from_eval_counts() {
        let body = json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "yo"},
            "done": true,
            "prompt_eval_count": 20,
            "eval_count": 2
        });
        let c = parse_response(body, "x").unwrap();
        assert_eq!(c.content, "yo");
        assert_eq!(c.usage.input_tokens, 20);
        assert_eq!(c.usage.output_tokens, 2);
    }

    #[test]
    fn missing_message_is_rejected() {
        assert!(parse_response(json!({"done": true}), "x").is_err());
    }
}
