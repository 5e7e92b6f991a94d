//! Multi-provider LLM layer.
//!
//! Every backend implements [`Provider`]; [`manager::LlmManager`] owns the
//! loaded providers and routes requests between them.

pub mod anthropic;
pub mod manager;
pub mod ollama;
pub mod openai;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use manager::{GenerateRequest, LlmManager, ProviderInfo};

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Deepseek,
    Mistral,
    Openai,
    Anthropic,
    Ollama,
    Groq,
    Together,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::Deepseek,
        ProviderKind::Mistral,
        ProviderKind::Openai,
        ProviderKind::Anthropic,
        ProviderKind::Ollama,
        ProviderKind::Groq,
        ProviderKind::Together,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Deepseek => "deepseek",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Openai => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Groq => "groq",
            ProviderKind::Together => "together",
        }
    }

    /// Local backends run without credentials.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LlmError::UnknownProvider(s.to_string()))
    }
}

/// How a request without an explicit provider is routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Ask the first N providers concurrently, keep the best answer.
    #[default]
    BestOfN,
    /// Round-robin across available providers.
    LoadBalanced,
    /// Try providers in priority order until one answers.
    Failover,
}

impl std::str::FromStr for Strategy {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_of_n" => Ok(Strategy::BestOfN),
            "load_balanced" => Ok(Strategy::LoadBalanced),
            "failover" => Ok(Strategy::Failover),
            other => Err(LlmError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Configuration for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub enabled: bool,
    pub priority: u32,
    /// USD per million prompt tokens, for cost reporting.
    pub input_cost_per_mtok: Option<f64>,
    /// USD per million completion tokens.
    pub output_cost_per_mtok: Option<f64>,
}

impl LlmConfig {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: None,
            model: None,
            temperature: 0.7,
            max_tokens: 4096,
            enabled: true,
            priority: 1,
            input_cost_per_mtok: None,
            output_cost_per_mtok: None,
        }
    }

    pub fn from_settings(provider: ProviderKind, s: &crate::config::ProviderSettings) -> Self {
        let d = Self::new(provider);
        Self {
            provider,
            api_key: s.api_key.clone(),
            base_url: s.base_url.clone(),
            model: s.model.clone(),
            temperature: s.temperature.unwrap_or(d.temperature),
            max_tokens: s.max_tokens.unwrap_or(d.max_tokens),
            enabled: s.enabled.unwrap_or(d.enabled),
            priority: s.priority.unwrap_or(d.priority),
            input_cost_per_mtok: s.input_cost_per_mtok,
            output_cost_per_mtok: s.output_cost_per_mtok,
        }
    }

    /// Cost of a call, when both prices are configured.
    pub fn cost(&self, usage: &Usage) -> Option<f64> {
        let input = self.input_cost_per_mtok?;
        let output = self.output_cost_per_mtok?;
        Some(
            (usage.input_tokens as f64 * input + usage.output_tokens as f64 * output) / 1_000_000.0,
        )
    }
}

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn to_map(self) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("input_tokens".to_string(), self.input_tokens),
            ("output_tokens".to_string(), self.output_tokens),
            ("total_tokens".to_string(), self.input_tokens + self.output_tokens),
        ])
    }
}

/// Raw output of a single provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

/// Standardized response returned by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub provider: ProviderKind,
    pub usage: BTreeMap<String, u64>,
    /// Seconds spent in the provider call.
    pub latency: f64,
    pub cost: Option<f64>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("provider {0} not available")]
    ProviderUnavailable(ProviderKind),

    #[error("no LLM providers available")]
    NoProviders,

    #[error("all providers failed: {}", .0.join("; "))]
    AllProvidersFailed(Vec<String>),

    #[error("{provider} is missing an API key")]
    MissingApiKey { provider: ProviderKind },

    #[error("{provider} request failed: {source}")]
    Http {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: ProviderKind,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an unexpected response: {detail}")]
    BadResponse {
        provider: ProviderKind,
        detail: String,
    },
}

/// A backend that turns prompts into completions.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Validate configuration before the provider is put in rotation.
    async fn initialize(&self) -> Result<(), LlmError> {
        Ok(())
    }

    /// Single-turn completion. `config` carries per-request overrides.
    async fn generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        config: &LlmConfig,
    ) -> Result<Completion, LlmError>;

    fn is_connected(&self) -> bool;

    async fn test_connection(&self) -> Result<bool, LlmError>;
}

/// Build the provider implementation for a config.
pub fn build_provider(config: &LlmConfig) -> Result<Arc<dyn Provider>, LlmError> {
    Ok(match config.provider {
        ProviderKind::Anthropic => Arc::new(anthropic::AnthropicProvider::new(config)),
        ProviderKind::Ollama => Arc::new(ollama::OllamaProvider::new(config)),
        ProviderKind::Openai
        | ProviderKind::Deepseek
        | ProviderKind::Mistral
        | ProviderKind::Groq
        | ProviderKind::Together => Arc::new(openai::OpenAiCompatible::new(config)?),
    })
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::Openai);
        assert_eq!(" groq ".parse::<ProviderKind>().unwrap(), ProviderKind::Groq);
        assert!(matches!("gemini".parse::<ProviderKind>(), Err(LlmError::UnknownProvider(_))));
    }

    #[test]
    fn strategy_names() {
        assert_eq!("best_of_n".parse::<Strategy>().unwrap(), Strategy::BestOfN);
        assert_eq!("LOAD_BALANCED".parse::<Strategy>().unwrap(), Strategy::LoadBalanced);
        assert!(matches!("consensus".parse::<Strategy>(), Err(LlmError::UnknownStrategy(_))));
    }

    #[test]
    fn config_defaults() {
        let c = LlmConfig::new(ProviderKind::Mistral);
        assert_eq!(c.temperature, 0.7);
        assert_eq!(c.max_tokens, 4096);
        assert!(c.enabled);
        assert_eq!(c.priority, 1);
    }

    #[test]
    fn cost_needs_both_prices() {
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
        };
        let mut c = LlmConfig::new(ProviderKind::Openai);
        assert_eq!(c.cost(&usage), None);
        c.input_cost_per_mtok = Some(0.15);
        assert_eq!(c.cost(&usage), None);
        c.output_cost_per_mtok = Some(0.60);
        let cost = c.cost(&usage).unwrap();
        assert!((cost - 0.45).abs() < 1e-9);
    }

    #[test]
    fn api_key_is_never_serialized() {
        let mut c = LlmConfig::new(ProviderKind::Openai);
        c.api_key = Some("sk-secret".to_string());
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
