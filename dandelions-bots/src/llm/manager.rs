//! Provider registry and request routing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use super::{LlmConfig, LlmError, LlmResponse, Provider, ProviderKind, Strategy, build_provider};
use crate::config::LlmSettings;

/// One generation request. Unset fields fall back to the provider config
/// or the manager's strategy.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub strategy: Option<Strategy>,
    /// Ensemble size for `best_of_n`.
    pub n: Option<usize>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Status row for one configured provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub enabled: bool,
    pub model: Option<String>,
    pub status: &'static str,
    pub priority: u32,
}

struct Loaded {
    config: LlmConfig,
    provider: Arc<dyn Provider>,
}

pub struct LlmManager {
    configs: BTreeMap<ProviderKind, LlmConfig>,
    /// Sorted by (priority, kind).
    loaded: Vec<Loaded>,
    strategy: Strategy,
    ensemble_size: usize,
    default_provider: RwLock<Option<ProviderKind>>,
    next: AtomicUsize,
}

impl Default for LlmManager {
    fn default() -> Self {
        Self::new(Strategy::default(), 3)
    }
}

impl LlmManager {
    pub fn new(strategy: Strategy, ensemble_size: usize) -> Self {
        Self {
            configs: BTreeMap::new(),
            loaded: Vec::new(),
            strategy,
            ensemble_size: ensemble_size.max(1),
            default_provider: RwLock::new(None),
            next: AtomicUsize::new(0),
        }
    }

    /// Build a manager and load every enabled provider in `settings`.
    pub async fn from_settings(settings: &LlmSettings) -> Self {
        let mut manager = Self::new(settings.strategy, settings.ensemble_size);
        manager.initialize(settings).await;
        manager
    }

    /// Load providers from settings. Failures are logged, never fatal.
    pub async fn initialize(&mut self, settings: &LlmSettings) {
        for (name, provider_settings) in &settings.providers {
            let kind: ProviderKind = match name.parse() {
                Ok(k) => k,
                Err(_) => {
                    tracing::warn!(provider = %name, "Unknown LLM provider in settings, skipping");
                    continue;
                }
            };
            let config = LlmConfig::from_settings(kind, provider_settings);
            self.configs.insert(kind, config.clone());
            if !config.enabled {
                tracing::info!(provider = %kind, "LLM provider disabled");
                continue;
            }

            let provider = match build_provider(&config) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(provider = %kind, error = %e, "Failed to build LLM provider");
                    continue;
                }
            };
            if let Err(e) = provider.initialize().await {
                tracing::error!(provider = %kind, error = %e, "Failed to initialize LLM provider");
                continue;
            }
            tracing::info!(provider = %kind, model = ?config.model, priority = config.priority, "LLM provider loaded");
            self.insert(config, provider);
        }
        if self.loaded.is_empty() {
            tracing::warn!("No LLM providers loaded; generation requests will fail");
        }
    }

    /// Add an already-initialized provider.
    pub fn register(&mut self, config: LlmConfig, provider: Arc<dyn Provider>) {
        self.configs.insert(config.provider, config.clone());
        self.insert(config, provider);
    }

    fn insert(&mut self, config: LlmConfig, provider: Arc<dyn Provider>) {
        self.loaded.retain(|l| l.config.provider != config.provider);
        self.loaded.push(Loaded { config, provider });
        self.loaded
            .sort_by_key(|l| (l.config.priority, l.config.provider));
    }

    /// Loaded providers in routing order.
    pub fn available_providers(&self) -> Vec<ProviderKind> {
        self.loaded.iter().map(|l| l.config.provider).collect()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn default_provider(&self) -> Option<ProviderKind> {
        *self.default_provider.read()
    }

    fn find(&self, kind: ProviderKind) -> Option<&Loaded> {
        self.loaded.iter().find(|l| l.config.provider == kind)
    }

    pub async fn generate(&self, req: GenerateRequest) -> Result<LlmResponse, LlmError> {
        if let Some(kind) = req.provider {
            let entry = self.find(kind).ok_or(LlmError::ProviderUnavailable(kind))?;
            return self.call(entry, &req).await;
        }
        if self.loaded.is_empty() {
            return Err(LlmError::NoProviders);
        }
        if let Some(kind) = self.default_provider() {
            if let Some(entry) = self.find(kind) {
                return self.call(entry, &req).await;
            }
        }

        match req.strategy.unwrap_or(self.strategy) {
            Strategy::LoadBalanced => {
                let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.loaded.len();
                self.call(&self.loaded[idx], &req).await
            }
            Strategy::BestOfN => {
                let n = req.n.unwrap_or(self.ensemble_size).max(1);
                self.best_of_n(n, &req).await
            }
            Strategy::Failover => self.failover(&req).await,
        }
    }

    async fn best_of_n(&self, n: usize, req: &GenerateRequest) -> Result<LlmResponse, LlmError> {
        let calls = self.loaded.iter().take(n).map(|entry| self.call(entry, req));
        let results = futures::future::join_all(calls).await;

        let mut errors = Vec::new();
        let mut best: Option<LlmResponse> = None;
        for result in results {
            match result {
                Ok(resp) => {
                    let longer = best
                        .as_ref()
                        .is_none_or(|b| resp.content.chars().count() > b.content.chars().count());
                    if longer {
                        best = Some(resp);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ensemble member failed");
                    errors.push(e.to_string());
                }
            }
        }
        best.ok_or(LlmError::AllProvidersFailed(errors))
    }

    async fn failover(&self, req: &GenerateRequest) -> Result<LlmResponse, LlmError> {
        let mut errors = Vec::new();
        for entry in &self.loaded {
            match self.call(entry, req).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    tracing::warn!(provider = %entry.config.provider, error = %e, "Provider failed, trying next");
                    errors.push(e.to_string());
                }
            }
        }
        Err(LlmError::AllProvidersFailed(errors))
    }

    async fn call(&self, entry: &Loaded, req: &GenerateRequest) -> Result<LlmResponse, LlmError> {
        let mut config = entry.config.clone();
        if let Some(ref model) = req.model {
            config.model = Some(model.clone());
        }
        if let Some(t) = req.temperature {
            config.temperature = t;
        }
        if let Some(m) = req.max_tokens {
            config.max_tokens = m;
        }

        let started = Instant::now();
        let completion = entry
            .provider
            .generate(req.system.as_deref(), &req.prompt, &config)
            .await?;
        let latency = started.elapsed().as_secs_f64();

        tracing::debug!(
            provider = %config.provider,
            model = %completion.model,
            latency,
            output_tokens = completion.usage.output_tokens,
            "LLM call finished"
        );
        Ok(LlmResponse {
            cost: config.cost(&completion.usage),
            usage: completion.usage.to_map(),
            content: completion.content,
            model: completion.model,
            provider: config.provider,
            latency,
        })
    }

    /// Every configured provider, loaded or not.
    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.configs
            .values()
            .map(|config| {
                let connected = self
                    .find(config.provider)
                    .is_some_and(|l| l.provider.is_connected());
                ProviderInfo {
                    name: config.provider.to_string(),
                    enabled: config.enabled,
                    model: config.model.clone(),
                    status: if connected { "connected" } else { "disconnected" },
                    priority: config.priority,
                }
            })
            .collect()
    }

    /// Probe each loaded provider. Errors count as unreachable.
    pub async fn test_all_providers(&self) -> BTreeMap<String, bool> {
        let probes = self.loaded.iter().map(|l| async move {
            let ok = match l.provider.test_connection().await {
                Ok(ok) => ok,
                Err(e) => {
                    tracing::warn!(provider = %l.config.provider, error = %e, "Connection test failed");
                    false
                }
            };
            (l.config.provider.to_string(), ok)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Route requests without an explicit provider to `kind`.
    pub fn switch_provider(&self, kind: ProviderKind) -> Result<(), LlmError> {
        if self.find(kind).is_none() {
            return Err(LlmError::ProviderUnavailable(kind));
        }
        *self.default_provider.write() = Some(kind);
        tracing::info!(provider = %kind, "Default LLM provider switched");
        Ok(())
    }
}
