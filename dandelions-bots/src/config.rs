//! Settings for the bot and server.
//!
//! Settings come from three layers, later ones winning:
//! 1. a TOML file (`--config`, or `~/.config/dandelions/config.toml` if present)
//! 2. provider API keys from `<PROVIDER>_API_KEY` environment variables
//! 3. command-line flags (which also read their own env vars via clap)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::llm::{ProviderKind, Strategy};

/// Relays used when none are configured.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Dandelions, a helpful assistant living on the Nostr network. \
Answer concisely in plain text (no markdown headings), in the language of the message you reply to.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub nostr: NostrSettings,
    pub mcp: McpSettings,
    pub bot: BotSettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NostrSettings {
    /// `nsec1...` or hex. A fresh key is generated when unset.
    pub private_key: Option<String>,
    pub relays: Vec<String>,
}

impl Default for NostrSettings {
    fn default() -> Self {
        Self {
            private_key: None,
            relays: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    pub host: String,
    pub port: u16,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub system_prompt: String,
    pub db_path: PathBuf,
    pub reply_to_mentions: bool,
    pub reply_to_direct_messages: bool,
    /// Replies longer than this are truncated (in chars).
    pub max_reply_chars: usize,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            db_path: PathBuf::from("data/dandelions.db"),
            reply_to_mentions: true,
            reply_to_direct_messages: true,
            max_reply_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Strategy used when a request names no provider.
    pub strategy: Strategy,
    /// How many providers `best_of_n` queries.
    pub ensemble_size: usize,
    /// Provider tables keyed by provider name. Unknown names are skipped
    /// with a warning when the manager loads.
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::BestOfN,
            ensemble_size: 3,
            providers: BTreeMap::new(),
        }
    }
}

/// One `[llm.providers.<name>]` table. Unset fields take provider defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub enabled: Option<bool>,
    pub priority: Option<u32>,
    pub input_cost_per_mtok: Option<f64>,
    pub output_cost_per_mtok: Option<f64>,
}

/// Flags shared by both binaries.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CommonArgs {
    /// Settings file (TOML)
    #[arg(long, env = "DANDELIONS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Nostr private key, nsec or hex (overrides the settings file)
    #[arg(long, env = "NOSTR_PRIVATE_KEY", hide_env_values = true)]
    pub nostr_private_key: Option<String>,

    /// Relay URL; repeat for several (replaces the configured list)
    #[arg(long = "relay", env = "NOSTR_RELAYS", value_delimiter = ',')]
    pub relays: Vec<String>,

    /// SQLite database for received and sent events
    #[arg(long, env = "DANDELIONS_DB")]
    pub db_path: Option<PathBuf>,
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dandelions")
        .join("config.toml")
}

impl Settings {
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).context("Invalid settings file")
    }

    /// Read settings from `path`, or from the default location if it exists.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file just means built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };
        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings = Self::from_toml(&content)
            .with_context(|| format!("In settings file {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Fill provider API keys from `<PROVIDER>_API_KEY` variables.
    ///
    /// A hosted provider with a key in the environment but no table in the
    /// file is enabled with defaults.
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for kind in ProviderKind::ALL {
            if !kind.requires_api_key() {
                continue;
            }
            let var = format!("{}_API_KEY", kind.as_str().to_ascii_uppercase());
            let Some(key) = env(&var).filter(|k| !k.trim().is_empty()) else {
                continue;
            };
            let entry = self
                .llm
                .providers
                .iter_mut()
                .find(|(name, _)| name.eq_ignore_ascii_case(kind.as_str()))
                .map(|(_, p)| p);
            match entry {
                Some(p) if p.api_key.is_none() => p.api_key = Some(key),
                Some(_) => {}
                None => {
                    self.llm.providers.insert(
                        kind.as_str().to_string(),
                        ProviderSettings {
                            api_key: Some(key),
                            ..Default::default()
                        },
                    );
                }
            }
        }
    }

    pub fn apply_args(&mut self, args: &CommonArgs) {
        if let Some(ref key) = args.nostr_private_key {
            self.nostr.private_key = Some(key.clone());
        }
        if !args.relays.is_empty() {
            self.nostr.relays = args.relays.clone();
        }
        if let Some(ref db) = args.db_path {
            self.bot.db_path = db.clone();
        }
    }

    /// Load, then layer environment and flags on top.
    pub fn resolve(args: &CommonArgs) -> Result<Self> {
        let mut settings = Self::load(args.config.as_deref())?;
        settings.apply_env(|k| std::env::var(k).ok());
        settings.apply_args(args);
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[nostr]
relays = ["wss://relay.example"]

[mcp]
port = 9000

[llm]
strategy = "load_balanced"

[llm.providers.openai]
model = "gpt-4o"
priority = 2

[llm.providers.ollama]
base_url = "http://gpu-box:11434"
model = "llama3"
"#;

    #[test]
    fn parses_sections_and_keeps_defaults() {
        let s = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(s.nostr.relays, vec!["wss://relay.example"]);
        assert_eq!(s.mcp.port, 9000);
        assert_eq!(s.mcp.host, "0.0.0.0");
        assert_eq!(s.llm.strategy, Strategy::LoadBalanced);
        assert_eq!(s.llm.ensemble_size, 3);
        assert_eq!(s.llm.providers["openai"].priority, Some(2));
        assert!(s.bot.reply_to_mentions);
    }

    #[test]
    fn empty_file_means_defaults() {
        let s = Settings::from_toml("").unwrap();
        assert_eq!(s.nostr.relays.len(), DEFAULT_RELAYS.len());
        assert_eq!(s.llm.strategy, Strategy::BestOfN);
        assert!(s.llm.providers.is_empty());
    }

    #[test]
    fn env_keys_fill_and_enable_providers() {
        let mut s = Settings::from_toml(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("GROQ_API_KEY", "gsk-groq"),
            ("ANTHROPIC_API_KEY", "  "),
        ]
        .into_iter()
        .collect();
        s.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(s.llm.providers["openai"].api_key.as_deref(), Some("sk-openai"));
        assert_eq!(s.llm.providers["openai"].model.as_deref(), Some("gpt-4o"));
        assert_eq!(s.llm.providers["groq"].api_key.as_deref(), Some("gsk-groq"));
        assert!(!s.llm.providers.contains_key("anthropic"));
        assert!(s.llm.providers["ollama"].api_key.is_none());
    }

    #[test]
    fn file_key_wins_over_env() {
        let mut s = Settings::from_toml("[llm.providers.mistral]\napi_key = \"from-file\"\n").unwrap();
        s.apply_env(|_| Some("from-env".to_string()));
        assert_eq!(s.llm.providers["mistral"].api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn args_override_file() {
        let mut s = Settings::from_toml(SAMPLE).unwrap();
        s.apply_args(&CommonArgs {
            nostr_private_key: Some("nsec1xyz".to_string()),
            relays: vec!["wss://a".to_string(), "wss://b".to_string()],
            db_path: Some(PathBuf::from("/tmp/x.db")),
            ..Default::default()
        });
        assert_eq!(s.nostr.private_key.as_deref(), Some("nsec1xyz"));
        assert_eq!(s.nostr.relays.len(), 2);
        assert_eq!(s.bot.db_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());

        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap().mcp.port, 9000);
    }
}
