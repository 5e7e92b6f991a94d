//! MCP tools: LLM helpers and Nostr access.
//!
//! Each tool takes a JSON object of parameters and returns a JSON result.
//! Errors are reported back to the caller as the tool's error text.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use dandelions_bots::bot::NostrBot;
use dandelions_bots::llm::{GenerateRequest, LlmManager, LlmResponse, ProviderKind, Strategy};
use dandelions_sdk::{Filter, Kind, PublicKey};

/// What tools operate on.
#[derive(Clone)]
pub struct ToolContext {
    pub bot: Arc<NostrBot>,
}

impl ToolContext {
    pub fn new(bot: Arc<NostrBot>) -> Self {
        Self { bot }
    }

    fn llm(&self) -> &LlmManager {
        self.bot.llm()
    }
}

/// Tool definition as listed by `GET /tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn provider_param() -> Value {
    json!({
        "type": "string",
        "description": "Provider to use (deepseek, mistral, openai, anthropic, ollama, groq, together). Defaults to the manager's routing."
    })
}

/// All tools, in the order they are advertised.
pub fn tool_defs() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "generate_text",
            description: "Generate text with the configured LLM providers.",
            input_schema: json!({
                "type": "object",
                "required": ["prompt"],
                "properties": {
                    "prompt": {"type": "string"},
                    "system_prompt": {"type": "string"},
                    "provider": provider_param(),
                    "model": {"type": "string"},
                    "temperature": {"type": "number"},
                    "max_tokens": {"type": "integer"},
                    "strategy": {"type": "string", "enum": ["best_of_n", "load_balanced", "failover"]}
                }
            }),
        },
        ToolDef {
            name: "analyze_sentiment",
            description: "Classify the sentiment of a text as positive, negative, neutral or mixed.",
            input_schema: json!({
                "type": "object",
                "required": ["text"],
                "properties": {
                    "text": {"type": "string"},
                    "provider": provider_param()
                }
            }),
        },
        ToolDef {
            name: "summarize_content",
            description: "Summarize a text in at most `max_length` words.",
            input_schema: json!({
                "type": "object",
                "required": ["content"],
                "properties": {
                    "content": {"type": "string"},
                    "max_length": {"type": "integer", "description": "Word budget (default 100)"},
                    "provider": provider_param()
                }
            }),
        },
        ToolDef {
            name: "translate_text",
            description: "Translate a text into the target language.",
            input_schema: json!({
                "type": "object",
                "required": ["text", "target_language"],
                "properties": {
                    "text": {"type": "string"},
                    "target_language": {"type": "string"},
                    "source_language": {"type": "string"},
                    "provider": provider_param()
                }
            }),
        },
        ToolDef {
            name: "get_llm_status",
            description: "List configured LLM providers with their status.",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDef {
            name: "switch_llm_provider",
            description: "Make a loaded provider the default for requests that name none.",
            input_schema: json!({
                "type": "object",
                "required": ["provider"],
                "properties": {"provider": provider_param()}
            }),
        },
        ToolDef {
            name: "nostr_send_message",
            description: "Publish a Nostr event as the bot. Kind 4 sends an encrypted DM to `recipient`.",
            input_schema: json!({
                "type": "object",
                "required": ["content"],
                "properties": {
                    "content": {"type": "string"},
                    "recipient": {"type": "string", "description": "npub or hex public key"},
                    "kind": {"type": "integer", "description": "Event kind (default 1)"}
                }
            }),
        },
        ToolDef {
            name: "nostr_get_events",
            description: "Read events the bot has received or sent, newest first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "kinds": {"type": "array", "items": {"type": "integer"}},
                    "authors": {"type": "array", "items": {"type": "string"}},
                    "since": {"type": "integer"},
                    "limit": {"type": "integer", "description": "Default 20"}
                }
            }),
        },
    ]
}

pub fn has_tool(name: &str) -> bool {
    tool_defs().iter().any(|t| t.name == name)
}

fn params<T: for<'de> Deserialize<'de>>(tool: &str, input: Value) -> Result<T> {
    let input = if input.is_null() { json!({}) } else { input };
    serde_json::from_value(input).with_context(|| format!("Invalid parameters for {tool}"))
}

fn parse_provider(name: Option<&str>) -> Result<Option<ProviderKind>> {
    name.map(str::parse::<ProviderKind>)
        .transpose()
        .map_err(Into::into)
}

fn response_json(resp: &LlmResponse) -> Value {
    json!({
        "content": resp.content,
        "model": resp.model,
        "provider": resp.provider,
        "usage": resp.usage,
        "latency": resp.latency,
        "cost": resp.cost,
    })
}

#[derive(Deserialize)]
struct GenerateParams {
    prompt: String,
    system_prompt: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    strategy: Option<String>,
}

#[derive(Deserialize)]
struct TextParams {
    text: String,
    provider: Option<String>,
}

#[derive(Deserialize)]
struct SummarizeParams {
    content: String,
    max_length: Option<u32>,
    provider: Option<String>,
}

#[derive(Deserialize)]
struct TranslateParams {
    text: String,
    target_language: String,
    source_language: Option<String>,
    provider: Option<String>,
}

#[derive(Deserialize)]
struct SwitchParams {
    provider: String,
}

#[derive(Deserialize)]
struct SendParams {
    content: String,
    recipient: Option<String>,
    kind: Option<u16>,
}

#[derive(Deserialize)]
struct EventsParams {
    #[serde(default)]
    kinds: Vec<u16>,
    #[serde(default)]
    authors: Vec<String>,
    since: Option<u64>,
    limit: Option<usize>,
}

/// Pull the JSON object out of an LLM answer that may wrap it in prose or
/// code fences.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Run a tool. `name` must be one of [`tool_defs`].
pub async fn execute_tool(ctx: &ToolContext, name: &str, input: Value) -> Result<Value> {
    match name {
        "generate_text" => {
            let p: GenerateParams = params(name, input)?;
            let mut req = GenerateRequest::new(p.prompt);
            req.system = p.system_prompt;
            req.provider = parse_provider(p.provider.as_deref())?;
            req.model = p.model;
            req.temperature = p.temperature;
            req.max_tokens = p.max_tokens;
            req.strategy = p.strategy.as_deref().map(str::parse::<Strategy>).transpose()?;
            let resp = ctx.llm().generate(req).await?;
            Ok(response_json(&resp))
        }

        "analyze_sentiment" => {
            let p: TextParams = params(name, input)?;
            let mut req = GenerateRequest::new(format!(
                "Analyze the sentiment of the following text. Respond with only a JSON object \
                 with keys \"sentiment\" (positive, negative, neutral or mixed), \
                 \"confidence\" (0 to 1) and \"explanation\" (one sentence).\n\nText:\n{}",
                p.text
            ));
            req.provider = parse_provider(p.provider.as_deref())?;
            req.temperature = Some(0.0);
            let resp = ctx.llm().generate(req).await?;
            let mut result = match extract_json_object(&resp.content) {
                Some(Value::Object(obj)) => Value::Object(obj),
                _ => json!({"sentiment": "unknown", "raw": resp.content}),
            };
            result["provider"] = json!(resp.provider);
            result["model"] = json!(resp.model);
            Ok(result)
        }

        "summarize_content" => {
            let p: SummarizeParams = params(name, input)?;
            let max_length = p.max_length.unwrap_or(100);
            let mut req = GenerateRequest::new(format!(
                "Summarize the following content in at most {max_length} words:\n\n{}",
                p.content
            ));
            req.provider = parse_provider(p.provider.as_deref())?;
            let resp = ctx.llm().generate(req).await?;
            Ok(json!({
                "summary": resp.content.trim(),
                "provider": resp.provider,
                "model": resp.model,
            }))
        }

        "translate_text" => {
            let p: TranslateParams = params(name, input)?;
            let from = p
                .source_language
                .as_deref()
                .map(|s| format!(" from {s}"))
                .unwrap_or_default();
            let mut req = GenerateRequest::new(format!(
                "Translate the following text{from} to {}. Reply with the translation only.\n\n{}",
                p.target_language, p.text
            ));
            req.provider = parse_provider(p.provider.as_deref())?;
            let resp = ctx.llm().generate(req).await?;
            Ok(json!({
                "translation": resp.content.trim(),
                "target_language": p.target_language,
                "provider": resp.provider,
                "model": resp.model,
            }))
        }

        "get_llm_status" => {
            let llm = ctx.llm();
            Ok(json!({
                "providers": llm.list_providers(),
                "available": llm.available_providers(),
                "default_provider": llm.default_provider(),
                "strategy": llm.strategy(),
            }))
        }

        "switch_llm_provider" => {
            let p: SwitchParams = params(name, input)?;
            let kind: ProviderKind = p.provider.parse()?;
            ctx.llm().switch_provider(kind)?;
            Ok(json!({"success": true, "provider": kind}))
        }

        "nostr_send_message" => {
            let p: SendParams = params(name, input)?;
            let recipient = p
                .recipient
                .as_deref()
                .map(PublicKey::parse)
                .transpose()
                .context("Invalid recipient")?;
            let kind = Kind(p.kind.unwrap_or(Kind::TEXT_NOTE.as_u16()));
            let event = ctx
                .bot
                .send_message(&p.content, recipient.as_ref(), kind, Vec::new())
                .await?;
            Ok(json!({
                "event_id": event.id,
                "pubkey": event.pubkey,
                "kind": event.kind,
                "created_at": event.created_at,
            }))
        }

        "nostr_get_events" => {
            let p: EventsParams = params(name, input)?;
            let mut filter = Filter::new()
                .kinds(p.kinds.into_iter().map(Kind))
                .limit(p.limit.unwrap_or(20));
            filter.authors = p
                .authors
                .iter()
                .map(|a| PublicKey::parse(a).map(|pk| pk.to_hex()))
                .collect::<Result<Vec<String>, _>>()
                .context("Invalid author")?;
            filter.since = p.since;
            let events = ctx.bot.recent_events(&filter)?;
            Ok(json!({"count": events.len(), "events": events}))
        }

        other => bail!("Tool not found: {other}"),
    }
}
