//! MCP WebSocket messages.
//!
//! Client → server: `tool_call {tool, parameters, call_id}` or `heartbeat`.
//! Server → client: `tool_result`, `heartbeat` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{self, ToolContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outgoing {
    ToolResult {
        call_id: String,
        result: Value,
        error: Option<String>,
    },
    Heartbeat {
        /// Seconds since the Unix epoch.
        timestamp: f64,
    },
    Error {
        call_id: Option<String>,
        error: String,
    },
}

impl Outgoing {
    pub fn error(call_id: Option<String>, error: impl Into<String>) -> Self {
        Outgoing::Error {
            call_id,
            error: error.into(),
        }
    }

    pub fn heartbeat() -> Self {
        let now = chrono::Utc::now();
        Outgoing::Heartbeat {
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    tool: String,
    #[serde(default)]
    parameters: Value,
    call_id: String,
}

/// Handle one text frame and produce the reply.
pub async fn handle_text(ctx: &ToolContext, text: &str) -> Outgoing {
    let message: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Outgoing::error(None, "Invalid JSON"),
    };

    match message.get("type").and_then(Value::as_str) {
        Some("tool_call") => handle_tool_call(ctx, message).await,
        Some("heartbeat") => Outgoing::heartbeat(),
        Some(other) => Outgoing::error(None, format!("Unknown message type: {other}")),
        None => {
            let shown = message.get("type").cloned().unwrap_or(Value::Null);
            Outgoing::error(None, format!("Unknown message type: {shown}"))
        }
    }
}

async fn handle_tool_call(ctx: &ToolContext, message: Value) -> Outgoing {
    let call_id = message
        .get("call_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let call: ToolCall = match serde_json::from_value(message) {
        Ok(c) => c,
        Err(e) => return Outgoing::error(call_id, format!("Invalid tool call: {e}")),
    };

    if !tools::has_tool(&call.tool) {
        return Outgoing::error(Some(call.call_id), format!("Tool not found: {}", call.tool));
    }

    tracing::info!(tool = %call.tool, call_id = %call.call_id, "Tool call");
    match tools::execute_tool(ctx, &call.tool, call.parameters).await {
        Ok(result) => Outgoing::ToolResult {
            call_id: call.call_id,
            result,
            error: None,
        },
        Err(e) => {
            tracing::warn!(tool = %call.tool, call_id = %call.call_id, error = %format!("{e:#}"), "Tool failed");
            Outgoing::error(Some(call.call_id), format!("{e:#}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_keeps_null_error() {
        let out = Outgoing::ToolResult {
            call_id: "c1".to_string(),
            result: json!({"ok": true}),
            error: None,
        };
        let v: Value = serde_json::from_str(&out.to_json()).unwrap();
        assert_eq!(v["type"], "tool_result");
        assert_eq!(v["call_id"], "c1");
        assert!(v["error"].is_null());
        assert!(v.as_object().unwrap().contains_key("error"));
    }

    #[test]
    fn error_shape() {
        let v: Value =
            serde_json::from_str(&Outgoing::error(None, "Invalid JSON").to_json()).unwrap();
        assert_eq!(v, json!({"type": "error", "call_id": null, "error": "Invalid JSON"}));
    }

    #[test]
    fn heartbeat_is_recent() {
        match Outgoing::heartbeat() {
            Outgoing::Heartbeat { timestamp } => {
                assert!(timestamp > 1_600_000_000.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
