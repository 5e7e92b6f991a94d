//! dandelions-server: MCP tool server for the Dandelions bot.
//!
//! Exposes LLM generation helpers and the bot's Nostr identity as tools that
//! MCP clients call over a WebSocket.

pub mod protocol;
pub mod server;
pub mod tools;

pub use server::McpServer;
pub use tools::ToolContext;
