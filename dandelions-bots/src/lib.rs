//! dandelions-bots: a Nostr bot that answers with LLM output.
//!
//! - [`llm`]: provider clients and the routing manager
//! - [`bot`]: relay pool plus event dispatch
//! - [`handlers`]: default replies to mentions, DMs, reactions and profiles
//! - [`store`]: SQLite event log

pub mod bot;
pub mod config;
pub mod handlers;
pub mod llm;
pub mod logging;
pub mod store;
