//! Default event handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dandelions_sdk::{Event, Kind, PublicKey, nip04};

use crate::bot::{EventHandler, NostrBot};
use crate::llm::GenerateRequest;

/// Register the stock handlers for text notes, DMs, reactions and metadata.
pub fn register_defaults(bot: &NostrBot) {
    bot.register_handler(Kind::TEXT_NOTE, Arc::new(MentionHandler));
    bot.register_handler(Kind::ENCRYPTED_DIRECT_MESSAGE, Arc::new(DirectMessageHandler));
    bot.register_handler(Kind::REACTION, Arc::new(ReactionHandler));
    bot.register_handler(Kind::METADATA, Arc::new(MetadataHandler));
}

/// Cut `s` to at most `max` chars, marking the cut with an ellipsis.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

async fn ask(bot: &NostrBot, prompt: &str) -> Result<String> {
    let req = GenerateRequest::new(prompt).system(bot.settings().system_prompt.clone());
    let resp = bot.llm().generate(req).await.context("LLM generation failed")?;
    tracing::info!(
        provider = %resp.provider,
        model = %resp.model,
        latency = resp.latency,
        "Generated reply"
    );
    Ok(truncate_chars(resp.content.trim(), bot.settings().max_reply_chars))
}

/// Answers text notes that mention the bot with a threaded reply.
pub struct MentionHandler;

#[async_trait]
impl EventHandler for MentionHandler {
    async fn handle(&self, bot: &NostrBot, event: &Event) -> Result<()> {
        if !bot.settings().reply_to_mentions {
            return Ok(());
        }
        if !event.references_pubkey(&bot.keys().public_key_hex()) {
            return Ok(());
        }
        tracing::info!(event_id = %event.id, author = %event.pubkey, "Mention received");

        let reply = ask(bot, &event.content).await?;
        let author = PublicKey::parse(&event.pubkey)?;
        let mut tags = Vec::new();
        // NIP-10: a note without a root marker starts the thread itself.
        match event
            .tags
            .iter()
            .find(|t| t.first().is_some_and(|n| n == "e") && t.get(3).is_some_and(|m| m == "root"))
            .and_then(|t| t.get(1))
        {
            Some(root) => {
                tags.push(vec!["e".to_string(), root.clone(), String::new(), "root".to_string()]);
                tags.push(vec!["e".to_string(), event.id.clone(), String::new(), "reply".to_string()]);
            }
            None => {
                tags.push(vec!["e".to_string(), event.id.clone(), String::new(), "root".to_string()]);
            }
        }
        tags.push(vec!["p".to_string(), author.to_hex()]);

        bot.send_message(&reply, Some(&author), Kind::TEXT_NOTE, tags)
            .await?;
        Ok(())
    }
}

/// Decrypts DMs and answers with an encrypted DM.
pub struct DirectMessageHandler;

#[async_trait]
impl EventHandler for DirectMessageHandler {
    async fn handle(&self, bot: &NostrBot, event: &Event) -> Result<()> {
        if !bot.settings().reply_to_direct_messages {
            return Ok(());
        }
        let sender = PublicKey::parse(&event.pubkey)?;
        let plaintext = nip04::decrypt(bot.keys(), &sender, &event.content)
            .with_context(|| format!("Failed to decrypt DM {}", event.id))?;
        tracing::info!(event_id = %event.id, author = %event.pubkey, "Direct message received");

        let reply = ask(bot, &plaintext).await?;
        bot.send_message(&reply, Some(&sender), Kind::ENCRYPTED_DIRECT_MESSAGE, vec![])
            .await?;
        Ok(())
    }
}

pub struct ReactionHandler;

#[async_trait]
impl EventHandler for ReactionHandler {
    async fn handle(&self, _bot: &NostrBot, event: &Event) -> Result<()> {
        tracing::info!(
            author = %event.pubkey,
            reaction = %event.content,
            target = event.first_tag("e").unwrap_or("-"),
            "Reaction received"
        );
        Ok(())
    }
}

/// Caches kind-0 profile metadata.
pub struct MetadataHandler;

#[async_trait]
impl EventHandler for MetadataHandler {
    async fn handle(&self, bot: &NostrBot, event: &Event) -> Result<()> {
        let metadata: serde_json::Value = serde_json::from_str(&event.content)
            .with_context(|| format!("Invalid metadata from {}", event.pubkey))?;
        bot.store().set_profile(&event.pubkey, &metadata)?;
        tracing::debug!(pubkey = %event.pubkey, "Profile cached");
        Ok(())
    }
}
