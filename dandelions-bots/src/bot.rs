//! Nostr bot: relay pool, event dispatch and publishing.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use dandelions_sdk::client::{self, ClientHandle, PoolConfig, ReconnectConfig};
use dandelions_sdk::notification::Notification;
use dandelions_sdk::{Event, EventBuilder, Filter, Keys, Kind, PublicKey, nip04};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::{BotSettings, Settings};
use crate::llm::LlmManager;
use crate::store::{Direction, EventStore};

/// Subscription id used for the mention feed.
pub const MENTIONS_SUBSCRIPTION: &str = "dandelions-mentions";

/// Reacts to events of the kinds it is registered for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, bot: &NostrBot, event: &Event) -> Result<()>;
}

pub struct NostrBot {
    keys: Keys,
    settings: BotSettings,
    relays: Vec<String>,
    reconnect: ReconnectConfig,
    llm: Arc<LlmManager>,
    store: Arc<EventStore>,
    handlers: RwLock<HashMap<Kind, Vec<Arc<dyn EventHandler>>>>,
    client: RwLock<Option<ClientHandle>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NostrBot {
    /// Build a bot. Without a configured key a fresh one is generated; it is
    /// not persisted, so the bot gets a new identity on every start.
    pub fn new(settings: &Settings, llm: Arc<LlmManager>, store: Arc<EventStore>) -> Result<Self> {
        let keys = match settings.nostr.private_key.as_deref() {
            Some(k) if !k.trim().is_empty() => {
                Keys::parse(k.trim()).context("Invalid Nostr private key")?
            }
            _ => {
                let keys = Keys::generate();
                tracing::warn!(
                    npub = %keys.npub(),
                    "No Nostr private key configured, generated a temporary one. \
                     Set NOSTR_PRIVATE_KEY to keep this identity."
                );
                keys
            }
        };
        tracing::info!(npub = %keys.npub(), "Bot identity");

        Ok(Self {
            keys,
            settings: settings.bot.clone(),
            relays: settings.nostr.relays.clone(),
            reconnect: ReconnectConfig::default(),
            llm,
            store,
            handlers: RwLock::new(HashMap::new()),
            client: RwLock::new(None),
            task: Mutex::new(None),
        })
    }

    /// Override reconnect timing (tests use short delays).
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn settings(&self) -> &BotSettings {
        &self.settings
    }

    pub fn llm(&self) -> &Arc<LlmManager> {
        &self.llm
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    /// Relays with an open connection. Empty before `start`.
    pub fn connected_relays(&self) -> Vec<String> {
        self.client
            .read()
            .as_ref()
            .map(|c| c.connected_relays())
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.client.read().as_ref().is_some_and(|c| !c.is_shut_down())
    }

    /// Add a handler for `kind`. Handlers run in registration order.
    pub fn register_handler(&self, kind: Kind, handler: Arc<dyn EventHandler>) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Connect to relays, subscribe to mentions and start dispatching.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_running() {
            bail!("Bot already started");
        }
        let (handle, mut notifications) = client::connect(PoolConfig {
            relays: self.relays.clone(),
            reconnect: self.reconnect.clone(),
        });

        let mentions = Filter::new()
            .kinds([Kind::TEXT_NOTE, Kind::ENCRYPTED_DIRECT_MESSAGE])
            .pubkey_refs([self.keys.public_key_hex()])
            .limit(100);
        handle.subscribe(MENTIONS_SUBSCRIPTION, vec![mentions])?;
        *self.client.write() = Some(handle);

        let bot = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(n) = notifications.recv().await {
                match n {
                    Notification::Event { relay, event, .. } => {
                        tracing::debug!(relay = %relay, event_id = %event.id, kind = %event.kind, "Event received");
                        let bot = Arc::clone(&bot);
                        tokio::spawn(async move { bot.process_event(event).await });
                    }
                    Notification::RelayConnected { relay } => {
                        tracing::info!(relay = %relay, "Relay ready");
                    }
                    Notification::RelayDisconnected { relay, reason } => {
                        tracing::warn!(relay = %relay, reason = %reason, "Relay disconnected");
                    }
                    Notification::Ok {
                        relay,
                        event_id,
                        accepted: false,
                        message,
                    } => {
                        tracing::warn!(relay = %relay, event_id = %event_id, message = %message, "Relay rejected event");
                    }
                    Notification::Ok { .. } | Notification::EndOfStoredEvents { .. } => {}
                    Notification::Closed {
                        relay,
                        subscription_id,
                        message,
                    } => {
                        tracing::warn!(relay = %relay, subscription = %subscription_id, message = %message, "Subscription closed by relay");
                    }
                    Notification::Notice { relay, message } => {
                        tracing::info!(relay = %relay, notice = %message, "Relay notice");
                    }
                }
            }
            tracing::debug!("Notification stream ended");
        });
        *self.task.lock() = Some(task);
        tracing::info!(relays = self.relays.len(), "Bot started");
        Ok(())
    }

    /// Store a received event and run its handlers.
    ///
    /// Events we authored or already stored are skipped. Handler errors are
    /// logged; later handlers still run.
    pub async fn process_event(&self, event: Event) {
        if event.pubkey.eq_ignore_ascii_case(&self.keys.public_key_hex()) {
            return;
        }
        match self.store.insert(&event, Direction::Inbound) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(event_id = %event.id, "Event already processed");
                return;
            }
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "Failed to store event");
                return;
            }
        }

        let handlers = self
            .handlers
            .read()
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            if let Err(e) = handler.handle(self, &event).await {
                tracing::error!(event_id = %event.id, kind = %event.kind, error = %e, "Handler failed");
            }
        }
    }

    /// Sign, publish and record an event.
    ///
    /// Encrypted DMs need a recipient; their content is NIP-04 encrypted.
    /// A recipient always gets a `p` tag.
    pub async fn send_message(
        &self,
        content: &str,
        recipient: Option<&PublicKey>,
        kind: Kind,
        mut tags: Vec<Vec<String>>,
    ) -> Result<Event> {
        let client = self
            .client
            .read()
            .clone()
            .context("Bot is not started")?;

        let content = if kind == Kind::ENCRYPTED_DIRECT_MESSAGE {
            let Some(to) = recipient else {
                bail!("Encrypted direct messages need a recipient");
            };
            nip04::encrypt(&self.keys, to, content)?
        } else {
            content.to_string()
        };
        if let Some(to) = recipient {
            let hex = to.to_hex();
            let tagged = tags
                .iter()
                .any(|t| t.first().is_some_and(|n| n == "p") && t.get(1) == Some(&hex));
            if !tagged {
                tags.push(vec!["p".to_string(), hex]);
            }
        }

        let event = EventBuilder::new(kind, content).tags(tags).sign(&self.keys)?;
        let relays = client.publish(event.clone())?;
        self.store.insert(&event, Direction::Outbound)?;
        tracing::info!(event_id = %event.id, kind = %kind, relays, "Published event");
        Ok(event)
    }

    /// Stored events matching `filter`, newest first.
    pub fn recent_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        self.store.query(filter)
    }

    /// Close subscriptions and relay connections.
    pub fn stop(&self) {
        if let Some(client) = self.client.write().take() {
            client.shutdown();
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        tracing::info!("Bot stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _bot: &NostrBot, _event: &Event) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("boom");
            }
            Ok(())
        }
    }

    fn offline_bot() -> Arc<NostrBot> {
        let mut settings = Settings::default();
        settings.nostr.relays.clear();
        let store = Arc::new(EventStore::in_memory().unwrap());
        Arc::new(NostrBot::new(&settings, Arc::new(LlmManager::default()), store).unwrap())
    }

    #[test]
    fn configured_key_is_used() {
        let keys = Keys::generate();
        let mut settings = Settings::default();
        settings.nostr.private_key = Some(keys.nsec());
        let bot = NostrBot::new(
            &settings,
            Arc::new(LlmManager::default()),
            Arc::new(EventStore::in_memory().unwrap()),
        )
        .unwrap();
        assert_eq!(bot.public_key(), keys.public_key());

        settings.nostr.private_key = Some("nsec1garbage".to_string());
        assert!(
            NostrBot::new(
                &settings,
                Arc::new(LlmManager::default()),
                Arc::new(EventStore::in_memory().unwrap())
            )
            .is_err()
        );
    }

    #[tokio::test]
    async fn handlers_run_once_per_event_and_errors_do_not_stop_others() {
        let bot = offline_bot();
        let failing = Arc::new(Counter { calls: AtomicUsize::new(0), fail: true });
        let ok = Arc::new(Counter { calls: AtomicUsize::new(0), fail: false });
        bot.register_handler(Kind::TEXT_NOTE, failing.clone());
        bot.register_handler(Kind::TEXT_NOTE, ok.clone());

        let other = Keys::generate();
        let ev = EventBuilder::text_note("hi").sign(&other).unwrap();
        bot.process_event(ev.clone()).await;
        bot.process_event(ev).await;

        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn own_events_are_ignored() {
        let bot = offline_bot();
        let h = Arc::new(Counter { calls: AtomicUsize::new(0), fail: false });
        bot.register_handler(Kind::TEXT_NOTE, h.clone());
        let ev = EventBuilder::text_note("me").sign(bot.keys()).unwrap();
        bot.process_event(ev.clone()).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(!bot.store().contains(&ev.id).unwrap());
    }

    #[tokio::test]
    async fn send_requires_start_and_dm_recipient() {
        let bot = offline_bot();
        assert!(bot.send_message("x", None, Kind::TEXT_NOTE, vec![]).await.is_err());

        bot.start().unwrap();
        assert!(bot.start().is_err());
        assert!(
            bot.send_message("x", None, Kind::ENCRYPTED_DIRECT_MESSAGE, vec![])
                .await
                .is_err()
        );
        bot.stop();
        assert!(!bot.is_running());
    }

    #[tokio::test]
    async fn dm_is_encrypted_tagged_and_stored() {
        let bot = offline_bot();
        bot.start().unwrap();
        let friend = Keys::generate();

        let ev = bot
            .send_message(
                "secret",
                Some(&friend.public_key()),
                Kind::ENCRYPTED_DIRECT_MESSAGE,
                vec![],
            )
            .await
            .unwrap();
        assert_ne!(ev.content, "secret");
        assert!(ev.references_pubkey(&friend.public_key_hex()));
        assert_eq!(ev.tag_values("p").count(), 1);
        assert_eq!(nip04::decrypt(&friend, &bot.public_key(), &ev.content).unwrap(), "secret");

        let stored = bot.recent_events(&Filter::new().authors([bot.keys().public_key_hex()])).unwrap();
        assert_eq!(stored, vec![ev]);
        bot.stop();
    }
}
