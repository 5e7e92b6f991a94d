//! Relay pool: one WebSocket per relay, shared subscriptions, fan-out publish.
//!
//! This is the main entry point for SDK consumers. [`connect`] spawns one
//! task per relay and returns a [`ClientHandle`] plus a receiver of
//! [`Notification`]s.
//!
//! ## Reconnection
//!
//! Each relay task reconnects on its own with exponential backoff and jitter
//! (2→4→8→16→30s cap by default). Active subscriptions are re-sent on every
//! successful connect, so consumers never need to re-subscribe.
//!
//! ## Delivery
//!
//! Incoming events are signature-checked and de-duplicated across relays
//! before they reach the consumer. Publishing only reaches relays that are
//! connected at the time of the call.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{NostrError, Result};
use crate::event::Event;
use crate::filter::Filter;
use crate::message::{ClientMessage, RelayMessage};
use crate::notification::Notification;

/// Maximum number of event ids remembered for cross-relay de-duplication.
pub const SEEN_CAPACITY: usize = 10_000;

/// Backoff settings for relay reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

/// Configuration for a relay pool.
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Relay URLs (`ws://` or `wss://`).
    pub relays: Vec<String>,
    pub reconnect: ReconnectConfig,
}

/// Bounded FIFO set of event ids.
struct SeenIds {
    order: VecDeque<String>,
    set: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(1024)),
            set: HashSet::new(),
            capacity,
        }
    }

    /// Returns false if `id` was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity
            && let Some(old) = self.order.pop_front()
        {
            self.set.remove(&old);
        }
        self.order.push_back(id.to_string());
        self.set.insert(id.to_string());
        true
    }
}

struct Shared {
    relays: Vec<String>,
    reconnect: ReconnectConfig,
    subscriptions: Mutex<HashMap<String, Vec<Filter>>>,
    connected: Mutex<HashSet<String>>,
    seen: Mutex<SeenIds>,
    outbound: broadcast::Sender<ClientMessage>,
    shutdown: watch::Sender<bool>,
}

/// A handle to a running relay pool.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    /// Publish a signed event to every connected relay.
    ///
    /// Returns the number of relays it was queued for (0 if none are up).
    pub fn publish(&self, event: Event) -> Result<usize> {
        self.ensure_running()?;
        let id = event.id.clone();
        match self.shared.outbound.send(ClientMessage::Event(event)) {
            Ok(n) => {
                tracing::debug!(event_id = %id, relays = n, "Queued event for publish");
                Ok(n)
            }
            Err(_) => {
                tracing::warn!(event_id = %id, "No relay connected, event not published");
                Ok(0)
            }
        }
    }

    /// Open (or replace) a subscription on all relays.
    pub fn subscribe(&self, subscription_id: &str, filters: Vec<Filter>) -> Result<()> {
        self.ensure_running()?;
        self.shared
            .subscriptions
            .lock()
            .insert(subscription_id.to_string(), filters.clone());
        let _ = self.shared.outbound.send(ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filters,
        });
        Ok(())
    }

    /// Close a subscription on all relays.
    pub fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.ensure_running()?;
        if self.shared.subscriptions.lock().remove(subscription_id).is_some() {
            let _ = self
                .shared
                .outbound
                .send(ClientMessage::Close(subscription_id.to_string()));
        }
        Ok(())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.subscriptions.lock().keys().cloned().collect()
    }

    /// Relay URLs accepted at connect time.
    pub fn relays(&self) -> &[String] {
        &self.shared.relays
    }

    /// Relays with an open WebSocket right now.
    pub fn connected_relays(&self) -> Vec<String> {
        let mut v: Vec<String> = self.shared.connected.lock().iter().cloned().collect();
        v.sort();
        v
    }

    /// Close every relay connection and stop reconnecting.
    pub fn shutdown(&self) {
        let subs: Vec<String> = self.shared.subscriptions.lock().drain().map(|(k, _)| k).collect();
        for id in subs {
            let _ = self.shared.outbound.send(ClientMessage::Close(id));
        }
        self.shared.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(NostrError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Check a relay URL before handing it to the connector.
pub fn validate_relay_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .ok_or_else(|| NostrError::InvalidRelayUrl(format!("{url}: scheme must be ws:// or wss://")))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(NostrError::InvalidRelayUrl(format!("{url}: missing host")));
    }
    Ok(())
}

/// Start the pool. Must be called inside a tokio runtime.
///
/// Invalid relay URLs are logged and skipped.
pub fn connect(config: PoolConfig) -> (ClientHandle, mpsc::Receiver<Notification>) {
    install_crypto_provider();

    let (event_tx, event_rx) = mpsc::channel(4096);
    let (outbound, _) = broadcast::channel(256);
    let (shutdown, _) = watch::channel(false);

    let mut relays = Vec::new();
    for url in config.relays {
        match validate_relay_url(&url) {
            Ok(()) => {
                if !relays.contains(&url) {
                    tracing::info!(relay = %url, "Added relay");
                    relays.push(url);
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to add relay"),
        }
    }

    let shared = Arc::new(Shared {
        relays,
        reconnect: config.reconnect,
        subscriptions: Mutex::new(HashMap::new()),
        connected: Mutex::new(HashSet::new()),
        seen: Mutex::new(SeenIds::new(SEEN_CAPACITY)),
        outbound,
        shutdown,
    });

    for url in shared.relays.clone() {
        let shared = shared.clone();
        let tx = event_tx.clone();
        let shutdown_rx = shared.shutdown.subscribe();
        tokio::spawn(relay_loop(url, shared, tx, shutdown_rx));
    }

    (ClientHandle { shared }, event_rx)
}

fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

async fn relay_loop(
    url: String,
    shared: Arc<Shared>,
    tx: mpsc::Sender<Notification>,
    mut shutdown: watch::Receiver<bool>,
) {
    let cfg = shared.reconnect.clone();
    let mut delay = cfg.initial_delay;
    let mut consecutive_failures = 0u32;

    loop {
        if *shutdown.borrow() || tx.is_closed() {
            break;
        }

        let attempt = tokio::select! {
            r = tokio_tungstenite::connect_async(url.as_str()) => r,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok((ws, _response)) => {
                consecutive_failures = 0;
                delay = cfg.initial_delay;
                tracing::info!(relay = %url, "Relay connected");
                let reason = run_session(&url, ws, &shared, &tx, &mut shutdown).await;
                shared.connected.lock().remove(&url);
                let _ = tx
                    .send(Notification::RelayDisconnected {
                        relay: url.clone(),
                        reason: reason.clone(),
                    })
                    .await;
                if *shutdown.borrow() {
                    break;
                }
                tracing::info!(relay = %url, %reason, delay_secs = delay.as_secs(), "Relay disconnected, will reconnect");
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    relay = %url,
                    error = %e,
                    attempt = consecutive_failures,
                    delay_secs = delay.as_secs(),
                    "Relay connection failed, retrying"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        delay = next_delay(delay, &cfg);
    }

    tracing::debug!(relay = %url, "Relay task finished");
}

/// Exponential backoff with up to 25% jitter, capped at `max_delay`.
fn next_delay(delay: Duration, cfg: &ReconnectConfig) -> Duration {
    let base = delay.as_millis() as u64;
    let jitter = if base / 4 == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..base / 4)
    };
    Duration::from_millis(
        ((base as f64 * cfg.backoff_factor) as u64 + jitter).min(cfg.max_delay.as_millis() as u64),
    )
}

/// Drive one connected session until it ends. Returns the disconnect reason.
async fn run_session<S>(
    url: &str,
    ws: S,
    shared: &Arc<Shared>,
    tx: &mpsc::Sender<Notification>,
    shutdown: &mut watch::Receiver<bool>,
) -> String
where
    S: futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    // Subscribe to outbound before snapshotting subscriptions so nothing is missed.
    let mut outbound = shared.outbound.subscribe();
    shared.connected.lock().insert(url.to_string());

    let resend: Vec<ClientMessage> = shared
        .subscriptions
        .lock()
        .iter()
        .map(|(id, filters)| ClientMessage::Req {
            subscription_id: id.clone(),
            filters: filters.clone(),
        })
        .collect();
    for req in &resend {
        if let Err(e) = send_frame(&mut sink, req).await {
            return e;
        }
    }

    let _ = tx
        .send(Notification::RelayConnected {
            relay: url.to_string(),
        })
        .await;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => handle_frame(url, text.as_str(), shared, tx).await,
                Some(Ok(WsMessage::Close(_))) | None => return "closed by relay".to_string(),
                Some(Ok(_)) => {} // ping/pong/binary
                Some(Err(e)) => return e.to_string(),
            },
            msg = outbound.recv() => match msg {
                Ok(m) => {
                    if let Err(e) = send_frame(&mut sink, &m).await {
                        return e;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(relay = %url, skipped = n, "Outbound queue lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return "pool closed".to_string(),
            },
            _ = shutdown.changed() => {
                // Flush CLOSEs queued by shutdown() before the close frame.
                while let Ok(m) = outbound.try_recv() {
                    let _ = send_frame(&mut sink, &m).await;
                }
                let _ = sink.send(WsMessage::Close(None)).await;
                return "shutdown".to_string();
            }
        }
    }
}

async fn send_frame<K>(sink: &mut K, msg: &ClientMessage) -> std::result::Result<(), String>
where
    K: Sink<WsMessage> + Unpin,
    K::Error: std::fmt::Display,
{
    let json = msg.to_json().map_err(|e| e.to_string())?;
    sink.send(WsMessage::text(json)).await.map_err(|e| e.to_string())
}

async fn handle_frame(url: &str, text: &str, shared: &Shared, tx: &mpsc::Sender<Notification>) {
    let relay = url.to_string();
    let notification = match RelayMessage::parse(text) {
        Ok(RelayMessage::Event {
            subscription_id,
            event,
        }) => {
            if let Err(e) = event.verify() {
                tracing::warn!(relay = %url, event_id = %event.id, error = %e, "Dropping invalid event");
                return;
            }
            if !shared.seen.lock().insert(&event.id) {
                tracing::trace!(relay = %url, event_id = %event.id, "Duplicate event");
                return;
            }
            Notification::Event {
                relay,
                subscription_id,
                event,
            }
        }
        Ok(RelayMessage::Ok {
            event_id,
            accepted,
            message,
        }) => {
            if !accepted {
                tracing::warn!(relay = %url, %event_id, %message, "Relay rejected event");
            }
            Notification::Ok {
                relay,
                event_id,
                accepted,
                message,
            }
        }
        Ok(RelayMessage::EndOfStoredEvents(subscription_id)) => Notification::EndOfStoredEvents {
            relay,
            subscription_id,
        },
        Ok(RelayMessage::Closed {
            subscription_id,
            message,
        }) => Notification::Closed {
            relay,
            subscription_id,
            message,
        },
        Ok(RelayMessage::Notice(message)) => {
            tracing::info!(relay = %url, %message, "Relay notice");
            Notification::Notice { relay, message }
        }
        Ok(RelayMessage::Auth(_)) => {
            tracing::debug!(relay = %url, "Ignoring AUTH challenge");
            return;
        }
        Err(e) => {
            tracing::warn!(relay = %url, error = %e, "Unparseable relay frame");
            return;
        }
    };
    let _ = tx.send(notification).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_ids_evicts_oldest() {
        let mut seen = SeenIds::new(2);
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(seen.insert("c"));
        // "a" was evicted, so it is new again.
        assert!(seen.insert("a"));
        assert!(!seen.insert("c"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let cfg = ReconnectConfig::default();
        let d1 = next_delay(Duration::from_secs(2), &cfg);
        assert!(d1 >= Duration::from_secs(4) && d1 < Duration::from_millis(4500));
        let capped = next_delay(Duration::from_secs(20), &cfg);
        assert_eq!(capped, Duration::from_secs(30));
    }

    #[test]
    fn relay_url_validation() {
        assert!(validate_relay_url("wss://relay.damus.io").is_ok());
        assert!(validate_relay_url("ws://127.0.0.1:7777/").is_ok());
        assert!(validate_relay_url("https://relay.damus.io").is_err());
        assert!(validate_relay_url("wss://").is_err());
        assert!(validate_relay_url("relay.damus.io").is_err());
    }

    #[tokio::test]
    async fn pool_without_relays_publishes_nowhere() {
        let (handle, _rx) = connect(PoolConfig {
            relays: vec!["http://not-a-relay".to_string()],
            ..Default::default()
        });
        assert!(handle.relays().is_empty());

        let keys = crate::keys::Keys::generate();
        let ev = crate::event::EventBuilder::text_note("hi").sign(&keys).unwrap();
        assert_eq!(handle.publish(ev.clone()).unwrap(), 0);

        handle.subscribe("s", vec![Filter::new()]).unwrap();
        assert_eq!(handle.subscriptions(), vec!["s".to_string()]);
        handle.unsubscribe("s").unwrap();
        assert!(handle.subscriptions().is_empty());

        handle.shutdown();
        assert!(handle.is_shut_down());
        assert!(matches!(handle.publish(ev), Err(NostrError::Closed)));
        assert!(matches!(
            handle.subscribe("t", vec![Filter::new()]),
            Err(NostrError::Closed)
        ));
    }
}
