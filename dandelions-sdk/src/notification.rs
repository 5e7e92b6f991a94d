//! Notifications emitted by the relay pool for the consumer to handle.

use crate::event::Event;

/// What the pool tells the consumer (bot, server, test harness).
#[derive(Debug, Clone)]
pub enum Notification {
    /// WebSocket to a relay is open; subscriptions have been (re)sent.
    RelayConnected { relay: String },

    /// Connection to a relay ended. The pool will retry with backoff.
    RelayDisconnected { relay: String, reason: String },

    /// A verified, de-duplicated event for one of our subscriptions.
    Event {
        relay: String,
        subscription_id: String,
        event: Event,
    },

    /// The relay finished sending stored events for a subscription.
    EndOfStoredEvents {
        relay: String,
        subscription_id: String,
    },

    /// Relay acknowledgement of a published event.
    Ok {
        relay: String,
        event_id: String,
        accepted: bool,
        message: String,
    },

    /// The relay closed a subscription on its side.
    Closed {
        relay: String,
        subscription_id: String,
        message: String,
    },

    /// Human-readable relay notice.
    Notice { relay: String, message: String },
}
