//! dandelions-sdk: Nostr protocol client.
//!
//! - [`keys`]: secp256k1 keys, BIP-340 signing, NIP-19 bech32 forms
//! - [`event`]: NIP-01 events, ids and signatures
//! - [`filter`]: subscription filters
//! - [`message`]: relay wire codec
//! - [`nip04`]: encrypted direct messages
//! - [`client`]: relay pool with reconnection

pub mod client;
pub mod error;
pub mod event;
pub mod filter;
pub mod keys;
pub mod message;
pub mod nip04;
pub mod notification;

pub use error::NostrError;
pub use event::{Event, EventBuilder, Kind};
pub use filter::Filter;
pub use keys::{Keys, PublicKey};
