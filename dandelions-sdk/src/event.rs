//! NIP-01 events.
//!
//! The event id is the SHA-256 of the canonical array
//! `[0, pubkey, created_at, kind, tags, content]` serialized as compact JSON;
//! `sig` is a BIP-340 signature over that id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{NostrError, Result};
use crate::keys::{Keys, PublicKey};

/// Event kind number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(pub u16);

impl Kind {
    pub const METADATA: Kind = Kind(0);
    pub const TEXT_NOTE: Kind = Kind(1);
    pub const ENCRYPTED_DIRECT_MESSAGE: Kind = Kind(4);
    pub const REACTION: Kind = Kind(7);

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for Kind {
    fn from(k: u16) -> Self {
        Kind(k)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: Kind,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Check that `id` matches the content and `sig` is valid for `pubkey`.
    pub fn verify(&self) -> Result<()> {
        let expected = compute_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)?;
        if hex::encode(expected) != self.id.to_ascii_lowercase() {
            return Err(NostrError::InvalidId);
        }
        let sig = hex::decode(&self.sig).map_err(|_| NostrError::InvalidSignature)?;
        PublicKey::parse(&self.pubkey)?.verify(&expected, &sig)
    }

    /// All values (second element) of tags named `name`.
    pub fn tag_values<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1).map(String::as_str))
    }

    pub fn first_tag(&self, name: &str) -> Option<&str> {
        self.tag_values(name).next()
    }

    /// True if the event carries a `p` tag for `pubkey_hex`.
    pub fn references_pubkey(&self, pubkey_hex: &str) -> bool {
        self.tag_values("p").any(|p| p.eq_ignore_ascii_case(pubkey_hex))
    }
}

/// Compute the NIP-01 event id.
pub fn compute_id(
    pubkey: &str,
    created_at: u64,
    kind: Kind,
    tags: &[Vec<String>],
    content: &str,
) -> Result<[u8; 32]> {
    let canonical = serde_json::to_vec(&(0u8, pubkey, created_at, kind.0, tags, content))?;
    Ok(Sha256::digest(&canonical).into())
}

/// Builder for unsigned events.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: Kind,
    content: String,
    tags: Vec<Vec<String>>,
    created_at: Option<u64>,
}

impl EventBuilder {
    pub fn new(kind: Kind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tags: Vec::new(),
            created_at: None,
        }
    }

    pub fn text_note(content: impl Into<String>) -> Self {
        Self::new(Kind::TEXT_NOTE, content)
    }

    pub fn tags(mut self, tags: Vec<Vec<String>>) -> Self {
        self.tags = tags;
        self
    }

    pub fn tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }

    /// Override the timestamp (seconds since epoch). Defaults to now.
    pub fn created_at(mut self, ts: u64) -> Self {
        self.created_at = Some(ts);
        self
    }

    pub fn sign(self, keys: &Keys) -> Result<Event> {
        let pubkey = keys.public_key_hex();
        let created_at = self
            .created_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64);
        let id = compute_id(&pubkey, created_at, self.kind, &self.tags, &self.content)?;
        let sig = keys.sign(&id)?;
        Ok(Event {
            id: hex::encode(id),
            pubkey,
            created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: hex::encode(sig),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_serialization_matches_nip01() {
        let tags = vec![vec!["p".to_string(), "ab".to_string()]];
        let canonical =
            serde_json::to_string(&(0u8, "deadbeef", 1700000000u64, 1u16, &tags, "hi \"there\"\n"))
                .unwrap();
        assert_eq!(
            canonical,
            r#"[0,"deadbeef",1700000000,1,[["p","ab"]],"hi \"there\"\n"]"#
        );
    }

    #[test]
    fn signed_event_verifies() {
        let keys = Keys::generate();
        let event = EventBuilder::text_note("gm")
            .tag(["t", "nostr"])
            .created_at(1_700_000_000)
            .sign(&keys)
            .unwrap();
        assert_eq!(event.pubkey, keys.public_key_hex());
        assert_eq!(event.id.len(), 64);
        assert_eq!(event.sig.len(), 128);
        event.verify().unwrap();
    }

    #[test]
    fn tampered_content_fails_id_check() {
        let keys = Keys::generate();
        let mut event = EventBuilder::text_note("original").sign(&keys).unwrap();
        event.content = "changed".to_string();
        assert!(matches!(event.verify(), Err(NostrError::InvalidId)));
    }

    #[test]
    fn foreign_signature_fails() {
        let alice = Keys::generate();
        let bob = Keys::generate();
        let mut event = EventBuilder::text_note("hello").created_at(10).sign(&alice).unwrap();
        let forged = EventBuilder::text_note("hello").created_at(10).sign(&bob).unwrap();
        event.sig = forged.sig;
        assert!(matches!(event.verify(), Err(NostrError::InvalidSignature)));
    }

    #[test]
    fn json_round_trip_keeps_validity() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::REACTION, "+")
            .tag(["e", "00"])
            .sign(&keys)
            .unwrap();
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        parsed.verify().unwrap();
    }

    #[test]
    fn tag_helpers() {
        let keys = Keys::generate();
        let event = EventBuilder::text_note("x")
            .tag(["e", "e1", "", "root"])
            .tag(["p", "AA"])
            .tag(["p", "bb"])
            .sign(&keys)
            .unwrap();
        assert_eq!(event.first_tag("e"), Some("e1"));
        assert_eq!(event.tag_values("p").collect::<Vec<_>>(), vec!["AA", "bb"]);
        assert!(event.references_pubkey("aa"));
        assert!(!event.references_pubkey("cc"));
        assert_eq!(event.first_tag("q"), None);
    }
}
