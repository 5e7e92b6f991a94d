//! NIP-01 subscription filters.

use serde::{Deserialize, Serialize};

use crate::event::{Event, Kind};

/// A subscription filter. Empty lists and unset bounds are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<Kind>,
    #[serde(rename = "#e", default, skip_serializing_if = "Vec::is_empty")]
    pub event_refs: Vec<String>,
    #[serde(rename = "#p", default, skip_serializing_if = "Vec::is_empty")]
    pub pubkey_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = String>) -> Self {
        self.authors = authors.into_iter().collect();
        self
    }

    pub fn pubkey_refs(mut self, pubkeys: impl IntoIterator<Item = String>) -> Self {
        self.pubkey_refs = pubkeys.into_iter().collect();
        self
    }

    pub fn event_refs(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.event_refs = ids.into_iter().collect();
        self
    }

    pub fn since(mut self, ts: u64) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn until(mut self, ts: u64) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Every present field must match; within a field any value may match.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| id.eq_ignore_ascii_case(&event.id)) {
            return false;
        }
        if !self.authors.is_empty()
            && !self.authors.iter().any(|a| a.eq_ignore_ascii_case(&event.pubkey))
        {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.event_refs.is_empty() {
            let mut refs = event.tag_values("e");
            if !refs.any(|r| self.event_refs.iter().any(|e| e.eq_ignore_ascii_case(r))) {
                return false;
            }
        }
        if !self.pubkey_refs.is_empty() && !self.pubkey_refs.iter().any(|p| event.references_pubkey(p)) {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBuilder;
    use crate::keys::Keys;

    #[test]
    fn serializes_tag_filters_with_hash_names() {
        let f = Filter::new()
            .kinds([Kind::TEXT_NOTE, Kind::ENCRYPTED_DIRECT_MESSAGE])
            .pubkey_refs(["abc".to_string()])
            .limit(100);
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json, serde_json::json!({"kinds": [1, 4], "#p": ["abc"], "limit": 100}));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let keys = Keys::generate();
        let ev = EventBuilder::text_note("x").sign(&keys).unwrap();
        assert!(Filter::new().matches(&ev));
    }

    #[test]
    fn fields_are_anded_values_are_ored() {
        let keys = Keys::generate();
        let ev = EventBuilder::text_note("x")
            .tag(["p", "target"])
            .created_at(500)
            .sign(&keys)
            .unwrap();

        let f = Filter::new()
            .kinds([Kind::TEXT_NOTE, Kind::REACTION])
            .authors([keys.public_key_hex(), "other".to_string()]);
        assert!(f.matches(&ev));

        assert!(!f.clone().kinds([Kind::REACTION]).matches(&ev));
        assert!(Filter::new().pubkey_refs(["target".to_string()]).matches(&ev));
        assert!(!Filter::new().pubkey_refs(["nobody".to_string()]).matches(&ev));
        assert!(!Filter::new().event_refs(["e1".to_string()]).matches(&ev));
    }

    #[test]
    fn time_bounds_are_inclusive() {
        let keys = Keys::generate();
        let ev = EventBuilder::text_note("x").created_at(500).sign(&keys).unwrap();
        assert!(Filter::new().since(500).until(500).matches(&ev));
        assert!(!Filter::new().since(501).matches(&ev));
        assert!(!Filter::new().until(499).matches(&ev));
    }
}
