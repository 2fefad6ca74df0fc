//! Subscription filters.
//!
//! A filter selects events by kind, by the indexed `h`/`t` tags, and by a
//! `since` horizon. The in-memory substrate evaluates [`Filter::matches`]
//! directly; the relay client serializes the same struct into a REQ frame.

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::tags;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub kinds: Vec<u32>,
    /// Values for the `h` (hint) tag.
    #[serde(rename = "#h", skip_serializing_if = "Vec::is_empty", default)]
    pub hints: Vec<String>,
    /// Values for the `t` (transfer id) tag.
    #[serde(rename = "#t", skip_serializing_if = "Vec::is_empty", default)]
    pub transfer_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub since: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn transfer(mut self, id: impl Into<String>) -> Self {
        self.transfer_ids.push(id.into());
        self
    }

    pub fn since(mut self, ts: u64) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if !self.hints.is_empty() {
            match event.tag(tags::H) {
                Some(h) if self.hints.iter().any(|v| v == h) => {}
                _ => return false,
            }
        }
        if !self.transfer_ids.is_empty() {
            match event.tag(tags::T) {
                Some(t) if self.transfer_ids.iter().any(|v| v == t) => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKeypair, KIND_DATA, KIND_HANDSHAKE};
    use crate::tags::Tags;

    fn event(kind: u32, hint: Option<&str>, tid: Option<&str>, created_at: u64) -> Event {
        let keys = EventKeypair::generate();
        let mut tags = Tags::new();
        if let Some(h) = hint {
            tags = tags.push(tags::H, h);
        }
        if let Some(t) = tid {
            tags = tags.push(tags::T, t);
        }
        Event::build(&keys, kind, created_at, tags, String::new()).unwrap()
    }

    #[test]
    fn matches_kind_hint_and_since() {
        let ev = event(KIND_HANDSHAKE, Some("a1b2c3d4"), None, 100);

        assert!(Filter::new().kind(KIND_HANDSHAKE).hint("a1b2c3d4").matches(&ev));
        assert!(!Filter::new().kind(KIND_DATA).matches(&ev));
        assert!(!Filter::new().hint("ffffffff").matches(&ev));
        assert!(!Filter::new().since(101).matches(&ev));
        assert!(Filter::new().since(100).matches(&ev));
    }

    #[test]
    fn transfer_id_filter() {
        let ev = event(KIND_DATA, None, Some("0011223344556677"), 5);
        assert!(Filter::new().transfer("0011223344556677").matches(&ev));
        assert!(!Filter::new().transfer("ffffffffffffffff").matches(&ev));
    }

    #[test]
    fn tag_filters_serialize_with_hash_prefix() {
        let f = Filter::new().kind(KIND_DATA).transfer("00ff").since(9);
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("\"#t\""));
        assert!(!json.contains("\"#h\""));
        let back: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
