//! Nostr event records and tag helpers.

use serde::{Deserialize, Serialize};

/// Event kinds the client reads or writes.
pub mod kinds {
    /// Profile metadata (replaceable).
    pub const METADATA: u32 = 0;
    /// Short text note.
    pub const TEXT_NOTE: u32 = 1;
    /// Contact list.
    pub const CONTACTS: u32 = 3;
    /// NIP-04 encrypted direct message.
    pub const ENCRYPTED_DIRECT_MESSAGE: u32 = 4;
    /// Repost of a text note.
    pub const REPOST: u32 = 6;
    /// Reaction (like).
    pub const REACTION: u32 = 7;
    /// Repost of any other kind.
    pub const GENERIC_REPOST: u32 = 16;
    /// NIP-94 file metadata.
    pub const FILE_METADATA: u32 = 1063;
    /// Zap receipt.
    pub const ZAP_RECEIPT: u32 = 9735;
}

/// A signed event as delivered by a relay.
///
/// Identity is by `id`: the same id delivered twice, from one relay or many,
/// is one logical event.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "b0b5...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["e", "ff00"], ["p", "b0b5..."]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Content hash, hex.
    pub id: String,
    /// Author public key, hex.
    #[serde(rename = "pubkey")]
    pub author: String,
    pub kind: u32,
    /// Unix seconds.
    pub created_at: u64,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl EventRecord {
    /// Values (second element) of every tag named `name`.
    pub fn tag_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// Value of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tag_values(name).next()
    }

    /// Whether any `e` tag points at `event_id`.
    pub fn references_event(&self, event_id: &str) -> bool {
        self.tag_values("e").any(|v| v == event_id)
    }

    /// Whether any `p` tag points at `participant`.
    pub fn references_participant(&self, participant: &str) -> bool {
        self.tag_values("p").any(|v| v == participant)
    }

    /// The event this one replies to, following NIP-10.
    ///
    /// Marked `reply`/`root` tags win; otherwise the last unmarked `e` tag is
    /// the parent. `mention` tags never make an event a reply.
    pub fn parent_reference(&self) -> Option<&str> {
        let e_tags: Vec<&Vec<String>> = self
            .tags
            .iter()
            .filter(|tag| tag.first().map(String::as_str) == Some("e") && tag.len() >= 2)
            .collect();

        fn marker(tag: &[String]) -> &str {
            tag.get(3).map(String::as_str).unwrap_or("")
        }

        if let Some(tag) = e_tags.iter().find(|tag| marker(tag) == "reply") {
            return Some(tag[1].as_str());
        }
        if let Some(tag) = e_tags.iter().find(|tag| marker(tag) == "root") {
            return Some(tag[1].as_str());
        }
        e_tags
            .iter()
            .rev()
            .find(|tag| marker(tag).is_empty())
            .map(|tag| tag[1].as_str())
    }

    /// Whether this is a reply rather than a root post.
    pub fn is_reply(&self) -> bool {
        self.kind == kinds::TEXT_NOTE && self.parent_reference().is_some()
    }
}

/// An event body awaiting a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    #[serde(rename = "pubkey")]
    pub author: String,
    pub kind: u32,
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    /// Create an event stamped with the current time.
    pub fn new(author: impl Into<String>, kind: u32, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            kind,
            created_at: unix_now(),
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Append a tag.
    pub fn tag<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
