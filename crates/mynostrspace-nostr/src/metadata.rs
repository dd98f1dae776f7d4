//! Profile metadata documents (kind 0 content).

use serde::{Deserialize, Serialize};

use crate::{EventRecord, NostrError, kinds};

/// A participant's published profile.
///
/// Every field is optional; relays carry whatever the author wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        alias = "displayName",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(rename = "picture", default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    #[serde(rename = "banner", default, skip_serializing_if = "Option::is_none")]
    pub banner_url: Option<String>,
    #[serde(rename = "lud16", default, skip_serializing_if = "Option::is_none")]
    pub lightning_address: Option<String>,
    #[serde(rename = "nip05", default, skip_serializing_if = "Option::is_none")]
    pub nip05_identifier: Option<String>,
    #[serde(rename = "website", default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
}

impl ProfileDocument {
    /// A document with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Parse the content of a kind-0 event.
    pub fn from_event(event: &EventRecord) -> Result<Self, NostrError> {
        if event.kind != kinds::METADATA {
            return Err(NostrError::UnexpectedKind {
                id: event.id.clone(),
                kind: event.kind,
            });
        }
        Ok(serde_json::from_str(&event.content)?)
    }

    /// Serialize for publishing as kind-0 content.
    pub fn to_content(&self) -> Result<String, NostrError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Best name to show: display name, then name.
    pub fn label(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.name.as_deref())
    }
}
