//! Participant and event identifier normalization.

use crate::NostrError;

/// Decodes encoded references (`npub…`, `nprofile…`, `note…`, `nevent…`)
/// to raw hex ids.
pub trait IdentifierDecoder: Send + Sync {
    /// Return the raw id, or `None` if `encoded` is not a form this decoder
    /// understands.
    fn decode(&self, encoded: &str) -> Option<String>;
}

/// Decoder that understands no encoded forms; only raw ids normalize.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawOnly;

impl IdentifierDecoder for RawOnly {
    fn decode(&self, _encoded: &str) -> Option<String> {
        None
    }
}

/// Whether `s` is a 64-character hex id.
pub fn is_raw_id(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalize an identifier to the raw lowercase hex form used as cache key.
///
/// Accepts raw hex ids, encoded references, and either of those behind a
/// `nostr:` URI prefix. Both forms of the same id normalize identically.
pub fn normalize_identifier(
    input: &str,
    decoder: &dyn IdentifierDecoder,
) -> Result<String, NostrError> {
    let trimmed = input.trim();
    let bare = trimmed.strip_prefix("nostr:").unwrap_or(trimmed);

    if is_raw_id(bare) {
        return Ok(bare.to_ascii_lowercase());
    }

    match decoder.decode(bare) {
        Some(raw) if is_raw_id(&raw) => Ok(raw.to_ascii_lowercase()),
        _ => Err(NostrError::InvalidIdentifier(input.to_string())),
    }
}
