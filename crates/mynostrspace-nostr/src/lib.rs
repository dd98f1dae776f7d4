//! Nostr protocol boundary for MyNostrSpace.
//!
//! This crate holds the event model and the traits through which the rest of
//! the client reaches the outside world. Relay transport, signing, payload
//! encryption, bech32 decoding and on-disk storage are all collaborators
//! behind these traits.
//!
//! ## Features
//!
//! - **Events**: `EventRecord`, kind constants, NIP-10 reply detection
//! - **Filters**: NIP-01 filters with local matching
//! - **EventSource**: fetch / subscribe / count / publish
//! - **Memory**: in-process relay and stores for offline sessions and tests

mod crypto;
mod error;
mod event;
mod filter;
pub mod ident;
pub mod memory;
mod metadata;
mod source;
mod store;

pub use crypto::{Cipher, Signer};
pub use error::NostrError;
pub use event::{EventRecord, UnsignedEvent, kinds, unix_now};
pub use filter::Filter;
pub use ident::{IdentifierDecoder, RawOnly, normalize_identifier};
pub use memory::{MemoryMessageStore, MemoryProfileStore, MemorySource};
pub use metadata::ProfileDocument;
pub use source::{EventSource, PublishReport, RelayMessage, StopHandle, Subscription};
pub use store::{MessageStore, ProfileStore, StoredMessage};
