//! Subscription controllers and session wiring for MyNostrSpace.
//!
//! This crate provides:
//! - `FeedController`: home, author, global and hashtag timelines with a
//!   pending buffer for live arrivals and cursor pagination
//! - `MediaController`: image and video galleries extracted from notes and
//!   file metadata, deduplicated by canonical URL
//! - `NotificationController`: interactions addressed to the viewer, with an
//!   unread watermark and author blocking
//! - `Interactions` and `ConversationLoader`: publish-then-update actions and
//!   direct messages
//! - `Session`: builds the shared caches and tears every controller down
//!
//! Controllers expose their state as immutable snapshots over a `watch`
//! channel. Relay traffic is batched per display frame before it touches
//! controller state.

mod actions;
pub mod config;
mod conversation;
mod error;
mod feed;
mod media;
mod notifications;
mod session;
mod stream;
mod timeline;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use actions::Interactions;
pub use config::{ClientConfig, FeedConfig, MediaConfig, NotificationConfig};
pub use conversation::ConversationLoader;
pub use error::ClientError;
pub use feed::{FeedController, FeedMode, FeedSnapshot, LoadMoreOutcome};
pub use media::{
    MediaController, MediaGallery, MediaItem, MediaQuery, MediaSnapshot, MediaType,
    canonical_url, classify,
};
pub use notifications::{NOTIFICATION_KINDS, NotificationController, NotificationSnapshot};
pub use session::{Session, SessionBuilder};
pub use stream::Phase;
pub use timeline::Timeline;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Does nothing if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
