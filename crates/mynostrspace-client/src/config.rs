//! Session configuration.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! [profiles]
//! max_concurrent_fetches = 5
//!
//! [feed]
//! cap = 200
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mynostrspace_cache::{ProfileCacheConfig, StatsCacheConfig};

use crate::error::ClientError;

/// Flush interval for buffered stream updates, roughly one display frame.
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;
pub const DEFAULT_FEED_CAP: usize = 150;
pub const DEFAULT_MEDIA_CAP: usize = 150;
pub const DEFAULT_NOTIFICATION_CAP: usize = 50;
pub const DEFAULT_NOTIFICATION_WINDOW_DAYS: u64 = 7;

const SECONDS_PER_DAY: u64 = 86_400;

/// Feed controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Maximum events retained in each timeline.
    pub cap: usize,
    /// Limit on the initial historical subscription.
    pub initial_limit: usize,
    /// Events requested per `load_more` page.
    pub page_size: usize,
    pub frame_interval_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            cap: DEFAULT_FEED_CAP,
            initial_limit: 50,
            page_size: 50,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
        }
    }
}

impl FeedConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Media controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub cap: usize,
    pub initial_limit: usize,
    pub page_size: usize,
    pub frame_interval_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cap: DEFAULT_MEDIA_CAP,
            initial_limit: 100,
            page_size: 50,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
        }
    }
}

impl MediaConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Notification controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub cap: usize,
    /// Only interactions from the last `window_days` are requested.
    pub window_days: u64,
    pub frame_interval_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            cap: DEFAULT_NOTIFICATION_CAP,
            window_days: DEFAULT_NOTIFICATION_WINDOW_DAYS,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
        }
    }
}

impl NotificationConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn window_secs(&self) -> u64 {
        self.window_days.saturating_mul(SECONDS_PER_DAY)
    }
}

/// Configuration for a whole session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub profiles: ProfileCacheConfig,
    pub stats: StatsCacheConfig,
    pub feed: FeedConfig,
    pub media: MediaConfig,
    pub notifications: NotificationConfig,
}

impl ClientConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, ClientError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ClientError> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Reject settings that would stall or empty a component.
    ///
    /// All problems are reported together.
    pub fn validate(&self) -> Result<(), ClientError> {
        let checks = [
            (self.profiles.max_concurrent_fetches, "profiles.max_concurrent_fetches"),
            (self.profiles.warmup_chunk_size, "profiles.warmup_chunk_size"),
            (self.stats.chunk_size, "stats.chunk_size"),
            (self.stats.max_concurrent_counts, "stats.max_concurrent_counts"),
            (self.feed.cap, "feed.cap"),
            (self.feed.page_size, "feed.page_size"),
            (self.media.cap, "media.cap"),
            (self.media.page_size, "media.page_size"),
            (self.notifications.cap, "notifications.cap"),
        ];

        let problems: Vec<String> = checks
            .iter()
            .filter(|(value, _)| *value == 0)
            .map(|(_, field)| format!("{field} must be greater than zero"))
            .collect();

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ClientError::Config(problems.join("; ")))
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileCacheConfig) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_stats(mut self, stats: StatsCacheConfig) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_media(mut self, media: MediaConfig) -> Self {
        self.media = media;
        self
    }

    pub fn with_notifications(mut self, notifications: NotificationConfig) -> Self {
        self.notifications = notifications;
        self
    }
}
