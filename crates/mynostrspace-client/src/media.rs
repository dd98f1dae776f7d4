//! Media galleries.
//!
//! Events are classified into at most one media item each. The gallery is
//! deduplicated by canonical URL, so the same external video posted under
//! different URL spellings shows once.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use regex::Regex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use mynostrspace_nostr::{
    EventRecord, EventSource, Filter, IdentifierDecoder, NostrError, StopHandle, kinds,
    normalize_identifier,
};

use crate::config::MediaConfig;
use crate::error::ClientError;
use crate::feed::LoadMoreOutcome;
use crate::stream::{FrameSink, PageGuard, Phase, pump};

static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s<>"']+?\.(?:jpe?g|png|gif|webp|avif|svg)\b(?:\?[^\s<>"']*)?"#)
        .unwrap()
});

static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s<>"']+?\.(?:mp4|webm|mov|m4v|ogv)\b(?:\?[^\s<>"']*)?"#).unwrap()
});

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)https?://(?:www\.|m\.|music\.)?(?:youtube\.com/(?:watch\?(?:\S*?&)?v=|shorts/|embed/|live/)|youtu\.be/)([A-Za-z0-9_-]+)",
    )
    .unwrap()
});

static VIMEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.|player\.)?vimeo\.com/(?:video/)?(\d+)").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

/// One gallery entry, tied to the event it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Id of the source event.
    pub id: String,
    pub url: String,
    /// Dedup key. See [`canonical_url`].
    pub canonical_url: String,
    pub media_type: MediaType,
    pub created_at: u64,
    pub source: Arc<EventRecord>,
    pub thumbnail_url: Option<String>,
}

impl MediaItem {
    fn new(
        source: &Arc<EventRecord>,
        url: &str,
        media_type: MediaType,
        thumbnail_url: Option<String>,
    ) -> Self {
        Self {
            id: source.id.clone(),
            url: url.to_string(),
            canonical_url: canonical_url(url),
            media_type,
            created_at: source.created_at,
            source: Arc::clone(source),
            thumbnail_url,
        }
    }
}

/// Extract the first media reference from `event`.
///
/// File-metadata events take their URL from the `url` tag. Other events are
/// scanned in order for an image URL, a video file URL, a YouTube link and a
/// Vimeo link; the first kind that matches wins.
pub fn classify(event: &Arc<EventRecord>) -> Option<MediaItem> {
    if event.kind == kinds::FILE_METADATA {
        return classify_file_metadata(event);
    }

    let content = event.content.as_str();
    if let Some(m) = IMAGE_URL.find(content) {
        return Some(MediaItem::new(event, m.as_str(), MediaType::Image, None));
    }
    if let Some(m) = VIDEO_URL.find(content) {
        return Some(MediaItem::new(event, m.as_str(), MediaType::Video, None));
    }
    if let Some(caps) = YOUTUBE_URL.captures(content) {
        let thumbnail = format!("https://img.youtube.com/vi/{}/hqdefault.jpg", &caps[1]);
        return Some(MediaItem::new(
            event,
            &caps[0],
            MediaType::Video,
            Some(thumbnail),
        ));
    }
    if let Some(m) = VIMEO_URL.find(content) {
        return Some(MediaItem::new(event, m.as_str(), MediaType::Video, None));
    }
    None
}

fn classify_file_metadata(event: &Arc<EventRecord>) -> Option<MediaItem> {
    let url = event.first_tag_value("url")?;
    let media_type = match event.first_tag_value("m") {
        Some(mime) if mime.starts_with("image/") => MediaType::Image,
        Some(mime) if mime.starts_with("video/") => MediaType::Video,
        Some(_) => return None,
        None if IMAGE_URL.is_match(url) => MediaType::Image,
        None if VIDEO_URL.is_match(url) => MediaType::Video,
        None => return None,
    };
    let thumbnail = event
        .first_tag_value("thumb")
        .or_else(|| event.first_tag_value("image"))
        .map(str::to_string);
    Some(MediaItem::new(event, url, media_type, thumbnail))
}

/// Dedup key for a media URL.
///
/// YouTube links of any form collapse to the watch URL, Vimeo links to the
/// plain video page; other URLs lose their fragment.
pub fn canonical_url(url: &str) -> String {
    let url = url.trim();
    if let Some(id) = leading_capture(&YOUTUBE_URL, url) {
        return format!("https://www.youtube.com/watch?v={id}");
    }
    if let Some(id) = leading_capture(&VIMEO_URL, url) {
        return format!("https://vimeo.com/{id}");
    }
    url.split('#').next().unwrap_or(url).to_string()
}

/// First capture group of `re`, only when the match starts the string.
fn leading_capture<'a>(re: &Regex, url: &'a str) -> Option<&'a str> {
    re.captures(url)
        .filter(|caps| caps.get(0).is_some_and(|m| m.start() == 0))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Bounded, canonical-URL-unique, newest-first list of media items.
#[derive(Debug, Clone)]
pub struct MediaGallery {
    items: Vec<MediaItem>,
    cap: usize,
}

impl MediaGallery {
    pub fn new(cap: usize) -> Self {
        Self {
            items: Vec::new(),
            cap: cap.max(1),
        }
    }

    /// Merge `new_items`, dedup by canonical URL (existing entries win),
    /// re-sort and truncate. Returns how many new items were retained.
    pub fn add_items<I>(&mut self, new_items: I) -> usize
    where
        I: IntoIterator<Item = MediaItem>,
    {
        let previous: HashSet<String> = self.items.iter().map(|i| i.id.clone()).collect();
        let mut seen = HashSet::new();

        let mut merged: Vec<MediaItem> = std::mem::take(&mut self.items)
            .into_iter()
            .chain(new_items)
            .filter(|item| seen.insert(item.canonical_url.clone()))
            .collect();
        merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        merged.truncate(self.cap);
        self.items = merged;

        self.items
            .iter()
            .filter(|item| !previous.contains(&item.id))
            .count()
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }
}

/// Whose media a gallery shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaQuery {
    Author(String),
    Following(Vec<String>),
    Global,
}

impl MediaQuery {
    pub fn normalized(self, decoder: &dyn IdentifierDecoder) -> Result<Self, NostrError> {
        Ok(match self {
            MediaQuery::Author(author) => {
                MediaQuery::Author(normalize_identifier(&author, decoder)?)
            }
            MediaQuery::Following(authors) => MediaQuery::Following(
                authors
                    .iter()
                    .map(|a| normalize_identifier(a, decoder))
                    .collect::<Result<_, _>>()?,
            ),
            MediaQuery::Global => MediaQuery::Global,
        })
    }

    fn filter(&self, wanted: &[u32]) -> Filter {
        let filter = Filter::new().kinds(wanted.iter().copied());
        match self {
            MediaQuery::Author(author) => filter.authors([author.clone()]),
            MediaQuery::Following(authors) => filter.authors(authors.iter().cloned()),
            MediaQuery::Global => filter,
        }
    }
}

/// Immutable view of a gallery.
#[derive(Debug, Clone, Default)]
pub struct MediaSnapshot {
    pub phase: Phase,
    pub items: Vec<MediaItem>,
    pub has_more: bool,
}

struct MediaState {
    phase: Phase,
    gallery: MediaGallery,
    /// Oldest event seen, media or not. Pages continue below it.
    oldest_seen: Option<u64>,
    cursor: Option<u64>,
    has_more: bool,
}

impl MediaState {
    fn snapshot(&self) -> MediaSnapshot {
        MediaSnapshot {
            phase: self.phase,
            items: self.gallery.items().to_vec(),
            has_more: self.has_more,
        }
    }

    fn observe(&mut self, created_at: u64) {
        self.oldest_seen = Some(self.oldest_seen.map_or(created_at, |o| o.min(created_at)));
    }
}

struct MediaInner {
    source: Arc<dyn EventSource>,
    query: MediaQuery,
    config: MediaConfig,
    state: Mutex<MediaState>,
    snapshots: watch::Sender<MediaSnapshot>,
    loading_more: AtomicBool,
    stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
}

impl MediaInner {
    fn lock(&self) -> MutexGuard<'_, MediaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &MediaState) {
        self.snapshots.send_replace(state.snapshot());
    }
}

impl FrameSink for MediaInner {
    fn apply_frame(&self, events: Vec<EventRecord>) {
        let mut state = self.lock();
        if !matches!(state.phase, Phase::Loading | Phase::Live) {
            return;
        }
        let mut items = Vec::new();
        for event in events.into_iter().map(Arc::new) {
            state.observe(event.created_at);
            items.extend(classify(&event));
        }
        if state.gallery.add_items(items) > 0 {
            self.publish(&state);
        }
    }

    fn end_of_stored_events(&self) {
        let mut state = self.lock();
        if state.phase != Phase::Loading {
            return;
        }
        state.phase = Phase::Live;
        state.cursor = state.oldest_seen;
        debug!(items = state.gallery.len(), "media history complete");
        self.publish(&state);
    }

    fn closed(&self) {
        let mut state = self.lock();
        if state.phase != Phase::Stopped {
            state.phase = Phase::Stopped;
            self.publish(&state);
        }
    }
}

/// Subscription controller for one media gallery.
pub struct MediaController {
    inner: Arc<MediaInner>,
}

impl MediaController {
    pub fn new(source: Arc<dyn EventSource>, query: MediaQuery, config: MediaConfig) -> Self {
        let state = MediaState {
            phase: Phase::Idle,
            gallery: MediaGallery::new(config.cap),
            oldest_seen: None,
            cursor: None,
            has_more: true,
        };
        let (snapshots, _) = watch::channel(state.snapshot());
        let (stop, stop_rx) = StopHandle::new();
        Self {
            inner: Arc::new(MediaInner {
                source,
                query,
                config,
                state: Mutex::new(state),
                snapshots,
                loading_more: AtomicBool::new(false),
                stop,
                stop_rx,
            }),
        }
    }

    pub async fn start(&self) -> Result<(), ClientError> {
        {
            let mut state = self.inner.lock();
            if state.phase != Phase::Idle {
                return Err(ClientError::AlreadyStarted("media"));
            }
            state.phase = Phase::Loading;
            self.inner.publish(&state);
        }

        let filter = self
            .inner
            .query
            .filter(&[kinds::TEXT_NOTE, kinds::FILE_METADATA])
            .limit(self.inner.config.initial_limit);
        let subscription = match self.inner.source.subscribe(filter).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(query = ?self.inner.query, error = %e, "media subscription failed");
                let mut state = self.inner.lock();
                if state.phase == Phase::Loading {
                    state.phase = Phase::Idle;
                    self.inner.publish(&state);
                }
                return Err(e.into());
            }
        };

        info!(query = ?self.inner.query, "media gallery started");
        tokio::spawn(pump(
            Arc::clone(&self.inner),
            subscription,
            self.inner.stop_rx.clone(),
            self.inner.config.frame_interval(),
        ));
        Ok(())
    }

    /// Stop the subscription. Idempotent.
    pub fn stop(&self) {
        self.inner.stop.stop();
        self.inner.closed();
    }

    /// Fetch the next older page of file-metadata events.
    pub async fn load_more(&self) -> Result<LoadMoreOutcome, ClientError> {
        let Some(_guard) = PageGuard::try_acquire(&self.inner.loading_more) else {
            return Ok(LoadMoreOutcome::AlreadyLoading);
        };

        let cursor = {
            let state = self.inner.lock();
            if !state.has_more {
                return Ok(LoadMoreOutcome::Exhausted);
            }
            state.cursor.or(state.oldest_seen)
        };

        let mut filter = self
            .inner
            .query
            .filter(&[kinds::FILE_METADATA])
            .limit(self.inner.config.page_size);
        if let Some(until) = cursor {
            filter = filter.until(until);
        }
        let page = self.inner.source.fetch(&filter).await?;

        let mut state = self.inner.lock();
        let Some(oldest) = page.iter().map(|e| e.created_at).min() else {
            state.has_more = false;
            self.inner.publish(&state);
            return Ok(LoadMoreOutcome::Exhausted);
        };

        let items: Vec<MediaItem> = page
            .into_iter()
            .map(Arc::new)
            .filter_map(|event| classify(&event))
            .collect();
        let retained = state.gallery.add_items(items);
        if retained == 0 && state.gallery.is_full() {
            state.has_more = false;
            self.inner.publish(&state);
            debug!(query = ?self.inner.query, "media gallery full");
            return Ok(LoadMoreOutcome::Full);
        }

        state.observe(oldest);
        state.cursor = Some(oldest.saturating_sub(1));
        self.inner.publish(&state);
        Ok(LoadMoreOutcome::Loaded(retained))
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn snapshot(&self) -> MediaSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<MediaSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.inner.stop.clone()
    }
}

impl Drop for MediaController {
    fn drop(&mut self) {
        self.inner.stop.stop();
    }
}
