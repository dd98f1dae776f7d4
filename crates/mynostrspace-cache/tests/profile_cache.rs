//! Integration tests for the profile cache: coalescing, throttling, timeouts,
//! observer delivery and warmup.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;

use mynostrspace_cache::{ProfileCache, ProfileCacheConfig};
use mynostrspace_nostr::{EventRecord, MemoryProfileStore, MemorySource, ProfileDocument, kinds};

fn pk(n: u8) -> String {
    format!("{:064x}", n)
}

fn profile_event(author: &str, created_at: u64, name: &str) -> EventRecord {
    EventRecord {
        id: format!("meta-{author}-{created_at}"),
        author: author.to_string(),
        kind: kinds::METADATA,
        created_at,
        tags: vec![],
        content: format!(r#"{{"name":"{name}"}}"#),
        sig: String::new(),
    }
}

type Seen = Arc<Mutex<Vec<ProfileDocument>>>;

fn recorder() -> (Seen, impl Fn(&ProfileDocument) + Send + Sync + 'static) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |doc: &ProfileDocument| {
        sink.lock().unwrap().push(doc.clone())
    })
}

/// Let spawned work run to completion under the paused clock.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(30)).await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_subscribers_share_one_fetch() {
    let alice = pk(1);
    let source = MemorySource::new().with_events([profile_event(&alice, 10, "alice")]);
    source.set_latency(Duration::from_millis(200));
    let cache = ProfileCache::new(source.clone());

    let (first, l1) = recorder();
    let (second, l2) = recorder();
    let (third, l3) = recorder();
    let _h1 = cache.subscribe(&alice, l1).unwrap();
    let _h2 = cache.subscribe(&alice, l2).unwrap();
    let _h3 = cache.subscribe(&alice, l3).unwrap();
    assert!(cache.is_fetching(&alice));

    settle().await;

    assert_eq!(source.fetch_calls(), 1);
    assert_eq!(cache.network_fetches(), 1);
    for seen in [first, second, third] {
        assert_eq!(*seen.lock().unwrap(), vec![ProfileDocument::named("alice")]);
    }
    assert!(!cache.is_fetching(&alice));
}

#[tokio::test(start_paused = true)]
async fn test_fetches_are_bounded_by_limiter() {
    let events: Vec<_> = (1..=20u8)
        .map(|n| profile_event(&pk(n), 1, &format!("user{n}")))
        .collect();
    let source = MemorySource::new().with_events(events);
    source.set_latency(Duration::from_millis(100));
    let cache = ProfileCache::new(source.clone());

    let handles: Vec<_> = (1..=20u8)
        .map(|n| cache.subscribe(&pk(n), |_: &ProfileDocument| {}).unwrap())
        .collect();

    settle().await;

    assert_eq!(source.fetch_calls(), 20);
    assert!(source.peak_concurrent_fetches() <= 5);
    assert!(cache.limiter().peak() <= 5);
    assert_eq!(cache.limiter().in_flight(), 0);
    for n in 1..=20u8 {
        assert_eq!(cache.get(&pk(n)), Some(ProfileDocument::named(format!("user{n}"))));
    }
    drop(handles);
}

#[tokio::test(start_paused = true)]
async fn test_unresolved_fetch_times_out_as_not_found() {
    let alice = pk(1);
    let source = MemorySource::new().with_events([profile_event(&alice, 10, "alice")]);
    source.set_latency(Duration::from_secs(60));
    let cache = ProfileCache::builder(source.clone())
        .config(ProfileCacheConfig {
            fetch_timeout_ms: 5_000,
            ..ProfileCacheConfig::default()
        })
        .build();

    let (seen, listener) = recorder();
    let _handle = cache.subscribe(&alice, listener).unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(!cache.is_fetching(&alice));
    assert_eq!(cache.get(&alice), None);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_profile_never_delivers_absent_value() {
    let source = MemorySource::new();
    let cache = ProfileCache::new(source.clone());

    let (seen, listener) = recorder();
    let _handle = cache.subscribe(&pk(7), listener).unwrap();
    settle().await;

    assert_eq!(source.fetch_calls(), 1);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_on_cold_key_fires_exactly_once() {
    let bob = pk(2);
    let source = MemorySource::new().with_events([profile_event(&bob, 3, "bob")]);
    let cache = ProfileCache::new(source);

    let (seen, listener) = recorder();
    let _handle = cache.subscribe(&bob, listener).unwrap();
    settle().await;

    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cached_subscribe_fires_immediately_without_fetch() {
    let source = MemorySource::new();
    let cache = ProfileCache::new(source.clone());
    let carol = pk(3);
    assert!(cache.ingest(&profile_event(&carol, 5, "carol")));

    let (seen, listener) = recorder();
    let _handle = cache.subscribe(&carol, listener).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![ProfileDocument::named("carol")]);
    settle().await;
    assert_eq!(source.fetch_calls(), 0);
}

#[tokio::test]
async fn test_update_notifies_synchronously_and_unsubscribe_detaches() {
    let cache = ProfileCache::new(MemorySource::new());
    let me = pk(9);
    cache.ingest(&profile_event(&me, 1, "before"));

    let (seen, listener) = recorder();
    let handle = cache.subscribe(&me, listener).unwrap();
    cache.update(&me, ProfileDocument::named("after")).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![ProfileDocument::named("before"), ProfileDocument::named("after")]
    );

    handle.unsubscribe();
    handle.unsubscribe();
    cache.update(&me, ProfileDocument::named("later")).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_picks_up_newer_profile() {
    let dave = pk(4);
    let source = MemorySource::new().with_events([profile_event(&dave, 1, "old")]);
    let cache = ProfileCache::new(source.clone());

    let (seen, listener) = recorder();
    let _handle = cache.subscribe(&dave, listener).unwrap();
    settle().await;

    source.inject(profile_event(&dave, 2, "new"));
    cache.refresh(&dave).unwrap();
    settle().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![ProfileDocument::named("old"), ProfileDocument::named("new")]
    );
    assert_eq!(source.fetch_calls(), 2);
}

#[tokio::test]
async fn test_identifier_forms_share_a_key() {
    let cache = ProfileCache::new(MemorySource::new());
    let erin = pk(5);
    cache.ingest(&profile_event(&erin, 1, "erin"));

    let prefixed = format!("nostr:{}", erin.to_uppercase());
    assert_eq!(cache.get(&prefixed), Some(ProfileDocument::named("erin")));
}

#[tokio::test]
async fn test_warm_up_loads_in_chunks_from_store() {
    let store = MemoryProfileStore::new();
    for n in 1..=120u8 {
        store.insert(profile_event(&pk(n), 1, &format!("p{n}")));
    }
    let source = MemorySource::new();
    let cache = ProfileCache::builder(source.clone())
        .store(store.clone())
        .build();

    let loaded = cache.warm_up((1..=120u8).map(pk)).await;

    assert_eq!(loaded, 120);
    assert_eq!(store.loads(), 3);
    assert_eq!(source.fetch_calls(), 0);
    assert_eq!(cache.get(&pk(120)), Some(ProfileDocument::named("p120")));
}

#[tokio::test]
async fn test_warm_up_skips_cached_ids_and_needs_a_store() {
    let cache = ProfileCache::new(MemorySource::new());
    assert_eq!(cache.warm_up([pk(1)]).await, 0);

    let store = MemoryProfileStore::new();
    store.insert(profile_event(&pk(1), 1, "stale"));
    let cache = ProfileCache::builder(MemorySource::new())
        .store(store.clone())
        .build();
    cache.ingest(&profile_event(&pk(1), 5, "fresh"));

    assert_eq!(cache.warm_up([pk(1), pk(1)]).await, 0);
    assert_eq!(store.loads(), 0);
    assert_eq!(cache.get(&pk(1)), Some(ProfileDocument::named("fresh")));
}
