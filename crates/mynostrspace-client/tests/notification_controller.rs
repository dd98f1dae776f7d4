use std::time::Duration;

use pretty_assertions::assert_eq;

use mynostrspace_client::{
    ClientError, FeedMode, NOTIFICATION_KINDS, NotificationConfig, NotificationController, Phase,
    Session,
};
use mynostrspace_nostr::{
    EventRecord, IdentifierDecoder, MemorySource, NostrError, kinds, unix_now,
};

const VIEWER: &str = "viewer";

fn interaction(id: &str, author: &str, kind: u32, age_secs: u64) -> EventRecord {
    EventRecord {
        id: id.to_string(),
        author: author.to_string(),
        kind,
        created_at: unix_now() - age_secs,
        tags: vec![vec!["p".to_string(), VIEWER.to_string()]],
        content: String::new(),
        sig: String::new(),
    }
}

fn controller(source: &std::sync::Arc<MemorySource>, blocked: &[&str]) -> NotificationController {
    NotificationController::new(
        source.clone(),
        VIEWER,
        blocked.iter().map(|b| b.to_string()),
        NotificationConfig::default(),
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn test_subscribes_to_recent_interactions() {
    let source = MemorySource::new().with_events([
        interaction("like", "bob", kinds::REACTION, 60),
        interaction("zap", "carol", kinds::ZAP_RECEIPT, 120),
        interaction("ancient", "bob", kinds::REACTION, 30 * 86_400),
        interaction("dm", "bob", kinds::ENCRYPTED_DIRECT_MESSAGE, 10),
    ]);
    let notifications = controller(&source, &[]);
    notifications.start().await.unwrap();
    settle().await;

    let snapshot = notifications.snapshot();
    assert_eq!(snapshot.phase, Phase::Live);
    let ids: Vec<_> = snapshot.items.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["like", "zap"]);

    let filter = &source.subscribe_log()[0];
    assert_eq!(filter.kinds, Some(NOTIFICATION_KINDS.to_vec()));
    assert_eq!(filter.tags.get(&'p'), Some(&vec![VIEWER.to_string()]));
    let since = filter.since.unwrap();
    assert!(unix_now() - since >= 7 * 86_400);
}

#[tokio::test(start_paused = true)]
async fn test_own_and_blocked_events_are_hidden() {
    let source = MemorySource::new();
    let notifications = controller(&source, &["troll"]);
    notifications.start().await.unwrap();
    settle().await;

    source.inject(interaction("own", VIEWER, kinds::TEXT_NOTE, 5));
    source.inject(interaction("troll", "troll", kinds::REPOST, 5));
    source.inject(interaction("ok", "bob", kinds::REPOST, 5));
    settle().await;

    let ids: Vec<_> = notifications
        .snapshot()
        .items
        .iter()
        .map(|e| e.id.clone())
        .collect();
    assert_eq!(ids, vec!["ok"]);

    notifications.block("bob");
    assert!(notifications.snapshot().items.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unread_follows_the_watermark() {
    let source = MemorySource::new().with_events([interaction("a", "bob", kinds::REACTION, 30)]);
    let notifications = controller(&source, &[]);
    notifications.start().await.unwrap();
    settle().await;
    assert!(notifications.is_unread());

    notifications.mark_all_read();
    assert!(!notifications.is_unread());

    source.inject(interaction("b", "bob", kinds::REACTION, 0));
    settle().await;
    let snapshot = notifications.snapshot();
    assert!(snapshot.unread);
    assert_eq!(snapshot.items[0].id, "b");
}

#[tokio::test(start_paused = true)]
async fn test_list_is_capped_newest_first() {
    let source = MemorySource::new().with_events(
        (0..70u64).map(|n| interaction(&format!("n{n}"), "bob", kinds::REACTION, 1_000 - n)),
    );
    let notifications = controller(&source, &[]);
    notifications.start().await.unwrap();
    settle().await;

    let snapshot = notifications.snapshot();
    assert_eq!(snapshot.items.len(), 50);
    assert_eq!(snapshot.items[0].id, "n69");
    assert!(
        snapshot
            .items
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at)
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_restart_rules() {
    let source = MemorySource::new();
    let notifications = controller(&source, &[]);
    notifications.start().await.unwrap();
    assert!(matches!(
        notifications.start().await,
        Err(ClientError::AlreadyStarted("notifications"))
    ));

    settle().await;
    notifications.stop();
    settle().await;
    assert_eq!(notifications.phase(), Phase::Stopped);
    assert_eq!(source.open_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_redelivery_does_not_change_the_list() {
    let like = interaction("like", "bob", kinds::REACTION, 10);
    let source = MemorySource::new().with_events([like.clone()]);
    let notifications = controller(&source, &[]);
    notifications.start().await.unwrap();
    settle().await;
    let before = notifications.snapshot().items;

    source.inject(like.clone());
    source.inject(like);
    settle().await;

    let after = notifications.snapshot().items;
    assert_eq!(after.len(), before.len());
    assert_eq!(after[0].id, before[0].id);
}

const RAW_VIEWER: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";

struct NpubDecoder;

impl IdentifierDecoder for NpubDecoder {
    fn decode(&self, encoded: &str) -> Option<String> {
        (encoded == "npub1me").then(|| RAW_VIEWER.to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_normalizes_the_viewer() {
    let mut like = interaction("like", "bob", kinds::REACTION, 10);
    like.tags = vec![vec!["p".to_string(), RAW_VIEWER.to_string()]];
    let source = MemorySource::new().with_events([like]);
    let session = Session::builder(source.clone())
        .decoder(std::sync::Arc::new(NpubDecoder))
        .build()
        .unwrap();

    let upper = RAW_VIEWER.to_uppercase();
    for viewer in [RAW_VIEWER, "npub1me", upper.as_str(), "nostr:npub1me"] {
        let notifications = session.notifications(viewer, Vec::<String>::new()).unwrap();
        notifications.start().await.unwrap();
        settle().await;
        assert_eq!(notifications.snapshot().items.len(), 1, "viewer {viewer}");
        notifications.stop();
    }

    assert!(matches!(
        session.notifications("npub1someone", Vec::<String>::new()),
        Err(ClientError::Nostr(NostrError::InvalidIdentifier(_)))
    ));
    assert!(matches!(
        session.notifications(RAW_VIEWER, ["not-an-id"]),
        Err(ClientError::Nostr(NostrError::InvalidIdentifier(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_session_normalizes_feed_authors() {
    let source = MemorySource::new();
    let session = Session::builder(source.clone())
        .decoder(std::sync::Arc::new(NpubDecoder))
        .build()
        .unwrap();

    let feed = session
        .feed(FeedMode::Author("npub1me".to_string()))
        .unwrap();
    feed.start().await.unwrap();
    settle().await;
    assert_eq!(
        source.subscribe_log()[0].authors,
        Some(vec![RAW_VIEWER.to_string()])
    );

    assert!(
        session
            .feed(FeedMode::Following(vec!["bogus".to_string()]))
            .is_err()
    );
}
