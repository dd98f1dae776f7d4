use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use mynostrspace_client::{ClientError, Session};
use mynostrspace_nostr::{
    Cipher, EventRecord, MemoryMessageStore, MemorySource, NostrError, ProfileDocument, Signer,
    UnsignedEvent, kinds,
};

const ME: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const PEER: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const TARGET: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

/// Signs by numbering events.
struct TestSigner {
    next: AtomicUsize,
}

impl TestSigner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next: AtomicUsize::new(1),
        })
    }
}

#[async_trait]
impl Signer for TestSigner {
    fn public_key(&self) -> &str {
        ME
    }

    async fn sign(&self, unsigned: UnsignedEvent) -> Result<EventRecord, NostrError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(EventRecord {
            id: format!("{n:064x}"),
            author: unsigned.author,
            kind: unsigned.kind,
            created_at: unsigned.created_at,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: "sig".to_string(),
        })
    }
}

/// Reversible prefix "encryption" that rejects anything it did not produce.
#[derive(Default)]
struct TestCipher {
    decrypts: AtomicUsize,
}

#[async_trait]
impl Cipher for TestCipher {
    async fn encrypt(&self, _peer: &str, plaintext: &str) -> Result<String, NostrError> {
        Ok(format!("enc:{plaintext}"))
    }

    async fn decrypt(&self, _peer: &str, ciphertext: &str) -> Result<String, NostrError> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        ciphertext
            .strip_prefix("enc:")
            .map(str::to_string)
            .ok_or_else(|| NostrError::Decryption("bad payload".to_string()))
    }
}

fn target() -> EventRecord {
    EventRecord {
        id: TARGET.to_string(),
        author: PEER.to_string(),
        kind: kinds::TEXT_NOTE,
        created_at: 1_700_000_000,
        tags: vec![],
        content: "gm".to_string(),
        sig: String::new(),
    }
}

fn dm(id: &str, author: &str, recipient: &str, created_at: u64, content: &str) -> EventRecord {
    EventRecord {
        id: id.to_string(),
        author: author.to_string(),
        kind: kinds::ENCRYPTED_DIRECT_MESSAGE,
        created_at,
        tags: vec![vec!["p".to_string(), recipient.to_string()]],
        content: content.to_string(),
        sig: String::new(),
    }
}

fn session(source: &Arc<MemorySource>) -> Session {
    Session::builder(source.clone())
        .signer(TestSigner::new())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_like_publishes_then_updates_stats() {
    let source = MemorySource::new();
    let session = session(&source);
    let interactions = session.interactions().unwrap();

    let stats = interactions.like(&target()).await.unwrap();
    assert_eq!(stats.like_count, 1);
    assert!(stats.liked_by_self);

    let published = source.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].kind, kinds::REACTION);
    assert_eq!(published[0].content, "+");
    assert_eq!(published[0].first_tag_value("e"), Some(TARGET));
    assert_eq!(published[0].first_tag_value("p"), Some(PEER));
    assert_eq!(published[0].first_tag_value("k"), Some("1"));

    // A second like does not double count.
    let again = interactions.like(&target()).await.unwrap();
    assert_eq!(again.like_count, 1);
    assert_eq!(session.stats().get(TARGET), Some(again));
}

#[tokio::test]
async fn test_repost_embeds_target() {
    let source = MemorySource::new();
    let session = session(&source);
    let interactions = session.interactions().unwrap();

    let stats = interactions.repost(&target()).await.unwrap();
    assert_eq!(stats.repost_count, 1);
    assert!(stats.reposted_by_self);

    let published = &source.published()[0];
    assert_eq!(published.kind, kinds::REPOST);
    let embedded: EventRecord = serde_json::from_str(&published.content).unwrap();
    assert_eq!(embedded, target());

    let mut media = target();
    media.kind = kinds::FILE_METADATA;
    media.id = "d".repeat(64);
    interactions.repost(&media).await.unwrap();
    assert_eq!(source.published()[1].kind, kinds::GENERIC_REPOST);
}

#[tokio::test]
async fn test_rejected_publish_leaves_caches_untouched() {
    let source = MemorySource::new();
    source.set_reject_publishes(true);
    let session = session(&source);
    let interactions = session.interactions().unwrap();

    let result = interactions.like(&target()).await;
    assert!(matches!(
        result,
        Err(ClientError::Nostr(NostrError::Publish { .. }))
    ));
    assert_eq!(session.stats().get(TARGET), None);

    let result = interactions
        .publish_profile(ProfileDocument::named("Alice"))
        .await;
    assert!(result.is_err());
    assert_eq!(session.profiles().get(ME), None);
}

#[tokio::test]
async fn test_publish_profile_updates_cache_immediately() {
    let source = MemorySource::new();
    let session = session(&source);
    let interactions = session.interactions().unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    session
        .profiles()
        .update(ME, ProfileDocument::named("Old"))
        .unwrap();
    let _handle = session
        .profiles()
        .subscribe(ME, move |doc| {
            if doc.label() == Some("Alice") {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    let event = interactions
        .publish_profile(ProfileDocument::named("Alice"))
        .await
        .unwrap();

    assert_eq!(event.kind, kinds::METADATA);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(
        session.profiles().get(ME).and_then(|d| d.name),
        Some("Alice".to_string())
    );
}

#[tokio::test]
async fn test_conversation_drops_undecryptable_messages() {
    let source = MemorySource::new().with_events([
        dm("m1", ME, PEER, 10, "enc:hi"),
        dm("m2", PEER, ME, 20, "enc:hello"),
        dm("m3", PEER, ME, 30, "garbage"),
        dm("other", PEER, "someone", 40, "enc:not for me"),
    ]);
    let cipher = Arc::new(TestCipher::default());
    let store = MemoryMessageStore::new();
    let session = Session::builder(source.clone())
        .signer(TestSigner::new())
        .cipher(cipher.clone())
        .message_store(store.clone())
        .build()
        .unwrap();
    let conversations = session.conversations().unwrap();

    let messages = conversations.load(PEER).await.unwrap();
    let texts: Vec<_> = messages.iter().map(|m| m.plaintext.as_str()).collect();
    assert_eq!(texts, vec!["hi", "hello"]);
    assert_eq!(messages[0].author, ME);
    assert_eq!(messages[1].author, PEER);
    assert_eq!(store.len(), 2);
    assert_eq!(cipher.decrypts.load(Ordering::SeqCst), 3);

    // Stored messages are not decrypted again.
    conversations.load(PEER).await.unwrap();
    assert_eq!(cipher.decrypts.load(Ordering::SeqCst), 4);

    assert_eq!(conversations.cached(PEER).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_send_publishes_and_stores() {
    let source = MemorySource::new();
    let store = MemoryMessageStore::new();
    let session = Session::builder(source.clone())
        .signer(TestSigner::new())
        .cipher(Arc::new(TestCipher::default()))
        .message_store(store.clone())
        .build()
        .unwrap();
    let conversations = session.conversations().unwrap();

    let message = conversations.send(PEER, "yo").await.unwrap();
    assert_eq!(message.plaintext, "yo");
    assert_eq!(message.author, ME);

    let published = &source.published()[0];
    assert_eq!(published.kind, kinds::ENCRYPTED_DIRECT_MESSAGE);
    assert_eq!(published.content, "enc:yo");
    assert_eq!(published.first_tag_value("p"), Some(PEER));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_conversations_need_a_cipher() {
    let source = MemorySource::new();
    let session = session(&source);
    assert_eq!(session.public_key(), Some(ME));
    assert!(matches!(
        session.conversations(),
        Err(ClientError::NoCipher)
    ));
}
