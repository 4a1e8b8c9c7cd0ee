//! End-to-end flows over the in-memory transport: transport events in,
//! ordered transcript view out.

use meshchat_client::{
    ChatConfig, Direction, SessionContainer, Transcript, TranscriptEvent, TranscriptKind,
    TranscriptStore,
};
use meshchat_transport::{MemoryHub, SessionTransport};
use std::path::Path;
use std::time::Duration;

fn config(storage: &Path) -> ChatConfig {
    ChatConfig {
        display_name: "Me".to_string(),
        service_type: "meshchat-test".to_string(),
        storage_dir: storage.to_path_buf(),
    }
}

/// Poll the store until its snapshot satisfies `pred`, returning that
/// snapshot. Panics if five seconds pass first.
async fn wait_for<F>(store: &TranscriptStore, mut pred: F) -> Vec<Transcript>
where
    F: FnMut(&[Transcript]) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let entries = store.entries().await;
        if pred(&entries) {
            return entries;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time; entries: {entries:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn terminal_for<'a>(entries: &'a [Transcript], name: &str) -> Option<&'a Transcript> {
    entries
        .iter()
        .find(|t| t.resource_name() == Some(name) && t.is_terminal_resource())
}

#[tokio::test]
async fn inbound_resource_lifecycle_yields_single_entry() {
    let storage = tempfile::tempdir().unwrap();
    let hub = MemoryHub::new();

    let (me, my_events) = hub.join("Me").await.unwrap();
    let (_container, transcripts) =
        SessionContainer::start(&config(storage.path()), me, my_events);

    let store = TranscriptStore::new();
    let _consumer = store.attach(transcripts);

    // Alice connects.
    let (alice, _alice_events) = hub.join("Alice").await.unwrap();
    let entries = wait_for(&store, |e| e.len() == 1).await;
    assert_eq!(entries[0].direction, Direction::Local);
    match &entries[0].kind {
        TranscriptKind::Text { body } => assert_eq!(body, "Alice is Connected"),
        other => panic!("unexpected kind: {other:?}"),
    }

    // Alice sends photo.jpg.
    let source_dir = tempfile::tempdir().unwrap();
    let source = source_dir.path().join("photo.jpg");
    tokio::fs::write(&source, vec![1u8; 100]).await.unwrap();

    let peers = alice.connected_peers().await;
    let outbound = alice
        .submit_resource(&peers[0], &source, "photo.jpg")
        .await
        .unwrap();
    outbound.done.await.unwrap().unwrap();

    let entries = wait_for(&store, |e| terminal_for(e, "photo.jpg").is_some()).await;

    // Exactly one entry for the transfer: the in-progress marker was
    // replaced in place, not duplicated.
    assert_eq!(entries.len(), 2);
    let photo_entries: Vec<_> = entries
        .iter()
        .filter(|t| t.resource_name() == Some("photo.jpg"))
        .collect();
    assert_eq!(photo_entries.len(), 1);
    match &photo_entries[0].kind {
        TranscriptKind::ResourceComplete { location, .. } => {
            assert_eq!(location, &storage.path().join("photo.jpg"));
        }
        other => panic!("unexpected kind: {other:?}"),
    }
    assert!(!store.in_flight("photo.jpg").await);
}

#[tokio::test]
async fn outbound_resource_to_two_peers_resolves_once() {
    let storage = tempfile::tempdir().unwrap();
    let hub = MemoryHub::new();

    let (me, my_events) = hub.join("Me").await.unwrap();
    let (container, transcripts) =
        SessionContainer::start(&config(storage.path()), me, my_events);

    let store = TranscriptStore::new();
    let _consumer = store.attach(transcripts);

    let (_alice, _alice_events) = hub.join("Alice").await.unwrap();
    let (_bob, _bob_events) = hub.join("Bob").await.unwrap();
    wait_for(&store, |e| e.len() == 2).await;

    let source_dir = tempfile::tempdir().unwrap();
    let source = source_dir.path().join("notes.txt");
    tokio::fs::write(&source, vec![2u8; 400]).await.unwrap();

    // The send operation returns the provisional local echo synchronously;
    // the consumer appends it itself.
    let provisional = container.send_resource(&source).await.unwrap();
    assert!(provisional.is_in_progress());
    store.apply(TranscriptEvent::Appended(provisional)).await;

    let entries = wait_for(&store, |e| terminal_for(e, "notes.txt").is_some()).await;
    let notes_entries: Vec<_> = entries
        .iter()
        .filter(|t| t.resource_name() == Some("notes.txt"))
        .collect();
    assert_eq!(notes_entries.len(), 1);
    assert_eq!(notes_entries[0].direction, Direction::Sent);
    assert!(matches!(
        notes_entries[0].kind,
        TranscriptKind::ResourceComplete { .. }
    ));
}

#[tokio::test]
async fn text_round_trip_between_two_engines() {
    let storage_a = tempfile::tempdir().unwrap();
    let storage_b = tempfile::tempdir().unwrap();
    let hub = MemoryHub::new();

    let (alice, alice_events) = hub.join("Alice").await.unwrap();
    let (alice_engine, alice_transcripts) =
        SessionContainer::start(&config(storage_a.path()), alice, alice_events);
    let alice_store = TranscriptStore::new();
    let _a = alice_store.attach(alice_transcripts);

    let (bob, bob_events) = hub.join("Bob").await.unwrap();
    let (bob_engine, bob_transcripts) =
        SessionContainer::start(&config(storage_b.path()), bob, bob_events);
    let bob_store = TranscriptStore::new();
    let _b = bob_store.attach(bob_transcripts);

    let echo = alice_engine.send_message("hello bob").await.unwrap();
    assert_eq!(echo.direction, Direction::Sent);
    alice_store.apply(TranscriptEvent::Appended(echo)).await;

    wait_for(&bob_store, |e| {
        e.iter().any(|t| {
            t.direction == Direction::Received
                && matches!(&t.kind, TranscriptKind::Text { body } if body == "hello bob")
        })
    })
    .await;

    let reply = bob_engine.send_message("hi alice").await.unwrap();
    bob_store.apply(TranscriptEvent::Appended(reply)).await;

    wait_for(&alice_store, |e| {
        e.iter().any(|t| {
            t.direction == Direction::Received
                && matches!(&t.kind, TranscriptKind::Text { body } if body == "hi alice")
        })
    })
    .await;
}

#[tokio::test]
async fn failed_durable_copy_resolves_to_failed() {
    // The storage path is an existing file, so persisting the completed
    // transfer cannot create the directory and must fail.
    let scratch = tempfile::tempdir().unwrap();
    let blocked = scratch.path().join("storage");
    tokio::fs::write(&blocked, b"not a directory").await.unwrap();

    let hub = MemoryHub::new();
    let (me, my_events) = hub.join("Me").await.unwrap();
    let (_container, transcripts) = SessionContainer::start(&config(&blocked), me, my_events);

    let store = TranscriptStore::new();
    let _consumer = store.attach(transcripts);

    let (alice, _alice_events) = hub.join("Alice").await.unwrap();

    let source = scratch.path().join("photo.jpg");
    tokio::fs::write(&source, vec![5u8; 100]).await.unwrap();

    let peers = alice.connected_peers().await;
    let outbound = alice
        .submit_resource(&peers[0], &source, "photo.jpg")
        .await
        .unwrap();
    outbound.done.await.unwrap().unwrap();

    let entries = wait_for(&store, |e| terminal_for(e, "photo.jpg").is_some()).await;
    let entry = terminal_for(&entries, "photo.jpg").unwrap();
    match &entry.kind {
        TranscriptKind::ResourceFailed { name, reason } => {
            assert_eq!(name, "photo.jpg");
            assert!(reason.contains("could not persist resource"));
        }
        other => panic!("unexpected kind: {other:?}"),
    }
    assert!(!store.in_flight("photo.jpg").await);
}

#[tokio::test]
async fn cancelled_inbound_transfer_never_sticks_in_progress() {
    let storage = tempfile::tempdir().unwrap();
    let hub = MemoryHub::new();

    let (me, my_events) = hub.join("Me").await.unwrap();
    let (_container, transcripts) =
        SessionContainer::start(&config(storage.path()), me, my_events);

    let store = TranscriptStore::new();
    let _consumer = store.attach(transcripts);

    let (alice, _alice_events) = hub.join("Alice").await.unwrap();

    let source_dir = tempfile::tempdir().unwrap();
    let source = source_dir.path().join("big.bin");
    tokio::fs::write(&source, vec![0u8; 1 << 20]).await.unwrap();

    let peers = alice.connected_peers().await;
    let outbound = alice
        .submit_resource(&peers[0], &source, "big.bin")
        .await
        .unwrap();
    outbound.progress.cancel();
    let _ = outbound.done.await;

    let entries = wait_for(&store, |e| terminal_for(e, "big.bin").is_some()).await;
    let entry = terminal_for(&entries, "big.bin").unwrap();
    assert!(matches!(entry.kind, TranscriptKind::ResourceCancelled { .. }));
    assert!(!store.in_flight("big.bin").await);
}
