//! Integration tests exercising the full `Engine` against
//! `MaildirBackend`, covering the seed scenarios: single write,
//! supersession, concurrent writers, broken messages, tombstones, and
//! snapshot convergence.
//!
//! Each test opens a fresh temp directory as the backing store; where
//! a scenario calls for "two engines sharing a folder" (concurrent
//! writers, snapshot convergence), a second `Engine` is built against
//! the same `MaildirBackend` directory to stand in for a second
//! process observing the same folder.

use ifap::{Engine, EngineConfig, MaildirBackend, Mode};
use std::sync::Arc;
use tempfile::TempDir;

async fn engine_in(dir: &TempDir) -> Engine {
    let backend = MaildirBackend::open(dir.path()).await.unwrap();
    Engine::new(Arc::new(backend), EngineConfig::default())
}

#[tokio::test]
async fn single_write_round_trips_with_encryption() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;
    engine.set_encryption_key("hunter2").await;

    let mut handle = engine.open("a/b.txt", Mode::Write, None).await.unwrap();
    handle.write_all(b"hello").unwrap();
    engine.close(handle).await.unwrap();

    // A fresh engine over the same folder sees the write only after
    // it reconciles.
    let fresh = engine_in(&dir).await;
    fresh.synchronize(false, false).await.unwrap();
    let mut read = fresh.open("a/b.txt", Mode::Read, None).await.unwrap();
    assert_eq!(read.read_all().unwrap(), b"hello");
}

#[tokio::test]
async fn supersession_keeps_latest_and_queues_old_version() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    let mut v1 = engine.open("f", Mode::Write, None).await.unwrap();
    v1.write_all(b"one").unwrap();
    engine.close(v1).await.unwrap();

    let mut v2 = engine.open("f", Mode::Write, None).await.unwrap();
    v2.write_all(b"two").unwrap();
    engine.close(v2).await.unwrap();

    let outcome = engine.synchronize(false, false).await.unwrap();

    let mut read = engine.open("f", Mode::Read, None).await.unwrap();
    assert_eq!(read.read_all().unwrap(), b"two");
    assert_eq!(outcome.to_delete.len(), 1, "the v1 sequence should be queued for deletion under default retention");
}

#[tokio::test]
async fn concurrent_writers_converge_on_the_later_append() {
    let dir = TempDir::new().unwrap();
    let engine_x = engine_in(&dir).await;
    let engine_y = engine_in(&dir).await;

    let mut from_x = engine_x.open("f", Mode::Write, None).await.unwrap();
    from_x.write_all(b"X").unwrap();
    engine_x.close(from_x).await.unwrap();
    engine_x.flush().await.unwrap();

    let mut from_y = engine_y.open("f", Mode::Write, None).await.unwrap();
    from_y.write_all(b"Y").unwrap();
    engine_y.close(from_y).await.unwrap();
    engine_y.flush().await.unwrap();

    engine_x.synchronize(false, false).await.unwrap();
    engine_y.synchronize(false, false).await.unwrap();

    let mut read_x = engine_x.open("f", Mode::Read, None).await.unwrap();
    let mut read_y = engine_y.open("f", Mode::Read, None).await.unwrap();
    assert_eq!(read_x.read_all().unwrap(), b"Y");
    assert_eq!(read_y.read_all().unwrap(), b"Y");
}

#[tokio::test]
async fn broken_message_does_not_block_subsequent_writes() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    // Inject a message the codec cannot parse directly through the
    // backend, below the engine's own API.
    let backend = MaildirBackend::open(dir.path()).await.unwrap();
    backend.select("FILE_STORAGE").await.unwrap();
    backend.append("FILE_STORAGE", b"not an ifap message at all").await.unwrap();

    let mut handle = engine.open("still/works.txt", Mode::Write, None).await.unwrap();
    handle.write_all(b"ok").unwrap();
    engine.close(handle).await.unwrap();

    let outcome = engine.synchronize(false, false).await.unwrap();
    assert_eq!(outcome.broken.len(), 1);

    let mut read = engine.open("still/works.txt", Mode::Read, None).await.unwrap();
    assert_eq!(read.read_all().unwrap(), b"ok");
}

#[tokio::test]
async fn tombstone_then_snapshot_keeps_path_gone_on_a_clean_engine() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    let mut handle = engine.open("g", Mode::Write, None).await.unwrap();
    handle.write_all(b"soon gone").unwrap();
    engine.close(handle).await.unwrap();
    engine.flush().await.unwrap();

    engine.remove("g", None).await.unwrap();
    engine.synchronize(true, true).await.unwrap();

    assert!(engine.open("g", Mode::Read, None).await.is_err());

    let clean = engine_in(&dir).await;
    clean.synchronize(false, false).await.unwrap();
    assert!(clean.open("g", Mode::Read, None).await.is_err());
}

#[tokio::test]
async fn snapshot_convergence_over_many_files() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    for i in 0..100 {
        let path = format!("bulk/{i}.txt");
        let mut handle = engine.open(&path, Mode::Write, None).await.unwrap();
        handle.write_all(format!("payload-{i}").as_bytes()).unwrap();
        engine.close(handle).await.unwrap();
    }
    engine.flush().await.unwrap();
    engine.synchronize(true, true).await.unwrap();

    let clean = engine_in(&dir).await;
    clean.synchronize(false, false).await.unwrap();

    let children = clean.listdir("bulk").await;
    assert_eq!(children.len(), 100);

    let mut sample = clean.open("bulk/42.txt", Mode::Read, None).await.unwrap();
    assert_eq!(sample.read_all().unwrap(), b"payload-42");
}

#[tokio::test]
async fn lock_contention_is_resolved_in_favor_of_the_earliest_acquire() {
    let dir = TempDir::new().unwrap();
    let engine_a = engine_in(&dir).await;
    let engine_b = engine_in(&dir).await;

    engine_a.acquire_lock("shared").await.unwrap();
    let result = engine_b.acquire_lock("shared").await;
    assert!(result.is_err(), "the second acquirer should observe the first as the winner");
}

#[tokio::test]
async fn listdir_reflects_one_hop_children_only() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    for path in ["a/b.txt", "a/c/d.txt", "e.txt"] {
        let mut handle = engine.open(path, Mode::Write, None).await.unwrap();
        handle.write_all(b"x").unwrap();
        engine.close(handle).await.unwrap();
    }
    engine.flush().await.unwrap();

    let mut root = engine.listdir("").await;
    root.sort();
    assert_eq!(root, vec!["a".to_string(), "e.txt".to_string()]);

    let mut under_a = engine.listdir("a").await;
    under_a.sort();
    assert_eq!(under_a, vec!["b.txt".to_string(), "c".to_string()]);
}
