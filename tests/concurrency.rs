//! Concurrency Tests
//!
//! - Writers on different keys proceed independently
//! - Writes to one key are linearized: the log order equals the apply
//!   order, so state after a crash equals state before it
//! - Foreground writes race safely with eviction and flushing

mod common;

use std::sync::Arc;
use std::time::Duration;

use cachedb::row::{columns, ColumnMap, Value};
use cachedb::Engine;
use common::{crash, wait_until, Harness};

const WRITERS: i64 = 8;
const WRITES_PER_WRITER: i64 = 50;

fn user(id: i64) -> ColumnMap {
    columns([("id", id)])
}

fn counter(writer: i64, seq: i64) -> ColumnMap {
    columns([("writer", writer), ("seq", seq)])
}

async fn run_writers<F>(engine: &Arc<Engine>, write: F)
where
    F: Fn(&Engine, i64, i64) + Send + Sync + Copy + 'static,
{
    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || {
                for seq in 0..WRITES_PER_WRITER {
                    write(&engine, writer, seq);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_writers_all_land() {
    let h = Harness::new();
    let engine = Arc::new(h.open(h.config()));

    run_writers(&engine, |engine, writer, seq| {
        let id = writer * 1000 + seq;
        engine.set("users", &user(id), counter(writer, seq)).unwrap();
    })
    .await;

    for writer in 0..WRITERS {
        for seq in 0..WRITES_PER_WRITER {
            let id = writer * 1000 + seq;
            assert_eq!(
                engine.get("users", &user(id)).unwrap(),
                Some(counter(writer, seq))
            );
        }
    }

    let engine = Arc::try_unwrap(engine).ok().unwrap();
    crash(engine);

    let engine = h.open(h.config());
    assert_eq!(
        engine.recovery_report().records_replayed,
        (WRITERS * WRITES_PER_WRITER) as u64
    );
    assert_eq!(
        engine.get("users", &user(3 * 1000 + 7)).unwrap(),
        Some(counter(3, 7))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_key_state_matches_after_crash() {
    let h = Harness::new();
    let engine = Arc::new(h.open(h.config()));

    run_writers(&engine, |engine, writer, seq| {
        if seq % 10 == 9 {
            engine.delete("users", &user(1)).unwrap();
        } else {
            engine.set("users", &user(1), counter(writer, seq)).unwrap();
        }
    })
    .await;

    let before = engine.get("users", &user(1)).unwrap();
    let engine = Arc::try_unwrap(engine).ok().unwrap();
    crash(engine);

    let engine = h.open(h.config());
    assert_eq!(engine.get("users", &user(1)).unwrap(), before);
}

#[tokio::test]
async fn test_single_writer_observes_program_order() {
    let h = Harness::new();
    let engine = h.open(h.config());

    for seq in 0..100 {
        let row = counter(0, seq);
        engine.set("users", &user(1), row.clone()).unwrap();
        assert_eq!(engine.get("users", &user(1)).unwrap(), Some(row));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writes_race_with_eviction_and_flush() {
    let h = Harness::new();
    let config = h.config().with_ttl(Duration::from_millis(20));
    let engine = Arc::new(h.open(config));

    run_writers(&engine, |engine, writer, seq| {
        // A small key space so evictions and rewrites of the same key overlap
        let id = writer * 10 + seq % 5;
        engine.set("users", &user(id), counter(writer, seq)).unwrap();
        if seq % 7 == 0 {
            std::thread::sleep(Duration::from_millis(3));
        }
    })
    .await;

    assert!(
        wait_until(Duration::from_secs(10), || {
            engine.stats().unwrap().pending_records == 0 && h.wal_len() == 0
        })
        .await
    );

    // Every key's final value made it to the backing store.
    for writer in 0..WRITERS {
        for slot in 0..5 {
            let id = writer * 10 + slot;
            let last_seq = (0..WRITES_PER_WRITER).filter(|s| s % 5 == slot).max().unwrap();
            let stored = h.backend.row("users", &user(id)).unwrap();
            assert_eq!(stored.get("seq"), Some(&Value::Int(last_seq)));
        }
    }
}
