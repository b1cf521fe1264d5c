//! Log Corruption Tests
//!
//! A damaged tail is the expected footprint of a crash mid-append. Replay
//! keeps every record before the damage, cuts the damage off the file and
//! the engine keeps serving. Later appends must replay after the cut.

mod common;

use std::fs::{self, OpenOptions};
use std::io::Write;

use cachedb::row::{columns, ColumnMap};
use cachedb::wal::{LogRecord, TailDefect, MAGIC};
use common::{crash, Harness};

fn user(id: i64) -> ColumnMap {
    columns([("id", id)])
}

fn name(name: &str) -> ColumnMap {
    columns([("name", name)])
}

fn append_raw(h: &Harness, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(h.wal_path())
        .unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

/// Write `count` users through an engine and crash it. Returns the log length.
fn seed(h: &Harness, count: i64) -> u64 {
    let engine = h.open(h.config());
    for id in 0..count {
        engine.set("users", &user(id), name(&format!("u{}", id))).unwrap();
    }
    crash(engine);
    h.wal_len()
}

// =============================================================================
// Torn Tail
// =============================================================================

#[tokio::test]
async fn test_torn_tail_is_discarded() {
    let h = Harness::new();
    let valid = seed(&h, 2);

    let torn = LogRecord::put_row("users", &user(9), &name("torn")).serialize();
    append_raw(&h, &torn[..torn.len() - 4]);

    let engine = h.open(h.config());
    let report = engine.recovery_report();

    assert_eq!(report.records_replayed, 2);
    assert!(matches!(report.defect, Some(TailDefect::Truncated { .. })));
    assert_eq!(report.valid_len, valid);
    assert_eq!(h.wal_len(), valid);
    assert_eq!(engine.get("users", &user(1)).unwrap(), Some(name("u1")));
    assert_eq!(engine.get("users", &user(9)).unwrap(), None);
}

#[tokio::test]
async fn test_appends_after_discarded_tail_replay() {
    let h = Harness::new();
    seed(&h, 1);
    append_raw(&h, &[0xCA, 0xFE, 0xBA]);

    let engine = h.open(h.config());
    assert!(engine.recovery_report().defect.is_some());
    engine.set("users", &user(5), name("after")).unwrap();
    crash(engine);

    let engine = h.open(h.config());
    assert!(engine.recovery_report().defect.is_none());
    assert_eq!(engine.get("users", &user(0)).unwrap(), Some(name("u0")));
    assert_eq!(engine.get("users", &user(5)).unwrap(), Some(name("after")));
}

// =============================================================================
// Damaged Framing
// =============================================================================

#[tokio::test]
async fn test_bad_magic_stops_replay() {
    let h = Harness::new();
    seed(&h, 3);

    // Corrupt the magic of the second record
    let mut bytes = h.wal_bytes();
    let first_len = LogRecord::put_row("users", &user(0), &name("u0")).encoded_len();
    bytes[first_len] ^= 0xFF;
    fs::write(h.wal_path(), &bytes).unwrap();

    let engine = h.open(h.config());
    let report = engine.recovery_report();

    assert_eq!(report.records_replayed, 1);
    assert!(matches!(report.defect, Some(TailDefect::BadMagic(_))));
    assert_eq!(h.wal_len(), first_len as u64);
    assert_eq!(engine.get("users", &user(0)).unwrap(), Some(name("u0")));
    assert_eq!(engine.get("users", &user(1)).unwrap(), None);
    assert_eq!(engine.get("users", &user(2)).unwrap(), None);
}

#[tokio::test]
async fn test_negative_length_stops_replay() {
    let h = Harness::new();
    let valid = seed(&h, 1);

    let mut bogus = MAGIC.to_be_bytes().to_vec();
    bogus.extend_from_slice(&(-1i32).to_be_bytes());
    bogus.extend_from_slice(&[0u8; 32]);
    append_raw(&h, &bogus);

    let engine = h.open(h.config());

    assert_eq!(
        engine.recovery_report().defect,
        Some(TailDefect::ImplausibleLength(-1))
    );
    assert_eq!(h.wal_len(), valid);
}

#[tokio::test]
async fn test_oversized_length_stops_replay() {
    let h = Harness::new();
    let valid = seed(&h, 1);

    let mut bogus = MAGIC.to_be_bytes().to_vec();
    bogus.extend_from_slice(&i32::MAX.to_be_bytes());
    bogus.extend_from_slice(&[1u8; 16]);
    append_raw(&h, &bogus);

    let engine = h.open(h.config());

    assert!(matches!(
        engine.recovery_report().defect,
        Some(TailDefect::Truncated { .. })
    ));
    assert_eq!(h.wal_len(), valid);
    assert_eq!(engine.get("users", &user(0)).unwrap(), Some(name("u0")));
}

#[tokio::test]
async fn test_garbage_file_recovers_empty() {
    let h = Harness::new();
    fs::create_dir_all(h.wal_path().parent().unwrap()).unwrap();
    fs::write(h.wal_path(), b"this is not a log file at all").unwrap();

    let engine = h.open(h.config());

    assert_eq!(engine.recovery_report().records_replayed, 0);
    assert_eq!(h.wal_len(), 0);
    engine.set("users", &user(1), name("fresh")).unwrap();
    crash(engine);

    let engine = h.open(h.config());
    assert_eq!(engine.get("users", &user(1)).unwrap(), Some(name("fresh")));
}

#[tokio::test]
async fn test_missing_log_starts_empty() {
    let h = Harness::new();
    assert!(!h.wal_path().exists());

    let engine = h.open(h.config());

    assert_eq!(engine.recovery_report().records_replayed, 0);
    assert!(engine.recovery_report().defect.is_none());
    assert!(h.wal_path().exists());
}
