//! Boundary behaviors B1-B4 (spec.md §8).

use maphrs::{EngineConfig, Error, ErrorKind};
use tempfile::tempdir;

fn path_in(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

/// B1: value of exactly 496 bytes succeeds; 497 fails with ValueTooLarge.
#[test]
fn b1_value_size_boundary() {
    let dir = tempdir().unwrap();
    let engine = maphrs::Engine::create(&path_in(&dir, "b1.maph"), EngineConfig::new(8)).unwrap();

    let exactly_max = vec![7u8; 496];
    engine.set(b"k1", &exactly_max).unwrap();
    assert_eq!(engine.get(b"k1").unwrap().bytes, exactly_max);

    let over_max = vec![7u8; 497];
    let err = engine.set(b"k2", &over_max).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueTooLarge);
    assert!(matches!(err, Error::ValueTooLarge { len: 497, max: 496 }));
    assert!(engine.get(b"k2").is_none());
}

/// B2: inserting N distinct keys that all collide into the same primary
/// slot saturates the probe window; the (P+1)-th insert fails with
/// TableFull.
#[test]
fn b2_probe_window_saturation_yields_table_full() {
    let dir = tempdir().unwrap();
    let max_probe = 4;
    let slot_count = 64u64;
    let engine = maphrs::Engine::create(&path_in(&dir, "b2.maph"), EngineConfig::new(slot_count).with_max_probe_distance(max_probe)).unwrap();

    // Find `max_probe + 1` distinct keys that all hash to the same
    // primary slot, so the probe window is actually exhausted rather
    // than merely hoped to be.
    let needed = max_probe + 1; // max_probe successful inserts, plus one overflow attempt
    let mut by_primary: std::collections::HashMap<u64, Vec<Vec<u8>>> = std::collections::HashMap::new();
    let mut colliding_keys = None;
    for candidate in 0u32..500_000 {
        let key = candidate.to_le_bytes().to_vec();
        let fp = maphrs::hasher::fnv1a(&key);
        let primary = fp as u64 % slot_count;
        let bucket = by_primary.entry(primary).or_default();
        bucket.push(key);
        if bucket.len() >= needed {
            colliding_keys = Some(bucket.clone());
            break;
        }
    }
    let colliding_keys = colliding_keys.expect("a saturating bucket exists in the search space");

    for key in colliding_keys.iter().take(max_probe) {
        engine.set(key, b"v").unwrap();
    }
    let overflow_key = &colliding_keys[max_probe];
    let err = engine.set(overflow_key, b"v").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TableFull);
}

/// B3: opening a file with the wrong magic fails with InvalidMagic and
/// never touches the rest of the file.
#[test]
fn b3_bad_magic_is_rejected_without_touching_memory() {
    let dir = tempdir().unwrap();
    let path = path_in(&dir, "b3.maph");
    std::fs::write(&path, vec![0xFFu8; 4096]).unwrap();

    let err = maphrs::Engine::open(&path, EngineConfig::new(8)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMagic);

    let after = std::fs::read(&path).unwrap();
    assert_eq!(after, vec![0xFFu8; 4096]);
}

/// B4: optimize() with an empty journal succeeds as a no-op.
#[test]
fn b4_optimize_with_empty_journal_is_a_no_op() {
    let dir = tempdir().unwrap();
    let engine = maphrs::Engine::create(&path_in(&dir, "b4.maph"), EngineConfig::new(16)).unwrap();

    let report = engine.optimize().unwrap();
    assert_eq!(report.keys_built, 0);
    assert!(!report.cancelled);
    assert!(!engine.stats().mphf_installed);
}
