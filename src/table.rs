//! C7: the table — put/get/remove/contains/scan/stats against the
//! (hybrid hasher, slot array) pair (§4.5).
//!
//! `optimizer.rs` adds a second `impl Table` block for `optimize()` (C9);
//! the fields here are `pub(crate)` so that block can reach them directly
//! rather than going through an awkward accessor surface, the same split
//! the teacher uses between `db.rs`'s core `impl SekejapDB` and its
//! `index/`-module `impl SekejapDB` blocks for secondary capabilities.

use crate::error::{Error, Result};
use crate::hasher::hybrid::{HybridHasher, Route};
use crate::journal::KeyJournal;
use crate::mapping::Mapping;
use crate::slot::{ReadOutcome, ValueView, EMPTY_FINGERPRINT, TOMBSTONE_FINGERPRINT, VALUE_MAX};
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Snapshot of table-level observability fields (§4.5 `stats()`, plus
/// `mphf_memory_bytes` for cheap MPHF footprint reporting — §4.3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub total: u64,
    pub used: u64,
    pub load_factor: f64,
    pub generation: u64,
    pub mphf_installed: bool,
    pub mphf_keys: u64,
    pub journal_len: u64,
    pub mphf_memory_bytes: usize,
}

pub struct Table {
    pub(crate) mapping: Arc<Mapping>,
    pub(crate) hybrid: HybridHasher,
    pub(crate) journal: Option<KeyJournal>,
    pub(crate) read_only: bool,
    pub(crate) used: AtomicU64,
    /// Serializes `optimize()` invocations (§4.7 step 1); reads/writes
    /// continue unimpeded while held.
    pub(crate) optimize_lock: Mutex<()>,
}

impl Table {
    pub fn new(mapping: Arc<Mapping>, max_probe: usize, journal: Option<KeyJournal>, read_only: bool) -> Self {
        let total_capacity = mapping.slot_count();
        let hybrid = HybridHasher::new(total_capacity, max_probe);
        let used = count_occupied(&mapping);
        debug!(total_capacity, used, "table opened");
        Self {
            mapping,
            hybrid,
            journal,
            read_only,
            used: AtomicU64::new(used),
            optimize_lock: Mutex::new(()),
        }
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn slot_count(&self) -> u64 {
        self.mapping.slot_count()
    }

    /// Borrowed view of the value bound to `key`, if any. Valid until the
    /// next mutation of the same slot (§4.5).
    pub fn get(&self, key: &[u8]) -> Option<ValueView> {
        let fp = self.hybrid.fingerprint(key);
        let slots = self.mapping.slots();
        match self.hybrid.route(key) {
            Route::Exact(idx) => match slots.read(idx, fp) {
                ReadOutcome::Hit(bytes) => Some(ValueView { fingerprint: fp, bytes }),
                _ => None,
            },
            Route::Probe(candidates) => {
                for idx in candidates {
                    match slots.read(idx, fp) {
                        ReadOutcome::Hit(bytes) => return Some(ValueView { fingerprint: fp, bytes }),
                        ReadOutcome::Empty => return None,
                        ReadOutcome::Mismatch => continue,
                        ReadOutcome::TransientMiss => return None,
                    }
                }
                None
            }
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite `key` with `value` (§4.5 `set`).
    #[instrument(skip(self, key, value), fields(key_len = key.len(), value_len = value.len()))]
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        if value.len() > VALUE_MAX {
            return Err(Error::ValueTooLarge { len: value.len(), max: VALUE_MAX });
        }
        let fp = self.hybrid.fingerprint(key);
        let slots = self.mapping.slots();

        let idx = match self.hybrid.route(key) {
            Route::Exact(idx) => idx,
            Route::Probe(candidates) => {
                let max_probe = candidates.clone().count();
                let mut target = None;
                for c in candidates {
                    let cur = slots.fingerprint(c);
                    if cur == EMPTY_FINGERPRINT || cur == TOMBSTONE_FINGERPRINT || cur == fp {
                        target = Some(c);
                        break;
                    }
                }
                target.ok_or(Error::TableFull { probe_distance: max_probe })?
            }
        };

        let was_vacant = slots.is_empty_slot(idx) || slots.is_tombstone(idx);
        slots.write(idx, fp, value)?;
        if was_vacant {
            self.used.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(journal) = &self.journal {
            journal.record_insert(key)?;
        }
        self.mapping.header().bump_generation();
        Ok(())
    }

    /// Remove `key` (§4.5 `remove`). Uses the re-probe-aware tombstone
    /// policy: clears all the way to empty only when doing so can't strand
    /// a later probe-chain entry behind it.
    #[instrument(skip(self, key), fields(key_len = key.len()))]
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let fp = self.hybrid.fingerprint(key);
        let slots = self.mapping.slots();

        let found = match self.hybrid.route(key) {
            Route::Exact(idx) => match slots.read(idx, fp) {
                ReadOutcome::Hit(_) => Some((idx, None)),
                _ => None,
            },
            Route::Probe(candidates) => {
                let base = candidates.base();
                let range = candidates.range();
                let mut hit = None;
                for idx in candidates {
                    match slots.read(idx, fp) {
                        ReadOutcome::Hit(_) => {
                            hit = Some(idx);
                            break;
                        }
                        ReadOutcome::Empty => break,
                        ReadOutcome::Mismatch => continue,
                        ReadOutcome::TransientMiss => break,
                    }
                }
                hit.map(|idx| (idx, Some((base, range))))
            }
        };

        match found {
            Some((idx, chain)) => {
                let sentinel = match chain {
                    // MPHF-exact slots have no probe chain to strand (no
                    // secondary probing within the MPHF region — §4 Open
                    // Question #3), so always clear fully.
                    None => EMPTY_FINGERPRINT,
                    Some((base, range)) => {
                        let offset = idx - base;
                        let next = base + (offset + 1) % range;
                        if slots.is_empty_slot(next) {
                            EMPTY_FINGERPRINT
                        } else {
                            TOMBSTONE_FINGERPRINT
                        }
                    }
                };
                slots.clear_to(idx, sentinel);
                self.used.fetch_sub(1, Ordering::Relaxed);
                if let Some(journal) = &self.journal {
                    journal.record_remove(key)?;
                }
                self.mapping.header().bump_generation();
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Iterate every occupied slot in storage order (§4.5 `scan`). Not a
    /// snapshot: a slot mutated mid-scan is either observed in its old or
    /// new self-consistent state, never torn, but the overall set of
    /// slots visited may not match any single point in time.
    pub fn scan<F>(&self, mut visit: F)
    where
        F: FnMut(u64, u32, &ValueView) -> ControlFlow<()>,
    {
        let slots = self.mapping.slots();
        for idx in 0..slots.len() {
            if let Some(view) = slots.scan_at(idx) {
                if visit(idx, view.fingerprint, &view).is_break() {
                    break;
                }
            }
        }
    }

    pub fn stats(&self) -> Stats {
        let header = self.mapping.header();
        let total = self.mapping.slot_count();
        let used = self.used.load(Ordering::Relaxed);
        Stats {
            total,
            used,
            load_factor: if total == 0 { 0.0 } else { used as f64 / total as f64 },
            generation: header.generation(),
            mphf_installed: self.hybrid.is_installed(),
            mphf_keys: self.hybrid.mphf_keys(),
            journal_len: self.journal.as_ref().map(KeyJournal::len).unwrap_or(0),
            mphf_memory_bytes: self.hybrid.mphf_memory_bytes(),
        }
    }

    /// Rewrite the journal to just the live-key projection (§4.6). A
    /// no-op, successfully, when there is no journal (e.g. a read-only
    /// table opened without one).
    pub fn compact_journal(&self) -> Result<()> {
        match &self.journal {
            Some(journal) => journal.compact(),
            None => Ok(()),
        }
    }

    pub fn flush(&self, sync: bool) -> Result<()> {
        self.mapping.flush(sync)
    }
}

fn count_occupied(mapping: &Mapping) -> u64 {
    let slots = mapping.slots();
    let mut n = 0;
    for i in 0..slots.len() {
        if !slots.is_empty_slot(i) && !slots.is_tombstone(i) {
            n += 1;
        }
    }
    n
}
