//! C9: the optimizer pipeline (§4.7) — builds an MPHF from the journal's
//! live key set and installs it atomically into the table's hybrid
//! hasher.
//!
//! Migration uses a capture-all-then-migrate-all staging strategy: every
//! live key's current value is read (through the *old* routing) before
//! any write into the MPHF's target region begins. This is a strictly
//! stronger guarantee than §4.7 step 6 requires ("a concurrent reader may
//! observe either the old or new slot") — with staging, a concurrent
//! reader only ever sees the *old* slot until the hybrid hasher is
//! atomically swapped in step 7, and only the *new* slot afterward, never
//! a window where some keys have moved and others haven't. It also avoids
//! a subtler hazard: migrating key-by-key without staging risks writing
//! key A's new value over key B's *old* slot before B has been read,
//! if the old hasher happened to place both in a way that overlaps the
//! MPHF's claimed region.
//!
//! The header's `mphf_offset`/`mphf_size` fields are only published
//! *after* migration succeeds and the in-memory hybrid hasher is swapped
//! (step 7) — not right after the bytes are written to the reserved file
//! region (step 5). This keeps the on-disk "is an MPHF installed" signal
//! consistent with what a reopened table would actually find: if
//! `optimize()` is cancelled partway through migration, the header never
//! claims an MPHF that a crash-and-reopen would only half reconstruct.

use crate::error::{Error, Result};
use crate::hasher::hybrid::Route;
use crate::mphf::{Mphf, MphfBuilder, MphfParams};
use crate::slot::{ReadOutcome, TOMBSTONE_FINGERPRINT};
use crate::table::Table;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Cooperative cancellation handle for an in-flight `optimize()` call
/// (§5 "Cancellation"). Cheap to clone; check it from another thread to
/// request early abort between per-key migrations.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of a completed (or cancelled) `optimize()` run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizeReport {
    pub keys_built: u64,
    pub keys_migrated: u64,
    pub mphf_size_bytes: u64,
    pub cancelled: bool,
}

impl Table {
    /// Run the optimization pipeline (§4.7) with the given MPHF builder.
    /// Blocks the calling thread for the duration of build + migration;
    /// other readers and writers continue concurrently throughout (§5).
    pub fn optimize<B: MphfBuilder>(&self, builder: &B, params: &MphfParams, cancel: &CancelToken) -> Result<OptimizeReport> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let journal = self.journal.as_ref().ok_or_else(|| Error::OptimizationFailed("no journal configured for this table".into()))?;

        // Step 1: serialize concurrent optimize() calls; reads/writes proceed.
        let _guard = self.optimize_lock.lock();

        // Step 2: snapshot the live key set.
        let keys = journal.live_keys()?;
        let n = keys.len() as u64;
        info!(keys = n, "optimize: starting");

        if n == 0 {
            // B4: empty journal succeeds as a no-op, no MPHF installed.
            return Ok(OptimizeReport { keys_built: 0, keys_migrated: 0, mphf_size_bytes: 0, cancelled: false });
        }

        // Step 3: build.
        let mphf = builder
            .build(&keys, params)
            .map_err(|e| Error::OptimizationFailed(e.to_string()))?;

        // Step 4: capacity check, before any persistence happens.
        let capacity = self.mapping.slot_count();
        if n > capacity {
            warn!(keys = n, capacity, "optimize: MPHF key count exceeds table capacity");
            return Err(Error::CapacityExceeded { keys: n, capacity });
        }

        // Step 5 (partial): persist the serialized MPHF bytes into the
        // reserved file region. Header fields are NOT updated yet.
        let bytes = mphf.serialize();
        let offset = self.mapping.reserve_mphf_region(bytes.len() as u64)?;
        self.mapping.write_region(offset, &bytes)?;

        // Step 6: capture-all-then-migrate-all. Each key's *current* slot
        // index is captured alongside its value so migration can reclaim
        // that slot afterward — otherwise a key whose pre-optimize position
        // fell in the new fallback range `[n, N)` would end up occupying
        // both its old and new slots, violating I2.
        let mut captured = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some((old_idx, value)) = self.locate_with_index(key) {
                captured.push((key.clone(), old_idx, value));
            }
            // A key recorded live in the journal but currently absent from
            // storage (e.g. a race with a concurrent remove that hasn't
            // reached the journal's sync boundary yet) is simply skipped;
            // it remains reachable through the fallback hasher after swap
            // since it was never claimed as an MPHF slot.
        }

        let slots = self.mapping.slots();
        let mut migrated = 0u64;
        for (key, old_idx, value) in &captured {
            if cancel.is_cancelled() {
                warn!(migrated, total = captured.len(), "optimize: cancelled mid-migration");
                return Ok(OptimizeReport {
                    keys_built: n,
                    keys_migrated: migrated,
                    mphf_size_bytes: bytes.len() as u64,
                    cancelled: true,
                });
            }
            let fp = self.hybrid.fingerprint(key);
            let idx = mphf.slot_for(key);
            slots.write(idx, fp, value)?;
            // Reclaim the old slot if the key moved and its old position
            // lies in the new fallback region `[n, N)` — a position inside
            // `[0, n)` is some other key's MPHF-assigned slot and must not
            // be touched. A tombstone, not a full clear, preserves any
            // fallback-region probe chain that still traverses this slot
            // under the new hasher.
            if *old_idx != idx && *old_idx >= n && *old_idx < capacity {
                slots.clear_to(*old_idx, TOMBSTONE_FINGERPRINT);
            }
            migrated += 1;
        }

        // Step 7: publish. Header fields (the durable signal) and the
        // in-memory hybrid hasher (the live signal) are updated together.
        let header = self.mapping.header();
        header.set_mphf_offset(offset);
        self.hybrid.install(Box::new(mphf))?;
        header.publish_mphf_size(bytes.len() as u64);
        header.bump_generation();

        info!(keys = n, migrated, "optimize: installed new MPHF");
        Ok(OptimizeReport { keys_built: n, keys_migrated: migrated, mphf_size_bytes: bytes.len() as u64, cancelled: false })
    }

    /// Like `get`, but also returns the slot index the hit was found at —
    /// needed by migration (step 6) to reclaim a key's pre-optimize slot
    /// once its value has been copied to its new MPHF-assigned position.
    fn locate_with_index(&self, key: &[u8]) -> Option<(u64, Vec<u8>)> {
        let fp = self.hybrid.fingerprint(key);
        let slots = self.mapping.slots();
        match self.hybrid.route(key) {
            Route::Exact(idx) => match slots.read(idx, fp) {
                ReadOutcome::Hit(bytes) => Some((idx, bytes)),
                _ => None,
            },
            Route::Probe(candidates) => {
                for idx in candidates {
                    match slots.read(idx, fp) {
                        ReadOutcome::Hit(bytes) => return Some((idx, bytes)),
                        ReadOutcome::Empty => return None,
                        ReadOutcome::Mismatch => continue,
                        ReadOutcome::TransientMiss => return None,
                    }
                }
                None
            }
        }
    }
}
