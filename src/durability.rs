//! C11: the durability manager — a background worker that requests an
//! async flush of the mapped region at a configured interval (§4.9).
//!
//! Not required for correctness (the OS flushes dirty pages on unmap
//! regardless); it only bounds the data-loss window under a crash.
//!
//! §9's design note describes the manager holding "only a raw pointer to
//! the mapping descriptor plus an atomic alive flag" to avoid an
//! ownership cycle with the engine. This implementation reaches the same
//! goal more simply: `Table` already holds its `Mapping` behind an `Arc`
//! (shared with concurrent readers, not just this worker), so the manager
//! can hold a cheap `Arc<Mapping>` clone instead of an unsafe raw pointer
//! — no cycle, because the manager is owned by the engine handle and
//! never hands a reference back to it. Lifecycle mirrors the teacher's
//! `DiskWAL` group-commit thread (`wal/disk.rs`): a `Condvar` the worker
//! waits on with a timeout, an `AtomicBool` shutdown flag checked on each
//! wake, and a final flush before the thread exits.

use crate::mapping::Mapping;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

pub struct DurabilityManager {
    shutdown: Arc<AtomicBool>,
    signal: Arc<Condvar>,
    /// Dummy mutex paired with `signal`'s `wait_for`; the worker holds no
    /// other state under it.
    gate: Arc<Mutex<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DurabilityManager {
    /// Start a background flush worker ticking every `interval`. A zero
    /// interval means durability is disabled (§6.4 `durability_interval_ms`
    /// = 0); in that case this returns `None` rather than spinning a
    /// thread that immediately exits.
    pub fn start(mapping: Arc<Mapping>, interval: Duration) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let signal = Arc::new(Condvar::new());
        let gate = Arc::new(Mutex::new(()));

        let worker_shutdown = Arc::clone(&shutdown);
        let worker_signal = Arc::clone(&signal);
        let worker_gate = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            loop {
                let mut guard = worker_gate.lock();
                worker_signal.wait_for(&mut guard, interval);
                drop(guard);
                if worker_shutdown.load(Ordering::Relaxed) {
                    if let Err(e) = mapping.flush(false) {
                        warn!(error = %e, "durability manager: final flush failed");
                    }
                    break;
                }
                match mapping.flush(false) {
                    Ok(()) => debug!("durability manager: tick flush"),
                    Err(e) => warn!(error = %e, "durability manager: tick flush failed"),
                }
            }
        });

        Some(Self { shutdown, signal, gate, handle: Some(handle) })
    }

    /// Stop the worker and wait for it to finish its final flush.
    /// Idempotent: calling it twice (or dropping after calling it) is a
    /// no-op the second time.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _unused = self.gate.lock();
        drop(_unused);
        self.signal.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DurabilityManager {
    fn drop(&mut self) {
        self.stop();
    }
}
