//! C10: batch lookup/insert with prefetch, plus an optional Rayon-backed
//! parallel layer (§4.8), mirroring the `#[cfg(feature = "parallel")]` /
//! `#[cfg(not(feature = "parallel"))]` split the teacher uses for its own
//! BFS traversal (`set.rs`'s `bfs_forward_parallel`/`bfs_backward_parallel`):
//! a real Rayon-driven implementation behind the feature flag, a plain
//! sequential fallback otherwise — same public signature either way.

use crate::slot::ValueView;
use crate::table::Table;

/// Below this many items, partitioning across workers costs more than it
/// saves (§4.8: "below a threshold (~10*T items), fall back to
/// sequential").
const PARALLEL_THRESHOLD_PER_WORKER: usize = 10;

impl Table {
    /// Two-pass batch get (§4.8): touch every candidate primary slot first
    /// (cheap prefetch hint to the CPU cache / OS page cache), then
    /// perform the real lookups and invoke `visit` on each hit.
    pub fn multi_get<F>(&self, keys: &[Vec<u8>], mut visit: F)
    where
        F: FnMut(&[u8], ValueView),
    {
        self.prefetch(keys);
        for key in keys {
            if let Some(view) = self.get(key) {
                visit(key, view);
            }
        }
    }

    /// Independent `set` per pair, in order; no atomicity across the
    /// batch (§4.8). Returns the number that committed.
    pub fn multi_set(&self, pairs: &[(Vec<u8>, Vec<u8>)]) -> usize {
        let mut committed = 0;
        for (key, value) in pairs {
            if self.set(key, value).is_ok() {
                committed += 1;
            }
        }
        committed
    }

    /// Touch each key's primary candidate slot so the page backing it is
    /// resident before the real read pass. Best-effort: a touch that
    /// would itself need the seqlock retry loop is not worth doing twice,
    /// so this just reads the fingerprint word once.
    fn prefetch(&self, keys: &[Vec<u8>]) {
        let slots = self.mapping.slots();
        for key in keys {
            match self.hybrid.route(key) {
                crate::hasher::hybrid::Route::Exact(idx) => {
                    let _ = slots.fingerprint(idx);
                }
                crate::hasher::hybrid::Route::Probe(mut candidates) => {
                    if let Some(idx) = candidates.next() {
                        let _ = slots.fingerprint(idx);
                    }
                }
            }
        }
    }
}

#[cfg(feature = "parallel")]
mod parallel_impl {
    use super::*;
    use rayon::prelude::*;
    use std::sync::Mutex;

    impl Table {
        /// Partition `keys` into contiguous chunks and look each chunk up
        /// on its own worker. Per-worker ordering of `visit` calls is
        /// preserved; ordering across workers is not (§4.8).
        pub fn parallel_multi_get<F>(&self, keys: &[Vec<u8>], workers: usize, mut visit: F)
        where
            F: FnMut(&[u8], ValueView) + Send,
        {
            if keys.len() < workers.max(1) * PARALLEL_THRESHOLD_PER_WORKER {
                self.multi_get(keys, visit);
                return;
            }
            let chunk_size = keys.len().div_ceil(workers.max(1));
            let results: Vec<Vec<(Vec<u8>, ValueView)>> = keys
                .par_chunks(chunk_size.max(1))
                .map(|chunk| {
                    let mut hits = Vec::new();
                    self.prefetch(chunk);
                    for key in chunk {
                        if let Some(view) = self.get(key) {
                            hits.push((key.clone(), view));
                        }
                    }
                    hits
                })
                .collect();
            for chunk_hits in results {
                for (key, view) in chunk_hits {
                    visit(&key, view);
                }
            }
        }

        /// Partition `pairs` across workers, each independently calling
        /// `set`. Returns the total number committed.
        pub fn parallel_multi_set(&self, pairs: &[(Vec<u8>, Vec<u8>)], workers: usize) -> usize {
            if pairs.len() < workers.max(1) * PARALLEL_THRESHOLD_PER_WORKER {
                return self.multi_set(pairs);
            }
            let chunk_size = pairs.len().div_ceil(workers.max(1));
            let committed = Mutex::new(0usize);
            pairs.par_chunks(chunk_size.max(1)).for_each(|chunk| {
                let mut local = 0usize;
                for (key, value) in chunk {
                    if self.set(key, value).is_ok() {
                        local += 1;
                    }
                }
                *committed.lock().unwrap() += local;
            });
            committed.into_inner().unwrap()
        }

        /// Partition the slot array into contiguous ranges and scan each
        /// range on its own worker (§4.8). `visit` must be `Sync`: workers
        /// call it concurrently from different slot ranges.
        pub fn parallel_scan<F>(&self, workers: usize, visit: F)
        where
            F: Fn(u64, u32, &ValueView) + Sync,
        {
            let total = self.slot_count();
            if total == 0 {
                return;
            }
            let workers = workers.max(1) as u64;
            let chunk = total.div_ceil(workers);
            let ranges: Vec<(u64, u64)> = (0..workers)
                .map(|w| (w * chunk, ((w + 1) * chunk).min(total)))
                .filter(|(start, end)| start < end)
                .collect();
            let slots = self.mapping.slots();
            ranges.into_par_iter().for_each(|(start, end)| {
                for idx in start..end {
                    if let Some(view) = slots.scan_at(idx) {
                        visit(idx, view.fingerprint, &view);
                    }
                }
            });
        }
    }
}

#[cfg(not(feature = "parallel"))]
mod parallel_impl {
    use super::*;
    use std::ops::ControlFlow;

    impl Table {
        pub fn parallel_multi_get<F>(&self, keys: &[Vec<u8>], _workers: usize, visit: F)
        where
            F: FnMut(&[u8], ValueView) + Send,
        {
            self.multi_get(keys, visit);
        }

        pub fn parallel_multi_set(&self, pairs: &[(Vec<u8>, Vec<u8>)], _workers: usize) -> usize {
            self.multi_set(pairs)
        }

        pub fn parallel_scan<F>(&self, _workers: usize, visit: F)
        where
            F: Fn(u64, u32, &ValueView) + Sync,
        {
            self.scan(|idx, fp, view| {
                visit(idx, fp, view);
                ControlFlow::Continue(())
            });
        }
    }
}
