//! C6: the hybrid hasher — an optional installed [`Mphf`] composed with the
//! standard hasher's bounded linear probe (§4.4).
//!
//! The installed state (an [`Mphf`] plus the fallback hasher restricted to
//! the slots it doesn't own) is published behind a [`crossbeam_epoch`]
//! atomic pointer: `optimize()` (C9) builds a new state off to the side and
//! swaps it in with a single release-ordered store; every `get`/`set`/
//! `remove` loads it with acquire ordering before routing. Old states are
//! epoch-reclaimed rather than freed immediately, so a reader that loaded
//! the pointer just before a swap still sees a valid, unmutated value.

use crate::error::{Error, Result};
use crate::hasher::standard::{CandidateSlots, StandardHasher};
use crate::hasher::{fnv1a, Hasher};
use crate::mphf::Mphf;
use crossbeam_epoch::{self as epoch, Atomic, Owned};
use std::sync::atomic::Ordering;

/// Where to look for a key: either the single slot an installed MPHF
/// assigns it (no probing — §4.4, §8 P5), or a bounded probe sequence in
/// the fallback region.
pub enum Route {
    Exact(u64),
    Probe(CandidateSlots),
}

struct Installed {
    mphf: Box<dyn Mphf>,
    /// `None` when the MPHF's build set exhausts the entire table (no room
    /// left for a fallback region).
    fallback: Option<StandardHasher>,
}

pub struct HybridHasher {
    installed: Atomic<Installed>,
    /// Fallback hasher in effect before any MPHF has ever been installed —
    /// spans the whole table.
    unoptimized_fallback: StandardHasher,
    total_capacity: u64,
    max_probe: usize,
}

impl HybridHasher {
    pub fn new(total_capacity: u64, max_probe: usize) -> Self {
        Self {
            installed: Atomic::null(),
            unoptimized_fallback: StandardHasher::with_max_probe(0, total_capacity.max(1), max_probe),
            total_capacity,
            max_probe,
        }
    }

    pub fn fingerprint(&self, key: &[u8]) -> u32 {
        fnv1a(key)
    }

    pub fn total_capacity(&self) -> u64 {
        self.total_capacity
    }

    pub fn max_probe(&self) -> usize {
        self.max_probe
    }

    /// Route a key to where it should be looked up / inserted.
    pub fn route(&self, key: &[u8]) -> Route {
        let guard = epoch::pin();
        let shared = self.installed.load(Ordering::Acquire, &guard);
        match unsafe { shared.as_ref() } {
            Some(installed) => {
                if installed.mphf.is_member(key) {
                    Route::Exact(installed.mphf.slot_for(key))
                } else {
                    match &installed.fallback {
                        Some(hasher) => Route::Probe(hasher.candidate_slots(key)),
                        // No fallback region left: an empty, always-exhausted
                        // probe window, surfaces as TableFull on insert.
                        None => Route::Probe(StandardHasher::with_max_probe(0, 1, 0).candidate_slots(key)),
                    }
                }
            }
            None => Route::Probe(self.unoptimized_fallback.candidate_slots(key)),
        }
    }

    pub fn is_installed(&self) -> bool {
        let guard = epoch::pin();
        !self.installed.load(Ordering::Acquire, &guard).is_null()
    }

    /// Number of keys in the currently installed MPHF's build set, 0 if none.
    pub fn mphf_keys(&self) -> u64 {
        let guard = epoch::pin();
        let shared = self.installed.load(Ordering::Acquire, &guard);
        unsafe { shared.as_ref() }.map(|i| i.mphf.capacity()).unwrap_or(0)
    }

    pub fn mphf_memory_bytes(&self) -> usize {
        let guard = epoch::pin();
        let shared = self.installed.load(Ordering::Acquire, &guard);
        unsafe { shared.as_ref() }.map(|i| i.mphf.memory_bytes()).unwrap_or(0)
    }

    /// Atomically install a freshly built MPHF (§4.7 step 7's "publish").
    /// Returns the MPHF's key count on success.
    pub fn install(&self, mphf: Box<dyn Mphf>) -> Result<u64> {
        let n = mphf.capacity();
        if n > self.total_capacity {
            return Err(Error::CapacityExceeded { keys: n, capacity: self.total_capacity });
        }
        let remaining = self.total_capacity - n;
        let fallback = if remaining > 0 {
            Some(StandardHasher::with_max_probe(n, remaining, self.max_probe))
        } else {
            None
        };
        let new = Owned::new(Installed { mphf, fallback });
        let guard = epoch::pin();
        let old = self.installed.swap(new, Ordering::AcqRel, &guard);
        if !old.is_null() {
            unsafe { guard.defer_destroy(old) };
        }
        Ok(n)
    }
}

impl Drop for HybridHasher {
    fn drop(&mut self) {
        // SAFETY: no other thread can be pinned against this epoch domain
        // once the hasher itself is being dropped (it is only reachable
        // through the owning Table, which is going away too).
        unsafe {
            let guard = epoch::unprotected();
            let shared = self.installed.load(Ordering::Acquire, guard);
            if !shared.is_null() {
                drop(shared.into_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mphf::chd::ChdMphf;

    fn trivial_mphf(keys: &[&[u8]]) -> Box<dyn Mphf> {
        use crate::mphf::{MphfBuilder, MphfParams};
        let builder = crate::mphf::chd::ChdBuilder::default();
        let owned: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
        Box::new(builder.build(&owned, &MphfParams::default()).unwrap()) as Box<dyn Mphf>
    }

    #[test]
    fn routes_through_unoptimized_fallback_before_install() {
        let h = HybridHasher::new(16, 10);
        match h.route(b"anything") {
            Route::Probe(_) => {}
            Route::Exact(_) => panic!("should not have an MPHF yet"),
        }
        assert!(!h.is_installed());
    }

    #[test]
    fn member_keys_route_exact_after_install() {
        let h = HybridHasher::new(16, 10);
        let mphf = trivial_mphf(&[b"a", b"b", b"c"]);
        h.install(mphf).unwrap();
        assert!(h.is_installed());
        match h.route(b"a") {
            Route::Exact(idx) => assert!(idx < 3),
            Route::Probe(_) => panic!("a is a build-set member"),
        }
    }

    #[test]
    fn non_member_keys_fall_back_after_install() {
        let h = HybridHasher::new(16, 10);
        let mphf = trivial_mphf(&[b"a", b"b", b"c"]);
        h.install(mphf).unwrap();
        match h.route(b"new-key-not-in-build-set") {
            Route::Probe(candidates) => {
                assert!(candidates.into_iter().all(|s| s >= 3));
            }
            Route::Exact(_) => panic!("non-member must not get an exact route"),
        }
    }

    #[test]
    fn install_rejects_oversized_build_set() {
        let h = HybridHasher::new(2, 10);
        let mphf = trivial_mphf(&[b"a", b"b", b"c"]);
        let err = h.install(mphf).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CapacityExceeded);
    }

    #[test]
    fn full_capacity_mphf_has_no_fallback_region() {
        let h = HybridHasher::new(3, 10);
        let mphf = trivial_mphf(&[b"a", b"b", b"c"]);
        h.install(mphf).unwrap();
        match h.route(b"anything-else") {
            Route::Probe(candidates) => assert_eq!(candidates.into_iter().count(), 0),
            Route::Exact(_) => panic!(),
        }
    }

    #[allow(dead_code)]
    fn assert_mphf_is_send_sync<T: Mphf>() {
        fn helper<T: Send + Sync>() {}
        helper::<ChdMphf>();
        let _ = std::marker::PhantomData::<T>;
    }
}
