//! C4: FNV-1a fingerprint + modulo primary slot, bounded linear probing.
//!
//! Operates over an arbitrary contiguous sub-range `[base, base+range)` of
//! the table's slot array, so the hybrid hasher (C6) can hand it just the
//! fallback region `[n, N)` after optimization (§4.4).

use super::{fnv1a, Fingerprint, Hasher};

/// Worst-case probe window (§4.2): keeps lookup latency cache-local and
/// turns insert failure into a surfaced `TableFull` rather than unbounded
/// degradation at load factors above ~0.5.
pub const DEFAULT_MAX_PROBE: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct StandardHasher {
    base: u64,
    range: u64,
    max_probe: usize,
}

impl StandardHasher {
    pub fn new(base: u64, range: u64) -> Self {
        Self::with_max_probe(base, range, DEFAULT_MAX_PROBE)
    }

    pub fn with_max_probe(base: u64, range: u64, max_probe: usize) -> Self {
        assert!(range > 0, "StandardHasher needs a nonempty slot range");
        Self { base, range, max_probe }
    }

    pub fn max_probe(&self) -> usize {
        self.max_probe
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    fn primary_offset(&self, fingerprint: Fingerprint) -> u64 {
        fingerprint as u64 % self.range
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateSlots {
    base: u64,
    range: u64,
    primary: u64,
    step: usize,
    max_probe: usize,
}

impl CandidateSlots {
    /// Start of this hasher's addressable range (absolute slot index).
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Size of this hasher's addressable range.
    pub fn range(&self) -> u64 {
        self.range
    }
}

impl Iterator for CandidateSlots {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.step >= self.max_probe {
            return None;
        }
        let offset = (self.primary + self.step as u64) % self.range;
        self.step += 1;
        Some(self.base + offset)
    }
}

impl Hasher for StandardHasher {
    type Candidates = CandidateSlots;

    fn fingerprint(&self, key: &[u8]) -> Fingerprint {
        fnv1a(key)
    }

    fn candidate_slots(&self, key: &[u8]) -> Self::Candidates {
        let fp = self.fingerprint(key);
        CandidateSlots {
            base: self.base,
            range: self.range,
            primary: self.primary_offset(fp),
            step: 0,
            max_probe: self.max_probe,
        }
    }

    fn capacity(&self) -> u64 {
        self.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_slots_are_bounded_and_in_range() {
        let h = StandardHasher::new(0, 16);
        let slots: Vec<u64> = h.candidate_slots(b"some-key").collect();
        assert_eq!(slots.len(), DEFAULT_MAX_PROBE);
        assert!(slots.iter().all(|&s| s < 16));
    }

    #[test]
    fn candidate_slots_respect_base_offset() {
        let h = StandardHasher::new(100, 16);
        let slots: Vec<u64> = h.candidate_slots(b"k").collect();
        assert!(slots.iter().all(|&s| (100..116).contains(&s)));
    }

    #[test]
    fn same_key_yields_same_primary_slot() {
        let h = StandardHasher::new(0, 1024);
        let a: Vec<u64> = h.candidate_slots(b"stable").collect();
        let b: Vec<u64> = h.candidate_slots(b"stable").collect();
        assert_eq!(a, b);
    }

    #[test]
    fn probe_wraps_around_the_range() {
        let h = StandardHasher::with_max_probe(0, 4, 10);
        let slots: Vec<u64> = h.candidate_slots(b"wrap-me").collect();
        assert_eq!(slots.len(), 10);
        assert!(slots.iter().all(|&s| s < 4));
    }
}
