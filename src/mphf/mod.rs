//! C5: the minimal perfect hash function capability (§4.3).
//!
//! The engine depends only on the [`Mphf`] trait and the [`MphfBuilder`]
//! capability that produces one — never on a specific algorithm. A default
//! bucket-displacement builder ([`chd`]) ships for convenience; swapping it
//! out means implementing the two traits below.

pub mod chd;

use crate::error::BuildError;

/// Algorithm-specific build hyperparameters (§6.4 `mphf_params`), opaque
/// to the engine beyond what the default builder interprets.
#[derive(Debug, Clone)]
pub struct MphfParams {
    /// Average keys per bucket during the displacement search. Lower
    /// values search fewer, smaller buckets (faster build, more memory
    /// for per-bucket seeds); higher values do the opposite.
    pub bucket_load: f64,
    /// Seed search gives up on a bucket after this many attempts and
    /// enlarges it — keeps construction from pathologically looping on
    /// an unlucky bucket (this is the "documented as broken for small key
    /// sets" failure mode spec.md §9 calls out in some source MPHFs;
    /// bounding the search here is how this implementation avoids it).
    pub max_seed_attempts: u32,
}

impl Default for MphfParams {
    fn default() -> Self {
        Self { bucket_load: 4.0, max_seed_attempts: 10_000 }
    }
}

/// An immutable structure mapping a fixed, finite key set injectively
/// into `[0, capacity())`. Object-safe: the engine stores installed
/// instances as `Box<dyn Mphf>` behind an atomic pointer (C6).
pub trait Mphf: Send + Sync {
    /// Number of distinct keys in the build set.
    fn capacity(&self) -> u64;

    /// Slot index for `key`, in `[0, capacity())`. Meaningful only when
    /// `is_member(key)` is true — calling it for a non-member key returns
    /// a deterministic but otherwise meaningless index.
    fn slot_for(&self, key: &[u8]) -> u64;

    /// Membership test. Zero false negatives over the build set; may have
    /// a bounded false-positive rate (documented per implementation,
    /// typically ≤ 2^-32 here).
    fn is_member(&self, key: &[u8]) -> bool;

    /// Serialize to bytes for persistence in the file's MPHF region
    /// (§6.1). Must round-trip through the matching builder's
    /// `deserialize`.
    fn serialize(&self) -> Vec<u8>;

    /// Resident memory footprint, for `Stats::mphf_memory_bytes`.
    fn memory_bytes(&self) -> usize;
}

/// Capability that builds an [`Mphf`] over a finite key multiset.
pub trait MphfBuilder {
    type Built: Mphf + 'static;

    fn build(&self, keys: &[Vec<u8>], params: &MphfParams) -> Result<Self::Built, BuildError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Built, BuildError>;
}
