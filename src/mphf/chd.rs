//! Default [`MphfBuilder`] implementation: a bucket-displacement
//! construction in the "compress-hash-displace" family spec.md §4.3 names
//! as acceptable, built for this crate rather than vendored from any
//! external MPHF crate (§4 Open Question #2 in the expanded spec).
//!
//! Construction: partition keys into buckets by a first hash, process
//! buckets largest-first, and for each bucket search for a per-bucket
//! displacement seed that sends every key in the bucket to a distinct,
//! still-unclaimed final slot. This is the classic CHD greedy assignment —
//! larger buckets are harder to place, so placing them first while the most
//! slots are free keeps the search bounded.
//!
//! `slot_for` is a direct array index recomputed from `(bucket, seed)` —
//! there is no secondary probe inside the MPHF's own region; collisions
//! are impossible by construction once `build` succeeds (§4 Open Question
//! #3). `is_member` consults a per-slot checksum rather than re-deriving
//! membership from the original key set, giving it the documented bounded
//! false-positive rate instead of requiring the build set to stay resident.

use super::{Mphf, MphfBuilder, MphfParams};
use crate::error::BuildError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const SEED_H0: u32 = 0;
const SEED_CHECKSUM: u32 = u32::MAX;

#[inline]
fn hash_with_seed(key: &[u8], seed: u32) -> u32 {
    let mut h = 0x811c_9dc5u32 ^ seed;
    for &b in key {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChdMphf {
    n: u64,
    num_buckets: u32,
    displacement: Vec<u32>,
    checksums: Vec<u32>,
}

impl ChdMphf {
    fn bucket_of(&self, key: &[u8]) -> u32 {
        hash_with_seed(key, SEED_H0) % self.num_buckets
    }
}

impl Mphf for ChdMphf {
    fn capacity(&self) -> u64 {
        self.n
    }

    fn slot_for(&self, key: &[u8]) -> u64 {
        let bucket = self.bucket_of(key);
        let seed = self.displacement[bucket as usize];
        hash_with_seed(key, seed) as u64 % self.n
    }

    fn is_member(&self, key: &[u8]) -> bool {
        if self.n == 0 {
            return false;
        }
        let slot = self.slot_for(key);
        self.checksums[slot as usize] == hash_with_seed(key, SEED_CHECKSUM)
    }

    fn serialize(&self) -> Vec<u8> {
        bincode::serialize(self).expect("ChdMphf fields are all plain Vec<u32>/u64/u32")
    }

    fn memory_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.displacement.len() * std::mem::size_of::<u32>()
            + self.checksums.len() * std::mem::size_of::<u32>()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChdBuilder;

impl MphfBuilder for ChdBuilder {
    type Built = ChdMphf;

    fn build(&self, keys: &[Vec<u8>], params: &MphfParams) -> Result<Self::Built, BuildError> {
        if keys.is_empty() {
            return Err(BuildError::EmptyKeySet);
        }
        let unique: HashSet<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        if unique.len() != keys.len() {
            return Err(BuildError::DuplicateKey);
        }

        let n = keys.len() as u64;
        let num_buckets = ((n as f64) / params.bucket_load).ceil().max(1.0) as u32;

        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); num_buckets as usize];
        for (i, key) in keys.iter().enumerate() {
            let b = hash_with_seed(key, SEED_H0) % num_buckets;
            buckets[b as usize].push(i);
        }

        let mut order: Vec<u32> = (0..num_buckets).collect();
        order.sort_by_key(|&b| std::cmp::Reverse(buckets[b as usize].len()));

        let mut claimed = vec![false; n as usize];
        let mut displacement = vec![0u32; num_buckets as usize];

        for &b in &order {
            let members = &buckets[b as usize];
            if members.is_empty() {
                continue;
            }
            let mut rng = StdRng::seed_from_u64(b as u64 ^ 0x5EED_5EED_5EED_5EEDu64);
            let mut found = false;
            for _ in 0..params.max_seed_attempts {
                let seed: u32 = rng.gen();
                let mut candidate_slots = Vec::with_capacity(members.len());
                let mut local_seen = HashSet::with_capacity(members.len());
                let mut ok = true;
                for &ki in members {
                    let s = hash_with_seed(&keys[ki], seed) as u64 % n;
                    if claimed[s as usize] || !local_seen.insert(s) {
                        ok = false;
                        break;
                    }
                    candidate_slots.push(s);
                }
                if ok {
                    for s in candidate_slots {
                        claimed[s as usize] = true;
                    }
                    displacement[b as usize] = seed;
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(BuildError::SeedSearchExhausted { attempts: params.max_seed_attempts });
            }
        }

        let mut checksums = vec![0u32; n as usize];
        for key in keys {
            let b = hash_with_seed(key, SEED_H0) % num_buckets;
            let seed = displacement[b as usize];
            let slot = hash_with_seed(key, seed) as u64 % n;
            checksums[slot as usize] = hash_with_seed(key, SEED_CHECKSUM);
        }

        Ok(ChdMphf { n, num_buckets, displacement, checksums })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Built, BuildError> {
        bincode::deserialize(bytes).map_err(|e| BuildError::Serialization(e.to_string()))
    }
}
