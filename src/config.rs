//! Configuration for opening or creating an [`crate::engine::Engine`]
//! (§6.4). Builder shape follows the teacher's `DiskWalConfig`: a
//! `Default` impl with sane values, plus chained `with_*` setters.

use crate::mphf::MphfParams;

/// Probe bound for the standard hasher (§4.2), absent any override.
pub const DEFAULT_MAX_PROBE_DISTANCE: usize = 10;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub(crate) slot_count: u64,
    pub(crate) max_probe_distance: usize,
    pub(crate) read_only: bool,
    pub(crate) durability_interval_ms: u64,
    pub(crate) mphf_params: MphfParams,
}

impl EngineConfig {
    /// Start from the default configuration for a table sized `slot_count`.
    pub fn new(slot_count: u64) -> Self {
        Self { slot_count, ..Default::default() }
    }

    pub fn with_max_probe_distance(mut self, max_probe_distance: usize) -> Self {
        self.max_probe_distance = max_probe_distance;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// 0 disables the background durability worker (§4.9).
    pub fn with_durability_interval_ms(mut self, durability_interval_ms: u64) -> Self {
        self.durability_interval_ms = durability_interval_ms;
        self
    }

    pub fn with_mphf_params(mut self, mphf_params: MphfParams) -> Self {
        self.mphf_params = mphf_params;
        self
    }

    pub fn slot_count(&self) -> u64 {
        self.slot_count
    }

    pub fn max_probe_distance(&self) -> usize {
        self.max_probe_distance
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn durability_interval_ms(&self) -> u64 {
        self.durability_interval_ms
    }

    pub fn mphf_params(&self) -> &MphfParams {
        &self.mphf_params
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_count: 0,
            max_probe_distance: DEFAULT_MAX_PROBE_DISTANCE,
            read_only: false,
            durability_interval_ms: 0,
            mphf_params: MphfParams::default(),
        }
    }
}
