//! The engine handle (§6.3): the object an application, CLI, or REST
//! layer actually holds. Wires together the mapping, journal, table,
//! durability worker, and the pluggable MPHF builder behind one owned
//! handle, the way the teacher's top-level `Db` wires together its arena,
//! stores, and WAL.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::journal::KeyJournal;
use crate::mapping::Mapping;
use crate::mphf::chd::ChdBuilder;
use crate::mphf::{MphfBuilder, MphfParams};
use crate::optimizer::{CancelToken, OptimizeReport};
use crate::slot::ValueView;
use crate::table::{Stats, Table};
use crate::durability::DurabilityManager;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn journal_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".journal");
    PathBuf::from(name)
}

/// An open maphrs table, parameterized by the MPHF builder used for
/// `optimize()` and for reinstalling a persisted MPHF on `open`. Defaults
/// to the bucket-displacement builder that ships with this crate; pass a
/// different `B` to plug in another algorithm (§4.3, §9).
pub struct Engine<B: MphfBuilder = ChdBuilder> {
    table: Table,
    builder: B,
    mphf_params: MphfParams,
    durability: Option<DurabilityManager>,
    closed: AtomicBool,
}

impl Engine<ChdBuilder> {
    pub fn create(path: &Path, config: EngineConfig) -> Result<Self> {
        Self::create_with_builder(path, config, ChdBuilder::default())
    }

    pub fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        Self::open_with_builder(path, config, ChdBuilder::default())
    }
}

impl<B: MphfBuilder> Engine<B> {
    pub fn create_with_builder(path: &Path, config: EngineConfig, builder: B) -> Result<Self> {
        let mapping = Arc::new(Mapping::create(path, config.slot_count())?);
        let journal = KeyJournal::open(&journal_path_for(path))?;
        let table = Table::new(Arc::clone(&mapping), config.max_probe_distance(), Some(journal), false);
        let durability = DurabilityManager::start(mapping, Duration::from_millis(config.durability_interval_ms()));
        info!(path = %path.display(), slots = config.slot_count(), "engine: created");
        Ok(Self { table, builder, mphf_params: config.mphf_params().clone(), durability, closed: AtomicBool::new(false) })
    }

    pub fn open_with_builder(path: &Path, config: EngineConfig, builder: B) -> Result<Self> {
        let mapping = Arc::new(Mapping::open(path, config.read_only())?);

        let header = mapping.header();
        // Read the persisted MPHF bytes (if any) before constructing the
        // Table, so the hybrid hasher is installed before this handle is
        // ever observable to a caller.
        let pending_mphf = if header.mphf_installed() {
            let offset = header.mphf_offset();
            let size = header.mphf_size();
            let bytes = mapping.read_region(offset, size)?;
            Some(builder.deserialize(&bytes).map_err(|e| Error::OptimizationFailed(e.to_string()))?)
        } else {
            None
        };

        let journal = if config.read_only() { None } else { Some(KeyJournal::open(&journal_path_for(path))?) };
        let table = Table::new(Arc::clone(&mapping), config.max_probe_distance(), journal, config.read_only());
        if let Some(mphf) = pending_mphf {
            table.hybrid.install(Box::new(mphf))?;
        }
        let durability = if config.read_only() {
            None
        } else {
            DurabilityManager::start(mapping, Duration::from_millis(config.durability_interval_ms()))
        };
        info!(path = %path.display(), "engine: reopened");
        Ok(Self { table, builder, mphf_params: config.mphf_params().clone(), durability, closed: AtomicBool::new(false) })
    }

    pub fn get(&self, key: &[u8]) -> Option<ValueView> {
        self.table.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.table.contains(key)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.table.set(key, value)
    }

    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.table.remove(key)
    }

    pub fn scan<F>(&self, visit: F)
    where
        F: FnMut(u64, u32, &ValueView) -> ControlFlow<()>,
    {
        self.table.scan(visit)
    }

    pub fn multi_get<F>(&self, keys: &[Vec<u8>], visit: F)
    where
        F: FnMut(&[u8], ValueView),
    {
        self.table.multi_get(keys, visit)
    }

    pub fn multi_set(&self, pairs: &[(Vec<u8>, Vec<u8>)]) -> usize {
        self.table.multi_set(pairs)
    }

    pub fn parallel_multi_get<F>(&self, keys: &[Vec<u8>], workers: usize, visit: F)
    where
        F: FnMut(&[u8], ValueView) + Send,
    {
        self.table.parallel_multi_get(keys, workers, visit)
    }

    pub fn parallel_multi_set(&self, pairs: &[(Vec<u8>, Vec<u8>)], workers: usize) -> usize {
        self.table.parallel_multi_set(pairs, workers)
    }

    pub fn parallel_scan<F>(&self, workers: usize, visit: F)
    where
        F: Fn(u64, u32, &ValueView) + Sync,
    {
        self.table.parallel_scan(workers, visit)
    }

    /// Run `optimize()` (§4.7) with a fresh, unshared cancel token.
    pub fn optimize(&self) -> Result<OptimizeReport> {
        self.optimize_with_cancel(&CancelToken::new())
    }

    /// Run `optimize()` with a caller-supplied cancel token, so another
    /// thread can request cancellation mid-migration (§5 "Cancellation").
    pub fn optimize_with_cancel(&self, cancel: &CancelToken) -> Result<OptimizeReport> {
        self.table.optimize(&self.builder, &self.mphf_params, cancel)
    }

    pub fn compact_journal(&self) -> Result<()> {
        self.table.compact_journal()
    }

    pub fn stats(&self) -> Stats {
        self.table.stats()
    }

    pub fn flush(&self, sync: bool) -> Result<()> {
        self.table.flush(sync)
    }

    pub fn read_only(&self) -> bool {
        self.table.read_only()
    }

    /// Idempotent: stops the durability worker (if any) and performs a
    /// final synchronous flush. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(durability) = self.durability.as_mut() {
            durability.stop();
        }
        if let Err(e) = self.table.flush(true) {
            tracing::warn!(error = %e, "engine: final flush on close failed");
        }
    }
}

impl<B: MphfBuilder> Drop for Engine<B> {
    fn drop(&mut self) {
        self.close();
    }
}
