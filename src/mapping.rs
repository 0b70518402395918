//! C2: file layout and mapping — header + contiguous slot array in a
//! single mmap'd region (§6.1), plus the reserved MPHF region appended
//! after the slot array (§4.7's grow policy).
//!
//! Mirrors the teacher's `DurableArena`/`BlobArena` (`arena.rs`): open or
//! create, only ever grow the file, never relocate the slot array. Unlike
//! `DurableArena::resize`, growing the file for the MPHF region does *not*
//! remap the header+slot region: `Table` hands out raw pointers into that
//! region to concurrent lock-free readers (via [`HeaderView`]/[`SlotArray`]),
//! and memmap2 may place a remapped region at a different address, which
//! would leave those pointers dangling. So the header+slot span is sized
//! once, at `create`/`open`, and mapped exactly once for the mapping's
//! whole lifetime; the MPHF region (append-only, written once per
//! `optimize()`, never on the hot path) is instead read and written through
//! a plain `File` handle with seek + read/write, under a short mutex.

use crate::error::{Error, Result};
use crate::header::{HeaderView, FORMAT_VERSION, HEADER_SIZE, MAGIC};
use crate::slot::{SlotArray, SLOT_SIZE};
use memmap2::{Mmap, MmapMut};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Either a writable or a true read-only mapping. A `read_only` [`Mapping`]
/// never takes the `Mut` arm, so the kernel — not just the `Table` layer —
/// refuses any write attempt.
enum Backing {
    Mut(MmapMut),
    Ro(Mmap),
}

impl Backing {
    fn as_ptr(&self) -> *const u8 {
        match self {
            Backing::Mut(m) => m.as_ptr(),
            Backing::Ro(m) => m.as_ptr(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Backing::Mut(m) => m.len(),
            Backing::Ro(m) => m.len(),
        }
    }

    fn flush(&self) -> std::io::Result<()> {
        match self {
            Backing::Mut(m) => m.flush(),
            Backing::Ro(_) => Ok(()),
        }
    }

    fn flush_async(&self) -> std::io::Result<()> {
        match self {
            Backing::Mut(m) => m.flush_async(),
            Backing::Ro(_) => Ok(()),
        }
    }
}

/// Owns the file handle and mapping for one table. `create`/`open` are the
/// only ways to obtain one; it is held for the engine handle's lifetime
/// (behind an `Arc`, since `Table` shares it with the durability manager
/// and concurrent readers).
pub struct Mapping {
    /// Header + slot array only. Sized once; never remapped.
    primary: Backing,
    /// Separate handle onto the same file, used only for seek-based I/O
    /// into the appended MPHF region. A `Mutex` is enough: this path is
    /// only touched once per `optimize()` run and once at `open()`.
    mphf_file: Mutex<File>,
    path: PathBuf,
    slot_count: u64,
    read_only: bool,
}

impl Mapping {
    pub fn create(path: &Path, slot_count: u64) -> Result<Self> {
        let primary_len = HEADER_SIZE as u64 + slot_count * SLOT_SIZE as u64;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| Error::FileOpenFailed { path: path.to_path_buf(), source })?;

        let existing_len = file
            .metadata()
            .map_err(|source| Error::FileOpenFailed { path: path.to_path_buf(), source })?
            .len();
        if existing_len < primary_len {
            file.set_len(primary_len)
                .map_err(|source| Error::FileTruncateFailed { path: path.to_path_buf(), requested: primary_len, source })?;
        }

        let mphf_file = file
            .try_clone()
            .map_err(|source| Error::FileOpenFailed { path: path.to_path_buf(), source })?;

        let mut mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|source| Error::MmapFailed { path: path.to_path_buf(), source })?
        };

        let header = unsafe { HeaderView::new(mmap.as_mut_ptr()) };
        if header.magic() != MAGIC {
            header.zero_reserved();
            header.set_slot_count(slot_count);
            header.set_format_version(FORMAT_VERSION);
            header.set_magic(MAGIC); // publish last: a crash before this leaves magic=0, safely re-createable
        }

        let slot_count = header.slot_count();
        Ok(Self {
            primary: Backing::Mut(mmap),
            mphf_file: Mutex::new(mphf_file),
            path: path.to_path_buf(),
            slot_count,
            read_only: false,
        })
    }

    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|source| Error::FileOpenFailed { path: path.to_path_buf(), source })?;

        let mphf_file = file
            .try_clone()
            .map_err(|source| Error::FileOpenFailed { path: path.to_path_buf(), source })?;

        // Probe the header through a throwaway read-only mapping of just
        // the header span so we know `slot_count` before deciding how much
        // of the file the *primary* (never-remapped) mapping should cover.
        let probe = unsafe { Mmap::map(&file) }.map_err(|source| Error::MmapFailed { path: path.to_path_buf(), source })?;
        if probe.len() < HEADER_SIZE {
            return Err(Error::InvalidMagic { path: path.to_path_buf(), found: 0, expected: MAGIC });
        }
        let probe_header = unsafe { HeaderView::new(probe.as_ptr() as *mut u8) };
        let magic = probe_header.magic();
        if magic != MAGIC {
            return Err(Error::InvalidMagic { path: path.to_path_buf(), found: magic, expected: MAGIC });
        }
        let format_version = probe_header.format_version();
        if format_version != FORMAT_VERSION {
            return Err(Error::VersionMismatch { path: path.to_path_buf(), found: format_version, expected: FORMAT_VERSION });
        }
        let slot_count = probe_header.slot_count();
        let primary_len = HEADER_SIZE as u64 + slot_count * SLOT_SIZE as u64;
        if (probe.len() as u64) < primary_len {
            return Err(Error::VersionMismatch { path: path.to_path_buf(), found: format_version, expected: FORMAT_VERSION });
        }
        // I1/§6.1 defensive check: a nonzero mphf_size with a zero offset
        // is an inconsistent header (partially published, or corrupt) —
        // reject rather than silently treating the table as unoptimized.
        if probe_header.mphf_size() > 0 && probe_header.mphf_offset() == 0 {
            return Err(Error::VersionMismatch { path: path.to_path_buf(), found: format_version, expected: FORMAT_VERSION });
        }
        drop(probe);

        let primary = if read_only {
            // This maps the whole file, including any appended MPHF region
            // from a prior optimize() — there's no cheaper way to get a
            // single contiguous pointer-stable view with memmap2. `slots()`
            // stays safe because `SlotArray` is bounded by `slot_count`, and
            // `primary_len_bytes()` below reports the fixed header+slot
            // span arithmetically rather than from this mapping's length.
            let full = unsafe { Mmap::map(&file) }.map_err(|source| Error::MmapFailed { path: path.to_path_buf(), source })?;
            Backing::Ro(full)
        } else {
            let full = unsafe { MmapMut::map_mut(&file) }.map_err(|source| Error::MmapFailed { path: path.to_path_buf(), source })?;
            Backing::Mut(full)
        };

        Ok(Self {
            primary,
            mphf_file: Mutex::new(mphf_file),
            path: path.to_path_buf(),
            slot_count,
            read_only,
        })
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> HeaderView {
        unsafe { HeaderView::new(self.primary.as_ptr() as *mut u8) }
    }

    /// Slot array view. For a `read_only` mapping the underlying pages are
    /// truly `PROT_READ`-only; `Table` never reaches the write/clear path
    /// on such a handle (it checks `read_only` first), so the `*mut u8`
    /// cast below never gets dereferenced mutably in practice.
    pub fn slots(&self) -> SlotArray {
        unsafe { SlotArray::new(self.primary.as_ptr().add(HEADER_SIZE) as *mut u8, self.slot_count) }
    }

    pub fn slot_count(&self) -> u64 {
        self.slot_count
    }

    /// Length of the fixed header+slot span (I1: `512 + 512*N`). Computed
    /// arithmetically rather than from the mapping's own length: on a
    /// reopened table whose file already has an appended MPHF region, the
    /// underlying mmap covers the whole file, not just this span.
    pub fn primary_len_bytes(&self) -> u64 {
        HEADER_SIZE as u64 + self.slot_count * SLOT_SIZE as u64
    }

    /// Total on-disk length, including any appended MPHF region.
    pub fn len_bytes(&self) -> u64 {
        self.mphf_file.lock().metadata().map(|m| m.len()).unwrap_or_else(|_| self.primary_len_bytes())
    }

    /// Reserve `len` bytes after the current end of file for a serialized
    /// MPHF, growing the file if necessary. Does not touch header fields
    /// or relocate the slot array — caller publishes the offset/size.
    /// Takes `&self`: the primary mapping is untouched, so this never
    /// races with concurrent readers holding slot/header pointers.
    pub fn reserve_mphf_region(&self, len: u64) -> Result<u64> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let file = self.mphf_file.lock();
        let current_len = file
            .metadata()
            .map_err(|source| Error::FileOpenFailed { path: self.path.clone(), source })?
            .len();
        let slot_region_end = self.primary_len_bytes();
        let offset = current_len.max(slot_region_end);
        let needed = offset + len;
        if needed > current_len {
            file.set_len(needed)
                .map_err(|source| Error::FileTruncateFailed { path: self.path.clone(), requested: needed, source })?;
        }
        Ok(offset)
    }

    /// Read back `len` bytes at `offset` — used to deserialize an
    /// installed MPHF on open, or to re-verify it after a build.
    pub fn read_region(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut file = self.mphf_file.lock();
        let mut buf = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(offset)).map_err(Error::Journal)?;
        file.read_exact(&mut buf).map_err(Error::Journal)?;
        Ok(buf)
    }

    pub fn write_region(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut file = self.mphf_file.lock();
        file.seek(SeekFrom::Start(offset)).map_err(Error::Journal)?;
        file.write_all(bytes).map_err(Error::Journal)?;
        Ok(())
    }

    pub fn flush(&self, sync: bool) -> Result<()> {
        let result = if sync { self.primary.flush() } else { self.primary.flush_async() };
        result.map_err(|source| Error::MmapFailed { path: self.path.clone(), source })?;
        if sync {
            self.mphf_file.lock().sync_all().map_err(|source| Error::MmapFailed { path: self.path.clone(), source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_sizes_file_exactly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.maph");
        let mapping = Mapping::create(&path, 8).unwrap();
        assert_eq!(mapping.len_bytes(), HEADER_SIZE as u64 + 8 * SLOT_SIZE as u64);
        assert_eq!(mapping.slot_count(), 8);
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not_ours.bin");
        std::fs::write(&path, vec![0u8; HEADER_SIZE + SLOT_SIZE]).unwrap();
        let err = Mapping::open(&path, false).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidMagic);
    }

    #[test]
    fn reopen_preserves_header_and_slots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.maph");
        {
            let mapping = Mapping::create(&path, 4).unwrap();
            mapping.slots().write(0, 42, b"hi").unwrap();
            mapping.flush(true).unwrap();
        }
        let mapping = Mapping::open(&path, false).unwrap();
        assert_eq!(mapping.slot_count(), 4);
        match mapping.slots().read(0, 42) {
            crate::slot::ReadOutcome::Hit(bytes) => assert_eq!(bytes, b"hi"),
            other => panic!("expected Hit, got {other:?}"),
        }
    }

    #[test]
    fn reopen_read_only_sees_existing_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.maph");
        {
            let mapping = Mapping::create(&path, 4).unwrap();
            mapping.slots().write(0, 42, b"hi").unwrap();
            mapping.flush(true).unwrap();
        }
        let mapping = Mapping::open(&path, true).unwrap();
        assert!(mapping.read_only());
        match mapping.slots().read(0, 42) {
            crate::slot::ReadOutcome::Hit(bytes) => assert_eq!(bytes, b"hi"),
            other => panic!("expected Hit, got {other:?}"),
        }
    }

    #[test]
    fn reserve_mphf_region_grows_file_without_remapping_primary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.maph");
        let mapping = Mapping::create(&path, 4).unwrap();
        let base_len = mapping.primary_len_bytes();
        let slots_ptr_before = mapping.slots();
        let offset = mapping.reserve_mphf_region(256).unwrap();
        assert_eq!(offset, base_len);
        assert_eq!(mapping.len_bytes(), base_len + 256);
        assert_eq!(mapping.primary_len_bytes(), base_len);
        // The primary region's slot array is unaffected: still readable.
        assert!(slots_ptr_before.is_empty_slot(0));
    }

    #[test]
    fn mphf_region_round_trips_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.maph");
        let mapping = Mapping::create(&path, 4).unwrap();
        let offset = mapping.reserve_mphf_region(16).unwrap();
        mapping.write_region(offset, b"0123456789abcdef").unwrap();
        let back = mapping.read_region(offset, 16).unwrap();
        assert_eq!(back, b"0123456789abcdef");
    }
}
